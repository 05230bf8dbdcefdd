//! Model backend implementations for sleuth.
//!
//! All providers implement the `sleuth_core::Provider` trait.
//! [`build_from_config`] selects the backend described by the configuration.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{build_from_config, default_base_url};
