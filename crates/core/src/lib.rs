//! # sleuth core
//!
//! Domain types, traits, and error definitions for the sleuth agent runtime.
//! This crate holds no I/O: it defines the model that the gateway, the
//! agent loop, and the backends implement against.
//!
//! ## Layout
//!
//! - [`message`]: role-tagged messages sent to a model
//! - [`provider`]: the model backend contract and request/response types
//! - [`tool`]: tool specifications, call requests, and the dispatch registry
//! - [`cancel`]: the cooperative cancellation flag shared by a session
//! - [`event`]: progress events for front ends

pub mod cancel;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use cancel::CancelFlag;
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, Role};
pub use provider::{
    ModelProfile, Provider, ProviderRequest, ProviderResponse, ResponseFormat, StreamChunk,
    ToolChoice, Usage,
};
pub use tool::{
    ParamSpec, ParamType, Tool, ToolCallRequest, ToolRegistry, ToolResult, ToolSpecification,
};
