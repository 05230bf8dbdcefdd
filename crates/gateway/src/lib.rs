//! Request gateway for sleuth.
//!
//! Turns a list of messages plus optional tool specifications into a model
//! response. Retries with backoff, streams with a cancel guard, enforces
//! required tool choice, emulates function calling for backends that lack
//! it, and writes an audit log.

pub mod audit;
pub mod backoff;
pub mod emulation;
pub mod gateway;
pub mod result;
pub mod stream;

pub use audit::{AuditHeader, AuditLogger};
pub use backoff::RetryPolicy;
pub use emulation::EnvelopeError;
pub use gateway::{RequestGateway, REINFORCEMENT};
pub use result::{GatewayError, GatewayResponse, GatewayResult};
pub use stream::TokenCallback;
