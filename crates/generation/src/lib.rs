//! Generation service client.
//!
//! Provides the [`GenerationService`] trait the coordinator dispatches
//! through, an HTTP implementation ([`GenerationApi`]), and the retry
//! backoff policy for transient failures.

pub mod api;
pub mod backoff;
pub mod service;

pub use api::GenerationApi;
pub use backoff::RetryPolicy;
pub use service::{GenerationError, GenerationRequest, GenerationResult, GenerationService};
