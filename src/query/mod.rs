//! Plan execution and result envelopes.
//!
//! This module isolates store calls and result shaping from the engine
//! that orchestrates a request.

mod envelope;
pub mod executor;

pub use envelope::{EnvelopeError, EnvelopeStatus, FailureKind, MutationSummary, ResultEnvelope};
pub use executor::ExecutorAdapter;
