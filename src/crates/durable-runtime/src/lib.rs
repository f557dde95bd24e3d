//! Coordination core for durable, checkpoint-replayed workflow execution.
//!
//! This crate owns the parts of the system that only make sense while a handler is actually
//! running: the operation-id scheme, replay detection, per-kind operation semantics (step,
//! wait, invoke, callback, child context), the checkpoint batching and in-process polling
//! that keep the operation log converging with the backend, and the top-level [`executor`]
//! that races a handler's own completion against suspension.
//!
//! The wire/storage data model, the codec, and the `CheckpointClient` contract this crate
//! talks to live one layer down, in `durable_checkpoint`.

pub mod activity;
pub mod batcher;
pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod operations;
pub mod poller;
pub mod retry;

pub use completion::CompletionRegistry;
pub use config::ExecutorConfig;
pub use context::Context;
pub use error::{DurableError, Result};
pub use executor::{ExecutionOutcome, Executor};
pub use operations::{all_of, any_of, CallbackHandle};
pub use retry::{JitterMode, RetryDecision, RetryPolicy};
