//! # durable-checkpoint — operation log, codec and checkpoint-client abstractions
//!
//! This crate is the wire/storage layer underneath the durable execution coordination
//! core (`durable-runtime`). It knows nothing about retries, replay or suspension; it only
//! defines:
//!
//! - [`operation`] — the [`Operation`]/[`OperationUpdate`] data model that is the unit of
//!   durability for a workflow handler.
//! - [`codec`] — the [`Codec`] trait user payloads and error records are serialized through.
//! - [`client`] — the [`CheckpointClient`] trait the coordination core uses to talk to a
//!   backend, plus an in-memory test double.
//! - [`store`] — [`OperationStore`], the execution's local, merge-safe view of its log.
//! - [`error`] — [`CheckpointError`], this layer's error taxonomy.
//!
//! ## Example
//!
//! ```rust
//! use durable_checkpoint::codec::{Codec, JsonCodec};
//! use durable_checkpoint::operation::{Operation, OperationKind};
//! use durable_checkpoint::store::OperationStore;
//!
//! let codec: &dyn Codec = &JsonCodec::new();
//! let payload = codec.serialize(&42i32).unwrap();
//!
//! let store = OperationStore::new();
//! let op = Operation::new("1".to_string(), OperationKind::Step);
//! store.insert_new(op);
//! assert_eq!(store.len(), 1);
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod operation;
pub mod store;

pub use client::{CheckpointClient, CheckpointResponse, ExecutionStatePage};
pub use codec::{BincodeCodec, Codec, JsonCodec};
pub use error::{CheckpointError, Result};
pub use operation::{
    CallbackOptions, ChainedInvokeOptions, ContextOptions, ErrorRecord, ExecutionDetails,
    Operation, OperationKind, OperationStatus, OperationUpdate, UpdateAction, WaitOptions,
};
pub use store::OperationStore;

#[cfg(any(test, feature = "test-util"))]
pub use client::InMemoryCheckpointClient;
