// # aci-rest-core
//
// Reconciliation and retry engine for one hierarchical object held by an
// ACI-style REST object store.
//
// ## Architecture Overview
//
// - **Transport**: Trait for the single-shot network capability
// - **Dispatcher**: Builds paths and payloads, classifies one response
// - **Reconciler**: Refreshes tracked attributes and children from a read
// - **Backoff**: Jittered exponential retry delays
// - **Orchestrator**: Lifecycle operations (create/read/update/delete/import)
//   wrapping dispatch and reconciliation in the retry policy
//
// ## Design Principles
//
// 1. **Single-shot transports**: Retrying happens in exactly one place
// 2. **Tracked state only**: Reads never introduce undeclared attributes
// 3. **Library-First**: The CLI is a thin shell over this crate

pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod document;
pub mod engine;
pub mod error;
pub mod model;
pub mod payload;
pub mod reconciler;
pub mod traits;
pub mod transport;

// Re-export core types for convenience
pub use backoff::{Backoff, BackoffPolicy};
pub use config::{BackoffConfig, RestConfig, RulesConfig};
pub use document::Document;
pub use engine::{LifecycleEvent, Operation, Orchestrator, ReadOutcome};
pub use error::{Error, Result};
pub use model::{Attributes, ChildRef, ManagedObject};
pub use traits::{Method, Transport};
pub use transport::MemoryTransport;
