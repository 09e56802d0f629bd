//! Cirrus Core
//!
//! Resource lifecycle coordination for an infrastructure provider that drives
//! an asynchronous, eventually consistent management API.
//!
//! # Overview
//!
//! - **identifier**: hierarchical and composite resource identifiers
//! - **locks**: named mutexes serializing mutations of a shared parent
//! - **translate**: helpers for expanding desired state into payloads and back
//! - **lro**: issue a mutation and poll it to a terminal state or deadline
//! - **lifecycle**: create/read/update/delete of one resource instance
//! - **provider**: lifecycles over JSON documents, keyed by resource type

pub mod client;
pub mod differ;
pub mod error;
pub mod identifier;
pub mod lifecycle;
pub mod locks;
pub mod lro;
pub mod memory;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod translate;

// Re-export main types for convenience
pub use client::{BoxFuture, ManagementClient, Operation, PollHandle, PollStatus, PollStyle, Submitted};
pub use error::{CoreError, CoreResult, OperationKind};
pub use identifier::{CompositeIdentifier, IdSchema, ResourceIdentifier, Segment, parse_composite};
pub use lifecycle::{Applied, Lifecycle, ReadOutcome};
pub use locks::{LockGuard, LockName, LockRegistry, NamedLocks};
pub use provider::{Provider, ResourceLifecycle};
pub use resource::{Ownership, ResourceKind, Timeouts};
