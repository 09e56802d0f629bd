//! Cirrus State Management
//!
//! Persists what the coordinator needs between runs: for every tracked
//! resource its identifier (the only handle the remote API understands)
//! and the attributes last read back.
//!
//! # Overview
//!
//! - **StateFile**: all tracked resources, with a serial and a lineage
//! - **StateBackend**: a trait for state storage backends
//! - **LockInfo**: who holds the state lock, and until when
//!
//! # Example
//!
//! ```ignore
//! use cirrus_state::{LocalBackend, StateBackend, StateFile};
//!
//! let backend = LocalBackend::new();
//! let lock = backend.acquire_lock("apply").await?;
//! let mut state = backend.read_state().await?.unwrap_or_default();
//!
//! // ... apply changes, record results ...
//!
//! state.increment_serial();
//! backend.write_state(&state).await?;
//! backend.release_lock(&lock).await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod state;

// Re-export main types for convenience
pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::{LocalBackend, create_backend};
pub use lock::LockInfo;
pub use state::{ResourceState, StateFile};
