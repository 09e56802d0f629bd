//! Client - Boundary to the remote management API
//!
//! The lifecycle core talks to the cloud only through [`ManagementClient`]:
//! fetch an object, submit a mutation, poll a submitted mutation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{CoreResult, OperationKind};
use crate::identifier::ResourceIdentifier;

/// Return type for async operations of object-safe traits
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A mutating call against one remote object
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub target: ResourceIdentifier,
    pub api_version: &'static str,
    /// Request payload of a create/update; `None` for deletes
    pub body: Option<Value>,
}

impl Operation {
    pub fn put(target: ResourceIdentifier, api_version: &'static str, body: Value) -> Self {
        Self {
            kind: OperationKind::CreateOrUpdate,
            target,
            api_version,
            body: Some(body),
        }
    }

    pub fn delete(target: ResourceIdentifier, api_version: &'static str) -> Self {
        Self {
            kind: OperationKind::Delete,
            target,
            api_version,
            body: None,
        }
    }
}

/// How a submitted operation reports its progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStyle {
    /// A status document at a separate URL (`{"status": "InProgress"}`)
    AsyncOperation,
    /// A URL answering 202 while running and 200/204 when done
    Location,
    /// The object's own `provisioningState`
    ProvisioningState,
}

/// Everything needed to poll an accepted operation
#[derive(Debug, Clone, PartialEq)]
pub struct PollHandle {
    pub target: ResourceIdentifier,
    pub kind: OperationKind,
    pub api_version: &'static str,
    pub style: PollStyle,
    /// Status URL for [`PollStyle::AsyncOperation`] and [`PollStyle::Location`]
    pub url: Option<String>,
    /// Server-suggested delay before the first poll
    pub retry_after: Option<Duration>,
}

/// Immediate answer to a submitted operation
#[derive(Debug, Clone, PartialEq)]
pub enum Submitted {
    /// Finished synchronously
    Completed(Option<Value>),
    /// Accepted; progress must be polled
    Accepted(PollHandle),
    /// The target (or its parent) does not exist
    NotFound,
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    InProgress { retry_after: Option<Duration> },
    Succeeded(Option<Value>),
    Failed { code: String, message: String },
    Canceled { message: String },
    NotFound,
}

/// Remote management API
pub trait ManagementClient: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    fn get<'a>(
        &'a self,
        id: &'a ResourceIdentifier,
        api_version: &'a str,
    ) -> BoxFuture<'a, CoreResult<Option<Value>>>;

    fn submit<'a>(&'a self, operation: &'a Operation) -> BoxFuture<'a, CoreResult<Submitted>>;

    fn poll<'a>(&'a self, handle: &'a PollHandle) -> BoxFuture<'a, CoreResult<PollStatus>>;
}

impl ManagementClient for Box<dyn ManagementClient> {
    fn get<'a>(
        &'a self,
        id: &'a ResourceIdentifier,
        api_version: &'a str,
    ) -> BoxFuture<'a, CoreResult<Option<Value>>> {
        (**self).get(id, api_version)
    }

    fn submit<'a>(&'a self, operation: &'a Operation) -> BoxFuture<'a, CoreResult<Submitted>> {
        (**self).submit(operation)
    }

    fn poll<'a>(&'a self, handle: &'a PollHandle) -> BoxFuture<'a, CoreResult<PollStatus>> {
        (**self).poll(handle)
    }
}

impl<T: ManagementClient + ?Sized> ManagementClient for Arc<T> {
    fn get<'a>(
        &'a self,
        id: &'a ResourceIdentifier,
        api_version: &'a str,
    ) -> BoxFuture<'a, CoreResult<Option<Value>>> {
        (**self).get(id, api_version)
    }

    fn submit<'a>(&'a self, operation: &'a Operation) -> BoxFuture<'a, CoreResult<Submitted>> {
        (**self).submit(operation)
    }

    fn poll<'a>(&'a self, handle: &'a PollHandle) -> BoxFuture<'a, CoreResult<PollStatus>> {
        (**self).poll(handle)
    }
}
