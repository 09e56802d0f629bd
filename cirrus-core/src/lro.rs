//! LRO - Issue a mutating call and wait for it to finish
//!
//! ```text
//! Issued -> Polling -> Succeeded | Failed | NotFound
//! ```
//!
//! The deadline is the only way a wait ends early. Remote work that is still
//! running when it passes is left alone and reported as
//! [`CoreError::Timeout`], so the caller knows the outcome is unknown.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde_json::Value;
use tokio::time::{Instant, sleep_until, timeout_at};

use crate::client::{ManagementClient, Operation, PollHandle, PollStatus, Submitted};
use crate::error::{CoreError, CoreResult, OperationKind};
use crate::identifier::ResourceIdentifier;

/// Poll interval used when the server does not send `Retry-After`
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LroState {
    Issued,
    Polling,
    Succeeded,
    Failed,
    NotFound,
}

/// An issued operation that may still be running remotely
#[derive(Debug)]
pub struct PendingOperation {
    target: ResourceIdentifier,
    kind: OperationKind,
    state: LroState,
    issued_at: Instant,
    handle: Option<PollHandle>,
    result: Option<Value>,
}

impl PendingOperation {
    pub fn state(&self) -> LroState {
        self.state
    }

    pub fn target(&self) -> &ResourceIdentifier {
        &self.target
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

pub struct LroExecutor {
    client: Arc<dyn ManagementClient>,
    interval: Duration,
}

impl LroExecutor {
    pub fn new(client: Arc<dyn ManagementClient>) -> Self {
        Self {
            client,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Submit the operation without waiting for it
    ///
    /// A delete of an object that is already gone counts as succeeded.
    pub async fn issue(&self, operation: &Operation) -> CoreResult<PendingOperation> {
        let mut pending = PendingOperation {
            target: operation.target.clone(),
            kind: operation.kind,
            state: LroState::Issued,
            issued_at: Instant::now(),
            handle: None,
            result: None,
        };

        debug!("issuing {} of {}", operation.kind, operation.target);
        match self.client.submit(operation).await? {
            Submitted::Completed(body) => {
                pending.state = LroState::Succeeded;
                pending.result = body;
            }
            Submitted::Accepted(handle) => {
                pending.state = LroState::Polling;
                pending.handle = Some(handle);
            }
            Submitted::NotFound if operation.kind == OperationKind::Delete => {
                debug!("{} is already gone", operation.target);
                pending.state = LroState::Succeeded;
            }
            Submitted::NotFound => pending.state = LroState::NotFound,
        }
        Ok(pending)
    }

    /// Poll until the operation reaches a terminal state or `deadline` passes
    pub async fn await_completion(
        &self,
        mut pending: PendingOperation,
        deadline: Instant,
    ) -> CoreResult<Option<Value>> {
        let handle = match pending.state {
            LroState::Succeeded => return Ok(pending.result.take()),
            LroState::NotFound => return Err(not_found(&pending)),
            _ => match pending.handle.take() {
                Some(handle) => handle,
                None => return Ok(pending.result.take()),
            },
        };

        let mut wait = handle.retry_after.unwrap_or(self.interval);
        loop {
            let wake = Instant::now() + wait;
            if wake >= deadline {
                sleep_until(deadline).await;
                return Err(timed_out(&pending, deadline));
            }
            sleep_until(wake).await;

            let status = match timeout_at(deadline, self.client.poll(&handle)).await {
                Ok(status) => status?,
                Err(_) => return Err(timed_out(&pending, deadline)),
            };

            match status {
                PollStatus::InProgress { retry_after } => {
                    wait = retry_after.unwrap_or(self.interval);
                    debug!(
                        "{} of {} still in progress, polling again in {:?}",
                        pending.kind, pending.target, wait
                    );
                }
                PollStatus::Succeeded(body) => {
                    pending.state = LroState::Succeeded;
                    debug!("{} of {} succeeded", pending.kind, pending.target);
                    return Ok(body);
                }
                PollStatus::Failed { code, message } => {
                    pending.state = LroState::Failed;
                    return Err(CoreError::RemoteFailed {
                        id: pending.target.to_string(),
                        operation: pending.kind,
                        code,
                        message,
                    });
                }
                PollStatus::Canceled { message } => {
                    pending.state = LroState::Failed;
                    return Err(CoreError::RemoteFailed {
                        id: pending.target.to_string(),
                        operation: pending.kind,
                        code: "Canceled".to_string(),
                        message,
                    });
                }
                PollStatus::NotFound if pending.kind == OperationKind::Delete => {
                    pending.state = LroState::Succeeded;
                    return Ok(None);
                }
                PollStatus::NotFound => {
                    pending.state = LroState::NotFound;
                    return Err(not_found(&pending));
                }
            }
        }
    }

    /// [`issue`](Self::issue) followed by [`await_completion`](Self::await_completion);
    /// the submit itself is also bounded by `deadline`
    pub async fn issue_then_poll(
        &self,
        operation: &Operation,
        deadline: Instant,
    ) -> CoreResult<Option<Value>> {
        let issued_at = Instant::now();
        let pending = match timeout_at(deadline, self.issue(operation)).await {
            Ok(pending) => pending?,
            Err(_) => {
                return Err(CoreError::Timeout {
                    id: operation.target.to_string(),
                    operation: operation.kind,
                    after: deadline.saturating_duration_since(issued_at),
                });
            }
        };
        self.await_completion(pending, deadline).await
    }
}

fn timed_out(pending: &PendingOperation, deadline: Instant) -> CoreError {
    CoreError::Timeout {
        id: pending.target.to_string(),
        operation: pending.kind,
        after: deadline.saturating_duration_since(pending.issued_at),
    }
}

fn not_found(pending: &PendingOperation) -> CoreError {
    CoreError::NotFound {
        id: pending.target.to_string(),
    }
}
