//! Lifecycle - Create, read, update and delete one resource instance
//!
//! ```text
//! Absent -> Creating -> Present -> Updating -> Present -> Deleting -> Absent
//!                          |
//!                          +--> Gone (deleted out of band, seen by read)
//! ```
//!
//! Every mutation takes the named locks of the kind's shared parents before
//! it fetches anything, so the whole read-modify-write cycle is serialized,
//! and releases them before reading the result back.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use tokio::time::{Instant, timeout_at};

use crate::client::{ManagementClient, Operation};
use crate::differ;
use crate::error::{CoreError, CoreResult, OperationKind};
use crate::locks::{LockRegistry, acquire_all};
use crate::lro::LroExecutor;
use crate::resource::{Ownership, ResourceKind, Timeouts};
use crate::translate::TranslationError;

/// A resource after a successful create or update
#[derive(Debug, Clone, PartialEq)]
pub struct Applied<D> {
    /// Identifier to persist
    pub id: String,
    pub state: D,
}

/// Result of a read
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome<D> {
    Present(D),
    /// The object no longer exists; the caller should forget it
    Gone,
}

impl<D> ReadOutcome<D> {
    pub fn present(self) -> Option<D> {
        match self {
            ReadOutcome::Present(d) => Some(d),
            ReadOutcome::Gone => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    total: Duration,
}

impl Deadline {
    fn after(total: Duration) -> Self {
        Self {
            at: Instant::now() + total,
            total,
        }
    }
}

/// Serialize a typed document for the schema and the differ
pub fn to_document<T: Serialize>(value: &T) -> CoreResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| CoreError::FieldTranslation(TranslationError::new("(document)", e.to_string())))
}

/// Lifecycle coordinator for one resource kind
pub struct Lifecycle<K: ResourceKind> {
    kind: K,
    client: Arc<dyn ManagementClient>,
    executor: LroExecutor,
    locks: Arc<dyn LockRegistry>,
    timeouts: Timeouts,
}

impl<K: ResourceKind> Lifecycle<K> {
    pub fn new(kind: K, client: Arc<dyn ManagementClient>, locks: Arc<dyn LockRegistry>) -> Self {
        let timeouts = kind.timeouts();
        Self {
            executor: LroExecutor::new(client.clone()),
            kind,
            client,
            locks,
            timeouts,
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.executor = LroExecutor::new(self.client.clone()).with_interval(interval);
        self
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Check a desired document against the kind's schema
    pub fn validate(&self, desired: &K::Desired) -> CoreResult<()> {
        let document = to_document(desired)?;
        self.kind
            .schema()
            .validate(&document)
            .map_err(|errors| CoreError::InvalidConfiguration {
                resource_type: self.kind.type_name().to_string(),
                errors: errors.iter().map(ToString::to_string).collect(),
            })
    }

    async fn fetch(&self, id: &K::Id, deadline: Deadline) -> CoreResult<Option<K::Model>> {
        let target = self.kind.target(id);
        let raw = match timeout_at(
            deadline.at,
            self.client.get(&target, self.kind.api_version()),
        )
        .await
        {
            Ok(raw) => raw?,
            Err(_) => {
                return Err(CoreError::Timeout {
                    id: target.to_string(),
                    operation: OperationKind::Read,
                    after: deadline.total,
                });
            }
        };

        raw.map(|value| {
            serde_json::from_value(value).map_err(|source| CoreError::Decode {
                id: target.to_string(),
                source,
            })
        })
        .transpose()
    }

    async fn put(&self, id: &K::Id, payload: &K::Model, deadline: Deadline) -> CoreResult<()> {
        let operation = Operation::put(
            self.kind.target(id),
            self.kind.api_version(),
            to_document(payload)?,
        );
        self.executor
            .issue_then_poll(&operation, deadline.at)
            .await
            .map(|_| ())
    }

    /// Read the result of a mutation; failures keep the identifier so it can
    /// still be persisted
    async fn read_back(&self, id: &K::Id) -> CoreResult<Applied<K::Desired>> {
        let raw = id.to_string();
        match self.read(id).await {
            Ok(ReadOutcome::Present(state)) => Ok(Applied { id: raw, state }),
            Ok(ReadOutcome::Gone) => Err(CoreError::ReadAfterWrite {
                id: raw.clone(),
                source: Box::new(CoreError::NotFound { id: raw }),
            }),
            Err(e) => Err(CoreError::ReadAfterWrite {
                id: raw,
                source: Box::new(e),
            }),
        }
    }

    pub async fn create(&self, desired: &K::Desired) -> CoreResult<Applied<K::Desired>> {
        let deadline = Deadline::after(self.timeouts.create);
        let id = self.kind.id_for(desired)?;
        let raw = id.to_string();
        self.validate(desired)?;

        {
            let names = self.kind.lock_names(&id, Some(desired))?;
            let _guards = acquire_all(self.locks.as_ref(), names).await;

            let existing = self
                .fetch(&id, deadline)
                .await
                .map_err(|e| e.for_resource(&raw))?;
            let existing = match (self.kind.ownership(), existing) {
                (_, Some(model)) if self.kind.is_present(&id, &model) => {
                    return Err(CoreError::AlreadyExists {
                        resource_type: self.kind.type_name().to_string(),
                        id: raw,
                    });
                }
                (Ownership::Owned, _) => None,
                (Ownership::Association, Some(model)) => Some(model),
                (Ownership::Association, None) => {
                    return Err(CoreError::NotFound {
                        id: self.kind.target(&id).to_string(),
                    });
                }
            };

            let payload = self.kind.expand(desired, existing.as_ref())?;
            debug!("creating {} {}", self.kind.type_name(), raw);
            self.put(&id, &payload, deadline)
                .await
                .map_err(|e| e.for_resource(&raw))?;
            info!("created {} {}", self.kind.type_name(), raw);
        }

        self.read_back(&id).await
    }

    /// Bring a remote object under management
    pub async fn import(&self, raw: &str) -> CoreResult<Applied<K::Desired>> {
        let id = self.kind.parse_id(raw)?;
        match self.read(&id).await? {
            ReadOutcome::Present(state) => Ok(Applied {
                id: id.to_string(),
                state,
            }),
            ReadOutcome::Gone => Err(CoreError::NotFound { id: raw.to_string() }),
        }
    }

    pub async fn read(&self, id: &K::Id) -> CoreResult<ReadOutcome<K::Desired>> {
        let deadline = Deadline::after(self.timeouts.read);
        let raw = id.to_string();

        let model = self
            .fetch(id, deadline)
            .await
            .map_err(|e| e.for_resource(&raw))?;
        let Some(model) = model.filter(|m| self.kind.is_present(id, m)) else {
            info!("{} {} was not found, removing from state", self.kind.type_name(), raw);
            return Ok(ReadOutcome::Gone);
        };

        Ok(ReadOutcome::Present(self.kind.flatten(id, &model)?))
    }

    /// Apply `desired` on top of `prior`, the state recorded by the last read
    pub async fn update(
        &self,
        id: &K::Id,
        prior: &K::Desired,
        desired: &K::Desired,
    ) -> CoreResult<Applied<K::Desired>> {
        let deadline = Deadline::after(self.timeouts.update);
        let raw = id.to_string();
        self.validate(desired)?;

        let schema = self.kind.schema();
        let changes = differ::diff(&schema, &to_document(prior)?, &to_document(desired)?);
        let replace = schema.force_new_fields(&changes);
        if !replace.is_empty() {
            return Err(CoreError::RequiresReplacement {
                id: raw,
                fields: replace,
            });
        }

        if changes.is_empty() {
            debug!("{} {} has no changes", self.kind.type_name(), raw);
            return match self.read(id).await? {
                ReadOutcome::Present(state) => Ok(Applied { id: raw, state }),
                ReadOutcome::Gone => Err(CoreError::NotFound { id: raw }),
            };
        }

        {
            let names = self.kind.lock_names(id, Some(desired))?;
            let _guards = acquire_all(self.locks.as_ref(), names).await;

            let existing = self
                .fetch(id, deadline)
                .await
                .map_err(|e| e.for_resource(&raw))?;
            let Some(existing) = existing.filter(|m| self.kind.is_present(id, m)) else {
                return Err(CoreError::NotFound { id: raw });
            };

            let payload = self.kind.apply_changes(existing, desired, &changes)?;
            debug!(
                "updating {} {} ({})",
                self.kind.type_name(),
                raw,
                changes.iter().cloned().collect::<Vec<_>>().join(", ")
            );
            self.put(id, &payload, deadline)
                .await
                .map_err(|e| e.for_resource(&raw))?;
            info!("updated {} {}", self.kind.type_name(), raw);
        }

        self.read_back(id).await
    }

    /// Delete; an object that is already gone counts as deleted
    pub async fn delete(&self, id: &K::Id) -> CoreResult<()> {
        let deadline = Deadline::after(self.timeouts.delete);
        let raw = id.to_string();

        let names = self.kind.lock_names(id, None)?;
        let _guards = acquire_all(self.locks.as_ref(), names).await;

        match self.kind.ownership() {
            Ownership::Owned => {
                let operation = Operation::delete(self.kind.target(id), self.kind.api_version());
                self.executor
                    .issue_then_poll(&operation, deadline.at)
                    .await
                    .map_err(|e| e.for_resource(&raw))?;
            }
            Ownership::Association => {
                let existing = self
                    .fetch(id, deadline)
                    .await
                    .map_err(|e| e.for_resource(&raw))?;
                match existing.filter(|m| self.kind.is_present(id, m)) {
                    Some(model) => {
                        let payload = self.kind.detach(id, model)?;
                        self.put(id, &payload, deadline)
                            .await
                            .map_err(|e| e.for_resource(&raw))?;
                    }
                    None => debug!("{} {} is already detached", self.kind.type_name(), raw),
                }
            }
        }

        info!("deleted {} {}", self.kind.type_name(), raw);
        Ok(())
    }
}
