//! Memory - In-process management client and lock instrumentation
//!
//! `InMemoryClient` behaves like a small ARM endpoint: objects are keyed by
//! their identifier (case-insensitively), mutations are accepted and complete
//! after a configurable number of polls, and failures can be injected. Writes
//! become visible only when their operation completes, the way a real
//! asynchronous API behaves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;

use crate::client::{
    BoxFuture, ManagementClient, Operation, PollHandle, PollStatus, PollStyle, Submitted,
};
use crate::error::{CoreResult, OperationKind};
use crate::identifier::ResourceIdentifier;
use crate::locks::{LockGuard, LockName, LockRegistry, NamedLocks};

/// A call observed by [`InMemoryClient`]
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Get(String),
    Put(String, Value),
    Delete(String),
    Poll(String),
}

type PutHook = Box<dyn Fn(&ResourceIdentifier, &mut Value) + Send + Sync>;

enum Write {
    Put(String, Value),
    Delete(String),
}

struct Running {
    remaining: usize,
    outcome: PollStatus,
    write: Option<Write>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Value>,
    running: HashMap<String, Running>,
    next_operation: usize,
    calls: Vec<Call>,
    polls_before_done: usize,
    retry_after: Option<Duration>,
    never_complete: bool,
    failure: Option<(String, String)>,
}

impl Inner {
    fn apply(&mut self, write: Write) -> Option<Value> {
        match write {
            Write::Put(key, value) => {
                self.objects.insert(key, value.clone());
                Some(value)
            }
            Write::Delete(key) => {
                self.objects.remove(&key);
                None
            }
        }
    }
}

#[derive(Default)]
pub struct InMemoryClient {
    inner: Mutex<Inner>,
    put_hook: Option<PutHook>,
}

fn key(raw: &str) -> String {
    raw.trim_end_matches('/').to_ascii_lowercase()
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of polls answering "in progress" before a mutation completes;
    /// zero completes mutations synchronously
    pub fn with_polls(self, polls: usize) -> Self {
        self.lock().polls_before_done = polls;
        self
    }

    pub fn with_retry_after(self, retry_after: Duration) -> Self {
        self.lock().retry_after = Some(retry_after);
        self
    }

    /// Mutations are accepted but never finish
    pub fn never_complete(self) -> Self {
        self.lock().never_complete = true;
        self
    }

    /// Adjust stored objects the way the server would (computed fields,
    /// defaults)
    pub fn with_put_hook(
        mut self,
        hook: impl Fn(&ResourceIdentifier, &mut Value) + Send + Sync + 'static,
    ) -> Self {
        self.put_hook = Some(Box::new(hook));
        self
    }

    /// Fail the next mutation remotely
    pub fn fail_next(&self, code: &str, message: &str) {
        self.lock().failure = Some((code.to_string(), message.to_string()));
    }

    /// Store an object as if it had been created out of band
    pub fn insert(&self, id: &str, value: Value) {
        self.lock().objects.insert(key(id), value);
    }

    /// Delete an object out of band
    pub fn remove(&self, id: &str) -> Option<Value> {
        self.lock().objects.remove(&key(id))
    }

    pub fn object(&self, id: &str) -> Option<Value> {
        self.lock().objects.get(&key(id)).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Bodies of every PUT, in order
    pub fn puts(&self) -> Vec<(String, Value)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Put(id, body) => Some((id.clone(), body.clone())),
                _ => None,
            })
            .collect()
    }

    fn stored(&self, target: &ResourceIdentifier, body: &Value) -> Value {
        let mut stored = body.clone();
        if let Value::Object(map) = &mut stored {
            map.insert("id".to_string(), Value::String(target.format()));
            map.insert("name".to_string(), Value::String(target.name().to_string()));
            if let Some(Value::Object(properties)) = map.get_mut("properties") {
                properties.insert(
                    "provisioningState".to_string(),
                    Value::String("Succeeded".to_string()),
                );
            }
        }
        if let Some(hook) = &self.put_hook {
            hook(target, &mut stored);
        }
        stored
    }
}

impl ManagementClient for InMemoryClient {
    fn get<'a>(
        &'a self,
        id: &'a ResourceIdentifier,
        _api_version: &'a str,
    ) -> BoxFuture<'a, CoreResult<Option<Value>>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(Call::Get(id.format()));
            Ok(inner.objects.get(&key(&id.format())).cloned())
        })
    }

    fn submit<'a>(&'a self, operation: &'a Operation) -> BoxFuture<'a, CoreResult<Submitted>> {
        Box::pin(async move {
            let target = operation.target.format();
            let write = match operation.kind {
                OperationKind::Delete => {
                    let mut inner = self.lock();
                    inner.calls.push(Call::Delete(target.clone()));
                    if !inner.objects.contains_key(&key(&target)) {
                        return Ok(Submitted::NotFound);
                    }
                    Write::Delete(key(&target))
                }
                _ => {
                    let body = operation.body.clone().unwrap_or(Value::Null);
                    let stored = self.stored(&operation.target, &body);
                    self.lock().calls.push(Call::Put(target.clone(), body));
                    Write::Put(key(&target), stored)
                }
            };

            let mut inner = self.lock();
            let failure = inner.failure.take();
            if failure.is_none() && inner.polls_before_done == 0 && !inner.never_complete {
                return Ok(Submitted::Completed(inner.apply(write)));
            }

            let (outcome, write) = match failure {
                Some((code, message)) => (PollStatus::Failed { code, message }, None),
                None => (PollStatus::Succeeded(None), Some(write)),
            };
            inner.next_operation += 1;
            let url = format!("memory://operations/{}", inner.next_operation);
            let remaining = inner.polls_before_done;
            inner.running.insert(
                url.clone(),
                Running {
                    remaining,
                    outcome,
                    write,
                },
            );

            Ok(Submitted::Accepted(PollHandle {
                target: operation.target.clone(),
                kind: operation.kind,
                api_version: operation.api_version,
                style: PollStyle::AsyncOperation,
                url: Some(url),
                retry_after: inner.retry_after,
            }))
        })
    }

    fn poll<'a>(&'a self, handle: &'a PollHandle) -> BoxFuture<'a, CoreResult<PollStatus>> {
        Box::pin(async move {
            let url = handle.url.clone().unwrap_or_default();
            let mut inner = self.lock();
            inner.calls.push(Call::Poll(url.clone()));

            let retry_after = inner.retry_after;
            if inner.never_complete {
                return Ok(PollStatus::InProgress { retry_after });
            }

            let Some(mut running) = inner.running.remove(&url) else {
                return Ok(PollStatus::NotFound);
            };
            if running.remaining > 0 {
                running.remaining -= 1;
                inner.running.insert(url, running);
                return Ok(PollStatus::InProgress { retry_after });
            }

            Ok(match (running.outcome, running.write) {
                (PollStatus::Succeeded(_), Some(write)) => PollStatus::Succeeded(inner.apply(write)),
                (outcome, _) => outcome,
            })
        })
    }
}

struct Release {
    holders: Arc<Mutex<HashMap<LockName, usize>>>,
    name: LockName,
}

impl Drop for Release {
    fn drop(&mut self) {
        let mut holders = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = holders.get_mut(&self.name) {
            *count -= 1;
        }
    }
}

/// [`NamedLocks`] that records how many holders each name had at once
#[derive(Clone, Default)]
pub struct InstrumentedLocks {
    inner: NamedLocks,
    holders: Arc<Mutex<HashMap<LockName, usize>>>,
    acquired: Arc<Mutex<Vec<LockName>>>,
    max_holders: Arc<AtomicUsize>,
}

impl InstrumentedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest number of simultaneous holders seen for any single name
    pub fn max_holders(&self) -> usize {
        self.max_holders.load(Ordering::SeqCst)
    }

    /// Every acquisition, in order
    pub fn acquired(&self) -> Vec<LockName> {
        self.acquired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names currently held or waited on
    pub fn active(&self) -> usize {
        self.inner.active()
    }
}

impl LockRegistry for InstrumentedLocks {
    fn acquire<'a>(&'a self, name: &'a LockName) -> BoxFuture<'a, LockGuard> {
        Box::pin(async move {
            let guard = self.inner.acquire(name).await;
            {
                let mut holders = self.holders.lock().unwrap_or_else(PoisonError::into_inner);
                let count = holders.entry(name.clone()).or_insert(0);
                *count += 1;
                self.max_holders.fetch_max(*count, Ordering::SeqCst);
            }
            self.acquired
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(name.clone());

            let release = Release {
                holders: self.holders.clone(),
                name: name.clone(),
            };
            LockGuard::new(name.clone(), (release, guard))
        })
    }
}
