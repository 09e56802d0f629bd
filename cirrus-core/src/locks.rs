//! Locks - Named mutexes serializing mutations of a shared parent object
//!
//! Two resources that live under the same parent (subnets of one virtual
//! network, public IPs of one NAT gateway) must not read-modify-write that
//! parent at the same time. Every lifecycle call takes the locks of the
//! parents it touches and holds them until the call returns.
//!
//! Locks are not re-entrant: acquiring a name that the same task already holds
//! waits forever.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use tokio::sync::Mutex as AsyncMutex;

use crate::client::BoxFuture;

/// Name of a lock: `{scope}.{key}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockName(String);

impl LockName {
    /// `scope` is the type of the shared object, `key` its identifier
    pub fn new(scope: &str, key: impl fmt::Display) -> Self {
        Self(format!("{}.{}", scope, key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proof that a named lock is held; dropping it releases the lock
pub struct LockGuard {
    name: LockName,
    _held: Box<dyn Send>,
}

impl LockGuard {
    /// Wrap whatever keeps the lock held; `held` is dropped on release
    pub fn new(name: LockName, held: impl Send + 'static) -> Self {
        Self {
            name,
            _held: Box::new(held),
        }
    }

    pub fn name(&self) -> &LockName {
        &self.name
    }

    pub fn release(self) {}
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!("released lock {}", self.name);
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("name", &self.name).finish()
    }
}

/// Table of named locks shared by every lifecycle of a provider
pub trait LockRegistry: Send + Sync {
    /// Wait until no other task holds `name`, then take it
    fn acquire<'a>(&'a self, name: &'a LockName) -> BoxFuture<'a, LockGuard>;
}

impl<T: LockRegistry + ?Sized> LockRegistry for Arc<T> {
    fn acquire<'a>(&'a self, name: &'a LockName) -> BoxFuture<'a, LockGuard> {
        (**self).acquire(name)
    }
}

/// Acquire several locks in one global order (sorted, de-duplicated) so two
/// callers that need overlapping sets cannot deadlock each other
pub async fn acquire_all(registry: &dyn LockRegistry, mut names: Vec<LockName>) -> Vec<LockGuard> {
    names.sort();
    names.dedup();

    let mut guards = Vec::with_capacity(names.len());
    for name in &names {
        guards.push(registry.acquire(name).await);
    }
    guards
}

struct Entry {
    mutex: Arc<AsyncMutex<()>>,
    refs: usize,
}

type Table = Arc<Mutex<HashMap<LockName, Entry>>>;

/// In-process [`LockRegistry`]
///
/// Entries are created on first use and removed once no guard or waiter
/// refers to them.
#[derive(Clone, Default)]
pub struct NamedLocks {
    table: Table,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of names currently held or waited on
    pub fn active(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Registers interest in an entry; removes the entry when the last one goes
struct Ticket {
    table: Table,
    name: LockName,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = table.get_mut(&self.name) {
            entry.refs -= 1;
            if entry.refs == 0 {
                table.remove(&self.name);
            }
        }
    }
}

impl LockRegistry for NamedLocks {
    fn acquire<'a>(&'a self, name: &'a LockName) -> BoxFuture<'a, LockGuard> {
        Box::pin(async move {
            let mutex = {
                let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
                let entry = table.entry(name.clone()).or_insert_with(|| Entry {
                    mutex: Arc::new(AsyncMutex::new(())),
                    refs: 0,
                });
                entry.refs += 1;
                entry.mutex.clone()
            };
            // Created before waiting so a cancelled acquire still gives up its reference
            let ticket = Ticket {
                table: self.table.clone(),
                name: name.clone(),
            };

            debug!("acquiring lock {}", name);
            let held = mutex.lock_owned().await;
            debug!("acquired lock {}", name);

            // The mutex guard is dropped before the ticket
            LockGuard::new(name.clone(), (held, ticket))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn lock_name_format() {
        let name = LockName::new("azurerm_virtual_network", "/subscriptions/0/vnet1");
        assert_eq!(name.as_str(), "azurerm_virtual_network./subscriptions/0/vnet1");
    }

    #[tokio::test]
    async fn entries_are_removed_after_release() {
        let locks = NamedLocks::new();
        let name = LockName::new("scope", "a");

        let guard = locks.acquire(&name).await;
        assert_eq!(locks.active(), 1);
        guard.release();
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn same_name_is_mutually_exclusive() {
        let locks = Arc::new(NamedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max = max.clone();
            tasks.push(tokio::spawn(async move {
                let name = LockName::new("scope", "shared");
                let _guard = locks.acquire(&name).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_names_do_not_block() {
        let locks = NamedLocks::new();
        let _a = locks.acquire(&LockName::new("scope", "a")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(&LockName::new("scope", "b")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn reentrant_acquire_never_completes() {
        let locks = NamedLocks::new();
        let name = LockName::new("scope", "a");

        let _held = locks.acquire(&name).await;
        let second = tokio::time::timeout(Duration::from_secs(60), locks.acquire(&name)).await;
        assert!(second.is_err(), "re-entrant acquire must not succeed");

        // the abandoned waiter gave up its reference
        assert_eq!(locks.active(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_all_uses_one_order() {
        let locks = Arc::new(NamedLocks::new());
        let a = LockName::new("scope", "a");
        let b = LockName::new("scope", "b");

        let mut tasks = Vec::new();
        for i in 0..4 {
            let locks = locks.clone();
            // half the callers ask in reverse order
            let names = if i % 2 == 0 {
                vec![a.clone(), b.clone()]
            } else {
                vec![b.clone(), a.clone(), b.clone()]
            };
            tasks.push(tokio::spawn(async move {
                let guards = acquire_all(locks.as_ref(), names).await;
                assert_eq!(guards.len(), 2);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for task in tasks {
            tokio::time::timeout(Duration::from_secs(10), task)
                .await
                .expect("deadlocked")
                .unwrap();
        }
        assert_eq!(locks.active(), 0);
    }
}
