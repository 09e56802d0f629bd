//! Subcommands over a provider and a state backend
//!
//! Every mutating command holds the state lock for its whole run and
//! writes the state after each resource, so a failure halfway through
//! still leaves every created identifier recorded.

use anyhow::{Context, Result, bail};
use cirrus_core::differ::Diff;
use cirrus_core::{Applied, CoreError, Provider, ReadOutcome, ResourceLifecycle};
use cirrus_state::{LockInfo, ResourceState, StateBackend, StateFile};
use colored::Colorize;
use log::{debug, info, warn};
use serde_json::Value;

use crate::document::{Document, ResourceBlock, resolve_refs};

/// Counts reported at the end of a command
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    pub unchanged: usize,
}

impl Summary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// One line of a plan
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Apply(Diff),
    /// Tracked but no longer in the document
    Delete,
}

enum Outcome {
    Created(Applied<Value>),
    Updated(Applied<Value>),
    /// Carries the refreshed state when a pending record was confirmed
    Unchanged(Option<Applied<Value>>),
}

async fn release(backend: &dyn StateBackend, lock: &LockInfo) {
    if let Err(e) = backend.release_lock(lock).await {
        warn!("failed to release state lock {}: {}", lock.id, e);
    }
}

async fn persist(backend: &dyn StateBackend, state: &mut StateFile) -> Result<()> {
    state.increment_serial();
    backend
        .write_state(state)
        .await
        .context("failed to write state")
}

fn record(state: &mut StateFile, provider: &Provider, resource_type: &str, name: &str, applied: Applied<Value>) {
    state.upsert_resource(
        ResourceState::new(resource_type, name, provider.name(), applied.id).with_attributes(applied.state),
    );
}

fn print_ok(symbol: colored::ColoredString, address: &str) {
    println!("  {} {} {}", "✓".green(), symbol, address);
}

fn print_failed(address: &str, error: &anyhow::Error) {
    println!("  {} {} - {:#}", "✗".red(), address, error);
}

async fn apply_block(
    lifecycle: &dyn ResourceLifecycle,
    block: &ResourceBlock,
    state: &StateFile,
) -> Result<Outcome> {
    let desired = resolve_refs(&block.config, state)?;
    let tracked = state.find_resource(&block.resource_type, &block.name);

    let (id, prior, refreshed) = match tracked {
        None => return Ok(Outcome::Created(lifecycle.create(&desired).await?)),
        Some(tracked) if tracked.pending => match lifecycle.read(&tracked.id).await? {
            ReadOutcome::Present(current) => {
                let refreshed = Applied {
                    id: tracked.id.clone(),
                    state: current.clone(),
                };
                (tracked.id.clone(), current, Some(refreshed))
            }
            ReadOutcome::Gone => return Ok(Outcome::Created(lifecycle.create(&desired).await?)),
        },
        Some(tracked) => (tracked.id.clone(), tracked.attributes.clone(), None),
    };

    match lifecycle.plan(Some(&prior), &desired)? {
        Diff::NoChange => Ok(Outcome::Unchanged(refreshed)),
        Diff::Update(changes) => {
            debug!("{}: updating {:?}", block.address(), changes);
            Ok(Outcome::Updated(lifecycle.update(&id, &prior, &desired).await?))
        }
        Diff::Replace(fields) => Err(CoreError::RequiresReplacement { id, fields }.into()),
        Diff::Create => Ok(Outcome::Created(lifecycle.create(&desired).await?)),
    }
}

async fn delete_tracked(provider: &Provider, resource: &ResourceState) -> Result<()> {
    let lifecycle = provider.lifecycle(&resource.resource_type)?;
    lifecycle.delete(&resource.id).await?;
    Ok(())
}

fn address_of(resource: &ResourceState) -> String {
    format!("{}.{}", resource.resource_type, resource.name)
}

/// Bring the tracked resources in line with `document`
///
/// Resources are created or updated in document order; tracked resources
/// missing from the document are deleted afterwards, newest first.
pub async fn apply(provider: &Provider, backend: &dyn StateBackend, document: &Document) -> Result<Summary> {
    for block in &document.resources {
        provider.lifecycle(&block.resource_type)?;
    }

    let lock = backend.acquire_lock("apply").await?;
    let result = apply_locked(provider, backend, document).await;
    release(backend, &lock).await;
    result
}

async fn apply_locked(provider: &Provider, backend: &dyn StateBackend, document: &Document) -> Result<Summary> {
    let mut state = backend.read_state().await?.unwrap_or_default();
    let mut summary = Summary::default();

    for block in &document.resources {
        let lifecycle = provider.lifecycle(&block.resource_type)?;
        let address = block.address();

        match apply_block(lifecycle, block, &state).await {
            Ok(Outcome::Created(applied)) => {
                record(&mut state, provider, &block.resource_type, &block.name, applied);
                persist(backend, &mut state).await?;
                print_ok("+".green(), &address);
                summary.succeeded += 1;
            }
            Ok(Outcome::Updated(applied)) => {
                record(&mut state, provider, &block.resource_type, &block.name, applied);
                persist(backend, &mut state).await?;
                print_ok("~".yellow(), &address);
                summary.succeeded += 1;
            }
            Ok(Outcome::Unchanged(refreshed)) => {
                if let Some(applied) = refreshed {
                    record(&mut state, provider, &block.resource_type, &block.name, applied);
                    persist(backend, &mut state).await?;
                }
                debug!("{} is up to date", address);
                summary.unchanged += 1;
            }
            Err(e) => {
                print_failed(&address, &e);
                summary.failed += 1;

                let persisted = e
                    .downcast_ref::<CoreError>()
                    .and_then(CoreError::persisted_id)
                    .map(str::to_string);
                if let Some(id) = persisted {
                    warn!("{}: outcome unknown, recording {} for the next run", address, id);
                    let desired = resolve_refs(&block.config, &state).unwrap_or_else(|_| block.config.clone());
                    state.upsert_resource(
                        ResourceState::new(&block.resource_type, &block.name, provider.name(), id)
                            .with_attributes(desired)
                            .with_pending(true),
                    );
                    persist(backend, &mut state).await?;
                }
            }
        }
    }

    let orphans: Vec<ResourceState> = state
        .resources
        .iter()
        .filter(|r| !document.contains(&r.resource_type, &r.name))
        .cloned()
        .collect();
    for orphan in orphans.iter().rev() {
        let address = address_of(orphan);
        match delete_tracked(provider, orphan).await {
            Ok(()) => {
                state.remove_resource(&orphan.resource_type, &orphan.name);
                persist(backend, &mut state).await?;
                print_ok("-".red(), &address);
                summary.succeeded += 1;
            }
            Err(e) => {
                print_failed(&address, &e);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

/// What `apply` would do, without touching the remote API
pub async fn plan(provider: &Provider, backend: &dyn StateBackend, document: &Document) -> Result<Vec<(String, Change)>> {
    let state = backend.read_state().await?.unwrap_or_default();
    let mut changes = Vec::new();

    for block in &document.resources {
        let lifecycle = provider.lifecycle(&block.resource_type)?;
        let tracked = state.find_resource(&block.resource_type, &block.name);

        let diff = match resolve_refs(&block.config, &state) {
            Ok(desired) => lifecycle
                .plan(tracked.map(|t| &t.attributes), &desired)
                .with_context(|| block.address())?,
            // Refers to something not created yet
            Err(_) if tracked.is_none() => Diff::Create,
            Err(e) => return Err(e.context(block.address())),
        };
        changes.push((block.address(), Change::Apply(diff)));
    }

    for resource in state.resources.iter().rev() {
        if !document.contains(&resource.resource_type, &resource.name) {
            changes.push((address_of(resource), Change::Delete));
        }
    }
    Ok(changes)
}

/// Re-read every tracked resource, forgetting the ones deleted out of band
pub async fn refresh(provider: &Provider, backend: &dyn StateBackend) -> Result<Summary> {
    let lock = backend.acquire_lock("refresh").await?;
    let result = refresh_locked(provider, backend).await;
    release(backend, &lock).await;
    result
}

async fn refresh_locked(provider: &Provider, backend: &dyn StateBackend) -> Result<Summary> {
    let mut summary = Summary::default();
    let Some(mut state) = backend.read_state().await? else {
        return Ok(summary);
    };

    let mut changed = false;
    for resource in state.resources.clone() {
        let address = address_of(&resource);
        let read = match provider.lifecycle(&resource.resource_type) {
            Ok(lifecycle) => lifecycle.read(&resource.id).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };

        match read {
            Ok(ReadOutcome::Present(current)) => {
                if current != resource.attributes || resource.pending {
                    info!("{} drifted from the recorded state", address);
                    print_ok("~".yellow(), &address);
                    state.upsert_resource(resource.with_attributes(current).with_pending(false));
                    changed = true;
                    summary.succeeded += 1;
                } else {
                    summary.unchanged += 1;
                }
            }
            Ok(ReadOutcome::Gone) => {
                println!("  {} {} (deleted outside cirrus)", "-".red(), address);
                state.remove_resource(&resource.resource_type, &resource.name);
                changed = true;
                summary.succeeded += 1;
            }
            Err(e) => {
                print_failed(&address, &e);
                summary.failed += 1;
            }
        }
    }

    if changed {
        persist(backend, &mut state).await?;
    }
    Ok(summary)
}

/// Start tracking an existing remote object under `resource_type.name`
pub async fn import(
    provider: &Provider,
    backend: &dyn StateBackend,
    resource_type: &str,
    name: &str,
    id: &str,
) -> Result<ResourceState> {
    let lifecycle = provider.lifecycle(resource_type)?;
    let lock = backend.acquire_lock("import").await?;
    let result = import_locked(provider, backend, lifecycle, resource_type, name, id).await;
    release(backend, &lock).await;
    result
}

async fn import_locked(
    provider: &Provider,
    backend: &dyn StateBackend,
    lifecycle: &dyn ResourceLifecycle,
    resource_type: &str,
    name: &str,
    id: &str,
) -> Result<ResourceState> {
    let mut state = backend.read_state().await?.unwrap_or_default();
    if state.find_resource(resource_type, name).is_some() {
        bail!("{}.{} is already tracked", resource_type, name);
    }
    if let Some(existing) = state.find_by_id(id) {
        bail!("{} is already tracked as {}", id, address_of(existing));
    }

    let applied = lifecycle.import(id).await?;
    record(&mut state, provider, resource_type, name, applied);
    persist(backend, &mut state).await?;

    state
        .find_resource(resource_type, name)
        .cloned()
        .context("imported resource missing from state")
}

/// Delete every tracked resource, newest first
pub async fn destroy(provider: &Provider, backend: &dyn StateBackend) -> Result<Summary> {
    let lock = backend.acquire_lock("destroy").await?;
    let result = destroy_locked(provider, backend).await;
    release(backend, &lock).await;
    result
}

async fn destroy_locked(provider: &Provider, backend: &dyn StateBackend) -> Result<Summary> {
    let mut summary = Summary::default();
    let Some(mut state) = backend.read_state().await? else {
        return Ok(summary);
    };

    for resource in state.resources.clone().iter().rev() {
        let address = address_of(resource);
        match delete_tracked(provider, resource).await {
            Ok(()) => {
                state.remove_resource(&resource.resource_type, &resource.name);
                persist(backend, &mut state).await?;
                print_ok("-".red(), &address);
                summary.succeeded += 1;
            }
            Err(e) => {
                print_failed(&address, &e);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
