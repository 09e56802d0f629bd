//! Resource - What a resource kind tells the lifecycle core
//!
//! A kind knows how to address its remote object, which shared parents must
//! be locked while it is mutated, and how to translate between its desired
//! document and the remote model. The lifecycle core does the rest.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::differ::ChangeSet;
use crate::error::CoreResult;
use crate::identifier::ResourceIdentifier;
use crate::locks::LockName;
use crate::schema::ResourceSchema;
use crate::translate::TranslationError;

/// Local deadlines for each lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(30 * 60),
            delete: Duration::from_secs(30 * 60),
        }
    }
}

/// How a kind relates to the object its calls are addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The kind owns its target: create puts it, delete deletes it
    Owned,
    /// The kind is a membership inside a parent object it does not own:
    /// create and delete rewrite the parent
    Association,
}

/// One resource type
pub trait ResourceKind: Send + Sync + 'static {
    /// Parsed identifier
    type Id: Clone + fmt::Display + Send + Sync;
    /// Desired document, also the shape reads are reported in
    type Desired: Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync;
    /// Remote model
    type Model: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync;

    /// Resource type name (e.g., "azurerm_subnet")
    fn type_name(&self) -> &'static str;

    fn api_version(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    fn ownership(&self) -> Ownership {
        Ownership::Owned
    }

    /// Identifier the desired document will be created under
    fn id_for(&self, desired: &Self::Desired) -> CoreResult<Self::Id>;

    fn parse_id(&self, raw: &str) -> CoreResult<Self::Id>;

    /// Remote object the calls for `id` are addressed to
    fn target(&self, id: &Self::Id) -> ResourceIdentifier;

    /// Named locks of the shared parents touched when mutating `id`
    ///
    /// `desired` is `None` on delete.
    fn lock_names(
        &self,
        _id: &Self::Id,
        _desired: Option<&Self::Desired>,
    ) -> CoreResult<Vec<LockName>> {
        Ok(Vec::new())
    }

    /// Whether the fetched target actually holds `id`
    fn is_present(&self, _id: &Self::Id, _model: &Self::Model) -> bool {
        true
    }

    /// Build the request payload; `existing` is the fetched target of an
    /// association
    fn expand(
        &self,
        desired: &Self::Desired,
        existing: Option<&Self::Model>,
    ) -> CoreResult<Self::Model>;

    /// Copy the changed attributes onto the fetched model
    fn apply_changes(
        &self,
        existing: Self::Model,
        desired: &Self::Desired,
        _changes: &ChangeSet,
    ) -> CoreResult<Self::Model> {
        self.expand(desired, Some(&existing))
    }

    fn flatten(&self, id: &Self::Id, model: &Self::Model) -> Result<Self::Desired, TranslationError>;

    /// Remove `id` from its parent; only called for associations
    fn detach(&self, _id: &Self::Id, model: Self::Model) -> CoreResult<Self::Model> {
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts() {
        let t = Timeouts::default();
        assert_eq!(t.create, Duration::from_secs(1800));
        assert_eq!(t.read, Duration::from_secs(300));
        assert_eq!(t.update, t.create);
        assert_eq!(t.delete, t.create);
    }
}
