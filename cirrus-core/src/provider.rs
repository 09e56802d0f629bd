//! Provider - Type-erased lifecycles keyed by resource type
//!
//! Hosts (the CLI, tests) hold desired documents as JSON. A
//! [`ResourceLifecycle`] accepts those documents, decodes them into the
//! kind's typed desired state and runs the typed [`Lifecycle`].

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::BoxFuture;
use crate::differ::{self, Diff};
use crate::error::{CoreError, CoreResult};
use crate::lifecycle::{Applied, Lifecycle, ReadOutcome, to_document};
use crate::resource::ResourceKind;
use crate::schema::ResourceSchema;
use crate::translate::TranslationError;

/// Lifecycle operations over JSON documents
pub trait ResourceLifecycle: Send + Sync {
    /// Resource type name (e.g., "azurerm_subnet")
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    fn create<'a>(&'a self, desired: &'a Value) -> BoxFuture<'a, CoreResult<Applied<Value>>>;

    fn read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, CoreResult<ReadOutcome<Value>>>;

    fn update<'a>(
        &'a self,
        id: &'a str,
        prior: &'a Value,
        desired: &'a Value,
    ) -> BoxFuture<'a, CoreResult<Applied<Value>>>;

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, CoreResult<()>>;

    fn import<'a>(&'a self, id: &'a str) -> BoxFuture<'a, CoreResult<Applied<Value>>>;

    /// Decide what applying `desired` needs, given the recorded state
    fn plan(&self, prior: Option<&Value>, desired: &Value) -> CoreResult<Diff>;
}

fn decode<D: DeserializeOwned>(type_name: &str, document: &Value) -> CoreResult<D> {
    serde_json::from_value(document.clone())
        .map_err(|e| CoreError::FieldTranslation(TranslationError::new(type_name, e.to_string())))
}

fn erase<D: serde::Serialize>(applied: Applied<D>) -> CoreResult<Applied<Value>> {
    Ok(Applied {
        state: to_document(&applied.state)?,
        id: applied.id,
    })
}

impl<K: ResourceKind> ResourceLifecycle for Lifecycle<K> {
    fn type_name(&self) -> &'static str {
        self.kind().type_name()
    }

    fn schema(&self) -> ResourceSchema {
        self.kind().schema()
    }

    fn create<'a>(&'a self, desired: &'a Value) -> BoxFuture<'a, CoreResult<Applied<Value>>> {
        Box::pin(async move {
            let desired: K::Desired = decode(self.type_name(), desired)?;
            erase(Lifecycle::create(self, &desired).await?)
        })
    }

    fn read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, CoreResult<ReadOutcome<Value>>> {
        Box::pin(async move {
            let id = self.kind().parse_id(id)?;
            match Lifecycle::read(self, &id).await? {
                ReadOutcome::Present(state) => Ok(ReadOutcome::Present(to_document(&state)?)),
                ReadOutcome::Gone => Ok(ReadOutcome::Gone),
            }
        })
    }

    fn update<'a>(
        &'a self,
        id: &'a str,
        prior: &'a Value,
        desired: &'a Value,
    ) -> BoxFuture<'a, CoreResult<Applied<Value>>> {
        Box::pin(async move {
            let id = self.kind().parse_id(id)?;
            let prior: K::Desired = decode(self.type_name(), prior)?;
            let desired: K::Desired = decode(self.type_name(), desired)?;
            erase(Lifecycle::update(self, &id, &prior, &desired).await?)
        })
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, CoreResult<()>> {
        Box::pin(async move {
            let id = self.kind().parse_id(id)?;
            Lifecycle::delete(self, &id).await
        })
    }

    fn import<'a>(&'a self, id: &'a str) -> BoxFuture<'a, CoreResult<Applied<Value>>> {
        Box::pin(async move { erase(Lifecycle::import(self, id).await?) })
    }

    fn plan(&self, prior: Option<&Value>, desired: &Value) -> CoreResult<Diff> {
        let typed: K::Desired = decode(self.type_name(), desired)?;
        self.validate(&typed)?;
        Ok(differ::plan(&self.schema(), prior, &to_document(&typed)?))
    }
}

/// ResourceLifecycle implementation for Box<dyn ResourceLifecycle>
impl ResourceLifecycle for Box<dyn ResourceLifecycle> {
    fn type_name(&self) -> &'static str {
        (**self).type_name()
    }

    fn schema(&self) -> ResourceSchema {
        (**self).schema()
    }

    fn create<'a>(&'a self, desired: &'a Value) -> BoxFuture<'a, CoreResult<Applied<Value>>> {
        (**self).create(desired)
    }

    fn read<'a>(&'a self, id: &'a str) -> BoxFuture<'a, CoreResult<ReadOutcome<Value>>> {
        (**self).read(id)
    }

    fn update<'a>(
        &'a self,
        id: &'a str,
        prior: &'a Value,
        desired: &'a Value,
    ) -> BoxFuture<'a, CoreResult<Applied<Value>>> {
        (**self).update(id, prior, desired)
    }

    fn delete<'a>(&'a self, id: &'a str) -> BoxFuture<'a, CoreResult<()>> {
        (**self).delete(id)
    }

    fn import<'a>(&'a self, id: &'a str) -> BoxFuture<'a, CoreResult<Applied<Value>>> {
        (**self).import(id)
    }

    fn plan(&self, prior: Option<&Value>, desired: &Value) -> CoreResult<Diff> {
        (**self).plan(prior, desired)
    }
}

/// A named set of lifecycles
pub struct Provider {
    name: &'static str,
    lifecycles: BTreeMap<&'static str, Box<dyn ResourceLifecycle>>,
}

impl Provider {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            lifecycles: BTreeMap::new(),
        }
    }

    pub fn register(mut self, lifecycle: impl ResourceLifecycle + 'static) -> Self {
        self.lifecycles
            .insert(lifecycle.type_name(), Box::new(lifecycle));
        self
    }

    /// Name of this Provider (e.g., "azurerm")
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resource types this Provider can handle, sorted
    pub fn resource_types(&self) -> Vec<&'static str> {
        self.lifecycles.keys().copied().collect()
    }

    pub fn lifecycle(&self, resource_type: &str) -> CoreResult<&dyn ResourceLifecycle> {
        self.lifecycles
            .get(resource_type)
            .map(|l| l.as_ref())
            .ok_or_else(|| CoreError::UnknownResourceType(resource_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use crate::identifier::{IdSchema, ResourceIdentifier, Segment};
    use crate::locks::NamedLocks;
    use crate::memory::InMemoryClient;
    use crate::schema::{AttributeSchema, AttributeType};

    static GROUP_ID: IdSchema = IdSchema::new(
        "Resource Group",
        &[
            Segment::value("subscriptions", "subscriptionId"),
            Segment::value("resourceGroups", "resourceGroupName"),
        ],
    );

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Group {
        name: String,
        location: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct GroupModel {
        #[serde(default)]
        location: Option<String>,
    }

    struct GroupKind;

    impl ResourceKind for GroupKind {
        type Id = ResourceIdentifier;
        type Desired = Group;
        type Model = GroupModel;

        fn type_name(&self) -> &'static str {
            "test_group"
        }

        fn api_version(&self) -> &'static str {
            "2021-04-01"
        }

        fn schema(&self) -> ResourceSchema {
            ResourceSchema::new("test_group")
                .attribute(AttributeSchema::new("name", AttributeType::String).required())
                .attribute(
                    AttributeSchema::new("location", AttributeType::String)
                        .required()
                        .force_new(),
                )
        }

        fn id_for(&self, desired: &Group) -> CoreResult<ResourceIdentifier> {
            GROUP_ID.build(&["0000", desired.name.as_str()])
        }

        fn parse_id(&self, raw: &str) -> CoreResult<ResourceIdentifier> {
            GROUP_ID.parse(raw)
        }

        fn target(&self, id: &ResourceIdentifier) -> ResourceIdentifier {
            id.clone()
        }

        fn expand(&self, desired: &Group, _existing: Option<&GroupModel>) -> CoreResult<GroupModel> {
            Ok(GroupModel {
                location: Some(desired.location.clone()),
            })
        }

        fn flatten(&self, id: &ResourceIdentifier, model: &GroupModel) -> Result<Group, TranslationError> {
            Ok(Group {
                name: id.name().to_string(),
                location: model.location.clone().unwrap_or_default(),
            })
        }
    }

    fn provider(client: Arc<InMemoryClient>) -> Provider {
        Provider::new("test").register(Lifecycle::new(
            GroupKind,
            client,
            Arc::new(NamedLocks::new()),
        ))
    }

    #[tokio::test]
    async fn documents_round_trip_through_typed_lifecycle() {
        let provider = provider(Arc::new(InMemoryClient::new()));
        let lc = provider.lifecycle("test_group").unwrap();

        let desired = json!({"name": "rg1", "location": "westeurope"});
        let applied = lc.create(&desired).await.unwrap();
        assert_eq!(applied.id, "/subscriptions/0000/resourceGroups/rg1");
        assert_eq!(applied.state, desired);

        match lc.read(&applied.id).await.unwrap() {
            ReadOutcome::Present(state) => assert_eq!(state, desired),
            ReadOutcome::Gone => panic!("expected present"),
        }

        lc.delete(&applied.id).await.unwrap();
        assert_eq!(lc.read(&applied.id).await.unwrap(), ReadOutcome::Gone);
    }

    #[tokio::test]
    async fn shape_errors_are_translation_errors() {
        let provider = provider(Arc::new(InMemoryClient::new()));
        let lc = provider.lifecycle("test_group").unwrap();

        let err = lc.create(&json!({"name": "rg1"})).await.unwrap_err();
        match err {
            CoreError::FieldTranslation(e) => {
                assert_eq!(e.path, "test_group");
                assert!(e.message.contains("location"));
            }
            other => panic!("expected FieldTranslation, got {}", other),
        }
    }

    #[test]
    fn plan_through_erased_lifecycle() {
        let provider = provider(Arc::new(InMemoryClient::new()));
        let lc = provider.lifecycle("test_group").unwrap();

        let prior = json!({"name": "rg1", "location": "westeurope"});
        assert_eq!(lc.plan(None, &prior).unwrap(), Diff::Create);
        assert_eq!(lc.plan(Some(&prior), &prior).unwrap(), Diff::NoChange);
        assert_eq!(
            lc.plan(Some(&prior), &json!({"name": "rg1", "location": "northeurope"}))
                .unwrap(),
            Diff::Replace(vec!["location".to_string()])
        );
    }

    #[test]
    fn unknown_resource_type() {
        let provider = provider(Arc::new(InMemoryClient::new()));
        assert_eq!(provider.resource_types(), vec!["test_group"]);
        assert!(matches!(
            provider.lifecycle("test_nope"),
            Err(CoreError::UnknownResourceType(_))
        ));
    }
}
