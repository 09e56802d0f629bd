//! Differ - Compare a prior document with a desired document
//!
//! Documents are the JSON form of a kind's desired state. Attributes are
//! compared after normalization: absent values fall back to the schema
//! default, empty containers equal absent ones, and unordered lists are
//! compared as sets.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::schema::{AttributeSchema, AttributeType, ResourceSchema};

/// Names of the top-level attributes that differ
pub type ChangeSet = BTreeSet<String>;

/// Result of a plan
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create,
    /// Resource exists with differences that can be applied in place
    Update(ChangeSet),
    /// Resource exists, but some changed attributes force a new one
    Replace(Vec<String>),
    /// Resource exists with no differences -> no action needed
    NoChange,
}

impl Diff {
    /// Returns whether this Diff involves a change
    pub fn is_change(&self) -> bool {
        !matches!(self, Diff::NoChange)
    }
}

/// Decide what applying `desired` on top of `prior` needs
pub fn plan(schema: &ResourceSchema, prior: Option<&Value>, desired: &Value) -> Diff {
    let Some(prior) = prior else {
        return Diff::Create;
    };

    let changes = diff(schema, prior, desired);
    if changes.is_empty() {
        return Diff::NoChange;
    }

    let replace = schema.force_new_fields(&changes);
    if replace.is_empty() {
        Diff::Update(changes)
    } else {
        Diff::Replace(replace)
    }
}

/// Find changed attributes between prior and desired documents
pub fn diff(schema: &ResourceSchema, prior: &Value, desired: &Value) -> ChangeSet {
    let mut changed = ChangeSet::new();

    for (name, attribute) in &schema.attributes {
        if attribute.read_only {
            continue;
        }

        let desired_value = normalize(attribute, desired.get(name));
        // Left to the remote side
        if attribute.computed && desired_value.is_none() {
            continue;
        }

        let mut prior_value = normalize(attribute, prior.get(name));
        if let (Some(p), Some(d)) = (prior_value.as_mut(), desired_value.as_ref()) {
            drop_unset_computed(attribute, p, d);
        }

        if prior_value != desired_value {
            changed.insert(name.clone());
        }
    }

    changed
}

fn normalize(attribute: &AttributeSchema, value: Option<&Value>) -> Option<Value> {
    let value = match value {
        None | Some(Value::Null) => attribute.default.clone()?,
        Some(v) => v.clone(),
    };

    match normalize_value(&attribute.attr_type, value) {
        Value::Array(items) if items.is_empty() => None,
        Value::Object(map) if map.is_empty() => None,
        Value::Array(mut items) => {
            if !attribute.ordered {
                sort_items(&mut items);
            }
            Some(Value::Array(items))
        }
        other => Some(other),
    }
}

/// Fill block defaults and drop nulls so both sides have the same shape
fn normalize_value(attr_type: &AttributeType, value: Value) -> Value {
    match (attr_type, value) {
        (AttributeType::List(inner), Value::Array(items)) => Value::Array(
            items
                .into_iter()
                .map(|item| normalize_value(inner, item))
                .collect(),
        ),
        (AttributeType::Block(attributes), Value::Object(mut map)) => {
            map.retain(|_, v| !v.is_null());
            for attribute in attributes {
                match map.remove(&attribute.name) {
                    Some(v) => {
                        map.insert(attribute.name.clone(), normalize_value(&attribute.attr_type, v));
                    }
                    None => {
                        if let Some(default) = &attribute.default {
                            map.insert(attribute.name.clone(), default.clone());
                        }
                    }
                }
            }
            Value::Object(map)
        }
        (_, other) => other,
    }
}

/// Remove computed block fields from the prior value wherever the desired
/// value leaves them unset
fn drop_unset_computed(attribute: &AttributeSchema, prior: &mut Value, desired: &Value) {
    let (block, blocks) = match &attribute.attr_type {
        AttributeType::Block(block) => (block, false),
        AttributeType::List(inner) => match inner.as_ref() {
            AttributeType::Block(block) => (block, true),
            _ => return,
        },
        _ => return,
    };

    let strip = |prior: &mut Value, desired: Option<&Value>| {
        let Value::Object(map) = prior else { return };
        for sub in block.iter().filter(|a| a.computed) {
            if desired.and_then(|d| d.get(&sub.name)).is_none() {
                map.remove(&sub.name);
            }
        }
    };

    if !blocks {
        strip(prior, Some(desired));
        return;
    }

    let (Value::Array(prior_items), Value::Array(desired_items)) = (prior, desired) else {
        return;
    };
    for (i, item) in prior_items.iter_mut().enumerate() {
        let counterpart = match item.get("name").and_then(Value::as_str) {
            Some(name) if !attribute.ordered => desired_items
                .iter()
                .find(|d| d.get("name").and_then(Value::as_str) == Some(name)),
            _ => desired_items.get(i),
        };
        strip(item, counterpart);
    }
    if !attribute.ordered {
        sort_items(prior_items);
    }
}

fn sort_items(items: &mut [Value]) {
    items.sort_by_key(|item| item.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("azurerm_network_interface")
            .attribute(AttributeSchema::new("name", AttributeType::String).required().force_new())
            .attribute(
                AttributeSchema::new("enable_ip_forwarding", AttributeType::Bool)
                    .with_default(json!(false)),
            )
            .attribute(
                AttributeSchema::new(
                    "dns_servers",
                    AttributeType::List(Box::new(AttributeType::String)),
                )
                .ordered(),
            )
            .attribute(AttributeSchema::new(
                "address_prefixes",
                AttributeType::List(Box::new(AttributeType::String)),
            ))
            .attribute(AttributeSchema::new(
                "tags",
                AttributeType::Map(Box::new(AttributeType::String)),
            ))
            .attribute(AttributeSchema::new("private_ip_address", AttributeType::String).computed())
            .attribute(AttributeSchema::new("mac_address", AttributeType::String).read_only())
    }

    #[test]
    fn plan_create_when_no_prior() {
        assert_eq!(plan(&schema(), None, &json!({"name": "a"})), Diff::Create);
    }

    #[test]
    fn absent_equals_default() {
        let prior = json!({"name": "a", "enable_ip_forwarding": false});
        let desired = json!({"name": "a"});
        assert_eq!(plan(&schema(), Some(&prior), &desired), Diff::NoChange);
    }

    #[test]
    fn empty_containers_equal_absent() {
        let prior = json!({"name": "a", "tags": {}, "dns_servers": []});
        let desired = json!({"name": "a"});
        assert!(diff(&schema(), &prior, &desired).is_empty());
    }

    #[test]
    fn unordered_lists_compare_as_sets() {
        let prior = json!({"name": "a", "address_prefixes": ["10.0.1.0/24", "10.0.2.0/24"]});
        let desired = json!({"name": "a", "address_prefixes": ["10.0.2.0/24", "10.0.1.0/24"]});
        assert!(diff(&schema(), &prior, &desired).is_empty());
    }

    #[test]
    fn ordered_lists_compare_by_position() {
        let prior = json!({"name": "a", "dns_servers": ["10.0.0.4", "10.0.0.5"]});
        let desired = json!({"name": "a", "dns_servers": ["10.0.0.5", "10.0.0.4"]});
        let changes = diff(&schema(), &prior, &desired);
        assert_eq!(changes.into_iter().collect::<Vec<_>>(), vec!["dns_servers"]);
    }

    #[test]
    fn computed_and_read_only_are_left_alone() {
        let prior = json!({"name": "a", "private_ip_address": "10.0.1.4", "mac_address": "00-0D"});
        let desired = json!({"name": "a"});
        assert!(diff(&schema(), &prior, &desired).is_empty());

        let desired = json!({"name": "a", "private_ip_address": "10.0.1.5"});
        assert_eq!(diff(&schema(), &prior, &desired).len(), 1);
    }

    #[test]
    fn force_new_change_plans_replacement() {
        let prior = json!({"name": "a", "tags": {"env": "dev"}});
        let desired = json!({"name": "b", "tags": {"env": "prod"}});
        assert_eq!(
            plan(&schema(), Some(&prior), &desired),
            Diff::Replace(vec!["name".to_string()])
        );
    }

    #[test]
    fn in_place_change_plans_update() {
        let prior = json!({"name": "a", "tags": {"env": "dev"}});
        let desired = json!({"name": "a", "tags": {"env": "prod"}});
        let result = plan(&schema(), Some(&prior), &desired);
        assert!(result.is_change());
        assert_eq!(result, Diff::Update(ChangeSet::from(["tags".to_string()])));
    }

    #[test]
    fn computed_block_fields_unset_in_desired_are_ignored() {
        let block = AttributeType::Block(vec![
            AttributeSchema::new("name", AttributeType::String).required(),
            AttributeSchema::new("primary", AttributeType::Bool).computed(),
            AttributeSchema::new("private_ip_address_allocation", AttributeType::String)
                .with_default(json!("Dynamic")),
        ]);
        let schema = ResourceSchema::new("nic").attribute(
            AttributeSchema::new("ip_configuration", AttributeType::List(Box::new(block))).ordered(),
        );

        let prior = json!({"ip_configuration": [
            {"name": "internal", "primary": true, "private_ip_address_allocation": "Dynamic"}
        ]});
        let desired = json!({"ip_configuration": [{"name": "internal", "primary": null}]});
        assert!(diff(&schema, &prior, &desired).is_empty());

        let desired = json!({"ip_configuration": [{"name": "internal", "primary": false}]});
        assert_eq!(diff(&schema, &prior, &desired).len(), 1);
    }
}
