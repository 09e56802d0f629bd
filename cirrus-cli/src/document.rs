//! Resource documents
//!
//! A document lists the resources to manage, in the order they are applied:
//!
//! ```json
//! {
//!   "resources": [
//!     {"type": "azurerm_subnet", "name": "internal", "config": {...}},
//!     {"type": "azurerm_network_interface", "name": "nic", "config": {
//!       "ip_configuration": [{"subnet_id": "${azurerm_subnet.internal.id}", ...}]
//!     }}
//!   ]
//! }
//! ```
//!
//! A string of the form `${type.name.attribute}` is replaced by the tracked
//! resource's identifier (`id`) or one of its recorded attributes.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use cirrus_state::StateFile;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub resources: Vec<ResourceBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceBlock {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub config: Value,
}

impl ResourceBlock {
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}

impl Document {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid document {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let document: Document = serde_json::from_str(content)?;

        let mut seen = HashSet::new();
        for block in &document.resources {
            if !block.config.is_object() {
                bail!("{}: config must be an object", block.address());
            }
            if !seen.insert((block.resource_type.as_str(), block.name.as_str())) {
                bail!("{} is declared more than once", block.address());
            }
        }
        Ok(document)
    }

    pub fn contains(&self, resource_type: &str, name: &str) -> bool {
        self.resources
            .iter()
            .any(|b| b.resource_type == resource_type && b.name == name)
    }
}

fn reference(raw: &str) -> Option<(&str, &str, &str)> {
    let inner = raw.strip_prefix("${")?.strip_suffix('}')?;
    let mut parts = inner.splitn(3, '.');
    Some((parts.next()?, parts.next()?, parts.next()?))
}

/// Replace `${type.name.attribute}` strings with values from the state
pub fn resolve_refs(value: &Value, state: &StateFile) -> Result<Value> {
    Ok(match value {
        Value::String(raw) => match reference(raw) {
            Some((resource_type, name, attribute)) => {
                let tracked = state.find_resource(resource_type, name).ok_or_else(|| {
                    anyhow!("{} refers to {}.{}, which is not tracked", raw, resource_type, name)
                })?;
                if attribute == "id" {
                    Value::String(tracked.id.clone())
                } else {
                    tracked
                        .attributes
                        .get(attribute)
                        .filter(|v| !v.is_null())
                        .cloned()
                        .ok_or_else(|| anyhow!("{}: attribute {} is not known", raw, attribute))?
                }
            }
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_refs(item, state))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| -> Result<(String, Value)> {
                    Ok((k.clone(), resolve_refs(v, state)?))
                })
                .collect::<Result<_>>()?,
        ),
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_state::ResourceState;
    use serde_json::json;

    const SUBNET_ID: &str = "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/virtualNetworks/vnet1/subnets/internal";

    fn state() -> StateFile {
        let mut state = StateFile::new();
        state.upsert_resource(
            ResourceState::new("azurerm_subnet", "internal", "azurerm", SUBNET_ID)
                .with_attributes(json!({"address_prefixes": ["10.0.2.0/24"], "service_endpoints": null})),
        );
        state
    }

    #[test]
    fn test_parse_document() {
        let document = Document::parse(
            r#"{"resources": [
                {"type": "azurerm_subnet", "name": "a", "config": {"name": "a"}},
                {"type": "azurerm_subnet", "name": "b", "config": {"name": "b"}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(document.resources.len(), 2);
        assert_eq!(document.resources[1].address(), "azurerm_subnet.b");
        assert!(document.contains("azurerm_subnet", "a"));
        assert!(!document.contains("azurerm_subnet", "c"));
    }

    #[test]
    fn test_reject_duplicates_and_bad_config() {
        let err = Document::parse(
            r#"{"resources": [
                {"type": "azurerm_subnet", "name": "a", "config": {}},
                {"type": "azurerm_subnet", "name": "a", "config": {}}
            ]}"#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "azurerm_subnet.a is declared more than once");

        let err = Document::parse(
            r#"{"resources": [{"type": "azurerm_subnet", "name": "a", "config": []}]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("config must be an object"));
    }

    #[test]
    fn test_resolve_refs() {
        let config = json!({
            "name": "nic",
            "ip_configuration": [{
                "name": "internal",
                "subnet_id": "${azurerm_subnet.internal.id}"
            }],
            "prefixes": "${azurerm_subnet.internal.address_prefixes}",
            "literal": "${not a reference",
            "count": 2
        });

        let resolved = resolve_refs(&config, &state()).unwrap();
        assert_eq!(resolved["ip_configuration"][0]["subnet_id"], SUBNET_ID);
        assert_eq!(resolved["prefixes"], json!(["10.0.2.0/24"]));
        assert_eq!(resolved["literal"], "${not a reference");
        assert_eq!(resolved["count"], 2);
    }

    #[test]
    fn test_unresolvable_refs() {
        let err = resolve_refs(&json!("${azurerm_subnet.other.id}"), &state()).unwrap_err();
        assert!(err.to_string().contains("not tracked"));

        let err = resolve_refs(&json!("${azurerm_subnet.internal.service_endpoints}"), &state())
            .unwrap_err();
        assert!(err.to_string().contains("is not known"));
    }
}
