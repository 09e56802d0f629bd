//! azurerm_network_security_group

use std::collections::{BTreeMap, HashSet};

use cirrus_core::differ::ChangeSet;
use cirrus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use cirrus_core::translate::{
    FieldPath, TranslationError, expand_tags, flatten_tags, sort_by_name,
};
use cirrus_core::{CoreResult, ResourceIdentifier, ResourceKind};
use serde::{Deserialize, Serialize};

use crate::ids::NETWORK_SECURITY_GROUP;
use crate::models::{self, NetworkSecurityGroupProperties};
use crate::resources::NETWORK_API_VERSION;
use crate::utils::{deserialize_location, normalize_location, validate_name};

const MIN_PRIORITY: i64 = 100;
const MAX_PRIORITY: i64 = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSecurityGroup {
    pub name: String,
    pub resource_group_name: String,
    #[serde(deserialize_with = "deserialize_location")]
    pub location: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_rule: Vec<SecurityRule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub protocol: String,
    pub source_port_range: String,
    pub destination_port_range: String,
    pub source_address_prefix: String,
    pub destination_address_prefix: String,
    pub access: String,
    pub priority: i64,
    pub direction: String,
}

fn rule_schema() -> Vec<AttributeSchema> {
    let variants = |v: &[&str]| AttributeType::Enum(v.iter().map(|s| s.to_string()).collect());
    vec![
        AttributeSchema::new("name", AttributeType::String).required(),
        AttributeSchema::new("description", AttributeType::String),
        AttributeSchema::new("protocol", variants(&["Tcp", "Udp", "Icmp", "Esp", "Ah", "*"])).required(),
        AttributeSchema::new("source_port_range", types::port_range()).required(),
        AttributeSchema::new("destination_port_range", types::port_range()).required(),
        AttributeSchema::new("source_address_prefix", AttributeType::String).required(),
        AttributeSchema::new("destination_address_prefix", AttributeType::String).required(),
        AttributeSchema::new("access", variants(&["Allow", "Deny"])).required(),
        AttributeSchema::new("priority", types::positive_int()).required(),
        AttributeSchema::new("direction", variants(&["Inbound", "Outbound"])).required(),
    ]
}

/// Rules sorted by name, each carrying over the unmanaged fields of the
/// existing rule with the same name
fn expand_rules(
    rules: &[SecurityRule],
    existing: Option<&[models::SecurityRule]>,
) -> Result<Vec<models::SecurityRule>, TranslationError> {
    let path = FieldPath::root("security_rule");
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(rules.len());

    for (i, rule) in rules.iter().enumerate() {
        let rule_path = path.index(i);
        validate_name(&rule_path.field("name"), &rule.name)?;
        if !seen.insert(rule.name.to_lowercase()) {
            return Err(rule_path
                .field("name")
                .error(format!("duplicate rule name {:?}", rule.name)));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&rule.priority) {
            return Err(rule_path.field("priority").error(format!(
                "must be between {} and {}, got {}",
                MIN_PRIORITY, MAX_PRIORITY, rule.priority
            )));
        }

        let previous = existing
            .into_iter()
            .flatten()
            .find(|r| r.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(&rule.name)));
        let mut model = previous.cloned().unwrap_or_default();
        let mut properties = model.properties.take().unwrap_or_default();
        properties.description = rule.description.clone();
        properties.protocol = Some(rule.protocol.clone());
        properties.source_port_range = Some(rule.source_port_range.clone());
        properties.destination_port_range = Some(rule.destination_port_range.clone());
        properties.source_address_prefix = Some(rule.source_address_prefix.clone());
        properties.destination_address_prefix = Some(rule.destination_address_prefix.clone());
        properties.access = Some(rule.access.clone());
        properties.priority = Some(rule.priority);
        properties.direction = Some(rule.direction.clone());
        properties.extra.remove("provisioningState");

        model.name = Some(rule.name.clone());
        model.properties = Some(properties);
        out.push(model);
    }

    sort_by_name(&mut out, |r| r.name.as_deref().unwrap_or_default());
    Ok(out)
}

fn flatten_rule(rule: &models::SecurityRule) -> SecurityRule {
    let p = rule.properties.clone().unwrap_or_default();
    SecurityRule {
        name: rule.name.clone().unwrap_or_default(),
        description: p.description.filter(|d| !d.is_empty()),
        protocol: p.protocol.unwrap_or_default(),
        source_port_range: p.source_port_range.unwrap_or_default(),
        destination_port_range: p.destination_port_range.unwrap_or_default(),
        source_address_prefix: p.source_address_prefix.unwrap_or_default(),
        destination_address_prefix: p.destination_address_prefix.unwrap_or_default(),
        access: p.access.unwrap_or_default(),
        priority: p.priority.unwrap_or_default(),
        direction: p.direction.unwrap_or_default(),
    }
}

pub struct NetworkSecurityGroupKind {
    subscription_id: String,
}

impl NetworkSecurityGroupKind {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
        }
    }
}

impl ResourceKind for NetworkSecurityGroupKind {
    type Id = ResourceIdentifier;
    type Desired = NetworkSecurityGroup;
    type Model = models::NetworkSecurityGroup;

    fn type_name(&self) -> &'static str {
        "azurerm_network_security_group"
    }

    fn api_version(&self) -> &'static str {
        NETWORK_API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("azurerm_network_security_group")
            .attribute(
                AttributeSchema::new("name", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("resource_group_name", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("location", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(AttributeSchema::new(
                "security_rule",
                AttributeType::List(Box::new(AttributeType::Block(rule_schema()))),
            ))
            .attribute(AttributeSchema::new(
                "tags",
                AttributeType::Map(Box::new(AttributeType::String)),
            ))
    }

    fn id_for(&self, desired: &NetworkSecurityGroup) -> CoreResult<ResourceIdentifier> {
        NETWORK_SECURITY_GROUP.build(&[
            self.subscription_id.as_str(),
            desired.resource_group_name.as_str(),
            desired.name.as_str(),
        ])
    }

    fn parse_id(&self, raw: &str) -> CoreResult<ResourceIdentifier> {
        NETWORK_SECURITY_GROUP.parse(raw)
    }

    fn target(&self, id: &ResourceIdentifier) -> ResourceIdentifier {
        id.clone()
    }

    fn expand(
        &self,
        desired: &NetworkSecurityGroup,
        _existing: Option<&models::NetworkSecurityGroup>,
    ) -> CoreResult<models::NetworkSecurityGroup> {
        validate_name(&FieldPath::root("name"), &desired.name)?;

        let rules = expand_rules(&desired.security_rule, None)?;
        Ok(models::NetworkSecurityGroup {
            location: Some(normalize_location(&desired.location)),
            tags: expand_tags(&FieldPath::root("tags"), &desired.tags)?,
            properties: Some(NetworkSecurityGroupProperties {
                security_rules: Some(rules),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn apply_changes(
        &self,
        mut existing: models::NetworkSecurityGroup,
        desired: &NetworkSecurityGroup,
        changes: &ChangeSet,
    ) -> CoreResult<models::NetworkSecurityGroup> {
        if changes.contains("tags") {
            existing.tags = Some(
                expand_tags(&FieldPath::root("tags"), &desired.tags)?.unwrap_or_default(),
            );
        }

        let properties = existing.properties.get_or_insert_with(Default::default);
        properties.provisioning_state = None;
        if changes.contains("security_rule") {
            let rules = expand_rules(&desired.security_rule, properties.security_rules.as_deref())?;
            properties.security_rules = Some(rules);
        }
        Ok(existing)
    }

    fn flatten(
        &self,
        id: &ResourceIdentifier,
        model: &models::NetworkSecurityGroup,
    ) -> Result<NetworkSecurityGroup, TranslationError> {
        let mut rules: Vec<SecurityRule> = model
            .properties
            .as_ref()
            .and_then(|p| p.security_rules.as_ref())
            .map(|rules| rules.iter().map(flatten_rule).collect())
            .unwrap_or_default();
        sort_by_name(&mut rules, |r| r.name.as_str());

        Ok(NetworkSecurityGroup {
            name: id.name().to_string(),
            resource_group_name: id.value("resourceGroupName").unwrap_or_default().to_string(),
            location: normalize_location(model.location.as_deref().unwrap_or_default()),
            security_rule: rules,
            tags: flatten_tags(model.tags.as_ref()),
        })
    }
}
