//! azurerm_network_interface
//!
//! IP configurations and DNS servers are order-significant and keep the
//! order the server reports. A NIC joins subnets, so creating or updating one
//! holds the locks of the virtual networks those subnets belong to.

use std::collections::BTreeMap;
use std::net::IpAddr;

use cirrus_core::differ::ChangeSet;
use cirrus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use cirrus_core::translate::{FieldPath, TranslationError, expand_tags, flatten_tags};
use cirrus_core::{CoreResult, LockName, ResourceIdentifier, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::ids::{NETWORK_INTERFACE, SUBNET, VIRTUAL_NETWORK_LOCK};
use crate::models::{
    self, InterfaceDnsSettings, InterfaceIpConfiguration, InterfaceIpConfigurationProperties,
    NetworkInterfaceProperties, SubResource,
};
use crate::resources::NETWORK_API_VERSION;
use crate::utils::{
    deserialize_location, normalize_location, parent_lock, parse_reference, subnet_parent,
    validate_name,
};

const ALLOCATION_METHODS: [&str; 2] = ["Dynamic", "Static"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub resource_group_name: String,
    #[serde(deserialize_with = "deserialize_location")]
    pub location: String,
    pub ip_configuration: Vec<IpConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_ip_forwarding: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_accelerated_networking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_dns_name_label: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Computed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    /// Computed: private address of the primary IP configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpConfiguration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    pub private_ip_address_allocation: String,
    /// Required with static allocation, computed with dynamic allocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
}

fn ip_configuration_schema() -> Vec<AttributeSchema> {
    vec![
        AttributeSchema::new("name", AttributeType::String).required(),
        AttributeSchema::new("subnet_id", types::resource_id()),
        AttributeSchema::new(
            "private_ip_address_allocation",
            AttributeType::Enum(ALLOCATION_METHODS.iter().map(|s| s.to_string()).collect()),
        )
        .required(),
        AttributeSchema::new("private_ip_address", AttributeType::String).computed(),
        AttributeSchema::new("primary", AttributeType::Bool).computed(),
    ]
}

fn canonical_allocation(path: &FieldPath, raw: &str) -> Result<String, TranslationError> {
    ALLOCATION_METHODS
        .iter()
        .find(|m| m.eq_ignore_ascii_case(raw))
        .map(|m| m.to_string())
        .ok_or_else(|| {
            path.error(format!(
                "expected one of {}, got {:?}",
                ALLOCATION_METHODS.join(", "),
                raw
            ))
        })
}

/// Build the payload of each IP configuration in declaration order; fields
/// the server added to an existing configuration of the same name are kept
fn expand_ip_configurations(
    configurations: &[IpConfiguration],
    existing: Option<&[InterfaceIpConfiguration]>,
) -> Result<Vec<InterfaceIpConfiguration>, TranslationError> {
    let path = FieldPath::root("ip_configuration");
    if configurations.is_empty() {
        return Err(path.error("at least one IP configuration is required"));
    }

    let mut out = Vec::with_capacity(configurations.len());
    for (i, config) in configurations.iter().enumerate() {
        let config_path = path.index(i);
        validate_name(&config_path.field("name"), &config.name)?;

        let allocation = canonical_allocation(
            &config_path.field("private_ip_address_allocation"),
            &config.private_ip_address_allocation,
        )?;
        let address = match (allocation.as_str(), &config.private_ip_address) {
            ("Static", None) => {
                return Err(config_path
                    .field("private_ip_address")
                    .error("required when private_ip_address_allocation is Static"));
            }
            ("Static", Some(address)) => {
                address.parse::<IpAddr>().map_err(|_| {
                    config_path
                        .field("private_ip_address")
                        .error(format!("{:?} is not an IP address", address))
                })?;
                Some(address.clone())
            }
            _ => None,
        };
        let subnet = match &config.subnet_id {
            Some(raw) => {
                let subnet = parse_reference(&config_path.field("subnet_id"), &SUBNET, raw)?;
                Some(SubResource::new(subnet.format()))
            }
            None => None,
        };

        let previous = existing
            .into_iter()
            .flatten()
            .find(|c| c.name.as_deref().is_some_and(|n| n.eq_ignore_ascii_case(&config.name)));
        let mut model = previous.cloned().unwrap_or_default();
        let mut properties = model.properties.take().unwrap_or_default();
        properties.subnet = subnet;
        properties.private_ip_allocation_method = Some(allocation);
        properties.private_ip_address = address;
        if config.primary.is_some() {
            properties.primary = config.primary;
        }
        properties.extra.remove("provisioningState");

        model.name = Some(config.name.clone());
        model.properties = Some(properties);
        out.push(model);
    }
    Ok(out)
}

fn validate_dns_servers(servers: &[String]) -> Result<Vec<String>, TranslationError> {
    let path = FieldPath::root("dns_servers");
    servers
        .iter()
        .enumerate()
        .map(|(i, server)| {
            server
                .parse::<IpAddr>()
                .map(|_| server.clone())
                .map_err(|_| path.index(i).error(format!("{:?} is not an IP address", server)))
        })
        .collect()
}

fn flatten_ip_configuration(
    path: &FieldPath,
    config: &InterfaceIpConfiguration,
) -> Result<IpConfiguration, TranslationError> {
    let properties = config.properties.as_ref();
    let allocation = properties
        .and_then(|p| p.private_ip_allocation_method.clone())
        .unwrap_or_else(|| "Dynamic".to_string());
    // Only a static address belongs to the desired document
    let private_ip_address = if allocation.eq_ignore_ascii_case("Static") {
        properties.and_then(|p| p.private_ip_address.clone())
    } else {
        None
    };
    if let Some(address) = &private_ip_address
        && address.parse::<IpAddr>().is_err()
    {
        return Err(path
            .field("private_ip_address")
            .error(format!("{:?} is not an IP address", address)));
    }

    Ok(IpConfiguration {
        name: config.name.clone().unwrap_or_default(),
        subnet_id: properties
            .and_then(|p| p.subnet.as_ref())
            .and_then(|s| s.id.clone()),
        private_ip_address_allocation: allocation,
        private_ip_address,
        primary: properties.and_then(|p| p.primary),
    })
}

pub struct NetworkInterfaceKind {
    subscription_id: String,
}

impl NetworkInterfaceKind {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
        }
    }
}

impl ResourceKind for NetworkInterfaceKind {
    type Id = ResourceIdentifier;
    type Desired = NetworkInterface;
    type Model = models::NetworkInterface;

    fn type_name(&self) -> &'static str {
        "azurerm_network_interface"
    }

    fn api_version(&self) -> &'static str {
        NETWORK_API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("azurerm_network_interface")
            .with_description("A network interface attached to one or more subnets")
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
            .attribute(
                AttributeSchema::new(
                    "ip_configuration",
                    AttributeType::List(Box::new(AttributeType::Block(ip_configuration_schema()))),
                )
                .required()
                .ordered(),
            )
            .attribute(
                AttributeSchema::new("dns_servers", AttributeType::List(Box::new(AttributeType::String)))
                    .ordered(),
            )
            .attribute(
                AttributeSchema::new("enable_ip_forwarding", AttributeType::Bool)
                    .with_default(json!(false)),
            )
            .attribute(
                AttributeSchema::new("enable_accelerated_networking", AttributeType::Bool)
                    .with_default(json!(false)),
            )
            .attribute(AttributeSchema::new("internal_dns_name_label", AttributeType::String))
            .attribute(AttributeSchema::new(
                "tags",
                AttributeType::Map(Box::new(AttributeType::String)),
            ))
            .attribute(AttributeSchema::new("mac_address", AttributeType::String).read_only())
            .attribute(AttributeSchema::new("private_ip_address", AttributeType::String).read_only())
    }

    fn id_for(&self, desired: &NetworkInterface) -> CoreResult<ResourceIdentifier> {
        NETWORK_INTERFACE.build(&[
            self.subscription_id.as_str(),
            desired.resource_group_name.as_str(),
            desired.name.as_str(),
        ])
    }

    fn parse_id(&self, raw: &str) -> CoreResult<ResourceIdentifier> {
        NETWORK_INTERFACE.parse(raw)
    }

    fn target(&self, id: &ResourceIdentifier) -> ResourceIdentifier {
        id.clone()
    }

    fn lock_names(
        &self,
        _id: &ResourceIdentifier,
        desired: Option<&NetworkInterface>,
    ) -> CoreResult<Vec<LockName>> {
        let Some(desired) = desired else {
            return Ok(Vec::new());
        };

        let path = FieldPath::root("ip_configuration");
        let mut names = Vec::new();
        for (i, config) in desired.ip_configuration.iter().enumerate() {
            if let Some(raw) = &config.subnet_id {
                let subnet = parse_reference(&path.index(i).field("subnet_id"), &SUBNET, raw)?;
                names.push(parent_lock(VIRTUAL_NETWORK_LOCK, &subnet_parent(&subnet)?));
            }
        }
        Ok(names)
    }

    fn expand(
        &self,
        desired: &NetworkInterface,
        _existing: Option<&models::NetworkInterface>,
    ) -> CoreResult<models::NetworkInterface> {
        validate_name(&FieldPath::root("name"), &desired.name)?;

        let dns_settings = if desired.dns_servers.is_empty() && desired.internal_dns_name_label.is_none() {
            None
        } else {
            Some(InterfaceDnsSettings {
                dns_servers: Some(validate_dns_servers(&desired.dns_servers)?)
                    .filter(|s| !s.is_empty()),
                internal_dns_name_label: desired.internal_dns_name_label.clone(),
                ..Default::default()
            })
        };

        Ok(models::NetworkInterface {
            location: Some(normalize_location(&desired.location)),
            tags: expand_tags(&FieldPath::root("tags"), &desired.tags)?,
            properties: Some(NetworkInterfaceProperties {
                ip_configurations: Some(expand_ip_configurations(&desired.ip_configuration, None)?),
                dns_settings,
                enable_ip_forwarding: desired.enable_ip_forwarding,
                enable_accelerated_networking: desired.enable_accelerated_networking,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn apply_changes(
        &self,
        mut existing: models::NetworkInterface,
        desired: &NetworkInterface,
        changes: &ChangeSet,
    ) -> CoreResult<models::NetworkInterface> {
        if changes.contains("tags") {
            existing.tags = Some(
                expand_tags(&FieldPath::root("tags"), &desired.tags)?.unwrap_or_default(),
            );
        }

        let properties = existing.properties.get_or_insert_with(Default::default);
        properties.provisioning_state = None;

        if changes.contains("ip_configuration") {
            let configurations = expand_ip_configurations(
                &desired.ip_configuration,
                properties.ip_configurations.as_deref(),
            )?;
            properties.ip_configurations = Some(configurations);
        }
        if changes.contains("dns_servers") {
            properties.dns_settings.get_or_insert_with(Default::default).dns_servers =
                Some(validate_dns_servers(&desired.dns_servers)?);
        }
        if changes.contains("internal_dns_name_label") {
            properties
                .dns_settings
                .get_or_insert_with(Default::default)
                .internal_dns_name_label = desired.internal_dns_name_label.clone();
        }
        if changes.contains("enable_ip_forwarding") {
            properties.enable_ip_forwarding = Some(desired.enable_ip_forwarding.unwrap_or(false));
        }
        if changes.contains("enable_accelerated_networking") {
            properties.enable_accelerated_networking =
                Some(desired.enable_accelerated_networking.unwrap_or(false));
        }
        Ok(existing)
    }

    fn flatten(
        &self,
        id: &ResourceIdentifier,
        model: &models::NetworkInterface,
    ) -> Result<NetworkInterface, TranslationError> {
        let properties = model.properties.as_ref();
        let configurations: &[InterfaceIpConfiguration] = properties
            .and_then(|p| p.ip_configurations.as_deref())
            .unwrap_or_default();
        let dns = properties.and_then(|p| p.dns_settings.as_ref());

        let primary = configurations
            .iter()
            .find(|c| c.properties.as_ref().and_then(|p| p.primary).unwrap_or(false))
            .or_else(|| configurations.first());
        let private_ip_address = primary
            .and_then(|c| c.properties.as_ref())
            .and_then(|p: &InterfaceIpConfigurationProperties| p.private_ip_address.clone());

        let path = FieldPath::root("ip_configuration");
        let ip_configuration = configurations
            .iter()
            .enumerate()
            .map(|(i, config)| flatten_ip_configuration(&path.index(i), config))
            .collect::<Result<Vec<_>, _>>()?;
        let dns_servers = match dns.and_then(|d| d.dns_servers.as_deref()) {
            Some(servers) => validate_dns_servers(servers)?,
            None => Vec::new(),
        };

        Ok(NetworkInterface {
            name: id.name().to_string(),
            resource_group_name: id.value("resourceGroupName").unwrap_or_default().to_string(),
            location: normalize_location(model.location.as_deref().unwrap_or_default()),
            ip_configuration,
            dns_servers,
            enable_ip_forwarding: Some(
                properties
                    .and_then(|p| p.enable_ip_forwarding)
                    .unwrap_or(false),
            ),
            enable_accelerated_networking: Some(
                properties
                    .and_then(|p| p.enable_accelerated_networking)
                    .unwrap_or(false),
            ),
            internal_dns_name_label: dns
                .and_then(|d| d.internal_dns_name_label.clone())
                .filter(|l| !l.is_empty()),
            tags: flatten_tags(model.tags.as_ref()),
            mac_address: properties
                .and_then(|p| p.mac_address.clone())
                .filter(|m| !m.is_empty()),
            private_ip_address,
        })
    }
}
