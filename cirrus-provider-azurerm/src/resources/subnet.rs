//! azurerm_subnet
//!
//! A child of a virtual network. Subnets of the same network are written
//! through the network, so every mutation holds the network's lock.

use cirrus_core::differ::ChangeSet;
use cirrus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};
use cirrus_core::translate::{FieldPath, TranslationError, canonical_cidrs, sorted_set};
use cirrus_core::{CoreResult, LockName, ResourceIdentifier, ResourceKind};
use serde::{Deserialize, Serialize};

use crate::ids::{SUBNET, VIRTUAL_NETWORK_LOCK};
use crate::models::{self, ServiceEndpoint, SubnetProperties};
use crate::resources::NETWORK_API_VERSION;
use crate::utils::{parent_lock, subnet_parent, validate_name};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub name: String,
    pub resource_group_name: String,
    pub virtual_network_name: String,
    pub address_prefixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_endpoints: Vec<String>,
}

pub struct SubnetKind {
    subscription_id: String,
}

impl SubnetKind {
    pub fn new(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
        }
    }
}

/// A single prefix goes in `addressPrefix`, several in `addressPrefixes`
fn set_prefixes(properties: &mut SubnetProperties, desired: &Subnet) -> Result<(), TranslationError> {
    let path = FieldPath::root("address_prefixes");
    let mut prefixes = canonical_cidrs(&path, &desired.address_prefixes)?;
    match prefixes.len() {
        0 => return Err(path.error("at least one address prefix is required")),
        1 => {
            properties.address_prefix = prefixes.pop();
            properties.address_prefixes = None;
        }
        _ => {
            properties.address_prefix = None;
            properties.address_prefixes = Some(prefixes);
        }
    }
    Ok(())
}

fn expand_service_endpoints(services: &[String]) -> Vec<ServiceEndpoint> {
    sorted_set(services)
        .into_iter()
        .map(|service| ServiceEndpoint {
            service: Some(service),
            ..Default::default()
        })
        .collect()
}

impl ResourceKind for SubnetKind {
    type Id = ResourceIdentifier;
    type Desired = Subnet;
    type Model = models::Subnet;

    fn type_name(&self) -> &'static str {
        "azurerm_subnet"
    }

    fn api_version(&self) -> &'static str {
        NETWORK_API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("azurerm_subnet")
            .with_description("A subnet of a virtual network")
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
                AttributeSchema::new("virtual_network_name", AttributeType::String)
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("address_prefixes", AttributeType::List(Box::new(types::cidr())))
                    .required(),
            )
            .attribute(AttributeSchema::new(
                "service_endpoints",
                AttributeType::List(Box::new(AttributeType::String)),
            ))
    }

    fn id_for(&self, desired: &Subnet) -> CoreResult<ResourceIdentifier> {
        SUBNET.build(&[
            self.subscription_id.as_str(),
            desired.resource_group_name.as_str(),
            desired.virtual_network_name.as_str(),
            desired.name.as_str(),
        ])
    }

    fn parse_id(&self, raw: &str) -> CoreResult<ResourceIdentifier> {
        SUBNET.parse(raw)
    }

    fn target(&self, id: &ResourceIdentifier) -> ResourceIdentifier {
        id.clone()
    }

    fn lock_names(&self, id: &ResourceIdentifier, _desired: Option<&Subnet>) -> CoreResult<Vec<LockName>> {
        Ok(vec![parent_lock(VIRTUAL_NETWORK_LOCK, &subnet_parent(id)?)])
    }

    fn expand(&self, desired: &Subnet, _existing: Option<&models::Subnet>) -> CoreResult<models::Subnet> {
        validate_name(&FieldPath::root("name"), &desired.name)?;

        let mut properties = SubnetProperties::default();
        set_prefixes(&mut properties, desired)?;
        if !desired.service_endpoints.is_empty() {
            properties.service_endpoints = Some(expand_service_endpoints(&desired.service_endpoints));
        }

        Ok(models::Subnet {
            properties: Some(properties),
            ..Default::default()
        })
    }

    fn apply_changes(
        &self,
        mut existing: models::Subnet,
        desired: &Subnet,
        changes: &ChangeSet,
    ) -> CoreResult<models::Subnet> {
        let properties = existing.properties.get_or_insert_with(Default::default);
        properties.provisioning_state = None;

        if changes.contains("address_prefixes") {
            set_prefixes(properties, desired)?;
        }
        if changes.contains("service_endpoints") {
            properties.service_endpoints = Some(expand_service_endpoints(&desired.service_endpoints));
        }
        Ok(existing)
    }

    fn flatten(&self, id: &ResourceIdentifier, model: &models::Subnet) -> Result<Subnet, TranslationError> {
        let properties = model.properties.as_ref();

        let prefixes = properties
            .and_then(|p| p.address_prefixes.clone())
            .filter(|p| !p.is_empty())
            .or_else(|| properties.and_then(|p| p.address_prefix.clone()).map(|p| vec![p]))
            .unwrap_or_default();

        let service_endpoints: Vec<String> = properties
            .and_then(|p| p.service_endpoints.as_ref())
            .map(|endpoints| endpoints.iter().filter_map(|e| e.service.clone()).collect())
            .unwrap_or_default();

        Ok(Subnet {
            name: id.name().to_string(),
            resource_group_name: id.value("resourceGroupName").unwrap_or_default().to_string(),
            virtual_network_name: id.value("virtualNetworkName").unwrap_or_default().to_string(),
            address_prefixes: canonical_cidrs(&FieldPath::root("address_prefixes"), &prefixes)?,
            service_endpoints: sorted_set(&service_endpoints),
        })
    }
}
