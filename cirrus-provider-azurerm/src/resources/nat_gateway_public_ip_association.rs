//! azurerm_nat_gateway_public_ip_association
//!
//! Links a public IP address to a NAT gateway. The association has no remote
//! object of its own: it is an entry in the gateway's `publicIpAddresses`, so
//! create and delete rewrite the gateway under the gateway's lock and read
//! looks the entry up.

use cirrus_core::schema::{AttributeSchema, ResourceSchema, types};
use cirrus_core::translate::{FieldPath, TranslationError};
use cirrus_core::{
    CompositeIdentifier, CoreResult, LockName, Ownership, ResourceIdentifier, ResourceKind,
    parse_composite,
};
use serde::{Deserialize, Serialize};

use crate::ids::{NAT_GATEWAY, NAT_GATEWAY_LOCK, PUBLIC_IP_ADDRESS};
use crate::models::{self, SubResource};
use crate::resources::NETWORK_API_VERSION;
use crate::utils::{parent_lock, parse_reference};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NatGatewayPublicIpAssociation {
    pub nat_gateway_id: String,
    pub public_ip_address_id: String,
}

#[derive(Debug, Default)]
pub struct NatGatewayPublicIpAssociationKind;

impl NatGatewayPublicIpAssociationKind {
    pub fn new() -> Self {
        Self
    }
}

fn contains(model: &models::NatGateway, public_ip: &ResourceIdentifier) -> bool {
    model
        .properties
        .as_ref()
        .and_then(|p| p.public_ip_addresses.as_ref())
        .is_some_and(|ips| {
            ips.iter()
                .any(|ip| ip.id.as_deref().is_some_and(|raw| public_ip.is_same(raw)))
        })
}

impl ResourceKind for NatGatewayPublicIpAssociationKind {
    type Id = CompositeIdentifier;
    type Desired = NatGatewayPublicIpAssociation;
    type Model = models::NatGateway;

    fn type_name(&self) -> &'static str {
        "azurerm_nat_gateway_public_ip_association"
    }

    fn api_version(&self) -> &'static str {
        NETWORK_API_VERSION
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("azurerm_nat_gateway_public_ip_association")
            .attribute(
                AttributeSchema::new("nat_gateway_id", types::resource_id())
                    .required()
                    .force_new(),
            )
            .attribute(
                AttributeSchema::new("public_ip_address_id", types::resource_id())
                    .required()
                    .force_new(),
            )
    }

    fn ownership(&self) -> Ownership {
        Ownership::Association
    }

    fn id_for(&self, desired: &NatGatewayPublicIpAssociation) -> CoreResult<CompositeIdentifier> {
        let gateway = parse_reference(
            &FieldPath::root("nat_gateway_id"),
            &NAT_GATEWAY,
            &desired.nat_gateway_id,
        )?;
        let public_ip = parse_reference(
            &FieldPath::root("public_ip_address_id"),
            &PUBLIC_IP_ADDRESS,
            &desired.public_ip_address_id,
        )?;
        Ok(CompositeIdentifier::new(gateway, public_ip))
    }

    fn parse_id(&self, raw: &str) -> CoreResult<CompositeIdentifier> {
        parse_composite(raw, [&NAT_GATEWAY, &PUBLIC_IP_ADDRESS])
    }

    fn target(&self, id: &CompositeIdentifier) -> ResourceIdentifier {
        id.first.clone()
    }

    fn lock_names(
        &self,
        id: &CompositeIdentifier,
        _desired: Option<&NatGatewayPublicIpAssociation>,
    ) -> CoreResult<Vec<LockName>> {
        Ok(vec![parent_lock(NAT_GATEWAY_LOCK, &id.first)])
    }

    fn is_present(&self, id: &CompositeIdentifier, model: &models::NatGateway) -> bool {
        contains(model, &id.second)
    }

    fn expand(
        &self,
        desired: &NatGatewayPublicIpAssociation,
        existing: Option<&models::NatGateway>,
    ) -> CoreResult<models::NatGateway> {
        let id = self.id_for(desired)?;
        let mut model = existing.cloned().unwrap_or_default();
        if contains(&model, &id.second) {
            return Ok(model);
        }

        let properties = model.properties.get_or_insert_with(Default::default);
        properties.provisioning_state = None;
        properties
            .public_ip_addresses
            .get_or_insert_with(Vec::new)
            .push(SubResource::new(id.second.format()));
        Ok(model)
    }

    fn flatten(
        &self,
        id: &CompositeIdentifier,
        _model: &models::NatGateway,
    ) -> Result<NatGatewayPublicIpAssociation, TranslationError> {
        Ok(NatGatewayPublicIpAssociation {
            nat_gateway_id: id.first.format(),
            public_ip_address_id: id.second.format(),
        })
    }

    fn detach(&self, id: &CompositeIdentifier, mut model: models::NatGateway) -> CoreResult<models::NatGateway> {
        if let Some(properties) = model.properties.as_mut() {
            properties.provisioning_state = None;
            if let Some(ips) = properties.public_ip_addresses.as_mut() {
                ips.retain(|ip| !ip.id.as_deref().is_some_and(|raw| id.second.is_same(raw)));
            }
        }
        Ok(model)
    }
}
