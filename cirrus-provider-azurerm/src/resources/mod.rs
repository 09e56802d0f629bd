//! Resource kinds
//!
//! One module per resource type. Each defines the desired document, the
//! translation to and from its ARM model, and the locks it shares with its
//! neighbours.

pub mod nat_gateway_public_ip_association;
pub mod network_interface;
pub mod network_security_group;
pub mod subnet;

pub use nat_gateway_public_ip_association::NatGatewayPublicIpAssociationKind;
pub use network_interface::NetworkInterfaceKind;
pub use network_security_group::NetworkSecurityGroupKind;
pub use subnet::SubnetKind;

/// Network API version used by every kind
pub const NETWORK_API_VERSION: &str = "2023-09-01";

/// Resource type names handled by this provider
pub fn resource_types() -> Vec<&'static str> {
    vec![
        "azurerm_nat_gateway_public_ip_association",
        "azurerm_network_interface",
        "azurerm_network_security_group",
        "azurerm_subnet",
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

    pub fn vnet_id(vnet: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/acctest-rg/providers/Microsoft.Network/virtualNetworks/{}",
            SUBSCRIPTION, vnet
        )
    }

    pub fn subnet_id(vnet: &str, subnet: &str) -> String {
        format!("{}/subnets/{}", vnet_id(vnet), subnet)
    }
}
