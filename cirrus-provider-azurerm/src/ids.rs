//! Identifier schemas of the ARM network objects this provider touches

use cirrus_core::{IdSchema, Segment};

pub static RESOURCE_GROUP: IdSchema = IdSchema::new(
    "Resource Group",
    &[
        Segment::value("subscriptions", "subscriptionId"),
        Segment::value("resourceGroups", "resourceGroupName"),
    ],
);

pub static VIRTUAL_NETWORK: IdSchema = IdSchema::new(
    "Virtual Network",
    &[
        Segment::value("subscriptions", "subscriptionId"),
        Segment::value("resourceGroups", "resourceGroupName"),
        Segment::literal("providers", "Microsoft.Network"),
        Segment::value("virtualNetworks", "virtualNetworkName"),
    ],
);

pub static SUBNET: IdSchema = IdSchema::new(
    "Subnet",
    &[
        Segment::value("subscriptions", "subscriptionId"),
        Segment::value("resourceGroups", "resourceGroupName"),
        Segment::literal("providers", "Microsoft.Network"),
        Segment::value("virtualNetworks", "virtualNetworkName"),
        Segment::value("subnets", "subnetName"),
    ],
);

pub static NETWORK_INTERFACE: IdSchema = IdSchema::new(
    "Network Interface",
    &[
        Segment::value("subscriptions", "subscriptionId"),
        Segment::value("resourceGroups", "resourceGroupName"),
        Segment::literal("providers", "Microsoft.Network"),
        Segment::value("networkInterfaces", "networkInterfaceName"),
    ],
);

pub static NETWORK_SECURITY_GROUP: IdSchema = IdSchema::new(
    "Network Security Group",
    &[
        Segment::value("subscriptions", "subscriptionId"),
        Segment::value("resourceGroups", "resourceGroupName"),
        Segment::literal("providers", "Microsoft.Network"),
        Segment::value("networkSecurityGroups", "networkSecurityGroupName"),
    ],
);

pub static NAT_GATEWAY: IdSchema = IdSchema::new(
    "NAT Gateway",
    &[
        Segment::value("subscriptions", "subscriptionId"),
        Segment::value("resourceGroups", "resourceGroupName"),
        Segment::literal("providers", "Microsoft.Network"),
        Segment::value("natGateways", "natGatewayName"),
    ],
);

pub static PUBLIC_IP_ADDRESS: IdSchema = IdSchema::new(
    "Public IP Address",
    &[
        Segment::value("subscriptions", "subscriptionId"),
        Segment::value("resourceGroups", "resourceGroupName"),
        Segment::literal("providers", "Microsoft.Network"),
        Segment::value("publicIPAddresses", "publicIpAddressName"),
    ],
);

/// Lock scope of a virtual network shared by its subnets and the NICs in them
pub const VIRTUAL_NETWORK_LOCK: &str = "azurerm_virtual_network";

/// Lock scope of a NAT gateway shared by its public IP associations
pub const NAT_GATEWAY_LOCK: &str = "azurerm_nat_gateway";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_parent_is_its_virtual_network() {
        let subnet = SUBNET
            .parse("/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/virtualNetworks/vnet1/subnets/internal")
            .unwrap();
        let vnet = VIRTUAL_NETWORK
            .build(&subnet.values()[..3])
            .unwrap();
        assert_eq!(
            vnet.format(),
            "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/virtualNetworks/vnet1"
        );
    }

    #[test]
    fn public_ip_key_casing_is_canonical() {
        let id = PUBLIC_IP_ADDRESS
            .parse("/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Network/publicIpAddresses/pip1")
            .unwrap();
        assert!(id.format().contains("/publicIPAddresses/pip1"));
    }
}
