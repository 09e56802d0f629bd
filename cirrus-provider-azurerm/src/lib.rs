//! Cirrus azurerm Provider
//!
//! Azure Resource Manager network resources on top of `cirrus-core`:
//!
//! - `azurerm_network_interface`
//! - `azurerm_network_security_group`
//! - `azurerm_subnet`
//! - `azurerm_nat_gateway_public_ip_association`
//!
//! [`ArmClient`] implements the management client over ARM's REST API.

pub mod client;
pub mod config;
pub mod ids;
pub mod models;
pub mod provider;
pub mod resources;
pub mod utils;

pub use client::ArmClient;
pub use config::{ConfigError, ProviderConfig};
pub use provider::{PROVIDER_NAME, build_provider, provider};
