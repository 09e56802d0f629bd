//! Assemble the azurerm provider

use std::sync::Arc;

use cirrus_core::{Lifecycle, LockRegistry, ManagementClient, NamedLocks, Provider, ResourceKind};
use log::info;

use crate::client::ArmClient;
use crate::config::{ConfigError, ProviderConfig};
use crate::resources::{
    NatGatewayPublicIpAssociationKind, NetworkInterfaceKind, NetworkSecurityGroupKind, SubnetKind,
};

pub const PROVIDER_NAME: &str = "azurerm";

fn lifecycle<K: ResourceKind>(
    kind: K,
    client: &Arc<dyn ManagementClient>,
    locks: &Arc<dyn LockRegistry>,
    config: &ProviderConfig,
) -> Lifecycle<K> {
    let lifecycle = Lifecycle::new(kind, client.clone(), locks.clone());
    let timeouts = config.apply_timeouts(lifecycle.timeouts());
    let lifecycle = lifecycle.with_timeouts(timeouts);
    match config.poll_interval() {
        Some(interval) => lifecycle.with_poll_interval(interval),
        None => lifecycle,
    }
}

/// Register every kind against `client`; all of them share one lock registry
pub fn build_provider(client: Arc<dyn ManagementClient>, config: &ProviderConfig) -> Provider {
    let locks: Arc<dyn LockRegistry> = Arc::new(NamedLocks::new());
    let subscription = config.subscription_id.as_str();

    Provider::new(PROVIDER_NAME)
        .register(lifecycle(
            NetworkInterfaceKind::new(subscription),
            &client,
            &locks,
            config,
        ))
        .register(lifecycle(
            NetworkSecurityGroupKind::new(subscription),
            &client,
            &locks,
            config,
        ))
        .register(lifecycle(SubnetKind::new(subscription), &client, &locks, config))
        .register(lifecycle(
            NatGatewayPublicIpAssociationKind::new(),
            &client,
            &locks,
            config,
        ))
}

/// Provider talking to ARM over HTTP
pub fn provider(config: &ProviderConfig) -> Result<Provider, ConfigError> {
    let client = ArmClient::new(config)?;
    info!(
        "using ARM endpoint {} for subscription {}",
        config.endpoint, config.subscription_id
    );
    Ok(build_provider(Arc::new(client), config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use cirrus_core::memory::InMemoryClient;
    use cirrus_core::{CoreError, ReadOutcome};
    use serde_json::json;

    use crate::resources::resource_types;
    use crate::resources::testing::{SUBSCRIPTION, subnet_id};

    fn provider_in_memory() -> (Arc<InMemoryClient>, Provider) {
        let client = Arc::new(InMemoryClient::new());
        let config = ProviderConfig::new(SUBSCRIPTION, "token");
        let provider = build_provider(client.clone(), &config);
        (client, provider)
    }

    #[test]
    fn test_registers_every_kind() {
        let (_, provider) = provider_in_memory();
        assert_eq!(provider.name(), "azurerm");
        assert_eq!(provider.resource_types(), resource_types());
    }

    #[test]
    fn test_timeout_overrides() {
        let mut config = ProviderConfig::new(SUBSCRIPTION, "token");
        config.timeouts.create = Some(60);
        config.poll_interval_secs = Some(2);

        let client: Arc<dyn ManagementClient> = Arc::new(InMemoryClient::new());
        let locks: Arc<dyn LockRegistry> = Arc::new(NamedLocks::new());
        let lifecycle = lifecycle(SubnetKind::new(SUBSCRIPTION), &client, &locks, &config);
        assert_eq!(lifecycle.timeouts().create, Duration::from_secs(60));
        assert_eq!(lifecycle.timeouts().delete, Duration::from_secs(30 * 60));
    }

    #[tokio::test]
    async fn test_subnet_documents() {
        let (client, provider) = provider_in_memory();
        let subnets = provider.lifecycle("azurerm_subnet").unwrap();

        let desired = json!({
            "name": "internal",
            "resource_group_name": "acctest-rg",
            "virtual_network_name": "acctest-vnet",
            "address_prefixes": ["10.0.2.0/24"]
        });
        let applied = subnets.create(&desired).await.unwrap();
        assert_eq!(applied.id, subnet_id("acctest-vnet", "internal"));
        assert_eq!(applied.state, desired);

        client.remove(&applied.id);
        assert_eq!(subnets.read(&applied.id).await.unwrap(), ReadOutcome::Gone);
    }

    #[tokio::test]
    async fn test_invalid_document() {
        let (_, provider) = provider_in_memory();
        let subnets = provider.lifecycle("azurerm_subnet").unwrap();

        let err = subnets
            .create(&json!({
                "name": "internal",
                "resource_group_name": "acctest-rg",
                "virtual_network_name": "acctest-vnet",
                "address_prefixes": ["10.0.2.0/33"]
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration { .. }));
    }
}
