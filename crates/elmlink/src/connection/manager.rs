//! Multi-device link management
//!
//! Keeps one [`DiagnosticLink`] per transport address. Each device's
//! command stream is independently ordered; nothing is guaranteed
//! between devices.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use super::DiagnosticLink;
use crate::config::LinkConfig;

/// Registry of logical connections, keyed by transport address.
#[derive(Default)]
pub struct LinkManager {
    links: Mutex<HashMap<String, Arc<DiagnosticLink>>>,
}

impl LinkManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The link for this configuration's address, created on first use.
    /// The same address always maps to the same link instance.
    pub fn open(&self, config: LinkConfig) -> Arc<DiagnosticLink> {
        let address = config.transport.address();
        let mut links = self.links.lock();
        links
            .entry(address.clone())
            .or_insert_with(|| {
                info!(address = address.as_str(), "registering link");
                Arc::new(DiagnosticLink::new(config))
            })
            .clone()
    }

    pub fn get(&self, address: &str) -> Option<Arc<DiagnosticLink>> {
        self.links.lock().get(address).cloned()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.links.lock().keys().cloned().collect()
    }

    /// Drop a link from the registry, returning it so the caller can
    /// finish a disconnect.
    pub fn remove(&self, address: &str) -> Option<Arc<DiagnosticLink>> {
        self.links.lock().remove(address)
    }

    /// Hard-disconnect every registered link.
    pub async fn disconnect_all(&self) {
        let links: Vec<Arc<DiagnosticLink>> = self.links.lock().values().cloned().collect();
        for link in links {
            link.disconnect(false).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MockConfig, MockScenario, TransportConfig};

    fn mock_config(scenario: MockScenario) -> LinkConfig {
        LinkConfig::new(TransportConfig::Mock(MockConfig {
            latency_ms: 0,
            scenario,
        }))
    }

    #[test]
    fn same_address_maps_to_same_link() {
        let manager = LinkManager::new();
        let a = manager.open(mock_config(MockScenario::Healthy));
        let b = manager.open(mock_config(MockScenario::Healthy));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.addresses().len(), 1);
    }

    #[test]
    fn different_addresses_are_independent() {
        let manager = LinkManager::new();
        let a = manager.open(mock_config(MockScenario::Healthy));
        let b = manager.open(mock_config(MockScenario::NoVehicle));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(manager.addresses().len(), 2);
    }

    #[test]
    fn remove_forgets_the_link() {
        let manager = LinkManager::new();
        manager.open(mock_config(MockScenario::Healthy));
        let removed = manager.remove("mock:healthy");
        assert!(removed.is_some());
        assert!(manager.get("mock:healthy").is_none());
    }
}
