//! Per-client service registry. Hosts that serve several client codes from
//! one process get one lazily created decisioning service (with its own
//! artifact loader) per client.

use crate::config::ClientConfig;
use crate::decisioning::DecisioningService;
use crate::errors::SharedReporter;
use crate::geo::SharedGeoResolver;
use crate::remote::SharedCaller;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct ClientRegistry {
    services: Mutex<HashMap<String, Arc<DecisioningService>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        ClientRegistry::default()
    }

    /// Existing service for the config's client code, or a freshly started
    /// one. The first caller for a client pays the construction cost; later
    /// callers share it.
    pub fn get_or_create(
        &self,
        config: ClientConfig,
        caller: SharedCaller,
        reporter: SharedReporter,
        geo_resolver: Option<SharedGeoResolver>,
    ) -> Arc<DecisioningService> {
        let mut services = self.services.lock().unwrap();
        if let Some(service) = services.get(&config.client) {
            return Arc::clone(service);
        }
        let client = config.client.clone();
        let service = Arc::new(DecisioningService::new(
            Arc::new(config),
            caller,
            reporter,
            geo_resolver,
        ));
        service.start();
        services.insert(client, Arc::clone(&service));
        service
    }

    pub fn get(&self, client: &str) -> Option<Arc<DecisioningService>> {
        self.services.lock().unwrap().get(client).map(Arc::clone)
    }

    /// Stop every registered service's background work and drop them.
    pub fn shutdown(&self) {
        let mut services = self.services.lock().unwrap();
        for service in services.values() {
            service.stop();
        }
        services.clear();
    }
}
