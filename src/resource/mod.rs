//! Resource lifecycle management.
//!
//! Resources are long-lived collaborators policies depend on (caches, auth
//! providers, connection pools). They are started before the policy manager
//! and stopped last during reactor shutdown.

use std::sync::Arc;

use dashmap::DashMap;

use crate::core::GatewayResult;

pub trait Resource: Send + Sync {
    fn name(&self) -> &str;

    fn start(&self) -> GatewayResult<()>;

    fn stop(&self) -> GatewayResult<()>;
}

#[derive(Default)]
pub struct ResourceLifecycleManager {
    resources: DashMap<String, Arc<dyn Resource>>,
}

impl ResourceLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, resource: Arc<dyn Resource>) {
        self.resources.insert(resource.name().to_string(), resource);
    }

    /// Starts every registered resource. The first failure aborts the start;
    /// the owning reactor is then not registered to receive traffic.
    pub fn start(&self) -> GatewayResult<()> {
        for entry in self.resources.iter() {
            log::debug!("Starting resource '{}'", entry.key());
            entry.value().start()?;
        }
        Ok(())
    }

    /// Early shutdown signal, sent before the drain starts.
    pub fn pre_stop(&self) {
        log::debug!("Resource manager preparing to stop");
    }

    /// Stops every registered resource, best effort.
    pub fn stop(&self) -> GatewayResult<()> {
        for entry in self.resources.iter() {
            if let Err(e) = entry.value().stop() {
                log::warn!("Failed to stop resource '{}': {e}", entry.key());
            }
        }
        Ok(())
    }
}
