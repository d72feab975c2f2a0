//! Desired open-port computation.

use std::sync::Arc;

use dnp_common::{
    ComposePortReader, ContainerInventoryProvider, PackageContainer, PortBinding, PortMapping,
};

use crate::defaults::DEFAULT_PORTS_TO_OPEN;

/// Computes the ports that should be forwarded through the router.
///
/// The result lists core packages first, then user packages, each in
/// inventory order, and each package's ports in the order its source
/// reports them. Duplicates across packages are kept: resolving them is
/// up to the consumer.
#[derive(Clone)]
pub struct PortAggregator {
    inventory: Arc<dyn ContainerInventoryProvider>,
    compose: Arc<dyn ComposePortReader>,
}

impl PortAggregator {
    /// Create an aggregator over the given providers.
    pub fn new(
        inventory: Arc<dyn ContainerInventoryProvider>,
        compose: Arc<dyn ComposePortReader>,
    ) -> Self {
        Self { inventory, compose }
    }

    /// Ports that should currently be open.
    ///
    /// Never fails: an unavailable inventory yields
    /// [`DEFAULT_PORTS_TO_OPEN`], and a package whose compose file cannot be
    /// read is left out.
    pub async fn ports_to_open(&self) -> Vec<PortMapping> {
        let containers = match self.inventory.list().await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list packages, opening default ports");
                return DEFAULT_PORTS_TO_OPEN.to_vec();
            }
        };

        let (core, user): (Vec<_>, Vec<_>) = containers.into_iter().partition(|c| c.is_core);

        let mut ports = Vec::new();
        for container in core.iter().chain(&user) {
            ports.extend(self.package_ports(container).await);
        }

        tracing::debug!(count = ports.len(), "Computed ports to open");
        ports
    }

    async fn package_ports(&self, container: &PackageContainer) -> Vec<PortMapping> {
        if container.has_live_ports() {
            return container.ports.iter().map(PortBinding::to_mapping).collect();
        }

        // Stopped packages keep their reservation so the ports are already
        // forwarded when they come back.
        match self.compose.read(&container.name, container.is_core).await {
            Ok(bindings) => bindings.iter().map(PortBinding::to_mapping).collect(),
            Err(e) => {
                tracing::warn!(
                    package = %container.name,
                    error = %e,
                    "Ignoring package ports, compose file unreadable"
                );
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for PortAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAggregator").finish_non_exhaustive()
    }
}
