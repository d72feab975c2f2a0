//! In-memory providers shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dnp_common::{
    ComposePortReader, ContainerInventoryProvider, DnpError, DnpResult, PackageContainer,
    PortBinding, PortMapping, Protocol,
};
use dnp_nat::{GatewayError, GatewayInfo, NatGateway, NatMapping, PortAggregator};
use parking_lot::Mutex;

/// Inventory returning a fixed list, or failing.
pub struct FakeInventory(pub Option<Vec<PackageContainer>>);

#[async_trait]
impl ContainerInventoryProvider for FakeInventory {
    async fn list(&self) -> DnpResult<Vec<PackageContainer>> {
        self.0.clone().ok_or_else(|| DnpError::InventoryUnavailable {
            message: "Demo Error for listContainers".to_string(),
        })
    }
}

/// Compose reader backed by a map; unknown packages fail.
#[derive(Default)]
pub struct FakeCompose {
    pub files: HashMap<String, Vec<PortBinding>>,
    pub reads: Mutex<Vec<String>>,
}

impl FakeCompose {
    pub fn with(mut self, package: &str, ports: Vec<PortBinding>) -> Self {
        self.files.insert(package.to_string(), ports);
        self
    }
}

#[async_trait]
impl ComposePortReader for FakeCompose {
    async fn read(&self, package: &str, _is_core: bool) -> DnpResult<Vec<PortBinding>> {
        self.reads.lock().push(package.to_string());
        self.files
            .get(package)
            .cloned()
            .ok_or_else(|| DnpError::ComposeRead {
                package: package.to_string(),
                message: format!("Demo Error for {package}"),
            })
    }
}

pub fn aggregator(inventory: FakeInventory, compose: FakeCompose) -> PortAggregator {
    PortAggregator::new(Arc::new(inventory), Arc::new(compose))
}

pub fn binding(port: u16, protocol: Protocol) -> PortBinding {
    PortBinding::new(port, port, protocol)
}

/// Router keeping its table in memory and counting mutating calls.
#[derive(Default)]
pub struct FakeGateway {
    pub table: Mutex<Vec<NatMapping>>,
    pub mutations: AtomicUsize,
    pub unreachable: bool,
    pub rejected: HashSet<PortMapping>,
}

impl FakeGateway {
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn mapped(&self) -> Vec<PortMapping> {
        self.table.lock().iter().map(|m| m.mapping).collect()
    }

    /// Forwarding targets currently on the router, in table order.
    pub fn clients(&self) -> Vec<String> {
        self.table
            .lock()
            .iter()
            .map(|m| format!("{}:{}", m.internal_client, m.internal_port))
            .collect()
    }

    pub fn seed(&self, mapping: PortMapping, description: &str, lease: Option<Duration>) {
        self.seed_to(mapping, "192.168.1.42", description, lease);
    }

    pub fn seed_to(
        &self,
        mapping: PortMapping,
        client: &str,
        description: &str,
        lease: Option<Duration>,
    ) {
        self.table.lock().push(NatMapping {
            mapping,
            internal_client: client.to_string(),
            internal_port: mapping.port_number,
            description: description.to_string(),
            lease,
        });
    }
}

#[async_trait]
impl NatGateway for FakeGateway {
    async fn discover(&self) -> Result<GatewayInfo, GatewayError> {
        if self.unreachable {
            return Err(GatewayError::Unreachable("no IGD".to_string()));
        }
        Ok(GatewayInfo {
            lan_address: "192.168.1.42".to_string(),
            control_url: None,
        })
    }

    async fn list(&self) -> Result<Vec<NatMapping>, GatewayError> {
        Ok(self.table.lock().clone())
    }

    async fn add(
        &self,
        mapping: &PortMapping,
        description: &str,
        lease: Duration,
    ) -> Result<(), GatewayError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        if self.rejected.contains(mapping) {
            return Err(GatewayError::Protocol("718 (ConflictInMappingEntry)".to_string()));
        }
        let mut table = self.table.lock();
        table.retain(|m| m.mapping != *mapping);
        table.push(NatMapping {
            mapping: *mapping,
            internal_client: "192.168.1.42".to_string(),
            internal_port: mapping.port_number,
            description: description.to_string(),
            lease: Some(lease),
        });
        Ok(())
    }

    async fn remove(&self, mapping: &PortMapping) -> Result<(), GatewayError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        if self.rejected.contains(mapping) {
            return Err(GatewayError::Protocol("714 (NoSuchEntryInArray)".to_string()));
        }
        self.table.lock().retain(|m| m.mapping != *mapping);
        Ok(())
    }
}
