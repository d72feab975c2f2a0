//! Contracts the daemon requires from its container-side collaborators.

use async_trait::async_trait;

use crate::error::DnpResult;
use crate::model::{PackageContainer, PortBinding};

/// Supplies the current list of package containers.
#[async_trait]
pub trait ContainerInventoryProvider: Send + Sync {
    /// List every package container, core and non-core.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DnpError::InventoryUnavailable`] when the inventory
    /// cannot be acquired at all.
    async fn list(&self) -> DnpResult<Vec<PackageContainer>>;
}

/// Supplies the port mappings declared in a package's compose definition.
#[async_trait]
pub trait ComposePortReader: Send + Sync {
    /// Read the published ports of a package, in declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DnpError::ComposeRead`] when the compose file is
    /// missing, unreadable or malformed.
    async fn read(&self, package: &str, is_core: bool) -> DnpResult<Vec<PortBinding>>;
}
