//! On-disk compose port reader.

use async_trait::async_trait;
use dnp_common::{ComposePortReader, DnpError, DnpPaths, DnpResult, PortBinding};

use crate::spec::{ComposeError, ComposeFile};

/// Reads declared ports from the compose files under the daemon's data root.
#[derive(Debug, Clone)]
pub struct FsComposePortReader {
    paths: DnpPaths,
}

impl FsComposePortReader {
    /// Create a reader rooted at `paths`.
    #[must_use]
    pub const fn new(paths: DnpPaths) -> Self {
        Self { paths }
    }
}

/// Published ports of every service, in declaration order.
///
/// # Errors
///
/// Returns [`ComposeError::InvalidPort`] if any entry is malformed.
pub fn declared_ports(compose: &ComposeFile) -> Result<Vec<PortBinding>, ComposeError> {
    let mut bindings = Vec::new();
    for (_, service) in &compose.services {
        for entry in &service.ports {
            bindings.extend(entry.bindings()?);
        }
    }
    Ok(bindings)
}

#[async_trait]
impl ComposePortReader for FsComposePortReader {
    async fn read(&self, package: &str, is_core: bool) -> DnpResult<Vec<PortBinding>> {
        let path = self.paths.compose_file(package, is_core);
        tracing::debug!(package, path = %path.display(), "Reading compose ports");

        ComposeFile::from_file(&path)
            .await
            .and_then(|compose| declared_ports(&compose))
            .map_err(|e| DnpError::ComposeRead {
                package: package.to_string(),
                message: format!("{}: {}", path.display(), e),
            })
    }
}
