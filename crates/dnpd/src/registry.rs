//! File backed release index.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use dnp_common::{DnpError, DnpResult};
use dnp_watch::UpdateRegistry;

/// Latest versions read from a JSON object mapping package names to versions.
///
/// The file is re-read on every lookup so that an index refreshed by another
/// process is picked up without restarting. A missing file means no package
/// has a known release.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    /// Read the index at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn index(&self) -> DnpResult<HashMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => serde_json::from_str(&json).map_err(|e| {
                DnpError::provider("registry", format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No release index");
                Ok(HashMap::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl UpdateRegistry for FileRegistry {
    async fn latest_version(&self, package: &str) -> DnpResult<Option<String>> {
        Ok(self.index().await?.remove(package))
    }
}
