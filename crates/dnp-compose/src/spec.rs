//! Compose file model.
//!
//! Only the parts of a compose file that matter for port forwarding are
//! modelled; every other key is ignored.

use std::path::Path;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::ports::PortEntry;

/// A parsed docker-compose file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComposeFile {
    /// Services, in declaration order.
    #[serde(default, deserialize_with = "ordered_services")]
    pub services: Vec<(String, ServiceSpec)>,
}

/// Service specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Image to use.
    #[serde(default)]
    pub image: Option<String>,

    /// Container name override.
    #[serde(default)]
    pub container_name: Option<String>,

    /// Port mappings.
    #[serde(default)]
    pub ports: Vec<PortEntry>,

    /// Restart policy.
    #[serde(default)]
    pub restart: Option<String>,
}

/// `services` is a YAML mapping; collect it as a list so that the
/// declaration order survives.
fn ordered_services<'de, D>(deserializer: D) -> Result<Vec<(String, ServiceSpec)>, D::Error>
where
    D: Deserializer<'de>,
{
    let mapping = Option::<serde_yaml::Mapping>::deserialize(deserializer)?.unwrap_or_default();
    mapping
        .into_iter()
        .map(|(key, value)| -> Result<(String, ServiceSpec), D::Error> {
            let name = key
                .as_str()
                .ok_or_else(|| D::Error::custom("service names must be strings"))?
                .to_string();
            let spec = if value.is_null() {
                ServiceSpec::default()
            } else {
                serde_yaml::from_value(value).map_err(D::Error::custom)?
            };
            Ok((name, spec))
        })
        .collect()
}

impl ComposeFile {
    /// Parse from YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError::Parse`] on malformed YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ComposeError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse from file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn from_file(path: &Path) -> Result<Self, ComposeError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&content)
    }

    /// Get a service by name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services
            .iter()
            .find(|(service, _)| service == name)
            .map(|(_, spec)| spec)
    }
}

/// Compose file errors.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    /// I/O error.
    #[error("Failed to read compose file: {0}")]
    Io(#[from] std::io::Error),
    /// Parse error.
    #[error("Failed to parse compose file: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// A port entry that cannot be forwarded.
    #[error("Invalid port entry {entry:?}: {reason}")]
    InvalidPort {
        /// The offending entry.
        entry: String,
        /// Why it was rejected.
        reason: String,
    },
}
