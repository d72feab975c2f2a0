//! Static IP configured during installation.

use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use dnp_common::{DnpResult, Entry, Namespace};

/// Static IP of the appliance, imported once from the installation file.
#[derive(Debug, Clone)]
pub struct StaticIp {
    path: PathBuf,
    value: Entry<String>,
    imported: Entry<bool>,
}

impl StaticIp {
    /// Import from `path`, caching in `namespace`.
    pub fn new(path: impl Into<PathBuf>, namespace: &Namespace) -> Self {
        Self {
            path: path.into(),
            value: namespace.entry("value"),
            imported: namespace.entry("imported"),
        }
    }

    /// The static IP, or an empty string when none was set.
    ///
    /// The installation file is read only the first time; afterwards the
    /// stored value is authoritative.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn get(&self) -> DnpResult<String> {
        if self.imported.get_or_default()? {
            return self.value.get_or_default();
        }

        let ip = read_installation_ip(&self.path);
        self.value.set(&ip)?;
        self.imported.set(&true)?;

        if ip.is_empty() {
            tracing::info!("Static IP was not set on installation");
        } else {
            tracing::info!(%ip, "Static IP was set on installation");
        }
        Ok(ip)
    }
}

fn read_installation_ip(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let ip = content.trim();
            if ip.parse::<IpAddr>().is_ok() {
                ip.to_string()
            } else {
                String::new()
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Static IP file not found");
            String::new()
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to read static IP");
            String::new()
        }
    }
}
