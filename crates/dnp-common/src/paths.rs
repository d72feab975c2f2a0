//! Standard filesystem paths for the DNP daemon.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default root directory for DNP data.
pub static DNP_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("DNP_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/usr/src/dappnode"))
});

/// Standard paths used by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnpPaths {
    /// Root data directory (default: /usr/src/dappnode).
    pub root: PathBuf,
}

impl DnpPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding user-installed packages.
    #[must_use]
    pub fn repo(&self) -> PathBuf {
        self.root.join("dnp_repo")
    }

    /// Directory holding core packages.
    #[must_use]
    pub fn core(&self) -> PathBuf {
        self.root.join("DNCORE")
    }

    /// Directory for a specific user-installed package.
    #[must_use]
    pub fn package(&self, name: &str) -> PathBuf {
        self.repo().join(name)
    }

    /// Compose file of a package.
    ///
    /// Core packages live side by side in the core directory and are named
    /// after the first label of the package name
    /// (`admin.dnp.dappnode.eth` -> `docker-compose-admin.yml`).
    #[must_use]
    pub fn compose_file(&self, name: &str, is_core: bool) -> PathBuf {
        if is_core {
            let short = name.split('.').next().unwrap_or(name);
            self.core().join(format!("docker-compose-{short}.yml"))
        } else {
            self.package(name).join("docker-compose.yml")
        }
    }

    /// Persisted key/value store file.
    #[must_use]
    pub fn store(&self) -> PathBuf {
        self.core().join("maindb.json")
    }

    /// Static IP written during installation.
    #[must_use]
    pub fn static_ip(&self) -> PathBuf {
        self.root.join("config").join("static_ip")
    }

    /// Release index consulted for available package updates.
    #[must_use]
    pub fn registry_index(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    /// Create all necessary directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.repo())?;
        std::fs::create_dir_all(self.core())?;
        Ok(())
    }
}

impl Default for DnpPaths {
    fn default() -> Self {
        Self {
            root: DNP_ROOT.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_root() {
        let paths = DnpPaths::with_root("/tmp/dnp-test");
        assert_eq!(paths.repo(), PathBuf::from("/tmp/dnp-test/dnp_repo"));
        assert_eq!(
            paths.store(),
            PathBuf::from("/tmp/dnp-test/DNCORE/maindb.json")
        );
    }

    #[test]
    fn package_compose_path() {
        let paths = DnpPaths::with_root("/srv");
        assert_eq!(
            paths.compose_file("goerli.dnp.dappnode.eth", false),
            PathBuf::from("/srv/dnp_repo/goerli.dnp.dappnode.eth/docker-compose.yml")
        );
    }

    #[test]
    fn core_compose_path() {
        let paths = DnpPaths::with_root("/srv");
        assert_eq!(
            paths.compose_file("admin.dnp.dappnode.eth", true),
            PathBuf::from("/srv/DNCORE/docker-compose-admin.yml")
        );
    }

    #[test]
    fn create_dirs_under_temp_root() {
        let temp = tempfile::tempdir().unwrap();
        let paths = DnpPaths::with_root(temp.path());
        paths.create_dirs().unwrap();
        assert!(paths.repo().is_dir());
        assert!(paths.core().is_dir());
    }
}
