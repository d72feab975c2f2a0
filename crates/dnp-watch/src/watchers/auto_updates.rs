//! Auto-update eligibility.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dnp_common::events::{AutoUpdateData, AutoUpdateSettings, UpdateCandidate};
use dnp_common::{ContainerInventoryProvider, DnpError, DnpResult, Entry};

use crate::bus::EventBus;
use crate::scheduler::Job;

/// Source of the latest published version of each package.
#[async_trait]
pub trait UpdateRegistry: Send + Sync {
    /// Latest version of `package`, or `None` if the registry does not know it.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be consulted.
    async fn latest_version(&self, package: &str) -> DnpResult<Option<String>>;
}

/// A `major.minor.patch` version.
///
/// A leading `v` and any pre-release or build suffix are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Incompatible changes.
    pub major: u64,
    /// Compatible features.
    pub minor: u64,
    /// Fixes.
    pub patch: u64,
}

impl FromStr for Version {
    type Err = DnpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DnpError::Internal {
            message: format!("Invalid version '{s}'"),
        };

        let core = s
            .trim()
            .trim_start_matches('v')
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        let mut parts = core.split('.').map(str::parse::<u64>);
        let mut next = || parts.next().unwrap_or(Ok(0)).map_err(|_| invalid());

        let version = Self {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Size of a version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Major bump.
    Major,
    /// Minor bump.
    Minor,
    /// Patch bump.
    Patch,
}

impl UpdateKind {
    /// Classify the move from `current` to `latest`; `None` unless it is an upgrade.
    #[must_use]
    pub fn between(current: Version, latest: Version) -> Option<Self> {
        if latest <= current {
            return None;
        }
        Some(match (latest.major.cmp(&current.major), latest.minor.cmp(&current.minor)) {
            (Ordering::Greater, _) => Self::Major,
            (Ordering::Equal, Ordering::Greater) => Self::Minor,
            _ => Self::Patch,
        })
    }

    /// Whether the bump may be installed without asking the user.
    ///
    /// Core packages only take patches; user packages also take minor
    /// releases. Major releases always wait for the user.
    #[must_use]
    pub const fn is_automatic(self, is_core: bool) -> bool {
        match self {
            Self::Major => false,
            Self::Minor => !is_core,
            Self::Patch => true,
        }
    }
}

/// Publishes pending updates and whether each may be applied automatically.
pub struct AutoUpdateWatcher {
    inventory: Arc<dyn ContainerInventoryProvider>,
    registry: Arc<dyn UpdateRegistry>,
    settings: Entry<AutoUpdateSettings>,
    bus: Arc<EventBus>,
}

impl AutoUpdateWatcher {
    /// Create the watcher.
    pub fn new(
        inventory: Arc<dyn ContainerInventoryProvider>,
        registry: Arc<dyn UpdateRegistry>,
        settings: Entry<AutoUpdateSettings>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            inventory,
            registry,
            settings,
            bus,
        }
    }

    /// Answer `request_auto_update_data` with [`compute`](Self::compute).
    pub fn serve_requests(self: &Arc<Self>) {
        let watcher = Arc::clone(self);
        self.bus.request_auto_update_data.respond_with(move || {
            let watcher = Arc::clone(&watcher);
            async move { watcher.compute().await }
        });
    }

    /// Current auto-update data.
    ///
    /// Packages without a known installed version, or whose registry lookup
    /// fails, are left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the inventory or the settings cannot be read.
    pub async fn compute(&self) -> DnpResult<AutoUpdateData> {
        let settings = self.settings.get_or_default()?;
        let containers = self.inventory.list().await?;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for container in &containers {
            let Some(installed) = container.version.as_deref() else {
                continue;
            };
            if !seen.insert(container.name.as_str()) {
                continue;
            }

            let latest = match self.registry.latest_version(&container.name).await {
                Ok(Some(latest)) => latest,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(package = %container.name, error = %e, "Registry lookup failed");
                    continue;
                }
            };

            let kind = match (installed.parse::<Version>(), latest.parse::<Version>()) {
                (Ok(current), Ok(newest)) => UpdateKind::between(current, newest),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::debug!(package = %container.name, error = %e, "Unparsable version");
                    None
                }
            };
            let Some(kind) = kind else {
                continue;
            };

            candidates.push(UpdateCandidate {
                name: container.name.clone(),
                is_core: container.is_core,
                current: installed.to_string(),
                latest,
                eligible: settings.is_enabled(&container.name, container.is_core)
                    && kind.is_automatic(container.is_core),
            });
        }

        Ok(AutoUpdateData {
            settings,
            candidates,
            checked_at: Utc::now(),
        })
    }
}

impl fmt::Debug for AutoUpdateWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoUpdateWatcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for AutoUpdateWatcher {
    async fn run(&self) -> DnpResult<()> {
        let data = self.compute().await?;
        let eligible = data.candidates.iter().filter(|c| c.eligible).count();
        tracing::debug!(
            candidates = data.candidates.len(),
            eligible,
            "Checked for package updates"
        );
        self.bus.auto_update_data.emit(data);
        Ok(())
    }
}
