//! Free disk space alerts.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dnp_common::config::DiskConfig;
use dnp_common::events::{DiskUsage, NotificationKind, PackageNotification};
use dnp_common::{DnpError, DnpResult};
use parking_lot::Mutex;

use crate::bus::EventBus;
use crate::scheduler::Job;

const NOTIFICATION_ID: &str = "diskSpaceRanOut";

/// Reads filesystem usage.
pub trait DiskProbe: Send + Sync {
    /// Usage of the filesystem holding `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem cannot be queried.
    fn usage(&self, mount_point: &Path) -> DnpResult<DiskUsage>;
}

/// [`DiskProbe`] backed by `statvfs(3)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

impl DiskProbe for StatvfsProbe {
    fn usage(&self, mount_point: &Path) -> DnpResult<DiskUsage> {
        let stat = rustix::fs::statvfs(mount_point).map_err(|e| DnpError::Internal {
            message: format!("statvfs {}: {e}", mount_point.display()),
        })?;
        Ok(DiskUsage {
            mount_point: mount_point.to_path_buf(),
            total_bytes: stat.f_blocks.saturating_mul(stat.f_frsize),
            available_bytes: stat.f_bavail.saturating_mul(stat.f_frsize),
        })
    }
}

/// Severity of the free space situation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiskLevel {
    /// Enough free space.
    #[default]
    Ok,
    /// Below the warning threshold.
    Warning,
    /// Below the critical threshold.
    Critical,
}

impl DiskLevel {
    /// Level for a free space percentage.
    #[must_use]
    pub fn classify(free_percent: f64, config: &DiskConfig) -> Self {
        if free_percent < config.critical_free_percent {
            Self::Critical
        } else if free_percent < config.warning_free_percent {
            Self::Warning
        } else {
            Self::Ok
        }
    }
}

/// Samples disk usage and notifies when free space crosses a threshold.
///
/// Each level notifies once when entered from a less severe one, and again
/// only after usage has recovered above it.
pub struct DiskUsageWatcher {
    config: DiskConfig,
    probe: Arc<dyn DiskProbe>,
    bus: Arc<EventBus>,
    level: Mutex<DiskLevel>,
}

impl DiskUsageWatcher {
    /// Create the watcher.
    pub fn new(config: DiskConfig, probe: Arc<dyn DiskProbe>, bus: Arc<EventBus>) -> Self {
        Self {
            config,
            probe,
            bus,
            level: Mutex::new(DiskLevel::Ok),
        }
    }

    /// Level reached on the last sample.
    #[must_use]
    pub fn level(&self) -> DiskLevel {
        *self.level.lock()
    }

    fn notification(level: DiskLevel, usage: &DiskUsage) -> Option<PackageNotification> {
        let free = usage.free_percent();
        let mount = usage.mount_point.display();
        match level {
            DiskLevel::Ok => None,
            DiskLevel::Warning => Some(PackageNotification::new(
                NOTIFICATION_ID,
                NotificationKind::Warning,
                "Disk space is running low",
                format!("Only {free:.1}% of {mount} is free. Remove unused packages or volumes."),
            )),
            DiskLevel::Critical => Some(PackageNotification::new(
                NOTIFICATION_ID,
                NotificationKind::Danger,
                "Disk space critically low",
                format!("Only {free:.1}% of {mount} is free. Packages may stop working."),
            )),
        }
    }
}

impl fmt::Debug for DiskUsageWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskUsageWatcher")
            .field("config", &self.config)
            .field("level", &self.level())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for DiskUsageWatcher {
    async fn run(&self) -> DnpResult<()> {
        let usage = self.probe.usage(&self.config.mount_point)?;
        let level = DiskLevel::classify(usage.free_percent(), &self.config);
        let previous = std::mem::replace(&mut *self.level.lock(), level);

        if level > previous {
            tracing::warn!(
                mount = %usage.mount_point.display(),
                free_percent = usage.free_percent(),
                ?level,
                "Free disk space below threshold"
            );
            if let Some(notification) = Self::notification(level, &usage) {
                self.bus.notification.emit(notification);
            }
        } else if level < previous {
            tracing::info!(
                mount = %usage.mount_point.display(),
                free_percent = usage.free_percent(),
                ?level,
                "Free disk space recovered"
            );
        }

        self.bus.disk_usage.emit(usage);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct Scripted(Mutex<Vec<u64>>);

    impl DiskProbe for Scripted {
        fn usage(&self, mount_point: &Path) -> DnpResult<DiskUsage> {
            let available = self.0.lock().remove(0);
            Ok(DiskUsage {
                mount_point: mount_point.to_path_buf(),
                total_bytes: 100,
                available_bytes: available,
            })
        }
    }

    fn watcher(samples: Vec<u64>) -> (DiskUsageWatcher, Arc<Mutex<Vec<NotificationKind>>>) {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.notification.on(move |n| {
            sink.lock().push(n.kind);
            Ok(())
        });
        let watcher = DiskUsageWatcher::new(
            DiskConfig::default(),
            Arc::new(Scripted(Mutex::new(samples))),
            bus,
        );
        (watcher, seen)
    }

    #[test]
    fn classification_uses_both_thresholds() {
        let config = DiskConfig::default();
        assert_eq!(DiskLevel::classify(50.0, &config), DiskLevel::Ok);
        assert_eq!(DiskLevel::classify(9.0, &config), DiskLevel::Warning);
        assert_eq!(DiskLevel::classify(4.0, &config), DiskLevel::Critical);
    }

    #[tokio::test]
    async fn alerts_fire_once_per_level() {
        let (watcher, seen) = watcher(vec![50, 8, 7, 3, 2, 8, 3]);
        for _ in 0..7 {
            watcher.run().await.unwrap();
        }
        assert_eq!(
            *seen.lock(),
            vec![
                NotificationKind::Warning,
                NotificationKind::Danger,
                NotificationKind::Danger,
            ]
        );
        assert_eq!(watcher.level(), DiskLevel::Critical);
    }

    #[tokio::test]
    async fn recovery_rearms_the_warning() {
        let (watcher, seen) = watcher(vec![8, 40, 8]);
        for _ in 0..3 {
            watcher.run().await.unwrap();
        }
        assert_eq!(
            *seen.lock(),
            vec![NotificationKind::Warning, NotificationKind::Warning]
        );
    }

    #[test]
    fn statvfs_reads_the_root_filesystem() {
        let usage = StatvfsProbe.usage(Path::new("/")).unwrap();
        assert!(usage.total_bytes > 0);
        assert!(usage.available_bytes <= usage.total_bytes);
        assert_eq!(usage.mount_point, PathBuf::from("/"));
    }

    #[test]
    fn statvfs_on_missing_path_fails() {
        assert!(StatvfsProbe.usage(Path::new("/definitely/not/here")).is_err());
    }
}
