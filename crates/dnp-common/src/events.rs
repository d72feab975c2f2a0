//! Payloads published on the daemon's event topics.
//!
//! Field names serialize in camelCase because these values are forwarded
//! verbatim to the remote administration UI.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync status of one blockchain node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainData {
    /// Package running the node.
    pub dnp_name: String,
    /// Human readable chain name.
    pub name: String,
    /// Whether the node is still catching up.
    pub syncing: bool,
    /// Whether the status could not be determined.
    pub error: bool,
    /// Status line shown to the user.
    pub message: String,
    /// Sync progress in percent, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

/// Which packages may be updated without user interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoUpdateSettings {
    /// Default for core packages.
    pub system_packages: bool,
    /// Default for user-installed packages.
    pub user_packages: bool,
    /// Per-package overrides.
    #[serde(default)]
    pub per_package: BTreeMap<String, bool>,
}

impl Default for AutoUpdateSettings {
    fn default() -> Self {
        Self {
            system_packages: true,
            user_packages: false,
            per_package: BTreeMap::new(),
        }
    }
}

impl AutoUpdateSettings {
    /// Whether auto-updates are enabled for a package.
    #[must_use]
    pub fn is_enabled(&self, name: &str, is_core: bool) -> bool {
        self.per_package.get(name).copied().unwrap_or(if is_core {
            self.system_packages
        } else {
            self.user_packages
        })
    }
}

/// A package with a newer version in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCandidate {
    /// Package name.
    pub name: String,
    /// Trusted system package.
    pub is_core: bool,
    /// Installed version.
    pub current: String,
    /// Latest registry version.
    pub latest: String,
    /// Whether the update may be applied automatically.
    pub eligible: bool,
}

/// Auto-update state shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoUpdateData {
    /// Current settings.
    pub settings: AutoUpdateSettings,
    /// Packages with a pending update.
    pub candidates: Vec<UpdateCandidate>,
    /// When the registry was consulted.
    pub checked_at: DateTime<Utc>,
}

/// Progress line of a long running user operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressLog {
    /// Operation id.
    pub id: String,
    /// Package the operation acts on.
    pub name: String,
    /// Progress message.
    #[serde(default)]
    pub message: String,
    /// Clears the progress line in the UI.
    #[serde(default)]
    pub clear: bool,
}

impl ProgressLog {
    /// Download progress and clear messages are too frequent to log at info.
    #[must_use]
    pub fn is_noisy(&self) -> bool {
        self.clear || self.message.contains('%')
    }
}

/// Severity of a user action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Informational.
    Info,
    /// Failed action.
    Error,
}

/// Record of an action performed on behalf of the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActionLog {
    /// Severity.
    pub level: LogLevel,
    /// Call or event that was performed.
    pub event: String,
    /// Outcome message.
    pub message: String,
    /// Arguments of the call.
    #[serde(default)]
    pub kwargs: serde_json::Value,
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
}

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Positive outcome.
    Success,
    /// Needs attention.
    Warning,
    /// Needs immediate attention.
    Danger,
}

/// Notification pushed to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageNotification {
    /// Stable id; re-sending the same id replaces the notification.
    pub id: String,
    /// Severity.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Title.
    pub title: String,
    /// Body.
    pub body: String,
    /// When the notification was raised.
    pub timestamp: DateTime<Utc>,
}

impl PackageNotification {
    /// Create a notification stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            body: body.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Filesystem usage of a mount point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskUsage {
    /// Monitored mount point.
    pub mount_point: PathBuf,
    /// Total size in bytes.
    pub total_bytes: u64,
    /// Bytes available to unprivileged users.
    pub available_bytes: u64,
}

impl DiskUsage {
    /// Free space in percent of the total size.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn free_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.available_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}
