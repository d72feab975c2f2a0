//! Consumers persisting or logging bus events.

use dnp_common::Namespace;
use dnp_common::events::{LogLevel, PackageNotification};
use dnp_watch::EventBus;

/// Subscribe the daemon's sinks to `bus`.
///
/// Notifications are stored in `notifications` keyed by their id, so a
/// repeated id replaces the previous notification.
pub fn install(bus: &EventBus, notifications: Namespace) {
    bus.notification.on(move |notification| {
        notifications
            .entry::<PackageNotification>(&notification.id)
            .set(notification)?;
        tracing::info!(
            id = %notification.id,
            kind = ?notification.kind,
            title = %notification.title,
            "Notification"
        );
        Ok(())
    });

    bus.log_ui.on(|log| {
        if log.is_noisy() {
            tracing::debug!(id = %log.id, package = %log.name, message = %log.message, clear = log.clear, "Progress");
        } else {
            tracing::info!(id = %log.id, package = %log.name, message = %log.message, "Progress");
        }
        Ok(())
    });

    bus.log_user_action.on(|log| {
        let failed = log.level == LogLevel::Error;
        tracing::info!(event = %log.event, failed, message = %log.message, "User action");
        Ok(())
    });

    bus.packages.on(|packages| {
        let running = packages.iter().filter(|p| p.running).count();
        tracing::debug!(count = packages.len(), running, "Package list updated");
        Ok(())
    });

    bus.disk_usage.on(|usage| {
        tracing::trace!(
            mount = %usage.mount_point.display(),
            free_percent = usage.free_percent(),
            "Disk usage"
        );
        Ok(())
    });
}
