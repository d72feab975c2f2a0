//! Periodic router port forwarding.

use std::sync::Arc;

use async_trait::async_trait;
use dnp_common::{DnpError, DnpResult, Entry};
use dnp_nat::{GatewayError, NatReconciler, ReconcileReport};

use crate::bus::EventBus;
use crate::scheduler::Job;

/// Runs a NAT reconciliation cycle per tick and publishes its report.
#[derive(Debug)]
pub struct NatRenewalWatcher {
    reconciler: Arc<NatReconciler>,
    upnp_available: Entry<bool>,
    bus: Arc<EventBus>,
}

impl NatRenewalWatcher {
    /// Create the watcher. `upnp_available` caches whether the last cycle
    /// reached the router.
    pub fn new(
        reconciler: Arc<NatReconciler>,
        upnp_available: Entry<bool>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            reconciler,
            upnp_available,
            bus,
        }
    }

    /// Run one cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the router could not be queried; nothing was
    /// changed on it in that case.
    pub async fn cycle(&self) -> DnpResult<ReconcileReport> {
        match self.reconciler.reconcile().await {
            Ok(report) => {
                self.record_availability(true);
                self.bus.port_mappings.emit(report.clone());
                Ok(report)
            }
            Err(e) => {
                if matches!(e, GatewayError::Unreachable(_)) {
                    self.record_availability(false);
                }
                Err(DnpError::from(e))
            }
        }
    }

    fn record_availability(&self, available: bool) {
        match self.upnp_available.get() {
            Ok(Some(previous)) if previous == available => return,
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read UPnP availability"),
        }
        if available {
            tracing::info!("UPnP gateway available");
        } else {
            tracing::warn!("UPnP gateway not available, ports must be forwarded manually");
        }
        if let Err(e) = self.upnp_available.set(&available) {
            tracing::warn!(error = %e, "Failed to store UPnP availability");
        }
    }
}

#[async_trait]
impl Job for NatRenewalWatcher {
    async fn run(&self) -> DnpResult<()> {
        self.cycle().await.map(|_| ())
    }
}
