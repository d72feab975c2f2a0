//! Router convergence.
//!
//! Each cycle compares the desired port set with the router's forwarding
//! table and issues only the calls needed to close the gap:
//! - desired but missing (or expired): add
//! - desired, ours, and close to lease expiry: renew
//! - desired, ours, but forwarding to another host or port: remove, then add
//! - ours but no longer desired: remove
//! - desired but held by another client: reported as a conflict, left alone
//!
//! Entries are "ours" when their description starts with the configured tag.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dnp_common::PortMapping;
use dnp_common::config::NatConfig;
use parking_lot::Mutex;
use serde::Serialize;

use crate::aggregator::PortAggregator;
use crate::gateway::{GatewayError, NatGateway, NatMapping};

/// Tunables of the reconciliation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Description tagging the entries owned by this daemon.
    pub description: String,
    /// Lease requested for added and renewed entries.
    pub lease: Duration,
    /// Renew entries whose remaining lease is at most this.
    pub renew_before: Duration,
}

impl ReconcilerSettings {
    /// Whether the router entry was created by this daemon.
    #[must_use]
    pub fn owns(&self, entry: &NatMapping) -> bool {
        entry.description.starts_with(&self.description)
    }
}

impl From<&NatConfig> for ReconcilerSettings {
    fn from(config: &NatConfig) -> Self {
        Self {
            description: config.description.clone(),
            lease: config.lease(),
            renew_before: config.renew_before(),
        }
    }
}

/// Gateway calls needed to converge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Entries to create.
    pub add: Vec<PortMapping>,
    /// Entries to refresh.
    pub renew: Vec<PortMapping>,
    /// Entries to delete.
    pub remove: Vec<PortMapping>,
    /// Own entries forwarding somewhere else, deleted then created again.
    pub redirect: Vec<PortMapping>,
    /// Entries already in place.
    pub unchanged: Vec<PortMapping>,
    /// Desired entries held by another client.
    pub conflicts: Vec<PortMapping>,
}

impl Plan {
    /// Compute the plan for one cycle.
    ///
    /// Duplicate desired mappings are collapsed, keeping the first occurrence.
    /// An own entry is only in place when it forwards to `lan_address` on the
    /// same port.
    #[must_use]
    pub fn compute(
        desired: &[PortMapping],
        actual: &[NatMapping],
        lan_address: &str,
        settings: &ReconcilerSettings,
    ) -> Self {
        let on_router: HashMap<PortMapping, &NatMapping> =
            actual.iter().map(|entry| (entry.mapping, entry)).collect();

        let mut plan = Self::default();
        let mut wanted = HashSet::new();

        for mapping in desired {
            if !wanted.insert(*mapping) {
                continue;
            }
            match on_router.get(mapping) {
                None => plan.add.push(*mapping),
                Some(entry) if !settings.owns(entry) => plan.conflicts.push(*mapping),
                Some(entry)
                    if entry.internal_client != lan_address
                        || entry.internal_port != mapping.port_number =>
                {
                    plan.redirect.push(*mapping);
                }
                Some(entry) => match entry.lease {
                    Some(left) if left.is_zero() => plan.add.push(*mapping),
                    Some(left) if left <= settings.renew_before => plan.renew.push(*mapping),
                    _ => plan.unchanged.push(*mapping),
                },
            }
        }

        let mut stale = HashSet::new();
        for entry in actual {
            if settings.owns(entry)
                && !wanted.contains(&entry.mapping)
                && stale.insert(entry.mapping)
            {
                plan.remove.push(entry.mapping);
            }
        }

        plan
    }

    /// Number of mutating gateway calls the plan requires.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.add.len() + self.renew.len() + self.remove.len() + 2 * self.redirect.len()
    }
}

/// Kind of gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Create an entry.
    Add,
    /// Refresh a lease.
    Renew,
    /// Delete an entry.
    Remove,
}

/// A gateway call that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedOperation {
    /// What was attempted.
    pub action: Action,
    /// On which mapping.
    pub mapping: PortMapping,
    /// Why it failed.
    pub error: String,
}

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Entries created.
    pub added: Vec<PortMapping>,
    /// Leases refreshed.
    pub renewed: Vec<PortMapping>,
    /// Entries deleted.
    pub removed: Vec<PortMapping>,
    /// Entries already in place.
    pub unchanged: Vec<PortMapping>,
    /// Desired entries held by another client.
    pub conflicts: Vec<PortMapping>,
    /// Calls that failed.
    pub failed: Vec<FailedOperation>,
}

impl ReconcileReport {
    /// Number of successful mutating calls.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.added.len() + self.renewed.len() + self.removed.len()
    }
}

/// Last known desired and applied sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileState {
    /// Desired set of the last cycle, deduplicated.
    pub desired: Vec<PortMapping>,
    /// Entries known to be in place after the last cycle.
    pub applied: Vec<PortMapping>,
}

/// Drives the router towards the desired port set.
pub struct NatReconciler {
    aggregator: PortAggregator,
    gateway: Arc<dyn NatGateway>,
    settings: ReconcilerSettings,
    state: Mutex<ReconcileState>,
}

impl NatReconciler {
    /// Create a reconciler.
    pub fn new(
        aggregator: PortAggregator,
        gateway: Arc<dyn NatGateway>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            aggregator,
            gateway,
            settings,
            state: Mutex::new(ReconcileState::default()),
        }
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Desired and applied sets as of the last completed cycle.
    #[must_use]
    pub fn state(&self) -> ReconcileState {
        self.state.lock().clone()
    }

    /// Run one reconciliation cycle.
    ///
    /// Individual add/renew/remove failures are recorded in the report and do
    /// not stop the cycle.
    ///
    /// # Errors
    ///
    /// Returns an error, without touching the router, if the gateway cannot
    /// be discovered or its table cannot be listed.
    pub async fn reconcile(&self) -> Result<ReconcileReport, GatewayError> {
        let info = self.gateway.discover().await?;
        let desired = self.aggregator.ports_to_open().await;
        let actual = self.gateway.list().await?;

        let plan = Plan::compute(&desired, &actual, &info.lan_address, &self.settings);
        tracing::debug!(
            add = plan.add.len(),
            renew = plan.renew.len(),
            remove = plan.remove.len(),
            redirect = plan.redirect.len(),
            unchanged = plan.unchanged.len(),
            "Planned NAT changes"
        );

        let mut report = ReconcileReport {
            unchanged: plan.unchanged.clone(),
            conflicts: plan.conflicts.clone(),
            ..ReconcileReport::default()
        };

        for mapping in &plan.conflicts {
            tracing::warn!(
                port = mapping.port_number,
                protocol = %mapping.protocol,
                "Port is forwarded to another client, leaving it alone"
            );
        }

        for mapping in &plan.remove {
            match self.gateway.remove(mapping).await {
                Ok(()) => {
                    tracing::info!(port = mapping.port_number, protocol = %mapping.protocol, "Closed port");
                    report.removed.push(*mapping);
                }
                Err(e) => record_failure(&mut report, Action::Remove, *mapping, &e),
            }
        }

        let mut redirected = Vec::new();
        for mapping in &plan.redirect {
            match self.gateway.remove(mapping).await {
                Ok(()) => {
                    tracing::info!(
                        port = mapping.port_number,
                        protocol = %mapping.protocol,
                        lan_address = %info.lan_address,
                        "Port forwarded to another host, moving it"
                    );
                    redirected.push(*mapping);
                }
                Err(e) => record_failure(&mut report, Action::Remove, *mapping, &e),
            }
        }

        let additions = plan
            .add
            .iter()
            .chain(&redirected)
            .map(|m| (Action::Add, m))
            .chain(plan.renew.iter().map(|m| (Action::Renew, m)));
        for (action, mapping) in additions {
            match self
                .gateway
                .add(mapping, &self.settings.description, self.settings.lease)
                .await
            {
                Ok(()) if action == Action::Add => {
                    tracing::info!(port = mapping.port_number, protocol = %mapping.protocol, "Opened port");
                    report.added.push(*mapping);
                }
                Ok(()) => {
                    tracing::debug!(port = mapping.port_number, protocol = %mapping.protocol, "Renewed port lease");
                    report.renewed.push(*mapping);
                }
                Err(e) => record_failure(&mut report, action, *mapping, &e),
            }
        }

        let applied = report
            .unchanged
            .iter()
            .chain(&report.added)
            .chain(&report.renewed)
            .copied()
            .collect();
        let mut deduped = Vec::new();
        let mut seen = HashSet::new();
        for mapping in desired {
            if seen.insert(mapping) {
                deduped.push(mapping);
            }
        }
        *self.state.lock() = ReconcileState {
            desired: deduped,
            applied,
        };

        tracing::info!(
            added = report.added.len(),
            renewed = report.renewed.len(),
            removed = report.removed.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "NAT reconciliation finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for NatReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatReconciler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn record_failure(
    report: &mut ReconcileReport,
    action: Action,
    mapping: PortMapping,
    error: &GatewayError,
) {
    tracing::warn!(
        ?action,
        port = mapping.port_number,
        protocol = %mapping.protocol,
        error = %error,
        "NAT operation failed"
    );
    report.failed.push(FailedOperation {
        action,
        mapping,
        error: error.to_string(),
    });
}
