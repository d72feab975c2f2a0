//! Periodic watchers.
//!
//! Each watcher is a [`Job`](crate::Job): it polls one data source,
//! derives a small value from it and publishes that on the [`EventBus`](crate::EventBus).

mod auto_updates;
mod chains;
mod disk_usage;
mod nat_renewal;

pub use auto_updates::{AutoUpdateWatcher, UpdateKind, UpdateRegistry, Version};
pub use chains::{ChainDataWatcher, ChainSyncProvider, SyncStatus, chain_data, sync_progress};
pub use disk_usage::{DiskLevel, DiskProbe, DiskUsageWatcher, StatvfsProbe};
pub use nat_renewal::NatRenewalWatcher;
