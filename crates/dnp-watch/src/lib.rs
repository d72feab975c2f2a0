//! # dnp-watch
//!
//! The moving parts of the DNP daemon:
//! - [`EventBus`]: typed broadcast topics and request/response topics
//! - [`Scheduler`]: named periodic tasks with at-most-one run in flight
//! - watchers that poll one data source each and publish on the bus

#![warn(missing_docs)]

pub mod bus;
pub mod scheduler;
pub mod watchers;

pub use bus::{EventBus, HandlerError, RequestTopic, SubscriptionId, Topic};
pub use scheduler::{Job, JobFn, MIN_INTERVAL, Scheduler, TaskHandle, TaskSpec};
pub use watchers::{
    AutoUpdateWatcher, ChainDataWatcher, ChainSyncProvider, DiskLevel, DiskProbe,
    DiskUsageWatcher, NatRenewalWatcher, StatvfsProbe, SyncStatus, UpdateRegistry,
};
