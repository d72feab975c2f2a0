//! # dnp-common
//!
//! Shared types and utilities for the DNP package daemon.
//!
//! This crate provides functionality used across all DNP crates:
//! - The package, port and event data model
//! - The provider contracts for container inventory and compose files
//! - Standard filesystem paths
//! - The persisted key/value store
//! - Daemon configuration
//! - Common error types

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod paths;
pub mod provider;
pub mod store;

pub use config::DaemonConfig;
pub use error::{DnpError, DnpResult};
pub use model::{PackageContainer, PortBinding, PortMapping, Protocol};
pub use paths::DnpPaths;
pub use provider::{ComposePortReader, ContainerInventoryProvider};
pub use store::{Entry, JsonFileStore, KvStore, MemoryStore, Namespace};
