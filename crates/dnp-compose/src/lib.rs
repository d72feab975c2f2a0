//! # dnp-compose
//!
//! Reads the port mappings a package declares in its docker-compose file.
//!
//! dnp-compose provides:
//! - A serde model of the parts of a compose file the daemon cares about
//! - Parsing of short (`"4001:4001/udp"`) and long port syntax
//! - [`FsComposePortReader`], the on-disk [`dnp_common::ComposePortReader`]

#![warn(missing_docs)]

pub mod ports;
pub mod reader;
pub mod spec;

pub use reader::FsComposePortReader;
pub use spec::{ComposeFile, ComposeError};
