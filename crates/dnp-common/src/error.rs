//! Common error types for the DNP daemon.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`DnpError`].
pub type DnpResult<T> = Result<T, DnpError>;

/// Common errors across the DNP daemon.
#[derive(Error, Diagnostic, Debug)]
pub enum DnpError {
    /// The container inventory could not be acquired at all.
    #[error("Container inventory unavailable: {message}")]
    #[diagnostic(
        code(dnp::inventory::unavailable),
        help("Check that the Docker daemon is running and reachable")
    )]
    InventoryUnavailable {
        /// The underlying failure.
        message: String,
    },

    /// A package's compose definition could not be read or parsed.
    #[error("Failed to read compose file of {package}: {message}")]
    #[diagnostic(code(dnp::compose::read))]
    ComposeRead {
        /// The package whose compose file failed.
        package: String,
        /// The underlying failure.
        message: String,
    },

    /// The NAT gateway rejected a call or could not be reached.
    #[error("NAT gateway error: {message}")]
    #[diagnostic(
        code(dnp::nat::gateway),
        help("Make sure UPnP is enabled on the router")
    )]
    Gateway {
        /// The underlying failure.
        message: String,
    },

    /// An external data source (registry, chain node, filesystem probe) failed.
    #[error("Provider {provider} failed: {message}")]
    #[diagnostic(code(dnp::provider))]
    Provider {
        /// The provider name.
        provider: String,
        /// The underlying failure.
        message: String,
    },

    /// Persisted store error.
    #[error("Store error: {message}")]
    #[diagnostic(code(dnp::store))]
    Store {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(dnp::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(dnp::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(dnp::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// Internal error (should not happen).
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(dnp::internal),
        help("This is a bug, please report it at https://github.com/dnp-appliance/dnpd/issues")
    )]
    Internal {
        /// The error message.
        message: String,
    },
}

impl DnpError {
    /// Shorthand for a [`DnpError::Provider`] error.
    pub fn provider(provider: impl Into<String>, message: impl ToString) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for DnpError {
    fn from(err: serde_json::Error) -> Self {
        DnpError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DnpError {
    fn from(err: toml::de::Error) -> Self {
        DnpError::Config {
            message: err.to_string(),
        }
    }
}
