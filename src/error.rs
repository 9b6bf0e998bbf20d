//! Error types for the passt binding sidecar

use thiserror::Error;

/// Result type alias using the sidecar [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by a domain definition call. None of them are retried.
#[derive(Error, Debug)]
pub enum Error {
    /// The VMI payload is not a well formed instance description
    #[error("failed to unmarshal VMI: {0}")]
    Decode(#[from] serde_json::Error),

    /// The requested interface/network binding is invalid
    #[error("failed to create passt configurator: {0}")]
    Configuration(#[from] ConfigError),

    /// The domain XML is malformed
    #[error("failed to parse domain XML: {0}")]
    Parse(String),

    /// No `<interface>` in the domain carries the expected alias
    #[error("failed to find interface {interface:?} in domain XML")]
    ElementNotFound { interface: String },

    /// The mutated document could not be written back out
    #[error("failed to serialize domain XML: {0}")]
    Serialize(String),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Reasons a passt configurator cannot be built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("interface {interface:?} has no matching network")]
    MissingNetwork { interface: String },

    #[error("interface name {0:?} is used more than once")]
    DuplicateInterface(String),

    #[error("network name {0:?} is used more than once")]
    DuplicateNetwork(String),

    #[error("interface {interface:?} is bound to {source_kind} network {network:?}, passt requires the pod network")]
    IncompatibleNetwork {
        interface: String,
        network: String,
        source_kind: &'static str,
    },

    #[error("interface {interface:?} declares port {port} with unsupported protocol {protocol:?}")]
    UnsupportedProtocol {
        interface: String,
        port: i32,
        protocol: String,
    },

    #[error("interface {interface:?} declares invalid port {port}")]
    InvalidPort { interface: String, port: i32 },

    #[error("interface {interface:?} declares TCP port {port}, which is reserved for the injected proxy sidecar")]
    ReservedPort { interface: String, port: u16 },
}
