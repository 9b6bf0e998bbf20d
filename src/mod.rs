//! Hook sidecar that wires VM network interfaces to the passt user-space
//! backend during domain definition.

pub mod domain;
pub mod error;
pub mod hooks;
pub mod passt;
pub mod vmi;

pub use error::{ConfigError, Error, Result};

pub mod api {
    pub mod info {
        tonic::include_proto!("kubevirt.hooks.info");
    }

    pub mod v1alpha2 {
        tonic::include_proto!("kubevirt.hooks.v1alpha2");
    }
}
