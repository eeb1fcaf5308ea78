//! Host-side operations for the lifecycle agent
//!
//! - [`host`]: run commands in the host's namespaces from inside the agent container
//! - [`store`]: stand up the throwaway etcd used during identity recovery
//! - [`recert`]: run the certificate-rewriting tool against it
//! - [`manifest`]: discover images from static pod manifests

#![deny(missing_docs)]

pub mod executor;
pub mod host;
pub mod manifest;
pub mod recert;
pub mod store;

pub use executor::{CommandExecutor, CommandOutput, ProcessExecutor};
pub use host::{HostCommand, HostExecutor};
pub use recert::{recover_identity, IdentityRecoveryRunner, RecoveryInvocation, RecoveryOptions};
pub use store::{EphemeralStore, EphemeralStoreBootstrap, HealthCheckConfig};
