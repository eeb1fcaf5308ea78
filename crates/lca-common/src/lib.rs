//! Common types for the lifecycle agent: errors, Kubernetes helpers,
//! filesystem configuration, YAML parsing and telemetry

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;
pub mod telemetry;
pub mod yaml;

pub use error::{Error, StatusError, StatusKind, StatusSubject};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace where the OADP operator and its objects live
pub const OADP_NAMESPACE: &str = "openshift-adp";

/// Annotation ordering backups and restores into waves
pub const APPLY_WAVE_ANNOTATION: &str = "lca.openshift.io/apply-wave";

/// Wave assigned to requests without a (valid) apply-wave annotation
pub const DEFAULT_APPLY_WAVE: i32 = i32::MAX;

/// Label carrying the cluster ID on backups created by the agent
pub const CLUSTER_ID_LABEL: &str = "config.openshift.io/clusterID";
