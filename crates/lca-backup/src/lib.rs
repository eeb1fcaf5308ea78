//! Velero state capture and recovery for image-based upgrades
//!
//! Application state is captured with Velero Backups before the node is
//! pivoted to a new image and recovered with Restores afterwards:
//!
//! - **wave**: Groups Backups and Restores by their apply-wave annotation
//! - **tracker**: Creates and observes one wave at a time, resumable across
//!   process restarts
//! - **persistence**: Carries the OADP configuration and the pending
//!   Restores across the reboot on the host filesystem
//! - **cleanup**: Uninstalls the OADP operator and removes stale Backups
//! - **config_source**: Loads Backup and Restore manifests from ConfigMaps
//! - **velero** / **oadp**: Typed Velero and OADP resources
//! - **client**: Narrow read/write/delete seams over the Kubernetes API

#![deny(missing_docs)]

pub mod cleanup;
pub mod client;
pub mod config_source;
pub mod oadp;
pub mod persistence;
pub mod tracker;
pub mod velero;
pub mod wave;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cleanup::{cleanup_backups, delete_operator};
pub use client::{KubeObjects, ObjectDeleter, ObjectReader, ObjectWriter};
pub use config_source::{load_backups, load_restores, ConfigSourceRef};
pub use oadp::{fetch_cluster_id, DataProtectionApplication};
pub use persistence::{
    check_storage_backend, export_configuration, export_generated_restores, export_restores,
    import_configuration, load_generated_restores, restores_for_backups, wait_for_dpa_reconciled,
};
pub use tracker::{CaptureRestoreTracker, Tracker, TrackerPolicy, TrackerStatus};
pub use velero::{Backup, Restore, StateRequest};
pub use wave::{group_into_waves, Wave};
