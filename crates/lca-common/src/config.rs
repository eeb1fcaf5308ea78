//! Filesystem locations used by the agent
//!
//! The agent runs in a container with the host filesystem mounted under a
//! prefix. Every component that touches host files receives a [`Paths`]
//! value instead of reading a global, so tests can point it at a temp dir.

use std::path::{Path, PathBuf};

/// Where the host root filesystem is mounted inside the agent container
pub const DEFAULT_HOST_ROOT: &str = "/host";

/// Root of exported OADP artifacts (relative to the host root)
pub const OADP_PATH: &str = "/opt/OADP";

/// Subdirectory for exported DataProtectionApplication objects
pub const OADP_DPA_DIR: &str = "dpa";

/// Subdirectory for exported credential Secrets
pub const OADP_SECRET_DIR: &str = "secret";

/// Subdirectory for exported, wave-grouped Velero Restores
pub const OADP_RESTORE_DIR: &str = "veleroRestore";

/// Static pod manifest of the running etcd (host path)
pub const ETCD_STATIC_POD_MANIFEST: &str = "/etc/kubernetes/manifests/etcd-pod.yaml";

/// Directory holding backed-up certificates for recert (host path)
pub const BACKUP_CERTS_DIR: &str = "/var/opt/openshift/certs";

/// Resolved filesystem locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Prefix under which the host filesystem is visible to this process
    pub host_root: PathBuf,
    /// OADP export root, as a host path
    pub oadp_root: PathBuf,
    /// etcd static pod manifest, as a host path
    pub etcd_static_pod_manifest: PathBuf,
    /// Certificate backup directory, as a host path
    pub backup_certs_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            host_root: PathBuf::from(DEFAULT_HOST_ROOT),
            oadp_root: PathBuf::from(OADP_PATH),
            etcd_static_pod_manifest: PathBuf::from(ETCD_STATIC_POD_MANIFEST),
            backup_certs_dir: PathBuf::from(BACKUP_CERTS_DIR),
        }
    }
}

impl Paths {
    /// Paths with a different host root and default host locations
    pub fn with_host_root(host_root: impl Into<PathBuf>) -> Self {
        Self {
            host_root: host_root.into(),
            ..Default::default()
        }
    }

    /// Map a host path to where this process can see it
    pub fn on_host(&self, host_path: impl AsRef<Path>) -> PathBuf {
        let rel = host_path
            .as_ref()
            .strip_prefix("/")
            .unwrap_or(host_path.as_ref());
        self.host_root.join(rel)
    }

    /// OADP export root as seen by this process
    pub fn oadp_dir(&self) -> PathBuf {
        self.on_host(&self.oadp_root)
    }

    /// etcd static pod manifest as seen by this process
    pub fn etcd_manifest(&self) -> PathBuf {
        self.on_host(&self.etcd_static_pod_manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_under_host_root() {
        let paths = Paths::default();
        assert_eq!(paths.oadp_dir(), PathBuf::from("/host/opt/OADP"));
        assert_eq!(
            paths.etcd_manifest(),
            PathBuf::from("/host/etc/kubernetes/manifests/etcd-pod.yaml")
        );
    }

    #[test]
    fn root_host_maps_to_itself() {
        let paths = Paths::with_host_root("/");
        assert_eq!(paths.oadp_dir(), PathBuf::from("/opt/OADP"));
    }

    #[test]
    fn relative_paths_are_joined() {
        let paths = Paths::with_host_root("/tmp/host");
        assert_eq!(
            paths.on_host("var/lib/etcd"),
            PathBuf::from("/tmp/host/var/lib/etcd")
        );
    }
}
