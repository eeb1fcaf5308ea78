//! Cluster identity recovery
//!
//! Runs the certificate-rewriting tool in a container on the host, pointed at
//! the ephemeral store and at the host directories holding static pod
//! manifests, kubelet and machine-config state. The tool's exit code is the
//! only outcome: there is no partial success.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use lca_common::config::Paths;
use lca_common::{Error, StatusError, StatusSubject};

use crate::executor::CommandExecutor;
use crate::host::HostExecutor;
use crate::manifest::{image_from_pod_manifest, ETCD_CONTAINER};
use crate::store::{EphemeralStoreBootstrap, PODMAN_RUN_ARGS};

/// Container name of the recovery tool
pub const RECOVERY_CONTAINER_NAME: &str = "recert";

/// Store endpoint as seen by the recovery tool
pub const RECOVERY_STORE_ENDPOINT: &str = "localhost:2379";

/// A host directory bind-mounted read-write into the recovery container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Path on the host
    pub host: PathBuf,
    /// Path inside the container
    pub container: String,
    /// Pass the mount to the tool as a rewrite target (`--static-dir`)
    pub rewrite_target: bool,
}

impl Mount {
    fn new(host: impl Into<PathBuf>, container: &str, rewrite_target: bool) -> Self {
        Self {
            host: host.into(),
            container: container.to_string(),
            rewrite_target,
        }
    }

    fn volume(&self) -> String {
        format!("{}:{}", self.host.display(), self.container)
    }
}

/// Default mounts: host config, static pods, kubelet, cert backups, machine-config
pub fn default_mounts(backup_certs_dir: &Path) -> Vec<Mount> {
    vec![
        Mount::new("/etc", "/host-etc", false),
        Mount::new("/etc/kubernetes", "/kubernetes", true),
        Mount::new("/var/lib/kubelet", "/kubelet", true),
        Mount::new(backup_certs_dir, "/certs", false),
        Mount::new("/etc/machine-config-daemon", "/machine-config-daemon", true),
    ]
}

/// One run of the recovery tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryInvocation {
    /// Recovery tool image
    pub image: String,
    /// Registry credential file on the host
    pub auth_file: String,
    /// Host directory mounts
    pub mounts: Vec<Mount>,
    /// Store endpoint passed to the tool
    pub store_endpoint: String,
    /// Arguments appended after the generated ones
    pub extra_args: Vec<String>,
}

impl RecoveryInvocation {
    /// Invocation with the default mounts and store endpoint
    pub fn new(image: &str, auth_file: &str, paths: &Paths, extra_args: &[String]) -> Self {
        Self {
            image: image.to_string(),
            auth_file: auth_file.to_string(),
            mounts: default_mounts(&paths.backup_certs_dir),
            store_endpoint: RECOVERY_STORE_ENDPOINT.to_string(),
            extra_args: extra_args.to_vec(),
        }
    }

    /// `podman` arguments for this invocation
    pub fn podman_args(&self) -> Vec<String> {
        let mut args: Vec<String> = PODMAN_RUN_ARGS.iter().map(|s| s.to_string()).collect();
        args.push(self.auth_file.clone());
        args.extend(["--rm", "--name", RECOVERY_CONTAINER_NAME].map(String::from));
        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(mount.volume());
        }
        args.push(self.image.clone());
        args.push("--etcd-endpoint".to_string());
        args.push(self.store_endpoint.clone());
        for mount in self.mounts.iter().filter(|m| m.rewrite_target) {
            args.push("--static-dir".to_string());
            args.push(mount.container.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Invokes the recovery tool through the host executor
pub struct IdentityRecoveryRunner<'a, E: CommandExecutor> {
    host: &'a HostExecutor<E>,
    paths: &'a Paths,
}

impl<'a, E: CommandExecutor + 'static> IdentityRecoveryRunner<'a, E> {
    /// Create a runner
    pub fn new(host: &'a HostExecutor<E>, paths: &'a Paths) -> Self {
        Self { host, paths }
    }

    /// Run the tool to completion
    ///
    /// The ephemeral store must already be healthy. A non-zero exit becomes a
    /// failed recovery-request status error carrying the tool's output.
    #[instrument(skip(self, extra_args))]
    pub async fn run(
        &self,
        image: &str,
        auth_file: &str,
        extra_args: &[String],
    ) -> Result<(), Error> {
        let invocation = RecoveryInvocation::new(image, auth_file, self.paths, extra_args);
        info!("running recert");
        match self
            .host
            .run_blocking("podman", invocation.podman_args())
            .await
        {
            Ok(_) => {
                info!("recert finished");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "recert failed");
                Err(StatusError::failed(
                    StatusSubject::RecoveryRequest,
                    format!("recert tool container failed: {}", e),
                )
                .into())
            }
        }
    }
}

/// Options for a full identity recovery
#[derive(Debug, Clone, Default)]
pub struct RecoveryOptions {
    /// Recovery tool image
    pub recert_image: String,
    /// Registry credential file on the host
    pub auth_file: String,
    /// Store image; discovered from the etcd static pod manifest when `None`
    pub etcd_image: Option<String>,
    /// Extra arguments for the recovery tool
    pub extra_args: Vec<String>,
}

/// Start the store, run the tool against it, then stop the store
///
/// The store is stopped whether or not the tool succeeded. A failure to stop
/// is logged and does not mask the tool's outcome.
pub async fn recover_identity<E: CommandExecutor + 'static>(
    host: &HostExecutor<E>,
    store: &EphemeralStoreBootstrap<'_, E>,
    paths: &Paths,
    opts: &RecoveryOptions,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let etcd_image = match &opts.etcd_image {
        Some(image) => image.clone(),
        None => image_from_pod_manifest(&paths.etcd_manifest(), ETCD_CONTAINER)?,
    };

    store.start(&etcd_image, &opts.auth_file, cancel).await?;

    let result = IdentityRecoveryRunner::new(host, paths)
        .run(&opts.recert_image, &opts.auth_file, &opts.extra_args)
        .await;

    if let Err(e) = store.stop().await {
        warn!(error = %e, "failed to stop unauthenticated etcd");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockCommandExecutor;
    use crate::host::NSENTER_ARGS;
    use crate::store::{HealthCheckConfig, STORE_CONTAINER_NAME};
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const RECERT_IMAGE: &str = "quay.io/edge-infrastructure/recert:latest";
    const AUTH: &str = "/var/lib/kubelet/config.json";

    fn podman_subcommand(args: &[String]) -> Vec<String> {
        args[NSENTER_ARGS.len() + 1..].to_vec()
    }

    #[test]
    fn invocation_mounts_host_directories() {
        let paths = Paths::default();
        let args = RecoveryInvocation::new(RECERT_IMAGE, AUTH, &paths, &[]).podman_args();
        let joined = args.join(" ");

        for volume in [
            "-v /etc:/host-etc",
            "-v /etc/kubernetes:/kubernetes",
            "-v /var/lib/kubelet:/kubelet",
            "-v /var/opt/openshift/certs:/certs",
            "-v /etc/machine-config-daemon:/machine-config-daemon",
        ] {
            assert!(joined.contains(volume), "missing {volume}");
        }
        assert!(joined.contains(&format!(
            "{RECERT_IMAGE} --etcd-endpoint localhost:2379 --static-dir /kubernetes --static-dir /kubelet --static-dir /machine-config-daemon"
        )));
    }

    #[test]
    fn extra_args_follow_generated_ones() {
        let extra = vec!["--summary-file".to_string(), "/kubernetes/recert-summary.yaml".to_string()];
        let args = RecoveryInvocation::new(RECERT_IMAGE, AUTH, &Paths::default(), &extra).podman_args();
        assert_eq!(&args[args.len() - 2..], extra.as_slice());
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed_recovery_request() {
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute()
            .times(1)
            .returning(|_, _| Err(Error::command("nsenter", Some(1), "certificate not found")));
        let host = HostExecutor::with_executor(mock);
        let paths = Paths::default();

        let err = IdentityRecoveryRunner::new(&host, &paths)
            .run(RECERT_IMAGE, AUTH, &[])
            .await
            .unwrap_err();

        let status = err.status().unwrap();
        assert!(status.is_failed());
        assert_eq!(status.subject, StatusSubject::RecoveryRequest);
        assert!(status.message.contains("certificate not found"));
    }

    #[tokio::test]
    async fn full_flow_starts_store_runs_tool_and_stops_store() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_dir = dir.path().join("etc/kubernetes/manifests");
        std::fs::create_dir_all(&manifest_dir).unwrap();
        let mut f = std::fs::File::create(manifest_dir.join("etcd-pod.yaml")).unwrap();
        f.write_all(b"apiVersion: v1\nkind: Pod\nspec:\n  containers:\n  - name: etcd\n    image: etcd-image@sha256:1\n")
            .unwrap();

        let runtime_thread = std::thread::current().id();
        let calls = Arc::new(Mutex::new(Vec::<Vec<String>>::new()));
        let recorded = calls.clone();
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(move |_, args| {
            assert_ne!(std::thread::current().id(), runtime_thread);
            recorded.lock().unwrap().push(podman_subcommand(args));
            Ok(String::new())
        });
        let host = HostExecutor::with_executor(mock);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route("/health", axum::routing::get(|| async { "ok" }));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let store = EphemeralStoreBootstrap::new(&host)
            .with_endpoint(format!("http://{}", addr))
            .with_health_check(HealthCheckConfig {
                interval: Duration::from_millis(20),
                timeout: Duration::from_secs(2),
            });
        let paths = Paths::with_host_root(dir.path());
        let opts = RecoveryOptions {
            recert_image: RECERT_IMAGE.to_string(),
            auth_file: AUTH.to_string(),
            ..Default::default()
        };

        recover_identity(&host, &store, &paths, &opts, &CancellationToken::new())
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        assert!(calls[0].contains(&"etcd-image@sha256:1".to_string()));
        assert!(calls[0].contains(&STORE_CONTAINER_NAME.to_string()));
        assert!(calls[1].contains(&RECERT_IMAGE.to_string()));
        assert_eq!(calls[2][0], "stop");
        assert_eq!(calls[3][0], "rm");
    }

    #[tokio::test]
    async fn store_is_stopped_when_tool_fails() {
        let calls = Arc::new(Mutex::new(Vec::<Vec<String>>::new()));
        let recorded = calls.clone();
        let mut mock = MockCommandExecutor::new();
        mock.expect_execute().returning(move |_, args| {
            let sub = podman_subcommand(args);
            let is_recert = sub.contains(&RECOVERY_CONTAINER_NAME.to_string()) && sub[0] == "run";
            recorded.lock().unwrap().push(sub);
            if is_recert {
                Err(Error::command("nsenter", Some(2), "rewrite failed"))
            } else {
                Ok(String::new())
            }
        });
        let host = HostExecutor::with_executor(mock);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route("/health", axum::routing::get(|| async { "ok" }));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let store = EphemeralStoreBootstrap::new(&host)
            .with_endpoint(format!("http://{}", addr))
            .with_health_check(HealthCheckConfig {
                interval: Duration::from_millis(20),
                timeout: Duration::from_secs(2),
            });
        let opts = RecoveryOptions {
            recert_image: RECERT_IMAGE.to_string(),
            auth_file: AUTH.to_string(),
            etcd_image: Some("etcd-image".to_string()),
            ..Default::default()
        };

        let err = recover_identity(&host, &store, &Paths::default(), &opts, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.status().is_some_and(StatusError::is_failed));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.last().map(|c| c[0].as_str()), Some("rm"));
    }
}
