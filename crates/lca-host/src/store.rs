//! Throwaway etcd used as the rewrite target for identity recovery
//!
//! The store runs unauthenticated on the host network, bound to the host's
//! etcd data directory, using the same image as the cluster's own etcd so the
//! on-disk format matches. It is never a final data destination.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lca_common::kube_utils::poll_until;
use lca_common::{Error, StatusError};

use crate::executor::CommandExecutor;
use crate::host::HostExecutor;

/// Container name of the ephemeral store
pub const STORE_CONTAINER_NAME: &str = "recert_etcd";

/// Host data directory mounted into the store
pub const STORE_DATA_DIR: &str = "/var/lib/etcd";

/// Endpoint the store serves on (host network)
pub const STORE_ENDPOINT: &str = "http://localhost:2379";

/// Leading `podman` arguments shared by the store and the recovery tool;
/// the credential file path follows
pub const PODMAN_RUN_ARGS: &[&str] = &[
    "run",
    "--network=host",
    "--privileged",
    "--replace",
    "--authfile",
];

/// Health-check timing for the ephemeral store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckConfig {
    /// Time between health probes
    pub interval: Duration,
    /// Hard deadline for the store to become healthy
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// A running ephemeral store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralStore {
    /// Image the store runs
    pub image: String,
    /// Registry credential file on the host
    pub auth_file: PathBuf,
    /// Host data directory
    pub data_dir: PathBuf,
    /// Base URL of the store
    pub endpoint: String,
}

impl EphemeralStore {
    /// URL of the health endpoint
    pub fn health_url(&self) -> String {
        format!("{}/health", self.endpoint.trim_end_matches('/'))
    }
}

/// `podman` arguments launching the store
pub fn store_launch_args(image: &str, auth_file: &str) -> Vec<String> {
    let mut args: Vec<String> = PODMAN_RUN_ARGS.iter().map(|s| s.to_string()).collect();
    args.push(auth_file.to_string());
    args.extend(
        [
            "--detach",
            "--name",
            STORE_CONTAINER_NAME,
            "--entrypoint",
            "etcd",
            "-v",
        ]
        .map(String::from),
    );
    args.push(format!("{}:/store", STORE_DATA_DIR));
    args.push(image.to_string());
    args.extend(["--name", "editor", "--data-dir", "/store"].map(String::from));
    args
}

fn podman_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

/// Starts and stops the ephemeral store through the host's container runtime
pub struct EphemeralStoreBootstrap<'a, E: CommandExecutor> {
    host: &'a HostExecutor<E>,
    endpoint: String,
    health: HealthCheckConfig,
    http: reqwest::Client,
}

impl<'a, E: CommandExecutor + 'static> EphemeralStoreBootstrap<'a, E> {
    /// Bootstrap with the default endpoint and health-check timing
    pub fn new(host: &'a HostExecutor<E>) -> Self {
        Self {
            host,
            endpoint: STORE_ENDPOINT.to_string(),
            health: HealthCheckConfig::default(),
            http: reqwest::Client::new(),
        }
    }

    /// Override the endpoint that is health-checked
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override health-check timing
    pub fn with_health_check(mut self, health: HealthCheckConfig) -> Self {
        self.health = health;
        self
    }

    /// Launch the store and wait until it answers its health endpoint
    ///
    /// Returns a storage-backend-unavailable status error when the store does
    /// not report healthy before the deadline.
    #[instrument(skip(self, cancel), fields(endpoint = %self.endpoint))]
    pub async fn start(
        &self,
        image: &str,
        auth_file: &str,
        cancel: &CancellationToken,
    ) -> Result<EphemeralStore, Error> {
        info!("starting unauthenticated etcd for identity recovery");
        self.host
            .run_blocking("podman", store_launch_args(image, auth_file))
            .await?;

        let store = EphemeralStore {
            image: image.to_string(),
            auth_file: PathBuf::from(auth_file),
            data_dir: PathBuf::from(STORE_DATA_DIR),
            endpoint: self.endpoint.clone(),
        };

        info!("waiting for etcd to serve");
        self.wait_healthy(&store.health_url(), cancel).await?;
        info!("etcd is up");
        Ok(store)
    }

    /// Stop and remove the store container; an absent container is not an error
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), Error> {
        self.host
            .run_blocking("podman", podman_args(&["stop", "--ignore", STORE_CONTAINER_NAME]))
            .await?;
        self.host
            .run_blocking(
                "podman",
                podman_args(&["rm", "--ignore", "--force", STORE_CONTAINER_NAME]),
            )
            .await?;
        info!("stopped unauthenticated etcd");
        Ok(())
    }

    async fn wait_healthy(&self, url: &str, cancel: &CancellationToken) -> Result<(), Error> {
        let healthy = poll_until(
            self.health.timeout,
            self.health.interval,
            cancel,
            "etcd health",
            || self.probe(url),
        )
        .await?;

        if healthy {
            Ok(())
        } else {
            warn!(url = %url, timeout = ?self.health.timeout, "etcd did not become healthy");
            Err(StatusError::storage_backend_unavailable(format!(
                "etcd at {} not healthy after {:?}",
                url, self.health.timeout
            ))
            .into())
        }
    }

    async fn probe(&self, url: &str) -> Result<bool, Error> {
        let request = self.http.get(url).timeout(self.health.interval).send();
        match request.await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => Ok(true),
            Ok(resp) => {
                info!(status = %resp.status(), "waiting for etcd");
                Ok(false)
            }
            Err(e) => {
                debug!(error = %e, "waiting for etcd");
                Ok(false)
            }
        }
    }
}
