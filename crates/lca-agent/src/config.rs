//! Command line and resolved agent configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use lca_backup::{ConfigSourceRef, TrackerPolicy};
use lca_common::config::{Paths, DEFAULT_HOST_ROOT};
use lca_common::telemetry::LogFormat;
use lca_common::OADP_NAMESPACE;
use lca_host::{HealthCheckConfig, RecoveryOptions};

/// Registry credentials used by podman on the host
pub const DEFAULT_AUTH_FILE: &str = "/var/lib/kubelet/config.json";

/// Lifecycle agent - preserves cluster state across an image-based upgrade
#[derive(Parser, Debug)]
#[command(name = "lca-agent", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings shared by every phase
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Kubeconfig file; in-cluster config when unset
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Where the host filesystem is mounted in this container
    #[arg(long, env = "LCA_HOST_ROOT", default_value = DEFAULT_HOST_ROOT, global = true)]
    pub host_root: PathBuf,

    /// Namespace of the OADP operator
    #[arg(long, env = "LCA_OADP_NAMESPACE", default_value = OADP_NAMESPACE, global = true)]
    pub oadp_namespace: String,

    /// Registry auth file on the host
    #[arg(long, env = "LCA_AUTH_FILE", default_value = DEFAULT_AUTH_FILE, global = true)]
    pub auth_file: String,

    /// Seconds between progress checks of Backups and Restores
    #[arg(
        long,
        env = "LCA_POLL_INTERVAL_SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    pub poll_interval_secs: u64,

    /// Seconds to wait for the OADP operator after import
    #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..), global = true)]
    pub operator_timeout_secs: u64,

    /// Stop at a PartiallyFailed Backup or Restore
    #[arg(long, default_value_t = true, action = ArgAction::Set, global = true)]
    pub halt_on_partial_failure: bool,

    /// Report a wave mixing completed and failed requests as PartiallyFailed
    #[arg(long, global = true)]
    pub tolerate_mixed_wave: bool,

    /// Log line format
    #[arg(long, env = "LCA_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Json, global = true)]
    pub log_format: LogFormatArg,
}

/// Log format flag values
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    /// One JSON object per line
    Json,
    /// Human readable
    Text,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Text => LogFormat::Text,
        }
    }
}

/// Agent phases
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture application state and export it before the pivot
    Prepare {
        /// ConfigMaps holding Backup and Restore manifests (`namespace/name`
        /// or a name in the OADP namespace)
        #[arg(
            long = "config-source",
            env = "LCA_CONFIG_SOURCES",
            value_delimiter = ',',
            required = true
        )]
        config_sources: Vec<String>,
    },

    /// Re-key the cluster's identity on the new image
    RecoverIdentity {
        /// Recovery tool image
        #[arg(long, env = "LCA_RECERT_IMAGE")]
        recert_image: String,

        /// etcd image; read from the static pod manifest when unset
        #[arg(long, env = "LCA_ETCD_IMAGE")]
        etcd_image: Option<String>,

        /// Seconds to wait for etcd to become healthy
        #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
        store_timeout_secs: u64,

        /// Passed to the recovery tool unchanged
        #[arg(last = true)]
        extra_args: Vec<String>,
    },

    /// Re-install OADP and restore application state after the pivot
    Restore,

    /// Remove stale Backups and uninstall the OADP operator
    Cleanup {
        /// Leave Backups in place
        #[arg(long)]
        keep_backups: bool,

        /// Keep the OADP operator installed
        #[arg(long)]
        keep_operator: bool,
    },
}

/// Configuration resolved from [`GlobalArgs`]
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Kubeconfig override
    pub kubeconfig: Option<PathBuf>,
    /// Filesystem locations
    pub paths: Paths,
    /// OADP operator namespace
    pub oadp_namespace: String,
    /// Registry auth file on the host
    pub auth_file: String,
    /// Interval between tracker steps
    pub poll_interval: Duration,
    /// Bound on waiting for the operator and its storage location
    pub operator_timeout: Duration,
    /// Tracker failure policy
    pub policy: TrackerPolicy,
    /// Log line format
    pub log_format: LogFormat,
}

impl From<GlobalArgs> for AgentConfig {
    fn from(args: GlobalArgs) -> Self {
        Self {
            kubeconfig: args.kubeconfig,
            paths: Paths::with_host_root(args.host_root),
            oadp_namespace: args.oadp_namespace,
            auth_file: args.auth_file,
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            operator_timeout: Duration::from_secs(args.operator_timeout_secs),
            policy: TrackerPolicy {
                halt_on_partial_failure: args.halt_on_partial_failure,
                tolerate_mixed_wave: args.tolerate_mixed_wave,
            },
            log_format: args.log_format.into(),
        }
    }
}

/// ConfigMap references from `--config-source` values
pub fn parse_config_sources(values: &[String]) -> Vec<ConfigSourceRef> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(ConfigSourceRef::parse)
        .collect()
}

/// Recovery settings for the `recover-identity` phase
pub fn recovery_options(
    config: &AgentConfig,
    recert_image: String,
    etcd_image: Option<String>,
    extra_args: Vec<String>,
) -> RecoveryOptions {
    RecoveryOptions {
        recert_image,
        auth_file: config.auth_file.clone(),
        etcd_image,
        extra_args,
    }
}

/// Health wait for the ephemeral store
pub fn store_health(timeout_secs: u64) -> HealthCheckConfig {
    HealthCheckConfig {
        timeout: Duration::from_secs(timeout_secs),
        ..Default::default()
    }
}
