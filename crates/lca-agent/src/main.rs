//! Lifecycle agent - state preservation across image-based upgrades

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lca_agent::config::{parse_config_sources, recovery_options, store_health};
use lca_agent::{AgentConfig, Cli, Command, Phases};
use lca_backup::KubeObjects;
use lca_common::kube_utils::create_client;
use lca_common::telemetry::{init_telemetry, TelemetryConfig};
use lca_host::{recover_identity, EphemeralStoreBootstrap, HostExecutor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::from(cli.global);

    init_telemetry(TelemetryConfig {
        format: config.log_format,
        ..Default::default()
    })?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, stopping");
                cancel.cancel();
            }
        }
    });

    let result = run(cli.command, &config, &cancel).await;
    if let Err(e) = &result {
        error!(error = %e, "phase failed");
    }
    result
}

async fn connect(config: &AgentConfig) -> anyhow::Result<KubeObjects> {
    let client = create_client(config.kubeconfig.as_deref()).await?;
    Ok(KubeObjects::new(client))
}

async fn run(command: Command, config: &AgentConfig, cancel: &CancellationToken) -> anyhow::Result<()> {
    match command {
        Command::Prepare { config_sources } => {
            let objects = connect(config).await?;
            let sources = parse_config_sources(&config_sources);
            let tracker = Phases::new(&objects, &objects, &objects, config)
                .prepare(&sources, cancel)
                .await?;
            info!(waves = tracker.total_waves, "prepare completed");
        }
        Command::RecoverIdentity {
            recert_image,
            etcd_image,
            store_timeout_secs,
            extra_args,
        } => {
            let host = HostExecutor::new();
            let store = EphemeralStoreBootstrap::new(&host)
                .with_health_check(store_health(store_timeout_secs));
            let opts = recovery_options(config, recert_image, etcd_image, extra_args);
            recover_identity(&host, &store, &config.paths, &opts, cancel).await?;
            info!("cluster identity recovered");
        }
        Command::Restore => {
            let objects = connect(config).await?;
            let tracker = Phases::new(&objects, &objects, &objects, config)
                .restore(cancel)
                .await?;
            info!(waves = tracker.total_waves, "restore completed");
        }
        Command::Cleanup {
            keep_backups,
            keep_operator,
        } => {
            let objects = connect(config).await?;
            Phases::new(&objects, &objects, &objects, config)
                .cleanup(keep_backups, keep_operator)
                .await?;
        }
    }
    Ok(())
}
