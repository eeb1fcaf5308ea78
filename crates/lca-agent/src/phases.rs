//! Before-pivot and after-pivot sequences
//!
//! `prepare` runs on the old image: it captures application state with
//! Backups and writes what the new image needs to the host. `restore` runs
//! on the new image: it re-installs the OADP configuration and replays the
//! exported Restores. Each step is idempotent so a phase interrupted by a
//! crash or reboot is simply run again.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use lca_backup::{
    check_storage_backend, cleanup_backups, delete_operator, export_configuration,
    export_generated_restores, export_restores, fetch_cluster_id, group_into_waves,
    import_configuration, load_backups, load_generated_restores, wait_for_dpa_reconciled,
    CaptureRestoreTracker, ConfigSourceRef, ObjectDeleter, ObjectReader, ObjectWriter, Restore,
    StateRequest, Tracker, TrackerStatus, Wave,
};
use lca_common::kube_utils::{poll_until, HasApiResource};
use lca_common::{Error, StatusError, StatusSubject, CLUSTER_ID_LABEL};

use crate::config::AgentConfig;

/// Cluster access and configuration for one phase run
pub struct Phases<'a> {
    reader: &'a dyn ObjectReader,
    writer: &'a dyn ObjectWriter,
    deleter: &'a dyn ObjectDeleter,
    config: &'a AgentConfig,
}

impl<'a> Phases<'a> {
    /// Bind the cluster seams and configuration
    pub fn new(
        reader: &'a dyn ObjectReader,
        writer: &'a dyn ObjectWriter,
        deleter: &'a dyn ObjectDeleter,
        config: &'a AgentConfig,
    ) -> Self {
        Self {
            reader,
            writer,
            deleter,
            config,
        }
    }

    /// Capture state and export it for the new image
    #[instrument(skip_all, fields(sources = sources.len()))]
    pub async fn prepare(
        &self,
        sources: &[ConfigSourceRef],
        cancel: &CancellationToken,
    ) -> Result<Tracker, Error> {
        let ns = &self.config.oadp_namespace;
        let oadp_dir = self.config.paths.oadp_dir();

        check_storage_backend(self.reader, ns).await?;

        let mut labels = BTreeMap::new();
        match fetch_cluster_id(self.reader).await? {
            Some(id) => {
                labels.insert(CLUSTER_ID_LABEL.to_string(), id);
            }
            None => warn!("cluster ID not found, backups will not be labelled"),
        }

        let backups = load_backups(self.reader, sources).await?;
        let tracker = CaptureRestoreTracker::new(self.reader, self.writer)
            .with_policy(self.config.policy)
            .with_labels(labels);
        let waves = group_into_waves(backups);
        let result = track_to_completion(&tracker, waves, self.config.poll_interval, cancel).await?;
        ensure_completed(&result)?;

        export_configuration(self.reader, ns, &oadp_dir).await?;
        export_generated_restores(self.reader, sources, &oadp_dir).await?;
        info!(dir = %oadp_dir.display(), "state exported");
        Ok(result)
    }

    /// Re-install OADP from the export and replay the Restores
    #[instrument(skip_all)]
    pub async fn restore(&self, cancel: &CancellationToken) -> Result<Tracker, Error> {
        let ns = &self.config.oadp_namespace;
        let oadp_dir = self.config.paths.oadp_dir();

        // fail before touching the cluster if there is nothing to restore;
        // the exported layout is authoritative over the restores' annotations
        let waves = load_generated_restores(&oadp_dir)?;

        import_configuration(self.writer, ns, &oadp_dir).await?;
        wait_for_dpa_reconciled(
            self.reader,
            ns,
            self.config.operator_timeout,
            self.config.poll_interval,
            cancel,
        )
        .await?;
        self.wait_for_storage_backend(cancel).await?;

        let tracker =
            CaptureRestoreTracker::new(self.reader, self.writer).with_policy(self.config.policy);
        let result =
            track_to_completion(&tracker, waves, self.config.poll_interval, cancel).await?;
        ensure_completed(&result)?;
        Ok(result)
    }

    /// Remove stale Backups unless `keep_backups`, then the operator unless
    /// `keep_operator`
    #[instrument(skip(self))]
    pub async fn cleanup(&self, keep_backups: bool, keep_operator: bool) -> Result<(), Error> {
        let ns = &self.config.oadp_namespace;
        if !keep_backups {
            let cluster_id = fetch_cluster_id(self.reader).await?;
            let deleted =
                cleanup_backups(self.reader, self.deleter, ns, cluster_id.as_deref()).await?;
            info!(deleted, "stale backup cleanup done");
        }
        if !keep_operator {
            delete_operator(self.reader, self.deleter, ns).await?;
        }
        Ok(())
    }

    async fn wait_for_storage_backend(&self, cancel: &CancellationToken) -> Result<(), Error> {
        let reader = self.reader;
        let ns = self.config.oadp_namespace.as_str();
        let available = poll_until(
            self.config.operator_timeout,
            self.config.poll_interval,
            cancel,
            "storage backend",
            move || async move { Ok(check_storage_backend(reader, ns).await.is_ok()) },
        )
        .await?;
        if available {
            return Ok(());
        }
        // report why it is still unavailable
        check_storage_backend(reader, ns).await
    }
}

/// Step the tracker over `waves` until the run finishes, sleeping `interval`
/// between steps
pub async fn track_to_completion<T: StateRequest>(
    tracker: &CaptureRestoreTracker<'_>,
    waves: Vec<Wave<T>>,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<Tracker, Error> {
    loop {
        let snapshot = tracker.track_waves(waves.clone()).await?;
        info!(
            kind = T::KIND,
            wave = snapshot.current_wave,
            of = snapshot.total_waves,
            created = snapshot.created(),
            status = %snapshot.status,
            "tracker step"
        );
        if snapshot.is_finished() {
            return Ok(snapshot);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::cancelled(format!("{} tracking", T::KIND)));
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// `Ok` only for a run that completed without failures
pub fn ensure_completed(tracker: &Tracker) -> Result<(), Error> {
    if tracker.status == TrackerStatus::Completed {
        return Ok(());
    }
    let error = tracker.first_failure.clone().unwrap_or_else(|| {
        let subject = if tracker.kind == Restore::KIND {
            StatusSubject::RecoveryRequest
        } else {
            StatusSubject::CaptureRequest
        };
        StatusError::failed(
            subject,
            format!("{} run ended {}", tracker.kind, tracker.status),
        )
    });
    Err(error.into())
}
