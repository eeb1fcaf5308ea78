//! Operator and backup teardown
//!
//! Both operations are safe to repeat: objects already gone count as
//! deleted, and an empty match is nothing to do.

use kube::discovery::ApiResource;
use tracing::{debug, info, instrument, warn};

use lca_common::kube_utils::HasApiResource;
use lca_common::{Error, CLUSTER_ID_LABEL};

use crate::client::{list_typed, namespace_resource, ObjectDeleter, ObjectReader};
use crate::oadp::{csv_resource, operator_install_label, subscription_resource};
use crate::velero::{Backup, DeleteBackupRequest, StateRequest, BACKUP_NAME_LABEL};

/// Delete every object of `ar` in `namespace` matching `selector`
///
/// Returns the names of the objects that matched.
async fn delete_matching(
    reader: &dyn ObjectReader,
    deleter: &dyn ObjectDeleter,
    ar: &ApiResource,
    namespace: &str,
    selector: &str,
) -> Result<Vec<String>, Error> {
    let mut names = Vec::new();
    for obj in reader.list(ar, namespace, Some(selector)).await? {
        let Some(name) = obj.metadata.name else {
            continue;
        };
        if !deleter.delete(ar, Some(namespace), &name).await? {
            debug!(kind = %ar.kind, name = %name, "already deleted");
        }
        names.push(name);
    }
    Ok(names)
}

/// Uninstall the OADP operator from `namespace`
///
/// Deletes the operator's Subscriptions and ClusterServiceVersions, found by
/// the OLM install label, then the namespace. More than one Subscription is
/// unexpected but all of them are removed.
#[instrument(skip(reader, deleter))]
pub async fn delete_operator(
    reader: &dyn ObjectReader,
    deleter: &dyn ObjectDeleter,
    namespace: &str,
) -> Result<(), Error> {
    let selector = operator_install_label(namespace);

    let subscriptions =
        delete_matching(reader, deleter, &subscription_resource(), namespace, &selector).await?;
    match subscriptions.len() {
        0 => info!("no OADP subscription found"),
        1 => info!(subscription = %subscriptions[0], "deleted OADP subscription"),
        n => warn!(
            count = n,
            subscriptions = ?subscriptions,
            "deleted more than one OADP subscription"
        ),
    }

    let csvs = delete_matching(reader, deleter, &csv_resource(), namespace, &selector).await?;
    for csv in &csvs {
        info!(csv = %csv, "deleted OADP ClusterServiceVersion");
    }

    if deleter.delete(&namespace_resource(), None, namespace).await? {
        info!("deleted OADP namespace");
    } else {
        debug!("OADP namespace already absent");
    }
    Ok(())
}

/// Delete stale Backups and their DeleteBackupRequests
///
/// With `cluster_id` only Backups labelled for that cluster are removed.
/// Returns whether anything was deleted.
#[instrument(skip(reader, deleter))]
pub async fn cleanup_backups(
    reader: &dyn ObjectReader,
    deleter: &dyn ObjectDeleter,
    namespace: &str,
    cluster_id: Option<&str>,
) -> Result<bool, Error> {
    let selector = cluster_id.map(|id| format!("{}={}", CLUSTER_ID_LABEL, id));
    let backups: Vec<Backup> = list_typed(reader, namespace, selector.as_deref()).await?;
    if backups.is_empty() {
        debug!("no stale backups");
        return Ok(false);
    }

    let mut deleted = false;
    for backup in &backups {
        let name = backup.name();
        let requests = delete_matching(
            reader,
            deleter,
            &DeleteBackupRequest::api_resource(),
            namespace,
            &format!("{}={}", BACKUP_NAME_LABEL, name),
        )
        .await?;
        deleted |= !requests.is_empty();

        if deleter
            .delete(&Backup::api_resource(), Some(namespace), name)
            .await?
        {
            deleted = true;
        }
        info!(backup = %name, delete_requests = requests.len(), "removed stale backup");
    }
    Ok(deleted)
}
