//! Export and import of OADP state across the image pivot
//!
//! Before the reboot the DataProtectionApplications, their credential
//! Secrets and the Restores to run afterwards are written under the OADP
//! root. After the reboot a fresh process reads them back:
//!
//! ```text
//! <root>/dpa/<name>.json
//! <root>/secret/<name>.json
//! <root>/veleroRestore/restore<N>/<NNN>_<name>.json
//! ```
//!
//! `N` is the 1-based wave and `NNN` the position inside it, so loading
//! rebuilds the same waves in the same order without re-reading annotations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use lca_common::config::{OADP_DPA_DIR, OADP_RESTORE_DIR, OADP_SECRET_DIR};
use lca_common::kube_utils::{poll_until, strip_export_metadata, HasApiResource};
use lca_common::yaml::from_yaml_str;
use lca_common::{Error, StatusError, StatusSubject};

use crate::client::{from_dynamic, list_typed, secret_resource, to_dynamic, ObjectReader, ObjectWriter};
use crate::config_source::{load_backups, load_restores, ConfigSourceRef};
use crate::oadp::DataProtectionApplication;
use crate::velero::{Backup, BackupStorageLocation, Restore, StateRequest};
use crate::wave::{group_into_waves, Wave};

/// Prefix of per-wave restore directories
pub const RESTORE_WAVE_PREFIX: &str = "restore";

// =============================================================================
// File helpers
// =============================================================================

/// Remove and recreate `dir`
fn reset_dir(dir: &Path) -> Result<(), Error> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))
}

fn write_json<T: Serialize>(path: &Path, obj: &T) -> Result<(), Error> {
    let content =
        serde_json::to_vec_pretty(obj).map_err(|e| Error::serialization(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| Error::io(path, e))?;
    debug!(path = %path.display(), "wrote");
    Ok(())
}

fn read_object<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    from_yaml_str(&raw).map_err(|e| {
        Error::serialization(format!("{}: {}", path.display(), e))
    })
}

/// Directory that must exist after the reboot
fn expected_dir(dir: &Path) -> Result<(), Error> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(StatusError::not_found(format!("{} does not exist", dir.display())).into())
    }
}

/// Regular files in `dir`, sorted by name
fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// =============================================================================
// Operator configuration
// =============================================================================

/// Write the DPAs in `namespace` and the Secrets they reference to `dir`
///
/// Cluster-specific metadata and status are dropped so the objects can be
/// applied to the upgraded cluster. A referenced Secret that does not exist
/// is a not-found status error.
#[instrument(skip(reader))]
pub async fn export_configuration(
    reader: &dyn ObjectReader,
    namespace: &str,
    dir: &Path,
) -> Result<(), Error> {
    let dpa_dir = dir.join(OADP_DPA_DIR);
    let secret_dir = dir.join(OADP_SECRET_DIR);
    reset_dir(&dpa_dir)?;
    reset_dir(&secret_dir)?;

    let dpas: Vec<DataProtectionApplication> = list_typed(reader, namespace, None).await?;
    let mut secret_names: Vec<String> = Vec::new();

    for mut dpa in dpas {
        strip_export_metadata(&mut dpa.metadata);
        dpa.status = None;
        let name = dpa.metadata.name.clone().unwrap_or_default();
        write_json(&dpa_dir.join(format!("{}.json", name)), &dpa)?;
        info!(name = %name, "exported DataProtectionApplication");

        for secret in dpa.credential_secret_names() {
            if !secret_names.contains(&secret) {
                secret_names.push(secret);
            }
        }
    }

    for name in secret_names {
        let obj = reader
            .get(&secret_resource(), Some(namespace), &name)
            .await?
            .ok_or_else(|| {
                StatusError::not_found(format!(
                    "credential secret {}/{} referenced by a DataProtectionApplication is not found",
                    namespace, name
                ))
            })?;
        let mut secret: Secret = from_dynamic(obj)?;
        strip_export_metadata(&mut secret.metadata);
        secret.metadata.owner_references = None;
        write_json(&secret_dir.join(format!("{}.json", name)), &secret)?;
        info!(name = %name, "exported credential secret");
    }
    Ok(())
}

/// Recreate the OADP namespace, then apply the exported DPAs, then the
/// exported Secrets
///
/// Applying is idempotent: existing objects are updated in place. Missing
/// export directories are not-found status errors.
#[instrument(skip(writer))]
pub async fn import_configuration(
    writer: &dyn ObjectWriter,
    namespace: &str,
    dir: &Path,
) -> Result<(), Error> {
    let dpa_dir = dir.join(OADP_DPA_DIR);
    let secret_dir = dir.join(OADP_SECRET_DIR);
    expected_dir(&dpa_dir)?;
    expected_dir(&secret_dir)?;

    writer.ensure_namespace(namespace).await?;

    for path in sorted_files(&dpa_dir)? {
        let dpa: DataProtectionApplication = read_object(&path)?;
        writer
            .apply(&DataProtectionApplication::api_resource(), &to_dynamic(&dpa)?)
            .await?;
        info!(path = %path.display(), "applied DataProtectionApplication");
    }

    for path in sorted_files(&secret_dir)? {
        let secret: Secret = read_object(&path)?;
        writer.apply(&secret_resource(), &to_dynamic(&secret)?).await?;
        info!(path = %path.display(), "applied credential secret");
    }
    Ok(())
}

// =============================================================================
// Restores
// =============================================================================

/// One generated Restore per Backup, keeping the wave structure
pub fn restores_for_backups(waves: &[Wave<Backup>]) -> Vec<Wave<Restore>> {
    waves
        .iter()
        .map(|wave| Wave {
            ordinal: wave.ordinal,
            priority: wave.priority,
            members: wave.members.iter().map(Restore::for_backup).collect(),
        })
        .collect()
}

/// Write restore waves under `<dir>/veleroRestore`, replacing earlier content
pub fn export_restores(waves: &[Wave<Restore>], dir: &Path) -> Result<(), Error> {
    let restore_root = dir.join(OADP_RESTORE_DIR);
    reset_dir(&restore_root)?;

    for wave in waves {
        let wave_dir = restore_root.join(format!("{}{}", RESTORE_WAVE_PREFIX, wave.ordinal));
        std::fs::create_dir_all(&wave_dir).map_err(|e| Error::io(&wave_dir, e))?;
        for (index, restore) in wave.members.iter().enumerate() {
            let mut restore = restore.clone();
            strip_export_metadata(&mut restore.metadata);
            restore.status = None;
            let file = wave_dir.join(format!("{:03}_{}.json", index, restore.name()));
            write_json(&file, &restore)?;
        }
    }
    info!(waves = waves.len(), "exported restores");
    Ok(())
}

/// Export the Restores to run after the reboot
///
/// Restores given explicitly in the ConfigMaps are used as written. Every
/// Backup no explicit Restore points at gets a generated one carrying the
/// Backup's wave.
#[instrument(skip(reader, sources), fields(sources = sources.len()))]
pub async fn export_generated_restores(
    reader: &dyn ObjectReader,
    sources: &[ConfigSourceRef],
    dir: &Path,
) -> Result<(), Error> {
    let mut restores = load_restores(reader, sources).await?;
    let backups = load_backups(reader, sources).await?;

    let generated: Vec<Restore> = backups
        .iter()
        .filter(|b| !restores.iter().any(|r| r.spec.backup_name == b.name()))
        .map(Restore::for_backup)
        .collect();
    info!(
        explicit = restores.len(),
        generated = generated.len(),
        "collected restores"
    );
    restores.extend(generated);

    export_restores(&group_into_waves(restores), dir)
}

/// Position encoded in a `<index>_<name>.json` member file name
fn member_index(path: &Path) -> Option<usize> {
    path.file_name()?.to_str()?.split_once('_')?.0.parse().ok()
}

fn wave_number(path: &Path) -> Option<usize> {
    path.file_name()?
        .to_str()?
        .strip_prefix(RESTORE_WAVE_PREFIX)?
        .parse()
        .ok()
}

/// Rebuild the exported restore waves from `<dir>/veleroRestore`
///
/// A missing directory is a not-found status error; unreadable content is a
/// parse error. An existing but empty directory yields no waves.
#[instrument]
pub fn load_generated_restores(dir: &Path) -> Result<Vec<Wave<Restore>>, Error> {
    let restore_root = dir.join(OADP_RESTORE_DIR);
    expected_dir(&restore_root)?;

    let mut wave_dirs: Vec<(usize, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(&restore_root).map_err(|e| Error::io(&restore_root, e))? {
        let path = entry.map_err(|e| Error::io(&restore_root, e))?.path();
        if !path.is_dir() {
            continue;
        }
        match wave_number(&path) {
            Some(n) => wave_dirs.push((n, path)),
            None => warn!(path = %path.display(), "ignoring unexpected directory"),
        }
    }
    wave_dirs.sort_by_key(|(n, _)| *n);

    let mut waves = Vec::with_capacity(wave_dirs.len());
    for (position, (_, wave_dir)) in wave_dirs.into_iter().enumerate() {
        let mut files = sorted_files(&wave_dir)?;
        // the index is zero-padded to three digits only; compare it as a number
        files.sort_by_key(|p| member_index(p).unwrap_or(usize::MAX));
        let members = files
            .iter()
            .map(|p| read_object::<Restore>(p))
            .collect::<Result<Vec<_>, _>>()?;
        let priority = members
            .first()
            .map(StateRequest::apply_wave)
            .unwrap_or(lca_common::DEFAULT_APPLY_WAVE);
        waves.push(Wave {
            ordinal: position + 1,
            priority,
            members,
        });
    }
    info!(waves = waves.len(), "loaded restores");
    Ok(waves)
}

// =============================================================================
// Readiness
// =============================================================================

/// Wait until every DPA in `namespace` reports Reconciled
///
/// Fails with a failed operator status error when `timeout` passes first.
pub async fn wait_for_dpa_reconciled(
    reader: &dyn ObjectReader,
    namespace: &str,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let reconciled = poll_until(timeout, interval, cancel, "DPA reconciliation", move || async move {
        let dpas: Vec<DataProtectionApplication> = list_typed(reader, namespace, None).await?;
        Ok(!dpas.is_empty() && dpas.iter().all(DataProtectionApplication::is_reconciled))
    })
    .await?;

    if reconciled {
        info!(namespace = %namespace, "DataProtectionApplication reconciled");
        Ok(())
    } else {
        Err(StatusError::failed(
            StatusSubject::Operator,
            format!(
                "DataProtectionApplication in {} not reconciled after {:?}",
                namespace, timeout
            ),
        )
        .into())
    }
}

/// Check that Velero has validated every storage location as available
pub async fn check_storage_backend(reader: &dyn ObjectReader, namespace: &str) -> Result<(), Error> {
    let locations: Vec<BackupStorageLocation> = list_typed(reader, namespace, None).await?;
    if locations.is_empty() {
        return Err(StatusError::storage_backend_unavailable(format!(
            "no BackupStorageLocation found in {}",
            namespace
        ))
        .into());
    }

    let unavailable: Vec<String> = locations
        .iter()
        .filter(|l| !l.is_available())
        .map(|l| {
            let name = l.metadata.name.clone().unwrap_or_default();
            match l.status.as_ref().and_then(|s| s.message.as_deref()) {
                Some(msg) => format!("{} ({})", name, msg),
                None => name,
            }
        })
        .collect();

    if unavailable.is_empty() {
        Ok(())
    } else {
        Err(StatusError::storage_backend_unavailable(format!(
            "BackupStorageLocation not available: {}",
            unavailable.join(", ")
        ))
        .into())
    }
}
