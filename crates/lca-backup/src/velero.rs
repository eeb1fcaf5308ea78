//! Velero resource types
//!
//! Typed structs for the Velero resources the agent creates and watches
//! (Backup, Restore, DeleteBackupRequest, BackupStorageLocation). The parts
//! of each spec the agent does not interpret are carried through untouched.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lca_common::kube_utils::HasApiResource;
use lca_common::{StatusSubject, APPLY_WAVE_ANNOTATION, DEFAULT_APPLY_WAVE};

/// Velero API version for every type in this module
pub const VELERO_API_VERSION: &str = "velero.io/v1";

/// Label Velero puts on DeleteBackupRequests naming the backup
pub const BACKUP_NAME_LABEL: &str = "velero.io/backup-name";

// =============================================================================
// Phase
// =============================================================================

/// Observed phase of a Backup or Restore
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestPhase {
    /// Created, not yet picked up
    New,
    /// Being processed
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with some items failing
    PartiallyFailed,
    /// Finished unsuccessfully
    Failed,
    /// Rejected before execution
    FailedValidation,
    /// Any phase the agent does not recognise
    Unknown,
}

impl RequestPhase {
    /// Map a `status.phase` value; absent or empty means New
    pub fn parse(phase: Option<&str>) -> Self {
        match phase.unwrap_or_default() {
            "" | "New" => Self::New,
            "InProgress"
            | "WaitingForPluginOperations"
            | "WaitingForPluginOperationsPartiallyFailed"
            | "Finalizing"
            | "FinalizingPartiallyFailed" => Self::InProgress,
            "Completed" => Self::Completed,
            "PartiallyFailed" => Self::PartiallyFailed,
            "Failed" => Self::Failed,
            "FailedValidation" => Self::FailedValidation,
            _ => Self::Unknown,
        }
    }

    /// Whether Velero is done with the request
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyFailed | Self::Failed | Self::FailedValidation
        )
    }

    /// Failed or FailedValidation
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::FailedValidation)
    }
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "New",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::PartiallyFailed => "PartiallyFailed",
            Self::Failed => "Failed",
            Self::FailedValidation => "FailedValidation",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Status subset shared by Backup and Restore
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatus {
    /// Raw phase string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Reason given for a Failed phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Reasons given for a FailedValidation phase
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

// =============================================================================
// StateRequest
// =============================================================================

/// A Backup or Restore as seen by the wave tracker
pub trait StateRequest:
    HasApiResource + Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// Status subject used when this request fails
    const SUBJECT: StatusSubject;

    /// Object metadata
    fn metadata(&self) -> &ObjectMeta;

    /// Mutable object metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Observed status, if any
    fn status(&self) -> Option<&RequestStatus>;

    /// Object name
    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Object namespace
    fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// Observed phase
    fn phase(&self) -> RequestPhase {
        RequestPhase::parse(self.status().and_then(|s| s.phase.as_deref()))
    }

    /// Why the request failed, as reported by Velero
    fn failure_detail(&self) -> Option<String> {
        let status = self.status()?;
        if !status.validation_errors.is_empty() {
            return Some(status.validation_errors.join("; "));
        }
        status.failure_reason.clone()
    }

    /// Priority from the apply-wave annotation
    fn apply_wave(&self) -> i32 {
        apply_wave(self.metadata())
    }
}

/// Read the apply-wave annotation; absent or malformed values sort last
pub fn apply_wave(meta: &ObjectMeta) -> i32 {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(APPLY_WAVE_ANNOTATION))
        .and_then(|v| v.trim().parse::<i32>().ok())
        .unwrap_or(DEFAULT_APPLY_WAVE)
}

fn named_meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

macro_rules! velero_kind {
    ($ty:ident, $kind:literal) => {
        impl HasApiResource for $ty {
            const API_VERSION: &'static str = VELERO_API_VERSION;
            const KIND: &'static str = $kind;
        }

        impl $ty {
            fn default_api_version() -> String {
                <Self as HasApiResource>::API_VERSION.to_string()
            }
            fn default_kind() -> String {
                <Self as HasApiResource>::KIND.to_string()
            }
        }
    };
}

// =============================================================================
// Backup
// =============================================================================

/// Velero Backup resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    /// API version
    #[serde(default = "Backup::default_api_version")]
    pub api_version: String,
    /// Resource kind
    #[serde(default = "Backup::default_kind")]
    pub kind: String,
    /// Resource metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Backup specification, passed through as written
    #[serde(default)]
    pub spec: BTreeMap<String, Value>,
    /// Observed status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
}

velero_kind!(Backup, "Backup");

impl Backup {
    /// Create a new Backup
    pub fn new(name: &str, namespace: &str, spec: BTreeMap<String, Value>) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: named_meta(name, namespace),
            spec,
            status: None,
        }
    }
}

impl StateRequest for Backup {
    const SUBJECT: StatusSubject = StatusSubject::CaptureRequest;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn status(&self) -> Option<&RequestStatus> {
        self.status.as_ref()
    }
}

// =============================================================================
// Restore
// =============================================================================

/// Velero Restore resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Restore {
    /// API version
    #[serde(default = "Restore::default_api_version")]
    pub api_version: String,
    /// Resource kind
    #[serde(default = "Restore::default_kind")]
    pub kind: String,
    /// Resource metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Restore specification
    #[serde(default)]
    pub spec: RestoreSpec,
    /// Observed status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
}

velero_kind!(Restore, "Restore");

/// Restore spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Backup to restore from
    #[serde(default)]
    pub backup_name: String,
    /// Remaining fields, passed through as written
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Restore {
    /// Create a Restore of the named backup
    pub fn new(name: &str, namespace: &str, backup_name: &str) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: named_meta(name, namespace),
            spec: RestoreSpec {
                backup_name: backup_name.to_string(),
                extra: BTreeMap::new(),
            },
            status: None,
        }
    }

    /// Restore generated for a backup: same name and namespace, same
    /// apply-wave annotation
    pub fn for_backup(backup: &Backup) -> Self {
        let mut restore = Self::new(backup.name(), backup.namespace(), backup.name());
        if let Some(wave) = backup
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(APPLY_WAVE_ANNOTATION))
        {
            restore.metadata.annotations = Some(BTreeMap::from([(
                APPLY_WAVE_ANNOTATION.to_string(),
                wave.clone(),
            )]));
        }
        restore
    }
}

impl StateRequest for Restore {
    const SUBJECT: StatusSubject = StatusSubject::RecoveryRequest;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
    fn status(&self) -> Option<&RequestStatus> {
        self.status.as_ref()
    }
}

// =============================================================================
// DeleteBackupRequest
// =============================================================================

/// Velero DeleteBackupRequest resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBackupRequest {
    /// API version
    #[serde(default = "DeleteBackupRequest::default_api_version")]
    pub api_version: String,
    /// Resource kind
    #[serde(default = "DeleteBackupRequest::default_kind")]
    pub kind: String,
    /// Resource metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Request spec
    #[serde(default)]
    pub spec: DeleteBackupRequestSpec,
}

velero_kind!(DeleteBackupRequest, "DeleteBackupRequest");

/// DeleteBackupRequest spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBackupRequestSpec {
    /// Backup being deleted
    pub backup_name: String,
}

// =============================================================================
// BackupStorageLocation
// =============================================================================

/// Velero BackupStorageLocation resource
///
/// Only the status is interpreted; the spec is owned by the OADP operator.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorageLocation {
    /// API version
    #[serde(default = "BackupStorageLocation::default_api_version")]
    pub api_version: String,
    /// Resource kind
    #[serde(default = "BackupStorageLocation::default_kind")]
    pub kind: String,
    /// Resource metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// BSL specification
    #[serde(default)]
    pub spec: BTreeMap<String, Value>,
    /// Observed status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BackupStorageLocationStatus>,
}

velero_kind!(BackupStorageLocation, "BackupStorageLocation");

/// BackupStorageLocation status
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStorageLocationStatus {
    /// "Available" or "Unavailable"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Error from the last validation, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Phase of a reachable storage location
pub const BSL_PHASE_AVAILABLE: &str = "Available";

impl BackupStorageLocation {
    /// Whether Velero last validated the location as reachable
    pub fn is_available(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|p| p == BSL_PHASE_AVAILABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_wave(name: &str, wave: &str) -> Backup {
        let mut b = Backup::new(name, "openshift-adp", BTreeMap::new());
        b.metadata.annotations = Some(BTreeMap::from([(
            APPLY_WAVE_ANNOTATION.to_string(),
            wave.to_string(),
        )]));
        b
    }

    #[test]
    fn phase_mapping() {
        assert_eq!(RequestPhase::parse(None), RequestPhase::New);
        assert_eq!(RequestPhase::parse(Some("")), RequestPhase::New);
        assert_eq!(
            RequestPhase::parse(Some("WaitingForPluginOperations")),
            RequestPhase::InProgress
        );
        assert_eq!(
            RequestPhase::parse(Some("FailedValidation")),
            RequestPhase::FailedValidation
        );
        assert_eq!(RequestPhase::parse(Some("Deleting")), RequestPhase::Unknown);
    }

    #[test]
    fn terminal_phases() {
        for p in [
            RequestPhase::Completed,
            RequestPhase::PartiallyFailed,
            RequestPhase::Failed,
            RequestPhase::FailedValidation,
        ] {
            assert!(p.is_terminal(), "{p} should be terminal");
        }
        for p in [
            RequestPhase::New,
            RequestPhase::InProgress,
            RequestPhase::Unknown,
        ] {
            assert!(!p.is_terminal(), "{p} should not be terminal");
        }
        assert!(!RequestPhase::PartiallyFailed.is_failure());
    }

    #[test]
    fn apply_wave_defaults_to_last() {
        assert_eq!(with_wave("a", "3").apply_wave(), 3);
        assert_eq!(with_wave("a", " -1 ").apply_wave(), -1);
        assert_eq!(with_wave("a", "soon").apply_wave(), DEFAULT_APPLY_WAVE);
        assert_eq!(
            Backup::new("a", "ns", BTreeMap::new()).apply_wave(),
            DEFAULT_APPLY_WAVE
        );
    }

    #[test]
    fn backup_deserializes_with_unknown_spec_fields() {
        let backup: Backup = serde_json::from_value(serde_json::json!({
            "apiVersion": "velero.io/v1",
            "kind": "Backup",
            "metadata": {"name": "klusterlet", "namespace": "openshift-adp"},
            "spec": {"includedNamespaces": ["open-cluster-management-agent"]},
            "status": {"phase": "Failed", "failureReason": "bucket missing"}
        }))
        .unwrap();

        assert_eq!(backup.name(), "klusterlet");
        assert_eq!(backup.phase(), RequestPhase::Failed);
        assert_eq!(backup.failure_detail().as_deref(), Some("bucket missing"));
        assert!(backup.spec.contains_key("includedNamespaces"));
    }

    #[test]
    fn validation_errors_win_over_failure_reason() {
        let restore: Restore = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "r"},
            "spec": {"backupName": "b"},
            "status": {"phase": "FailedValidation", "validationErrors": ["no backup", "bad ns"]}
        }))
        .unwrap();

        assert_eq!(restore.kind, "Restore");
        assert_eq!(restore.failure_detail().as_deref(), Some("no backup; bad ns"));
    }

    #[test]
    fn restore_for_backup_keeps_identity_and_wave() {
        let mut backup = with_wave("apps", "2");
        backup.metadata.uid = Some("1234".to_string());
        let restore = Restore::for_backup(&backup);

        assert_eq!(restore.name(), "apps");
        assert_eq!(restore.namespace(), "openshift-adp");
        assert_eq!(restore.spec.backup_name, "apps");
        assert_eq!(restore.apply_wave(), 2);
        assert!(restore.metadata.uid.is_none());
    }

    #[test]
    fn restore_spec_passes_through_extra_fields() {
        let restore: Restore = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "r"},
            "spec": {"backupName": "b", "restorePVs": true}
        }))
        .unwrap();
        let out = serde_json::to_value(&restore).unwrap();
        assert_eq!(out["spec"]["restorePVs"], true);
        assert_eq!(out["apiVersion"], "velero.io/v1");
    }

    #[test]
    fn bsl_availability() {
        let bsl: BackupStorageLocation = serde_json::from_value(serde_json::json!({
            "metadata": {"name": "default"},
            "status": {"phase": "Available"}
        }))
        .unwrap();
        assert!(bsl.is_available());

        let bsl: BackupStorageLocation =
            serde_json::from_value(serde_json::json!({"metadata": {"name": "default"}})).unwrap();
        assert!(!bsl.is_available());
    }
}
