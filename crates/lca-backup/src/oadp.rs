//! OADP operator resources
//!
//! The DataProtectionApplication is the operator's configuration object.
//! Only its condition list and the credential references in its backup
//! locations are interpreted; everything else round-trips verbatim.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::discovery::ApiResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use lca_common::kube_utils::{build_api_resource, has_condition, HasApiResource, HasConditionFields};
use lca_common::Error;

use crate::client::ObjectReader;

/// Condition type the operator sets once the DPA is applied
pub const RECONCILED_CONDITION: &str = "Reconciled";

/// OLM API version for Subscriptions and ClusterServiceVersions
pub const OLM_API_VERSION: &str = "operators.coreos.com/v1alpha1";

/// Label OLM puts on the OADP operator's Subscription and CSV in `namespace`
pub fn operator_install_label(namespace: &str) -> String {
    format!("operators.coreos.com/redhat-oadp-operator.{}", namespace)
}

/// OLM Subscription
pub fn subscription_resource() -> ApiResource {
    build_api_resource(OLM_API_VERSION, "Subscription")
}

/// OLM ClusterServiceVersion
pub fn csv_resource() -> ApiResource {
    build_api_resource(OLM_API_VERSION, "ClusterServiceVersion")
}

/// Name of the ClusterVersion singleton
pub const CLUSTER_VERSION_NAME: &str = "version";

/// OpenShift ClusterVersion (cluster scoped, singleton named "version")
pub fn cluster_version_resource() -> ApiResource {
    build_api_resource("config.openshift.io/v1", "ClusterVersion")
}

/// OADP DataProtectionApplication
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataProtectionApplication {
    /// API version
    #[serde(default = "DataProtectionApplication::default_api_version")]
    pub api_version: String,
    /// Resource kind
    #[serde(default = "DataProtectionApplication::default_kind")]
    pub kind: String,
    /// Resource metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// DPA specification
    #[serde(default)]
    pub spec: DpaSpec,
    /// Observed status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DpaStatus>,
}

impl HasApiResource for DataProtectionApplication {
    const API_VERSION: &'static str = "oadp.openshift.io/v1alpha1";
    const KIND: &'static str = "DataProtectionApplication";
}

impl DataProtectionApplication {
    fn default_api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn default_kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Whether the operator has reconciled this DPA
    ///
    /// The first `Reconciled` condition decides; no status or no such
    /// condition means not reconciled.
    pub fn is_reconciled(&self) -> bool {
        has_condition(
            self.status.as_ref().map(|s| s.conditions.as_slice()),
            RECONCILED_CONDITION,
        )
    }

    /// Names of the Secrets referenced as backup location credentials
    pub fn credential_secret_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for location in &self.spec.backup_locations {
            let refs = [
                location.velero.as_ref().and_then(|v| v.credential.as_ref()),
                location
                    .cloud_storage
                    .as_ref()
                    .and_then(|c| c.credential.as_ref()),
            ];
            for cred in refs.into_iter().flatten() {
                if !cred.name.is_empty() && !names.contains(&cred.name) {
                    names.push(cred.name.clone());
                }
            }
        }
        names
    }
}

/// DPA spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DpaSpec {
    /// Backup locations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_locations: Vec<BackupLocation>,
    /// Remaining fields, passed through as written
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One entry of `spec.backupLocations`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupLocation {
    /// Inline Velero location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velero: Option<CredentialHolder>,
    /// CloudStorage-backed location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_storage: Option<CredentialHolder>,
    /// Remaining fields, passed through as written
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Location block that may reference a credential Secret
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialHolder {
    /// Secret key reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<SecretKeyRef>,
    /// Remaining fields, passed through as written
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Reference to a key in a Secret
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Secret name
    #[serde(default)]
    pub name: String,
    /// Key within the Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// DPA status
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DpaStatus {
    /// Conditions, in the order the operator wrote them
    #[serde(default)]
    pub conditions: Vec<DpaCondition>,
}

/// A DPA status condition
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DpaCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HasConditionFields for DpaCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Read the cluster's identity from the ClusterVersion singleton
///
/// Returns `None` when the ClusterVersion or its `spec.clusterID` is absent.
pub async fn fetch_cluster_id(reader: &dyn ObjectReader) -> Result<Option<String>, Error> {
    let Some(cv) = reader
        .get(&cluster_version_resource(), None, CLUSTER_VERSION_NAME)
        .await?
    else {
        return Ok(None);
    };
    Ok(cv
        .data
        .get("spec")
        .and_then(|spec| spec.get("clusterID"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string))
}
