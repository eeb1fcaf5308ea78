//! Backup and Restore manifests supplied through ConfigMaps
//!
//! Each data entry of a referenced ConfigMap holds one or more YAML
//! documents. Documents of the requested kind are collected in ConfigMap
//! order, then key order, then document order.

use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use lca_common::yaml::parse_yaml_multi;
use lca_common::{Error, StatusError, OADP_NAMESPACE};

use crate::client::{configmap_resource, from_dynamic, ObjectReader};
use crate::velero::{Backup, Restore, StateRequest};

/// Reference to a ConfigMap holding Velero manifests
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSourceRef {
    /// ConfigMap name
    pub name: String,
    /// ConfigMap namespace
    pub namespace: String,
}

impl ConfigSourceRef {
    /// Reference a ConfigMap
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Parse `namespace/name`, or a bare name in the OADP namespace
    pub fn parse(s: &str) -> Self {
        match s.split_once('/') {
            Some((ns, name)) => Self::new(name, ns),
            None => Self::new(s, OADP_NAMESPACE),
        }
    }
}

impl std::fmt::Display for ConfigSourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Backups defined in the referenced ConfigMaps
pub async fn load_backups(
    reader: &dyn ObjectReader,
    sources: &[ConfigSourceRef],
) -> Result<Vec<Backup>, Error> {
    load_requests(reader, sources).await
}

/// Restores defined in the referenced ConfigMaps
pub async fn load_restores(
    reader: &dyn ObjectReader,
    sources: &[ConfigSourceRef],
) -> Result<Vec<Restore>, Error> {
    load_requests(reader, sources).await
}

/// Requests of kind `T` defined in the referenced ConfigMaps
///
/// A missing ConfigMap is a not-found status error. Requests without a
/// namespace are placed in the OADP namespace.
#[instrument(skip_all, fields(kind = T::KIND, sources = sources.len()))]
pub async fn load_requests<T: StateRequest>(
    reader: &dyn ObjectReader,
    sources: &[ConfigSourceRef],
) -> Result<Vec<T>, Error> {
    let mut out = Vec::new();
    for source in sources {
        let cm: ConfigMap = match reader
            .get(&configmap_resource(), Some(&source.namespace), &source.name)
            .await?
        {
            Some(obj) => from_dynamic(obj)?,
            None => {
                return Err(StatusError::not_found(format!(
                    "the configmap {} is not found",
                    source
                ))
                .into())
            }
        };

        for (key, content) in cm.data.unwrap_or_default() {
            for doc in parse_yaml_multi(&content)? {
                if doc.get("kind").and_then(|k| k.as_str()) != Some(T::KIND) {
                    continue;
                }
                let mut request: T = serde_json::from_value(doc).map_err(|e| {
                    Error::serialization_for_kind(
                        T::KIND,
                        format!("{} key {}: {}", source, key, e),
                    )
                })?;
                if request.metadata().namespace.is_none() {
                    request.metadata_mut().namespace = Some(OADP_NAMESPACE.to_string());
                }
                debug!(name = %request.name(), source = %source, "loaded");
                out.push(request);
            }
        }
    }
    Ok(out)
}
