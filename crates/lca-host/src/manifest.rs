//! Image discovery from static pod manifests

use std::path::Path;

use k8s_openapi::api::core::v1::Pod;
use lca_common::yaml::from_yaml_str;
use lca_common::{Error, StatusError};

/// Container name of etcd in its static pod manifest
pub const ETCD_CONTAINER: &str = "etcd";

/// Return the image of the container named `container` in a pod manifest
pub fn image_from_pod_manifest(path: &Path, container: &str) -> Result<String, Error> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let pod: Pod = from_yaml_str(&raw)?;

    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .find(|c| c.name == container)
        .and_then(|c| c.image.clone())
        .filter(|image| !image.is_empty())
        .ok_or_else(|| {
            StatusError::not_found(format!(
                "no '{}' container with an image in {}",
                container,
                path.display()
            ))
            .into()
        })
}
