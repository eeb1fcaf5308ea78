//! Narrow Kubernetes capabilities
//!
//! Components take only the capability they need: [`ObjectReader`] to
//! observe, [`ObjectWriter`] to create or apply, [`ObjectDeleter`] to tear
//! down. All three work on `DynamicObject` plus an `ApiResource`, with typed
//! wrappers in [`get_typed`], [`list_typed`] and [`to_dynamic`].

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use lca_common::kube_utils::{build_api_resource, HasApiResource};
use lca_common::Error;

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "lifecycle-agent";

/// Read access to cluster objects
#[async_trait]
pub trait ObjectReader: Send + Sync {
    /// Get an object; `Ok(None)` when it does not exist
    ///
    /// `namespace` is `None` for cluster-scoped resources.
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// List objects in a namespace, optionally filtered by a label selector
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, Error>;
}

/// Write access to cluster objects
#[async_trait]
pub trait ObjectWriter: Send + Sync {
    /// Create an object; `Ok(false)` when one with the same name already exists
    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<bool, Error>;

    /// Create or update an object with server-side apply
    async fn apply(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<(), Error>;

    /// Create a namespace if it does not exist
    async fn ensure_namespace(&self, name: &str) -> Result<(), Error>;
}

/// Delete access to cluster objects
#[async_trait]
pub trait ObjectDeleter: Send + Sync {
    /// Delete an object with foreground propagation
    ///
    /// Returns `Ok(false)` when the object was already gone.
    async fn delete(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, Error>;
}

/// ApiResource for core/v1 Namespace
pub fn namespace_resource() -> ApiResource {
    build_api_resource("v1", "Namespace")
}

/// ApiResource for core/v1 Secret
pub fn secret_resource() -> ApiResource {
    build_api_resource("v1", "Secret")
}

/// ApiResource for core/v1 ConfigMap
pub fn configmap_resource() -> ApiResource {
    build_api_resource("v1", "ConfigMap")
}

/// Convert a typed object into a `DynamicObject`
pub fn to_dynamic<T: Serialize>(obj: &T) -> Result<DynamicObject, Error> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| Error::serialization(e.to_string()))
}

/// Convert a `DynamicObject` into a typed object
pub fn from_dynamic<T: DeserializeOwned>(obj: DynamicObject) -> Result<T, Error> {
    let kind = obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

/// Typed [`ObjectReader::get`]
pub async fn get_typed<T>(
    reader: &dyn ObjectReader,
    namespace: Option<&str>,
    name: &str,
) -> Result<Option<T>, Error>
where
    T: HasApiResource + DeserializeOwned,
{
    match reader.get(&T::api_resource(), namespace, name).await? {
        Some(obj) => from_dynamic(obj).map(Some),
        None => Ok(None),
    }
}

/// Typed [`ObjectReader::list`]
pub async fn list_typed<T>(
    reader: &dyn ObjectReader,
    namespace: &str,
    label_selector: Option<&str>,
) -> Result<Vec<T>, Error>
where
    T: HasApiResource + DeserializeOwned,
{
    reader
        .list(&T::api_resource(), namespace, label_selector)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}

fn object_name(obj: &DynamicObject) -> Result<&str, Error> {
    obj.metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::internal_with_context("object_name", "object has no name"))
}

/// [`ObjectReader`], [`ObjectWriter`] and [`ObjectDeleter`] backed by a kube client
#[derive(Clone)]
pub struct KubeObjects {
    client: Client,
}

impl KubeObjects {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }
}

#[async_trait]
impl ObjectReader for KubeObjects {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.api(ar, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, Error> {
        let mut lp = ListParams::default();
        if let Some(selector) = label_selector {
            lp = lp.labels(selector);
        }
        let list = self.api(ar, Some(namespace)).list(&lp).await?;
        Ok(list.items)
    }
}

#[async_trait]
impl ObjectWriter for KubeObjects {
    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<bool, Error> {
        let api = self.api(ar, obj.metadata.namespace.as_deref());
        match api.create(&PostParams::default(), obj).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                debug!(kind = %ar.kind, name = ?obj.metadata.name, "already exists");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<(), Error> {
        let name = object_name(obj)?;
        let api = self.api(ar, obj.metadata.namespace.as_deref());
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(name, &params, &Patch::Apply(obj)).await?;
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(name).await?.is_some() {
            return Ok(());
        }
        let ns = Namespace {
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ObjectDeleter for KubeObjects {
    async fn delete(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, Error> {
        match self
            .api(ar, namespace)
            .delete(name, &DeleteParams::foreground())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::velero::Backup;
    use std::collections::BTreeMap;

    #[test]
    fn typed_round_trip_through_dynamic() {
        let mut backup = Backup::new("apps", "openshift-adp", BTreeMap::new());
        backup
            .spec
            .insert("ttl".to_string(), serde_json::json!("720h"));

        let dynamic = to_dynamic(&backup).unwrap();
        assert_eq!(dynamic.types.as_ref().unwrap().kind, "Backup");
        assert_eq!(dynamic.metadata.name.as_deref(), Some("apps"));
        assert_eq!(dynamic.data["spec"]["ttl"], "720h");

        let back: Backup = from_dynamic(dynamic).unwrap();
        assert_eq!(back, backup);
    }

    #[test]
    fn from_dynamic_reports_kind_on_mismatch() {
        let dynamic: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "velero.io/v1",
            "kind": "Restore",
            "metadata": {"name": "r"},
            "spec": {"backupName": 7}
        }))
        .unwrap();
        let err = from_dynamic::<crate::velero::Restore>(dynamic).unwrap_err();
        assert!(matches!(err, Error::Serialization { kind: Some(k), .. } if k == "Restore"));
    }

    #[test]
    fn core_resources() {
        assert_eq!(namespace_resource().plural, "namespaces");
        assert_eq!(secret_resource().group, "");
        assert_eq!(configmap_resource().plural, "configmaps");
    }
}
