//! In-memory cluster for tests
//!
//! Also built with the `testing` feature for downstream crates.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use lca_common::kube_utils::HasApiResource;
use lca_common::Error;

use crate::client::{
    from_dynamic, namespace_resource, to_dynamic, ObjectDeleter, ObjectReader, ObjectWriter,
};

type Key = (String, String, String);

fn key(ar: &ApiResource, namespace: Option<&str>, name: &str) -> Key {
    (
        ar.kind.clone(),
        namespace.unwrap_or_default().to_string(),
        name.to_string(),
    )
}

/// Counts of mutating calls
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Calls {
    /// Successful creates, including namespaces
    pub creates: usize,
    /// Server-side applies
    pub applies: usize,
    /// Deletes of objects that existed
    pub deletes: usize,
}

/// Objects keyed by (kind, namespace, name)
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<BTreeMap<Key, DynamicObject>>,
    calls: Mutex<Calls>,
    /// Kinds whose list/get calls fail
    failing_kinds: Mutex<Vec<String>>,
}

impl FakeCluster {
    /// Empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a typed object without counting it as a create
    pub fn insert<T: Serialize + HasApiResource>(&self, obj: &T) {
        let dynamic = to_dynamic(obj).unwrap();
        let k = key(
            &T::api_resource(),
            dynamic.metadata.namespace.as_deref(),
            dynamic.metadata.name.as_deref().unwrap(),
        );
        self.objects.lock().unwrap().insert(k, dynamic);
    }

    /// Store a k8s-openapi object, which carries no apiVersion/kind of its own
    pub fn insert_k8s<K: Serialize>(&self, ar: &ApiResource, obj: &K) {
        let mut value = serde_json::to_value(obj).unwrap();
        value["apiVersion"] = ar.api_version.clone().into();
        value["kind"] = ar.kind.clone().into();
        let dynamic: DynamicObject = serde_json::from_value(value).unwrap();
        let k = key(
            ar,
            dynamic.metadata.namespace.as_deref(),
            dynamic.metadata.name.as_deref().unwrap(),
        );
        self.objects.lock().unwrap().insert(k, dynamic);
    }

    /// Store a namespace without counting it as a create
    pub fn insert_namespace(&self, name: &str) {
        let ns: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {"name": name}
        }))
        .unwrap();
        self.objects
            .lock()
            .unwrap()
            .insert(key(&namespace_resource(), None, name), ns);
    }

    /// Typed snapshot of a stored object
    pub fn get_typed<T: DeserializeOwned + HasApiResource>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Option<T> {
        self.objects
            .lock()
            .unwrap()
            .get(&key(&T::api_resource(), namespace, name))
            .cloned()
            .map(|o| from_dynamic(o).unwrap())
    }

    /// Whether an object is stored
    pub fn contains(&self, ar: &ApiResource, namespace: Option<&str>, name: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&key(ar, namespace, name))
    }

    /// Number of stored objects of a kind
    pub fn count(&self, ar: &ApiResource) -> usize {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(kind, _, _)| *kind == ar.kind)
            .count()
    }

    /// Set `status.phase` on a stored object
    pub fn set_phase(&self, ar: &ApiResource, namespace: &str, name: &str, phase: &str) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&key(ar, Some(namespace), name))
            .unwrap_or_else(|| panic!("no {} {}/{}", ar.kind, namespace, name));
        obj.data["status"] = serde_json::json!({ "phase": phase });
    }

    /// Make reads of `kind` fail from now on
    pub fn fail_kind(&self, kind: &str) {
        self.failing_kinds.lock().unwrap().push(kind.to_string());
    }

    /// Mutating calls so far
    pub fn calls(&self) -> Calls {
        self.calls.lock().unwrap().clone()
    }

    fn check_failing(&self, ar: &ApiResource) -> Result<(), Error> {
        if self.failing_kinds.lock().unwrap().contains(&ar.kind) {
            return Err(Error::internal(format!("injected failure for {}", ar.kind)));
        }
        Ok(())
    }
}

/// `key`, `key=value` and comma-separated combinations
fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(term),
        })
}

#[async_trait]
impl ObjectReader for FakeCluster {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        self.check_failing(ar)?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&key(ar, namespace, name))
            .cloned())
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, Error> {
        self.check_failing(ar)?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((kind, ns, _), _)| *kind == ar.kind && ns == namespace)
            .filter(|(_, obj)| label_selector.map_or(true, |s| matches_selector(obj, s)))
            .map(|(_, obj)| obj.clone())
            .collect())
    }
}

#[async_trait]
impl ObjectWriter for FakeCluster {
    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<bool, Error> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        let k = key(ar, obj.metadata.namespace.as_deref(), &name);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&k) {
            return Ok(false);
        }
        objects.insert(k, obj.clone());
        self.calls.lock().unwrap().creates += 1;
        Ok(true)
    }

    async fn apply(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<(), Error> {
        let name = obj.metadata.name.clone().unwrap_or_default();
        let k = key(ar, obj.metadata.namespace.as_deref(), &name);
        self.objects.lock().unwrap().insert(k, obj.clone());
        self.calls.lock().unwrap().applies += 1;
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), Error> {
        if !self.contains(&namespace_resource(), None, name) {
            self.insert_namespace(name);
            self.calls.lock().unwrap().creates += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectDeleter for FakeCluster {
    async fn delete(
        &self,
        ar: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, Error> {
        let removed = self
            .objects
            .lock()
            .unwrap()
            .remove(&key(ar, namespace, name))
            .is_some();
        if removed {
            self.calls.lock().unwrap().deletes += 1;
        }
        Ok(removed)
    }
}
