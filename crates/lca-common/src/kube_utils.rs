//! Shared Kubernetes utilities using kube-rs
//!
//! Typed API resource descriptors, condition checks, export metadata
//! stripping and a bounded, cancellable polling loop.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::Error;

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// Implement this for the Velero and OADP types so the `ApiResource` used for
/// API calls always matches the `apiVersion`/`kind` written into the object.
///
/// # Example
/// ```ignore
/// impl HasApiResource for Backup {
///     const API_VERSION: &'static str = "velero.io/v1";
///     const KIND: &'static str = "Backup";
/// }
///
/// let ar = Backup::api_resource();
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "velero.io/v1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "Backup")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from a known apiVersion and kind.
///
/// The version you provide is used exactly.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split an apiVersion into (group, version)
///
/// ```
/// use lca_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("velero.io/v1"), ("velero.io".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

/// Check if the first condition of the given type has status "True"
///
/// An absent condition list, or no condition of that type, means "not true".
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .and_then(|conds| conds.iter().find(|c| c.type_field() == condition_type))
        .map(|c| c.status_field() == STATUS_TRUE)
        .unwrap_or(false)
}

// =============================================================================
// Export helpers
// =============================================================================

/// Strip cluster-specific metadata from a resource for export.
///
/// Removes fields that would make a create or server-side apply fail on the
/// cluster the object is imported into:
/// - uid
/// - resourceVersion
/// - creationTimestamp
/// - managedFields
/// - generation
pub fn strip_export_metadata(
    meta: &mut k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
) {
    meta.uid = None;
    meta.resource_version = None;
    meta.creation_timestamp = None;
    meta.managed_fields = None;
    meta.generation = None;
}

// =============================================================================
// Polling
// =============================================================================

/// Poll until a condition is met, the timeout expires, or `cancel` fires
///
/// The first check happens one `poll_interval` after the call, then once per
/// interval. Check errors are logged and polling continues; the deadline is
/// hard and does not wait for an in-flight check to finish.
///
/// # Arguments
/// * `timeout` - Maximum time to wait for the condition
/// * `poll_interval` - Time between polling attempts
/// * `cancel` - Aborts the wait with [`Error::Cancelled`]
/// * `what` - Description used in log lines and errors
/// * `check_fn` - Returns `Ok(true)` when the condition is met
///
/// # Returns
/// `Ok(true)` if the condition was met, `Ok(false)` on timeout, or
/// `Err(Error::Cancelled)` when cancelled. Callers map the timeout to the
/// error that fits their domain.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
    what: &str,
    mut check_fn: F,
) -> Result<bool, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // interval() completes its first tick immediately
    ticker.tick().await;

    let polling = async {
        loop {
            ticker.tick().await;
            match check_fn().await {
                Ok(true) => return,
                Ok(false) => trace!(what = %what, "condition not yet met"),
                Err(e) => trace!(what = %what, error = %e, "check failed, retrying"),
            }
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(Error::cancelled(what)),
        res = tokio::time::timeout(timeout, polling) => Ok(res.is_ok()),
    }
}

// =============================================================================
// Client
// =============================================================================

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path
///
/// Falls back to in-cluster / inferred configuration when no path is given.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Cond {
        type_: &'static str,
        status: &'static str,
    }

    impl HasConditionFields for Cond {
        fn type_field(&self) -> &str {
            self.type_
        }
        fn status_field(&self) -> &str {
            self.status
        }
    }

    #[test]
    fn test_pluralize_kind() {
        assert_eq!(pluralize_kind("Backup"), "backups");
        assert_eq!(pluralize_kind("Restore"), "restores");
        assert_eq!(pluralize_kind("DeleteBackupRequest"), "deletebackuprequests");
        assert_eq!(
            pluralize_kind("DataProtectionApplication"),
            "dataprotectionapplications"
        );
        assert_eq!(
            pluralize_kind("ClusterServiceVersion"),
            "clusterserviceversions"
        );
        assert_eq!(pluralize_kind("Policy"), "policies");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
    }

    #[test]
    fn test_build_api_resource_for_crd() {
        let ar = build_api_resource("oadp.openshift.io/v1alpha1", "DataProtectionApplication");
        assert_eq!(ar.group, "oadp.openshift.io");
        assert_eq!(ar.version, "v1alpha1");
        assert_eq!(ar.plural, "dataprotectionapplications");
    }

    #[test]
    fn test_build_api_resource_core() {
        let ar = build_api_resource("v1", "Secret");
        assert_eq!(ar.group, "");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.plural, "secrets");
    }

    #[test]
    fn has_condition_finds_true_condition() {
        let conds = [
            Cond {
                type_: "Available",
                status: "False",
            },
            Cond {
                type_: "Reconciled",
                status: "True",
            },
        ];
        assert!(has_condition(Some(&conds[..]), "Reconciled"));
        assert!(!has_condition(Some(&conds[..]), "Available"));
    }

    #[test]
    fn has_condition_absent_means_false() {
        assert!(!has_condition::<Cond>(None, "Reconciled"));
        assert!(!has_condition::<Cond>(Some(&[]), "Reconciled"));
    }

    #[tokio::test]
    async fn poll_until_returns_true_when_condition_met() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let met = poll_until(
            Duration::from_secs(5),
            Duration::from_millis(10),
            &CancellationToken::new(),
            "test condition",
            move || {
                let counter = counter.clone();
                async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 2) }
            },
        )
        .await
        .unwrap();

        assert!(met);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_until_times_out() {
        let met = poll_until(
            Duration::from_millis(100),
            Duration::from_millis(10),
            &CancellationToken::new(),
            "never",
            || async { Err(Error::internal("still failing")) },
        )
        .await
        .unwrap();

        assert!(!met);
    }

    #[tokio::test]
    async fn poll_until_is_cancellable() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = poll_until(
            Duration::from_secs(60),
            Duration::from_secs(1),
            &cancel,
            "cancelled wait",
            || async { Ok(false) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled { .. }));
    }
}
