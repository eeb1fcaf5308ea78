//! Wave-by-wave tracking of Backups and Restores
//!
//! [`CaptureRestoreTracker::start_or_track`] is a single non-blocking step:
//! it creates what is missing in the current wave, observes every member,
//! and either advances, stops on failure, or returns a snapshot for the
//! caller to poll again later. Creation is idempotent, so a fresh process
//! can pick up a run a previous process left mid-flight.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument, warn};

use lca_common::kube_utils::strip_export_metadata;
use lca_common::{Error, StatusError};

use crate::client::{get_typed, to_dynamic, ObjectReader, ObjectWriter};
use crate::velero::{RequestPhase, StateRequest};
use crate::wave::{group_into_waves, Wave};

/// How failures inside a wave are judged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerPolicy {
    /// Stop advancing when a member ends PartiallyFailed
    pub halt_on_partial_failure: bool,
    /// Report a wave mixing Completed and failed members as PartiallyFailed
    /// instead of Failed
    pub tolerate_mixed_wave: bool,
}

impl Default for TrackerPolicy {
    fn default() -> Self {
        Self {
            halt_on_partial_failure: true,
            tolerate_mixed_wave: false,
        }
    }
}

/// Aggregate status of a tracked run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerStatus {
    /// The current wave still has members in flight
    InProgress,
    /// Every wave settled without failure
    Completed,
    /// Some output is usable but not all of it
    PartiallyFailed,
    /// The run cannot continue
    Failed,
}

impl std::fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
            Self::PartiallyFailed => write!(f, "PartiallyFailed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Observed state of one member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberState {
    /// Request name
    pub name: String,
    /// Observed phase
    pub phase: RequestPhase,
    /// Created by this call
    pub created: bool,
    /// Failure reason or validation errors reported by Velero
    pub detail: Option<String>,
}

/// Observed state of one wave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveState {
    /// 1-based wave position
    pub ordinal: usize,
    /// Apply-wave value
    pub priority: i32,
    /// Members in wave order
    pub members: Vec<MemberState>,
}

impl WaveState {
    /// Every member reached a terminal phase
    pub fn is_settled(&self) -> bool {
        self.members.iter().all(|m| m.phase.is_terminal())
    }

    /// Names of members in `phase`
    pub fn in_phase(&self, phase: RequestPhase) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.phase == phase)
            .map(|m| m.name.as_str())
            .collect()
    }
}

/// Cursor over a wave-grouped run
#[derive(Debug, Clone, PartialEq)]
pub struct Tracker {
    /// Kind being tracked ("Backup" or "Restore")
    pub kind: &'static str,
    /// Ordinal of the wave being driven (0 when there are no waves)
    pub current_wave: usize,
    /// Number of waves in the run
    pub total_waves: usize,
    /// Waves observed by this call, in order
    pub waves: Vec<WaveState>,
    /// Aggregate status
    pub status: TrackerStatus,
    /// First failure encountered
    pub first_failure: Option<StatusError>,
}

impl Tracker {
    fn new(kind: &'static str, total_waves: usize) -> Self {
        Self {
            kind,
            current_wave: 0,
            total_waves,
            waves: Vec::new(),
            status: TrackerStatus::InProgress,
            first_failure: None,
        }
    }

    /// The run has stopped, successfully or not
    pub fn is_finished(&self) -> bool {
        self.status != TrackerStatus::InProgress
    }

    /// Requests created by this call
    pub fn created(&self) -> usize {
        self.waves
            .iter()
            .flat_map(|w| &w.members)
            .filter(|m| m.created)
            .count()
    }

    /// Names of every member that reached Completed
    pub fn completed_names(&self) -> Vec<&str> {
        self.waves
            .iter()
            .flat_map(|w| w.in_phase(RequestPhase::Completed))
            .collect()
    }
}

/// Creates and observes Backups or Restores wave by wave
pub struct CaptureRestoreTracker<'a> {
    reader: &'a dyn ObjectReader,
    writer: &'a dyn ObjectWriter,
    policy: TrackerPolicy,
    labels: BTreeMap<String, String>,
}

impl<'a> CaptureRestoreTracker<'a> {
    /// Tracker with the default policy
    pub fn new(reader: &'a dyn ObjectReader, writer: &'a dyn ObjectWriter) -> Self {
        Self {
            reader,
            writer,
            policy: TrackerPolicy::default(),
            labels: BTreeMap::new(),
        }
    }

    /// Override the failure policy
    pub fn with_policy(mut self, policy: TrackerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Labels added to every request this tracker creates
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Create missing requests in the current wave and observe all of them
    ///
    /// Returns a snapshot without error while the current wave has members
    /// in flight; call again later. Already-existing requests are only
    /// observed. Waves come from each request's apply-wave annotation.
    pub async fn start_or_track<T: StateRequest>(&self, requests: Vec<T>) -> Result<Tracker, Error> {
        self.track_waves(group_into_waves(requests)).await
    }

    /// [`Self::start_or_track`] over waves the caller has already formed
    ///
    /// The waves are driven in the given order and membership, e.g. as
    /// loaded back from an export.
    #[instrument(skip_all, fields(kind = T::KIND, waves = waves.len()))]
    pub async fn track_waves<T: StateRequest>(&self, waves: Vec<Wave<T>>) -> Result<Tracker, Error> {
        let mut tracker = Tracker::new(T::KIND, waves.len());
        let mut tolerated_partial = false;

        for wave in waves {
            tracker.current_wave = wave.ordinal;
            let observed = self.drive_wave(wave).await?;

            // a failed member ends the run even while siblings are in flight
            if let Some((status, error)) = self.failure_verdict::<T>(&observed) {
                warn!(wave = observed.ordinal, status = %status, error = %error, "wave did not complete");
                tracker.status = status;
                tracker.first_failure = Some(error);
                tracker.waves.push(observed);
                return Ok(tracker);
            }

            if !observed.is_settled() {
                debug!(
                    wave = observed.ordinal,
                    pending = observed.members.iter().filter(|m| !m.phase.is_terminal()).count(),
                    "wave in progress"
                );
                tracker.waves.push(observed);
                return Ok(tracker);
            }

            if let Some(error) = self.partial_verdict::<T>(&observed, &mut tolerated_partial) {
                warn!(wave = observed.ordinal, error = %error, "wave partially failed");
                tracker.status = TrackerStatus::PartiallyFailed;
                tracker.first_failure = Some(error);
                tracker.waves.push(observed);
                return Ok(tracker);
            }

            info!(wave = observed.ordinal, of = tracker.total_waves, "wave completed");
            tracker.waves.push(observed);
        }

        tracker.status = if tolerated_partial {
            TrackerStatus::PartiallyFailed
        } else {
            TrackerStatus::Completed
        };
        info!(status = %tracker.status, "all waves settled");
        Ok(tracker)
    }

    async fn drive_wave<T: StateRequest>(&self, wave: Wave<T>) -> Result<WaveState, Error> {
        let mut members = Vec::with_capacity(wave.len());
        for request in wave.members {
            members.push(self.create_or_observe(request).await?);
        }
        Ok(WaveState {
            ordinal: wave.ordinal,
            priority: wave.priority,
            members,
        })
    }

    async fn create_or_observe<T: StateRequest>(&self, mut request: T) -> Result<MemberState, Error> {
        let name = request.name().to_string();
        let namespace = request.namespace().to_string();

        if let Some(existing) = get_typed::<T>(self.reader, Some(&namespace), &name).await? {
            let phase = existing.phase();
            if phase == RequestPhase::Unknown {
                warn!(
                    kind = T::KIND,
                    name = %name,
                    phase = existing.status().and_then(|s| s.phase.as_deref()).unwrap_or_default(),
                    "unrecognised phase, treating as in flight"
                );
            }
            return Ok(MemberState {
                name,
                phase,
                created: false,
                detail: existing.failure_detail(),
            });
        }

        strip_export_metadata(request.metadata_mut());
        if !self.labels.is_empty() {
            request
                .metadata_mut()
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(self.labels.clone());
        }
        let mut obj = to_dynamic(&request)?;
        if let Some(data) = obj.data.as_object_mut() {
            data.remove("status");
        }

        let created = self.writer.create(&T::api_resource(), &obj).await?;
        if created {
            info!(kind = T::KIND, name = %name, namespace = %namespace, "created");
        }
        Ok(MemberState {
            name,
            phase: RequestPhase::New,
            created,
            detail: None,
        })
    }

    /// Verdict for a wave holding a Failed or FailedValidation member
    ///
    /// Only a settled wave can be PartiallyFailed under `tolerate_mixed_wave`;
    /// while members are still in flight the run is Failed.
    fn failure_verdict<T: StateRequest>(&self, wave: &WaveState) -> Option<(TrackerStatus, StatusError)> {
        let member = wave.members.iter().find(|m| m.phase.is_failure())?;
        let message = failure_message(T::KIND, member);
        let error = if member.phase == RequestPhase::FailedValidation {
            StatusError::failed_validation(T::SUBJECT, message)
        } else {
            StatusError::failed(T::SUBJECT, message)
        };

        let any_usable = wave
            .members
            .iter()
            .any(|m| matches!(m.phase, RequestPhase::Completed | RequestPhase::PartiallyFailed));
        let status = if wave.is_settled() && any_usable && self.policy.tolerate_mixed_wave {
            TrackerStatus::PartiallyFailed
        } else {
            TrackerStatus::Failed
        };
        Some((status, error))
    }

    /// Verdict for a settled wave without failures, `None` to advance
    fn partial_verdict<T: StateRequest>(
        &self,
        wave: &WaveState,
        tolerated_partial: &mut bool,
    ) -> Option<StatusError> {
        let member = wave
            .members
            .iter()
            .find(|m| m.phase == RequestPhase::PartiallyFailed)?;
        if self.policy.halt_on_partial_failure {
            return Some(StatusError::failed(T::SUBJECT, failure_message(T::KIND, member)));
        }
        warn!(kind = T::KIND, name = %member.name, "partially failed, continuing");
        *tolerated_partial = true;
        None
    }
}

fn failure_message(kind: &str, member: &MemberState) -> String {
    match &member.detail {
        Some(detail) => format!("{} {} {}: {}", kind, member.name, member.phase, detail),
        None => format!("{} {} {}", kind, member.name, member.phase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;
    use crate::velero::{Backup, Restore};
    use lca_common::kube_utils::HasApiResource;
    use lca_common::{StatusKind, StatusSubject, APPLY_WAVE_ANNOTATION, CLUSTER_ID_LABEL, OADP_NAMESPACE};

    fn backup(name: &str, wave: Option<i32>) -> Backup {
        let mut b = Backup::new(name, OADP_NAMESPACE, BTreeMap::new());
        if let Some(w) = wave {
            b.metadata.annotations = Some(BTreeMap::from([(
                APPLY_WAVE_ANNOTATION.to_string(),
                w.to_string(),
            )]));
        }
        b
    }

    fn set_phase(cluster: &FakeCluster, name: &str, phase: &str) {
        cluster.set_phase(&Backup::api_resource(), OADP_NAMESPACE, name, phase);
    }

    fn requests() -> Vec<Backup> {
        vec![backup("a", Some(1)), backup("b", Some(1)), backup("c", Some(2))]
    }

    #[tokio::test]
    async fn first_call_creates_only_first_wave() {
        let cluster = FakeCluster::new();
        let tracker = CaptureRestoreTracker::new(&cluster, &cluster)
            .start_or_track(requests())
            .await
            .unwrap();

        assert_eq!(tracker.status, TrackerStatus::InProgress);
        assert_eq!(tracker.current_wave, 1);
        assert_eq!(tracker.total_waves, 2);
        assert_eq!(tracker.created(), 2);
        assert_eq!(cluster.count(&Backup::api_resource()), 2);
        assert!(!cluster.contains(&Backup::api_resource(), Some(OADP_NAMESPACE), "c"));
    }

    #[tokio::test]
    async fn next_wave_waits_for_every_member_to_settle() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster);
        t.start_or_track(requests()).await.unwrap();

        set_phase(&cluster, "a", "Completed");
        set_phase(&cluster, "b", "InProgress");
        let tracker = t.start_or_track(requests()).await.unwrap();
        assert_eq!(tracker.current_wave, 1);
        assert_eq!(tracker.status, TrackerStatus::InProgress);
        assert!(!cluster.contains(&Backup::api_resource(), Some(OADP_NAMESPACE), "c"));

        set_phase(&cluster, "b", "Completed");
        let tracker = t.start_or_track(requests()).await.unwrap();
        assert_eq!(tracker.current_wave, 2);
        assert_eq!(tracker.created(), 1);
        assert!(cluster.contains(&Backup::api_resource(), Some(OADP_NAMESPACE), "c"));

        set_phase(&cluster, "c", "Completed");
        let tracker = t.start_or_track(requests()).await.unwrap();
        assert_eq!(tracker.status, TrackerStatus::Completed);
        assert!(tracker.is_finished());
        assert_eq!(tracker.completed_names(), vec!["a", "b", "c"]);
        assert!(tracker.first_failure.is_none());
    }

    #[tokio::test]
    async fn repeated_calls_create_nothing_new() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster);
        t.start_or_track(requests()).await.unwrap();
        set_phase(&cluster, "a", "Completed");
        set_phase(&cluster, "b", "Completed");
        t.start_or_track(requests()).await.unwrap();
        set_phase(&cluster, "c", "Completed");

        let creates_before = cluster.calls().creates;
        let first = t.start_or_track(requests()).await.unwrap();
        let second = t.start_or_track(requests()).await.unwrap();

        assert_eq!(cluster.calls().creates, creates_before);
        assert_eq!(first.created(), 0);
        assert_eq!(first, second);
        assert_eq!(second.status, TrackerStatus::Completed);
    }

    #[tokio::test]
    async fn fresh_tracker_resumes_existing_run() {
        let cluster = FakeCluster::new();
        let mut a = backup("a", Some(1));
        a.status = Some(crate::velero::RequestStatus {
            phase: Some("Completed".to_string()),
            ..Default::default()
        });
        cluster.insert(&a);

        let tracker = CaptureRestoreTracker::new(&cluster, &cluster)
            .start_or_track(vec![backup("a", Some(1)), backup("z", None)])
            .await
            .unwrap();

        assert_eq!(tracker.current_wave, 2);
        assert!(!tracker.waves[0].members[0].created);
        assert_eq!(tracker.created(), 1);
    }

    #[tokio::test]
    async fn mixed_wave_fails_and_names_failed_member() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster);
        let reqs = || vec![backup("x", Some(1)), backup("y", Some(1)), backup("next", Some(2))];
        t.start_or_track(reqs()).await.unwrap();
        set_phase(&cluster, "x", "Completed");
        set_phase(&cluster, "y", "Failed");

        let tracker = t.start_or_track(reqs()).await.unwrap();
        assert_eq!(tracker.status, TrackerStatus::Failed);
        let err = tracker.first_failure.unwrap();
        assert_eq!(err.kind, StatusKind::Failed);
        assert_eq!(err.subject, StatusSubject::CaptureRequest);
        assert!(err.message.contains("Backup y"), "{}", err.message);
        assert!(!cluster.contains(&Backup::api_resource(), Some(OADP_NAMESPACE), "next"));
        // no rollback
        assert!(cluster.contains(&Backup::api_resource(), Some(OADP_NAMESPACE), "x"));
    }

    #[tokio::test]
    async fn mixed_wave_is_partial_when_tolerated() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster).with_policy(TrackerPolicy {
            tolerate_mixed_wave: true,
            ..Default::default()
        });
        let reqs = || vec![backup("x", Some(1)), backup("y", Some(1))];
        t.start_or_track(reqs()).await.unwrap();
        set_phase(&cluster, "x", "Completed");
        set_phase(&cluster, "y", "Failed");

        let tracker = t.start_or_track(reqs()).await.unwrap();
        assert_eq!(tracker.status, TrackerStatus::PartiallyFailed);
        assert!(tracker.first_failure.unwrap().message.contains("y"));
    }

    #[tokio::test]
    async fn validation_failure_is_reported_as_such() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster);
        let reqs = || vec![backup("bad", None)];
        t.start_or_track(reqs()).await.unwrap();
        set_phase(&cluster, "bad", "FailedValidation");

        let tracker = t.start_or_track(reqs()).await.unwrap();
        assert_eq!(tracker.status, TrackerStatus::Failed);
        assert!(tracker.first_failure.unwrap().is_failed_validation());
    }

    #[tokio::test]
    async fn partial_failure_halts_by_default() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster);
        t.start_or_track(requests()).await.unwrap();
        set_phase(&cluster, "a", "PartiallyFailed");
        set_phase(&cluster, "b", "Completed");

        let tracker = t.start_or_track(requests()).await.unwrap();
        assert_eq!(tracker.status, TrackerStatus::PartiallyFailed);
        assert!(tracker.first_failure.is_some());
        assert!(!cluster.contains(&Backup::api_resource(), Some(OADP_NAMESPACE), "c"));
    }

    #[tokio::test]
    async fn partial_failure_can_continue() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster).with_policy(TrackerPolicy {
            halt_on_partial_failure: false,
            ..Default::default()
        });
        t.start_or_track(requests()).await.unwrap();
        set_phase(&cluster, "a", "PartiallyFailed");
        set_phase(&cluster, "b", "Completed");
        t.start_or_track(requests()).await.unwrap();
        set_phase(&cluster, "c", "Completed");

        let tracker = t.start_or_track(requests()).await.unwrap();
        assert_eq!(tracker.status, TrackerStatus::PartiallyFailed);
        assert!(tracker.first_failure.is_none());
        assert_eq!(tracker.current_wave, 2);
    }

    #[tokio::test]
    async fn created_requests_carry_labels_and_no_status() {
        let cluster = FakeCluster::new();
        let mut b = backup("a", None);
        b.status = Some(crate::velero::RequestStatus {
            phase: Some("Completed".to_string()),
            ..Default::default()
        });
        b.metadata.resource_version = Some("42".to_string());

        CaptureRestoreTracker::new(&cluster, &cluster)
            .with_labels(BTreeMap::from([(CLUSTER_ID_LABEL.to_string(), "cid".to_string())]))
            .start_or_track(vec![b])
            .await
            .unwrap();

        let stored: Backup = cluster.get_typed(Some(OADP_NAMESPACE), "a").unwrap();
        assert!(stored.status.is_none());
        assert!(stored.metadata.resource_version.is_none());
        assert_eq!(
            stored.metadata.labels.unwrap().get(CLUSTER_ID_LABEL).map(String::as_str),
            Some("cid")
        );
    }

    #[tokio::test]
    async fn restores_report_recovery_subject() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster);
        let reqs = || vec![Restore::new("r", OADP_NAMESPACE, "r")];
        t.start_or_track(reqs()).await.unwrap();
        cluster.set_phase(&Restore::api_resource(), OADP_NAMESPACE, "r", "Failed");

        let tracker = t.start_or_track(reqs()).await.unwrap();
        assert_eq!(tracker.kind, "Restore");
        assert_eq!(
            tracker.first_failure.unwrap().subject,
            StatusSubject::RecoveryRequest
        );
    }

    #[tokio::test]
    async fn failed_member_ends_run_while_sibling_in_flight() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster);
        let reqs = || vec![backup("x", Some(1)), backup("y", Some(1)), backup("z", Some(2))];
        t.start_or_track(reqs()).await.unwrap();
        set_phase(&cluster, "x", "InProgress");
        set_phase(&cluster, "y", "Failed");

        let tracker = t.start_or_track(reqs()).await.unwrap();
        assert_eq!(tracker.status, TrackerStatus::Failed);
        assert!(tracker.is_finished());
        let err = tracker.first_failure.unwrap();
        assert!(err.is_failed());
        assert!(err.message.contains("Backup y"), "{}", err.message);
        assert!(!cluster.contains(&Backup::api_resource(), Some(OADP_NAMESPACE), "z"));
    }

    #[tokio::test]
    async fn unsettled_mixed_wave_is_failed_even_when_tolerated() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster).with_policy(TrackerPolicy {
            tolerate_mixed_wave: true,
            ..Default::default()
        });
        let reqs = || vec![backup("x", Some(1)), backup("y", Some(1)), backup("w", Some(1))];
        t.start_or_track(reqs()).await.unwrap();
        set_phase(&cluster, "x", "Completed");
        set_phase(&cluster, "y", "FailedValidation");
        set_phase(&cluster, "w", "InProgress");

        let tracker = t.start_or_track(reqs()).await.unwrap();
        assert_eq!(tracker.status, TrackerStatus::Failed);
        assert!(tracker.first_failure.unwrap().is_failed_validation());
    }

    #[tokio::test]
    async fn unrecognised_phase_keeps_wave_in_flight() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster);
        t.start_or_track(requests()).await.unwrap();
        set_phase(&cluster, "a", "Completed");
        set_phase(&cluster, "b", "Deleting");

        let tracker = t.start_or_track(requests()).await.unwrap();
        assert_eq!(tracker.status, TrackerStatus::InProgress);
        assert_eq!(tracker.current_wave, 1);
        assert_eq!(tracker.waves[0].in_phase(RequestPhase::Unknown), vec!["b"]);
        assert!(tracker.first_failure.is_none());
        assert!(!cluster.contains(&Backup::api_resource(), Some(OADP_NAMESPACE), "c"));
    }

    #[tokio::test]
    async fn given_waves_override_annotations() {
        let cluster = FakeCluster::new();
        let t = CaptureRestoreTracker::new(&cluster, &cluster);
        // annotations would put "late" first; the given layout puts it second
        let waves = || {
            vec![
                Wave {
                    ordinal: 1,
                    priority: 1,
                    members: vec![backup("early", Some(9))],
                },
                Wave {
                    ordinal: 2,
                    priority: 2,
                    members: vec![backup("late", Some(-5))],
                },
            ]
        };

        let tracker = t.track_waves(waves()).await.unwrap();
        assert_eq!(tracker.total_waves, 2);
        assert_eq!(tracker.current_wave, 1);
        assert!(cluster.contains(&Backup::api_resource(), Some(OADP_NAMESPACE), "early"));
        assert!(!cluster.contains(&Backup::api_resource(), Some(OADP_NAMESPACE), "late"));

        set_phase(&cluster, "early", "Completed");
        let tracker = t.track_waves(waves()).await.unwrap();
        assert_eq!(tracker.current_wave, 2);
        assert!(cluster.contains(&Backup::api_resource(), Some(OADP_NAMESPACE), "late"));
    }

    #[tokio::test]
    async fn empty_request_set_is_completed() {
        let cluster = FakeCluster::new();
        let tracker = CaptureRestoreTracker::new(&cluster, &cluster)
            .start_or_track(Vec::<Backup>::new())
            .await
            .unwrap();
        assert_eq!(tracker.status, TrackerStatus::Completed);
        assert_eq!(tracker.current_wave, 0);
    }

    #[tokio::test]
    async fn read_errors_propagate() {
        let cluster = FakeCluster::new();
        cluster.fail_kind("Backup");
        let err = CaptureRestoreTracker::new(&cluster, &cluster)
            .start_or_track(requests())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal { .. }));
        assert_eq!(cluster.calls().creates, 0);
    }
}
