//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{TimeZone as _, Utc};
use triage_core::{
  Error as CoreError,
  drift::{Baseline, DriftMetric, DriftSignal},
  ledger::{
    DecisionDraft, MetricDeltas, Outcome, ReasonCode, Trigger, verify_chain,
  },
  model::{ModelStatus, ModelVersion, NewDescriptor, ValidationMetrics},
  score::ScorerFamily,
  store::ModelStore,
  symptom::Vocabulary,
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn new_descriptor(version: &str, family: ScorerFamily) -> NewDescriptor {
  NewDescriptor {
    version:           version.into(),
    family,
    training_snapshot: "snap-2026-09".into(),
    artifact_ref:      "builtin".into(),
    metrics:           ValidationMetrics {
      sensitivity: 0.9,
      specificity: 0.8,
      ..Default::default()
    },
  }
}

fn bootstrap(version: &str, family: ScorerFamily) -> DecisionDraft {
  DecisionDraft {
    family,
    candidate: version.into(),
    candidate_from: ModelStatus::Shadow,
    previous_active: None,
    new_active: version.into(),
    outcome: Outcome::Promoted,
    reason: ReasonCode::InitialDeployment,
    deltas: None,
    trigger: Trigger::Bootstrap { approver: "dr.ops".into() },
    relaxation: None,
    reject_to: ModelStatus::Shadow,
  }
}

fn promote(candidate: &str, incumbent: &str, family: ScorerFamily) -> DecisionDraft {
  DecisionDraft {
    family,
    candidate: candidate.into(),
    candidate_from: ModelStatus::Shadow,
    previous_active: Some(incumbent.into()),
    new_active: candidate.into(),
    outcome: Outcome::Promoted,
    reason: ReasonCode::MetricImprovement,
    deltas: Some(MetricDeltas {
      sensitivity:                0.02,
      specificity:                0.0,
      worst_subgroup_sensitivity: None,
    }),
    trigger: Trigger::Manual { approver: "dr.ops".into() },
    relaxation: None,
    reject_to: ModelStatus::Shadow,
  }
}

fn status_of(e: &Error) -> Option<&CoreError> { e.as_core() }

// ─── Descriptors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn register_and_get_descriptor() {
  let s = store().await;

  let d = s
    .register_descriptor(new_descriptor("common-1", ScorerFamily::Common))
    .await
    .unwrap();
  assert_eq!(d.status, ModelStatus::Shadow);

  let fetched = s.get_descriptor("common-1".into()).await.unwrap().unwrap();
  assert_eq!(fetched, d);

  let missing = s.get_descriptor("nope".into()).await.unwrap();
  assert!(missing.is_none());
}

#[tokio::test]
async fn duplicate_version_is_rejected() {
  let s = store().await;
  s.register_descriptor(new_descriptor("common-1", ScorerFamily::Common))
    .await
    .unwrap();

  let err = s
    .register_descriptor(new_descriptor("common-1", ScorerFamily::RareCritical))
    .await
    .unwrap_err();
  assert!(matches!(status_of(&err), Some(CoreError::DuplicateModel(_))));

  let all = s.list_descriptors(None, None).await.unwrap();
  assert_eq!(all.len(), 1);
  assert_eq!(all[0].family, ScorerFamily::Common);
}

#[tokio::test]
async fn list_filters_by_family_and_status() {
  let s = store().await;
  s.register_descriptor(new_descriptor("common-1", ScorerFamily::Common)).await.unwrap();
  s.register_descriptor(new_descriptor("rare-1", ScorerFamily::RareCritical)).await.unwrap();
  s.register_descriptor(new_descriptor("common-2", ScorerFamily::Common)).await.unwrap();
  s.commit_decision(bootstrap("common-1", ScorerFamily::Common)).await.unwrap();

  let common = s.list_descriptors(Some(ScorerFamily::Common), None).await.unwrap();
  let versions: Vec<_> = common.iter().map(|d| d.version.as_str()).collect();
  assert_eq!(versions, ["common-1", "common-2"]);

  let shadow = s.list_descriptors(None, Some(ModelStatus::Shadow)).await.unwrap();
  let versions: Vec<_> = shadow.iter().map(|d| d.version.as_str()).collect();
  assert_eq!(versions, ["rare-1", "common-2"]);

  let active = s.active_descriptor(ScorerFamily::Common).await.unwrap().unwrap();
  assert_eq!(active.version.as_str(), "common-1");
  assert!(s.active_descriptor(ScorerFamily::RareCritical).await.unwrap().is_none());
}

// ─── Decisions ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn bootstrap_activates_and_records() {
  let s = store().await;
  s.register_descriptor(new_descriptor("common-1", ScorerFamily::Common)).await.unwrap();

  let entry = s.commit_decision(bootstrap("common-1", ScorerFamily::Common)).await.unwrap();
  assert_eq!(entry.sequence, 1);
  assert!(entry.prev_digest.is_none());
  assert_eq!(entry.reason, ReasonCode::InitialDeployment);

  let again = s
    .commit_decision(bootstrap("common-1", ScorerFamily::Common))
    .await
    .unwrap_err();
  assert!(matches!(status_of(&again), Some(CoreError::StatusConflict { .. })));
}

#[tokio::test]
async fn second_bootstrap_of_a_family_is_refused() {
  let s = store().await;
  s.register_descriptor(new_descriptor("common-1", ScorerFamily::Common)).await.unwrap();
  s.register_descriptor(new_descriptor("common-2", ScorerFamily::Common)).await.unwrap();
  s.commit_decision(bootstrap("common-1", ScorerFamily::Common)).await.unwrap();

  let err = s
    .commit_decision(bootstrap("common-2", ScorerFamily::Common))
    .await
    .unwrap_err();
  assert!(matches!(
    status_of(&err),
    Some(CoreError::AlreadyBootstrapped(ScorerFamily::Common))
  ));
  let c2 = s.get_descriptor("common-2".into()).await.unwrap().unwrap();
  assert_eq!(c2.status, ModelStatus::Shadow);
}

#[tokio::test]
async fn promotion_retires_incumbent() {
  let s = store().await;
  s.register_descriptor(new_descriptor("common-1", ScorerFamily::Common)).await.unwrap();
  s.register_descriptor(new_descriptor("common-2", ScorerFamily::Common)).await.unwrap();
  s.commit_decision(bootstrap("common-1", ScorerFamily::Common)).await.unwrap();

  let entry = s
    .commit_decision(promote("common-2", "common-1", ScorerFamily::Common))
    .await
    .unwrap();
  assert_eq!(entry.sequence, 2);
  assert_eq!(entry.previous_active, Some(ModelVersion::from("common-1")));

  let old = s.get_descriptor("common-1".into()).await.unwrap().unwrap();
  let new = s.get_descriptor("common-2".into()).await.unwrap().unwrap();
  assert_eq!(old.status, ModelStatus::Retired);
  assert_eq!(new.status, ModelStatus::Active);

  let active = s.list_descriptors(Some(ScorerFamily::Common), Some(ModelStatus::Active)).await;
  assert_eq!(active.unwrap().len(), 1);
}

#[tokio::test]
async fn stale_decision_changes_nothing() {
  let s = store().await;
  s.register_descriptor(new_descriptor("common-1", ScorerFamily::Common)).await.unwrap();
  s.register_descriptor(new_descriptor("common-2", ScorerFamily::Common)).await.unwrap();
  s.register_descriptor(new_descriptor("common-3", ScorerFamily::Common)).await.unwrap();
  s.commit_decision(bootstrap("common-1", ScorerFamily::Common)).await.unwrap();
  s.commit_decision(promote("common-2", "common-1", ScorerFamily::Common)).await.unwrap();

  // Computed against common-1, which is no longer active.
  let err = s
    .commit_decision(promote("common-3", "common-1", ScorerFamily::Common))
    .await
    .unwrap_err();
  assert!(matches!(
    status_of(&err),
    Some(CoreError::StatusConflict { expected: ModelStatus::Active, actual: ModelStatus::Retired, .. })
  ));

  let c3 = s.get_descriptor("common-3".into()).await.unwrap().unwrap();
  assert_eq!(c3.status, ModelStatus::Shadow);
  assert_eq!(s.ledger_entries(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_or_foreign_candidate_is_refused() {
  let s = store().await;
  s.register_descriptor(new_descriptor("rare-1", ScorerFamily::RareCritical)).await.unwrap();

  let err = s
    .commit_decision(bootstrap("ghost", ScorerFamily::Common))
    .await
    .unwrap_err();
  assert!(matches!(status_of(&err), Some(CoreError::ModelNotFound(_))));

  let err = s
    .commit_decision(bootstrap("rare-1", ScorerFamily::Common))
    .await
    .unwrap_err();
  assert!(matches!(
    status_of(&err),
    Some(CoreError::FamilyMismatch { actual: ScorerFamily::RareCritical, .. })
  ));
  assert!(s.ledger_entries(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn rejection_records_entry_and_moves_candidate() {
  let s = store().await;
  s.register_descriptor(new_descriptor("common-1", ScorerFamily::Common)).await.unwrap();
  s.register_descriptor(new_descriptor("common-2", ScorerFamily::Common)).await.unwrap();
  s.commit_decision(bootstrap("common-1", ScorerFamily::Common)).await.unwrap();

  let mut reject = promote("common-2", "common-1", ScorerFamily::Common);
  reject.outcome = Outcome::Rejected;
  reject.reason = ReasonCode::SensitivityRegression;
  reject.new_active = "common-1".into();
  reject.reject_to = ModelStatus::Retired;

  let entry = s.commit_decision(reject).await.unwrap();
  assert!(!entry.is_promotion());
  assert_eq!(entry.new_active.as_str(), "common-1");

  let c1 = s.get_descriptor("common-1".into()).await.unwrap().unwrap();
  let c2 = s.get_descriptor("common-2".into()).await.unwrap().unwrap();
  assert_eq!(c1.status, ModelStatus::Active);
  assert_eq!(c2.status, ModelStatus::Retired);
}

#[tokio::test]
async fn ledger_chain_survives_storage() {
  let s = store().await;
  s.register_descriptor(new_descriptor("common-1", ScorerFamily::Common)).await.unwrap();
  s.register_descriptor(new_descriptor("rare-1", ScorerFamily::RareCritical)).await.unwrap();
  s.commit_decision(bootstrap("common-1", ScorerFamily::Common)).await.unwrap();
  s.commit_decision(bootstrap("rare-1", ScorerFamily::RareCritical)).await.unwrap();
  let before = s.ledger_entries(None).await.unwrap();

  for i in 2..=4 {
    let v = format!("common-{i}");
    let prev = format!("common-{}", i - 1);
    s.register_descriptor(new_descriptor(&v, ScorerFamily::Common)).await.unwrap();
    s.commit_decision(promote(&v, &prev, ScorerFamily::Common)).await.unwrap();
  }

  let all = s.ledger_entries(None).await.unwrap();
  assert_eq!(all.len(), 5);
  verify_chain(&all).unwrap();
  assert_eq!(&all[..2], &before[..]);
  assert_eq!(all[1].prev_digest.as_deref(), Some(all[0].digest.as_str()));

  let common = s.ledger_entries(Some(ScorerFamily::Common)).await.unwrap();
  assert_eq!(common.len(), 4);
  assert!(common.iter().all(|e| e.family == ScorerFamily::Common));
}

// ─── Drift ───────────────────────────────────────────────────────────────────

fn signal(window: &str, metric: DriftMetric, triggered: bool) -> DriftSignal {
  DriftSignal {
    window_id: window.into(),
    metric,
    baseline: 0.0,
    observed: 0.31,
    deviation: 0.31,
    threshold: 0.2,
    triggered,
  }
}

#[tokio::test]
async fn only_triggered_signals_are_archived() {
  let s = store().await;

  let written = s
    .archive_signals(vec![
      signal("w1", DriftMetric::SeverityDistribution, true),
      signal("w1", DriftMetric::SymptomFrequency, false),
    ])
    .await
    .unwrap();
  assert_eq!(written, 1);

  s.archive_signals(vec![signal("w2", DriftMetric::SymptomIntensity, true)])
    .await
    .unwrap();
  assert_eq!(s.archive_signals(vec![]).await.unwrap(), 0);

  let all = s.archived_signals(None).await.unwrap();
  assert_eq!(all.len(), 2);
  assert_eq!(all[0].window_id, "w2");

  let latest = s.archived_signals(Some(1)).await.unwrap();
  assert_eq!(latest, vec![signal("w2", DriftMetric::SymptomIntensity, true)]);
}

#[tokio::test]
async fn archived_signals_since_skips_older_ones() {
  let s = store().await;
  s.archive_signals(vec![signal("w1", DriftMetric::SeverityDistribution, true)])
    .await
    .unwrap();
  tokio::time::sleep(std::time::Duration::from_millis(20)).await;
  let cutoff = Utc::now();
  tokio::time::sleep(std::time::Duration::from_millis(20)).await;
  s.archive_signals(vec![
    signal("w2", DriftMetric::SeverityDistribution, true),
    signal("w2", DriftMetric::SymptomIntensity, true),
  ])
  .await
  .unwrap();

  let recent = s.archived_signals_since(cutoff).await.unwrap();
  assert_eq!(recent.len(), 2);
  assert!(recent.iter().all(|s| s.window_id == "w2"));
  assert_eq!(recent[0].metric, DriftMetric::SeverityDistribution);

  let everything = s
    .archived_signals_since(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap())
    .await
    .unwrap();
  assert_eq!(everything.len(), 3);
}

#[tokio::test]
async fn latest_baseline_wins() {
  let s = store().await;
  assert!(s.latest_baseline().await.unwrap().is_none());

  let mut first = Baseline {
    severity:          [0.7, 0.2, 0.08, 0.02],
    symptom_shares:    [(Vocabulary::standard().code("cough").unwrap(), 1.0)].into_iter().collect(),
    intensity:         [0.1, 0.3, 0.3, 0.2, 0.1],
    under_triage_rate: Some(0.03),
    observations:      400,
    captured_at:       Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap(),
  };
  s.store_baseline(first.clone()).await.unwrap();
  first.observations = 800;
  first.captured_at = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
  s.store_baseline(first.clone()).await.unwrap();

  assert_eq!(s.latest_baseline().await.unwrap(), Some(first));
}
