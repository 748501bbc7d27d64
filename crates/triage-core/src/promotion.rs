//! The champion/challenger promotion rule.
//!
//! [`PromotionPolicy::assess`] is pure: it turns shadow-evaluation metrics and
//! drift signals into an outcome and a reason. Serialising decisions, checking
//! statuses, and writing the ledger are the runtime's and the store's job.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
  Error, Result,
  drift::DriftSignal,
  ledger::{DecisionDraft, MetricDeltas, Outcome, ReasonCode, Relaxation, Trigger},
  model::{ModelStatus, ModelVersion, ValidationMetrics},
  score::ScorerFamily,
};

/// Absorbs float noise in metric differences.
const METRIC_EPSILON: f64 = 1e-9;

/// Where a rejected candidate goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectTo {
  /// Stay in shadow and keep accumulating evidence.
  #[default]
  Shadow,
  Retired,
}

impl RejectTo {
  pub fn status(self) -> ModelStatus {
    match self {
      Self::Shadow => ModelStatus::Shadow,
      Self::Retired => ModelStatus::Retired,
    }
  }
}

/// Promotion settings (`[promotion]` in `config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionPolicy {
  pub min_shadow_cases:               u64,
  /// Allowed sensitivity drop for a healthy incumbent.
  pub sensitivity_tolerance:          f64,
  /// Allowed sensitivity drop when the incumbent is degraded by drift.
  pub degraded_sensitivity_tolerance: f64,
  /// A tracked metric must improve by more than this to justify promotion.
  pub min_improvement:                f64,
  pub reject_to:                      RejectTo,
}

impl Default for PromotionPolicy {
  fn default() -> Self {
    Self {
      min_shadow_cases:               500,
      sensitivity_tolerance:          0.0,
      degraded_sensitivity_tolerance: 0.02,
      min_improvement:                0.01,
      reject_to:                      RejectTo::Shadow,
    }
  }
}

/// Candidate and incumbent measured side by side on the same shadow traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonMetrics {
  pub shadow_cases: u64,
  pub candidate:    ValidationMetrics,
  pub incumbent:    ValidationMetrics,
}

impl ComparisonMetrics {
  pub fn deltas(&self) -> MetricDeltas {
    let worst = self
      .candidate
      .worst_subgroup_sensitivity()
      .zip(self.incumbent.worst_subgroup_sensitivity())
      .map(|(c, i)| c - i);
    MetricDeltas {
      sensitivity:                self.candidate.sensitivity - self.incumbent.sensitivity,
      specificity:                self.candidate.specificity - self.incumbent.specificity,
      worst_subgroup_sensitivity: worst,
    }
  }
}

/// Where a candidate stands in the promotion workflow.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CandidateState {
  Shadow,
  /// A decision is in flight.
  Comparing,
  Promoted,
  Rejected,
}

impl CandidateState {
  /// `SHADOW → COMPARING → {PROMOTED, REJECTED}`; a comparison without
  /// enough evidence falls back to `SHADOW`, and a candidate rejected back to
  /// shadow may be compared again.
  pub fn can_advance_to(self, next: Self) -> bool {
    matches!(
      (self, next),
      (Self::Shadow, Self::Comparing)
        | (Self::Rejected, Self::Comparing)
        | (Self::Comparing, Self::Shadow)
        | (Self::Comparing, Self::Promoted)
        | (Self::Comparing, Self::Rejected)
    )
  }
}

/// Result of applying the promotion rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
  pub outcome:    Outcome,
  pub reason:     ReasonCode,
  pub deltas:     MetricDeltas,
  pub relaxation: Option<Relaxation>,
}

impl Assessment {
  /// Turn the assessment into a ledger draft for `candidate` against the
  /// active `incumbent`.
  pub fn into_draft(
    self,
    family: ScorerFamily,
    candidate: ModelVersion,
    incumbent: ModelVersion,
    trigger: Trigger,
    reject_to: RejectTo,
  ) -> DecisionDraft {
    let new_active = match self.outcome {
      Outcome::Promoted => candidate.clone(),
      Outcome::Rejected => incumbent.clone(),
    };
    DecisionDraft {
      family,
      candidate,
      candidate_from: ModelStatus::Shadow,
      previous_active: Some(incumbent),
      new_active,
      outcome: self.outcome,
      reason: self.reason,
      deltas: Some(self.deltas),
      trigger,
      relaxation: self.relaxation,
      reject_to: reject_to.status(),
    }
  }
}

impl PromotionPolicy {
  /// Apply the promotion rule.
  ///
  /// Fails with [`Error::InsufficientEvidence`] (a hold, not a rejection)
  /// when there is too little shadow traffic or the metrics cannot be
  /// compared.
  pub fn assess(
    &self,
    comparison: &ComparisonMetrics,
    signals: &[DriftSignal],
  ) -> Result<Assessment> {
    if comparison.shadow_cases < self.min_shadow_cases {
      return Err(Error::InsufficientEvidence(format!(
        "{} shadow cases, at least {} required",
        comparison.shadow_cases, self.min_shadow_cases
      )));
    }
    if !comparison.candidate.is_well_formed() || !comparison.incumbent.is_well_formed() {
      return Err(Error::InsufficientEvidence(
        "metrics must be finite and within [0, 1]".into(),
      ));
    }
    if let Some(missing) = comparison
      .incumbent
      .subgroups
      .keys()
      .find(|k| !comparison.candidate.subgroups.contains_key(*k))
    {
      return Err(Error::InsufficientEvidence(format!(
        "candidate reports no metrics for subgroup {missing:?}"
      )));
    }

    let deltas = comparison.deltas();
    let triggered: Vec<DriftSignal> =
      signals.iter().filter(|s| s.triggered).cloned().collect();
    let degraded = !triggered.is_empty();
    let tolerance = if degraded {
      self.degraded_sensitivity_tolerance
    } else {
      self.sensitivity_tolerance
    };

    let regresses = |delta: f64, tol: f64| delta + tol + METRIC_EPSILON < 0.0;
    let sensitivities = [Some(deltas.sensitivity), deltas.worst_subgroup_sensitivity];

    let reject = |reason| Assessment {
      outcome: Outcome::Rejected,
      reason,
      deltas,
      relaxation: None,
    };

    if sensitivities.iter().flatten().any(|d| regresses(*d, tolerance)) {
      return Ok(reject(ReasonCode::SensitivityRegression));
    }

    let tracked = [
      Some(deltas.sensitivity),
      Some(deltas.specificity),
      deltas.worst_subgroup_sensitivity,
    ];
    let improves = tracked
      .iter()
      .flatten()
      .any(|d| *d > self.min_improvement + METRIC_EPSILON);
    let within_normal_tolerance = !sensitivities
      .iter()
      .flatten()
      .any(|d| regresses(*d, self.sensitivity_tolerance));

    if improves && within_normal_tolerance {
      return Ok(Assessment {
        outcome: Outcome::Promoted,
        reason: ReasonCode::MetricImprovement,
        deltas,
        relaxation: None,
      });
    }
    if !degraded {
      return Ok(reject(ReasonCode::NoMaterialImprovement));
    }

    // Degraded incumbent: the drift is the improvement evidence, as long as
    // nothing tracked regresses beyond the relaxed tolerance.
    if tracked.iter().flatten().any(|d| regresses(*d, tolerance)) {
      return Ok(reject(ReasonCode::NoMaterialImprovement));
    }
    Ok(Assessment {
      outcome: Outcome::Promoted,
      reason: ReasonCode::RelaxedForDegradedIncumbent,
      deltas,
      relaxation: Some(Relaxation {
        normal_tolerance: self.sensitivity_tolerance,
        applied_tolerance: tolerance,
        signals: triggered,
      }),
    })
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use super::*;
  use crate::{
    drift::DriftMetric,
    model::SubgroupMetrics,
  };

  fn metrics(sensitivity: f64, specificity: f64) -> ValidationMetrics {
    ValidationMetrics { sensitivity, specificity, subgroups: BTreeMap::new() }
  }

  fn comparison(candidate: ValidationMetrics, incumbent: ValidationMetrics) -> ComparisonMetrics {
    ComparisonMetrics { shadow_cases: 1_000, candidate, incumbent }
  }

  fn signal(triggered: bool) -> DriftSignal {
    DriftSignal {
      window_id: "w2".into(),
      metric: DriftMetric::SeverityDistribution,
      baseline: 0.0,
      observed: 0.35,
      deviation: 0.35,
      threshold: 0.2,
      triggered,
    }
  }

  #[test]
  fn improvement_is_promoted() {
    let a = PromotionPolicy::default()
      .assess(&comparison(metrics(0.93, 0.80), metrics(0.90, 0.80)), &[])
      .unwrap();
    assert_eq!(a.outcome, Outcome::Promoted);
    assert_eq!(a.reason, ReasonCode::MetricImprovement);
    assert!(a.relaxation.is_none());
    assert!((a.deltas.sensitivity - 0.03).abs() < 1e-9);
  }

  #[test]
  fn equal_metrics_are_not_material() {
    let a = PromotionPolicy::default()
      .assess(&comparison(metrics(0.9, 0.8), metrics(0.9, 0.8)), &[signal(false)])
      .unwrap();
    assert_eq!(a.outcome, Outcome::Rejected);
    assert_eq!(a.reason, ReasonCode::NoMaterialImprovement);
  }

  #[test]
  fn sensitivity_regression_is_always_rejected() {
    let policy = PromotionPolicy::default();
    // Large specificity gain cannot buy back a sensitivity loss.
    let a = policy
      .assess(&comparison(metrics(0.89, 0.99), metrics(0.90, 0.70)), &[])
      .unwrap();
    assert_eq!(a.outcome, Outcome::Rejected);
    assert_eq!(a.reason, ReasonCode::SensitivityRegression);

    // Not even for a degraded incumbent, beyond the relaxed tolerance.
    let a = policy
      .assess(&comparison(metrics(0.85, 0.99), metrics(0.90, 0.70)), &[signal(true)])
      .unwrap();
    assert_eq!(a.reason, ReasonCode::SensitivityRegression);
  }

  #[test]
  fn subgroup_regression_is_rejected() {
    let mut candidate = metrics(0.95, 0.8);
    let mut incumbent = metrics(0.90, 0.8);
    candidate.subgroups.insert(
      "pediatric".into(),
      SubgroupMetrics { sensitivity: 0.80, specificity: 0.8 },
    );
    incumbent.subgroups.insert(
      "pediatric".into(),
      SubgroupMetrics { sensitivity: 0.88, specificity: 0.8 },
    );
    let a = PromotionPolicy::default()
      .assess(&comparison(candidate, incumbent), &[])
      .unwrap();
    assert_eq!(a.reason, ReasonCode::SensitivityRegression);
    assert!((a.deltas.worst_subgroup_sensitivity.unwrap() + 0.08).abs() < 1e-9);
  }

  #[test]
  fn degraded_incumbent_relaxes_rule() {
    let a = PromotionPolicy::default()
      .assess(
        &comparison(metrics(0.9, 0.8), metrics(0.9, 0.8)),
        &[signal(false), signal(true)],
      )
      .unwrap();
    assert_eq!(a.outcome, Outcome::Promoted);
    assert_eq!(a.reason, ReasonCode::RelaxedForDegradedIncumbent);
    let relaxation = a.relaxation.unwrap();
    assert_eq!(relaxation.normal_tolerance, 0.0);
    assert_eq!(relaxation.applied_tolerance, 0.02);
    assert_eq!(relaxation.signals.len(), 1);
  }

  #[test]
  fn degraded_small_sensitivity_drop_is_tolerated() {
    let a = PromotionPolicy::default()
      .assess(&comparison(metrics(0.89, 0.85), metrics(0.90, 0.80)), &[signal(true)])
      .unwrap();
    assert_eq!(a.outcome, Outcome::Promoted);
    assert_eq!(a.reason, ReasonCode::RelaxedForDegradedIncumbent);
  }

  #[test]
  fn degraded_specificity_collapse_is_rejected() {
    let a = PromotionPolicy::default()
      .assess(&comparison(metrics(0.90, 0.60), metrics(0.90, 0.80)), &[signal(true)])
      .unwrap();
    assert_eq!(a.outcome, Outcome::Rejected);
    assert_eq!(a.reason, ReasonCode::NoMaterialImprovement);
  }

  #[test]
  fn too_few_shadow_cases_is_a_hold() {
    let mut c = comparison(metrics(0.99, 0.99), metrics(0.5, 0.5));
    c.shadow_cases = 499;
    let err = PromotionPolicy::default().assess(&c, &[]).unwrap_err();
    assert!(matches!(err, Error::InsufficientEvidence(_)));
    assert_eq!(err.code(), "INSUFFICIENT_EVIDENCE");
  }

  #[test]
  fn missing_subgroup_is_a_hold() {
    let mut incumbent = metrics(0.9, 0.8);
    incumbent.subgroups.insert(
      "elderly".into(),
      SubgroupMetrics { sensitivity: 0.85, specificity: 0.8 },
    );
    let err = PromotionPolicy::default()
      .assess(&comparison(metrics(0.95, 0.9), incumbent), &[])
      .unwrap_err();
    assert!(matches!(err, Error::InsufficientEvidence(_)));
  }

  #[test]
  fn non_finite_metric_is_a_hold() {
    let err = PromotionPolicy::default()
      .assess(&comparison(metrics(f64::NAN, 0.9), metrics(0.9, 0.8)), &[])
      .unwrap_err();
    assert!(matches!(err, Error::InsufficientEvidence(_)));
  }

  #[test]
  fn state_machine_edges() {
    use CandidateState::*;
    assert!(Shadow.can_advance_to(Comparing));
    assert!(Comparing.can_advance_to(Promoted));
    assert!(Comparing.can_advance_to(Rejected));
    assert!(!Shadow.can_advance_to(Promoted));
    assert!(!Promoted.can_advance_to(Comparing));
  }

  #[test]
  fn draft_keeps_incumbent_on_rejection() {
    let a = PromotionPolicy::default()
      .assess(&comparison(metrics(0.8, 0.8), metrics(0.9, 0.8)), &[])
      .unwrap();
    let draft = a.into_draft(
      ScorerFamily::Common,
      "common-2".into(),
      "common-1".into(),
      Trigger::Scheduled,
      RejectTo::Retired,
    );
    assert_eq!(draft.new_active.as_str(), "common-1");
    assert_eq!(draft.reject_to, ModelStatus::Retired);
    assert_eq!(draft.transitions().len(), 1);
  }
}
