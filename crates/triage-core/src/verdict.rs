//! The case-level output of the risk aggregator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
  model::ModelVersion,
  score::{ScoreResult, ScorerFamily, UnavailableScorer},
  severity::SeverityClass,
  symptom::SymptomCode,
};

/// One verdict per case. Immutable once produced; persisted by the caller's
/// audit log, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
  pub severity:               SeverityClass,
  pub condition:              Option<String>,
  /// Family of the result that produced `severity` and `condition`.
  pub decided_by:             ScorerFamily,
  /// Every result that was considered, in input order.
  pub contributing:           Vec<ScoreResult>,
  /// Deduplicated symptoms behind the winning severity, first-seen order.
  pub evidence:               Vec<SymptomCode>,
  pub explanation:            String,
  /// Model version used by each family that scored.
  pub model_versions:         BTreeMap<ScorerFamily, ModelVersion>,
  /// Scorers that could not contribute (failure, timeout, or no result).
  pub unavailable:            Vec<UnavailableScorer>,
  /// Set when no result cleared the confidence floor and the verdict was
  /// taken over all results instead.
  pub below_confidence_floor: bool,
  pub recommendations:        Vec<String>,
}

impl Verdict {
  pub fn was_unavailable(&self, family: ScorerFamily) -> bool {
    self.unavailable.iter().any(|u| u.family == family)
  }

  /// The result that produced the winning severity and label.
  pub fn winner(&self) -> Option<&ScoreResult> {
    self
      .contributing
      .iter()
      .find(|r| r.family == self.decided_by)
  }
}
