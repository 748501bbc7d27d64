//! Per-scorer results for one case.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
  Error, Result, model::ModelVersion, severity::SeverityClass,
  symptom::SymptomCode,
};

/// The model family a scorer belongs to. Also the lineage key for promotion.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScorerFamily {
  /// Trained on high-volume historical data.
  Common,
  /// Few-shot / rule-weighted model for rare and critical conditions.
  RareCritical,
  /// Meta-scorer combining other scorers.
  Ensemble,
}

impl ScorerFamily {
  pub const ALL: [ScorerFamily; 3] = [Self::Common, Self::RareCritical, Self::Ensemble];

  /// Tie-break preference at equal severity; higher is more cautious.
  pub fn caution_rank(self) -> u8 {
    match self {
      Self::Common => 0,
      Self::Ensemble => 1,
      Self::RareCritical => 2,
    }
  }
}

/// One scorer's opinion about one case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
  pub family:           ScorerFamily,
  pub model_version:    ModelVersion,
  /// Most likely condition, if the scorer names one.
  pub condition:        Option<String>,
  pub severity:         SeverityClass,
  /// In `[0, 1]`; reported honestly by the scorer and never renormalised.
  pub confidence:       f64,
  /// Symptoms that drove this result, most relevant first.
  pub contributing:     Vec<SymptomCode>,
  /// Score of every condition the scorer considered, winner included.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub condition_scores: BTreeMap<String, f64>,
}

impl ScoreResult {
  /// Build a result, rejecting confidences outside `[0, 1]`.
  pub fn new(
    family: ScorerFamily,
    model_version: ModelVersion,
    condition: Option<String>,
    severity: SeverityClass,
    confidence: f64,
    contributing: Vec<SymptomCode>,
  ) -> Result<Self> {
    let result = Self {
      family,
      model_version,
      condition,
      severity,
      confidence,
      contributing,
      condition_scores: BTreeMap::new(),
    };
    result.validate()?;
    Ok(result)
  }

  pub fn with_condition_scores(mut self, scores: BTreeMap<String, f64>) -> Self {
    self.condition_scores = scores;
    self
  }

  pub fn validate(&self) -> Result<()> {
    if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
      return Err(Error::InvalidScore {
        family: self.family,
        reason: format!("confidence {} outside [0, 1]", self.confidence),
      });
    }
    Ok(())
  }
}

/// Records that a scorer could not contribute to a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnavailableScorer {
  pub family: ScorerFamily,
  pub reason: String,
}

/// What the aggregator receives from each scorer: a score, or a recorded
/// failure to produce one. "Scored low" and "could not score" stay distinct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScorerOutcome {
  Scored(ScoreResult),
  Unavailable(UnavailableScorer),
}

impl ScorerOutcome {
  pub fn family(&self) -> ScorerFamily {
    match self {
      Self::Scored(r) => r.family,
      Self::Unavailable(u) => u.family,
    }
  }

  pub fn unavailable(family: ScorerFamily, reason: impl Into<String>) -> Self {
    Self::Unavailable(UnavailableScorer { family, reason: reason.into() })
  }

  /// Fold a scorer's return value into an outcome attributed to `family`.
  /// Any error, including an out-of-range score, counts as unavailable.
  pub fn from_result(family: ScorerFamily, result: Result<ScoreResult>) -> Self {
    match result.and_then(|r| r.validate().map(|()| r)) {
      Ok(r) => Self::Scored(r),
      Err(Error::ScorerUnavailable { reason, .. }) => Self::unavailable(family, reason),
      Err(e) => Self::unavailable(family, e.to_string()),
    }
  }
}
