//! Ensemble meta-scorer: a confidence-weighted vote over member scorers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use triage_core::{
  Error as CoreError,
  model::ModelVersion,
  score::{ScoreResult, ScorerFamily},
  scorer::{Capabilities, Scorer},
  severity::SeverityClass,
  symptom::{SymptomCode, SymptomVector},
};

/// Parameters of the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleParams {
  /// Member families, resolved against the registry at build time.
  pub members: Vec<ScorerFamily>,
}

impl Default for EnsembleParams {
  fn default() -> Self {
    Self { members: vec![ScorerFamily::Common, ScorerFamily::RareCritical] }
  }
}

pub struct EnsembleScorer {
  version: ModelVersion,
  members: Vec<Arc<dyn Scorer>>,
}

impl EnsembleScorer {
  pub fn new(version: ModelVersion, members: Vec<Arc<dyn Scorer>>) -> Self {
    Self { version, members }
  }

  pub fn members(&self) -> impl Iterator<Item = &Arc<dyn Scorer>> { self.members.iter() }
}

impl std::fmt::Debug for EnsembleScorer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EnsembleScorer")
      .field("version", &self.version)
      .field(
        "members",
        &self.members.iter().map(|m| m.model_version().clone()).collect::<Vec<_>>(),
      )
      .finish()
  }
}

impl Scorer for EnsembleScorer {
  fn family(&self) -> ScorerFamily { ScorerFamily::Ensemble }

  fn model_version(&self) -> &ModelVersion { &self.version }

  fn capabilities(&self) -> Capabilities {
    Capabilities {
      predict_severity:  true,
      predict_condition: self.members.iter().any(|m| m.capabilities().predict_condition),
      explain:           self.members.iter().any(|m| m.capabilities().explain),
    }
  }

  fn score(&self, vector: &SymptomVector) -> triage_core::Result<ScoreResult> {
    vector.ensure_valid()?;

    let mut results = Vec::with_capacity(self.members.len());
    let mut failures = Vec::new();
    for member in &self.members {
      match member.score(vector) {
        Ok(r) => results.push(r),
        Err(e) => {
          debug!(member = %member.model_version(), error = %e, "ensemble member unavailable");
          failures.push(format!("{}: {e}", member.model_version()));
        }
      }
    }
    if results.is_empty() {
      return Err(CoreError::ScorerUnavailable {
        family: ScorerFamily::Ensemble,
        reason: format!("every member scorer was unavailable ({})", failures.join("; ")),
      });
    }

    let mut votes = [0.0f64; 4];
    for r in &results {
      votes[r.severity.index()] += r.confidence;
    }
    let total: f64 = votes.iter().sum();

    // Highest vote; an exact tie goes to the more urgent class.
    let severity = SeverityClass::ALL
      .into_iter()
      .max_by(|a, b| {
        votes[a.index()]
          .total_cmp(&votes[b.index()])
          .then(a.escalation_cmp(*b))
      })
      .unwrap_or(SeverityClass::None);

    let confidence = if total > 0.0 { votes[severity.index()] / total } else { 0.0 };

    let agreeing: Vec<&ScoreResult> =
      results.iter().filter(|r| r.severity == severity).collect();
    let condition = agreeing
      .iter()
      .filter(|r| r.condition.is_some())
      .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
      .and_then(|r| r.condition.clone());

    let mut contributing: Vec<SymptomCode> = Vec::new();
    for code in agreeing.iter().flat_map(|r| &r.contributing) {
      if !contributing.contains(code) {
        contributing.push(code.clone());
      }
    }

    ScoreResult::new(
      ScorerFamily::Ensemble,
      self.version.clone(),
      condition,
      severity,
      confidence,
      contributing,
    )
  }
}

#[cfg(test)]
mod tests {
  use triage_core::symptom::{Onset, SymptomValue, SymptomVectorBuilder, Vocabulary};

  use super::*;
  use crate::{
    common::{CommonDiseaseScorer, CommonModelParams},
    rare::{RareCriticalScorer, RareModelParams},
  };

  struct Down;

  impl Scorer for Down {
    fn family(&self) -> ScorerFamily { ScorerFamily::Common }

    fn model_version(&self) -> &ModelVersion {
      static VERSION: std::sync::OnceLock<ModelVersion> = std::sync::OnceLock::new();
      VERSION.get_or_init(|| "down".into())
    }

    fn score(&self, _: &SymptomVector) -> triage_core::Result<ScoreResult> {
      Err(CoreError::ScorerUnavailable { family: ScorerFamily::Common, reason: "down".into() })
    }
  }

  fn members() -> Vec<Arc<dyn Scorer>> {
    vec![
      Arc::new(CommonDiseaseScorer::new("common-1".into(), CommonModelParams::default()).unwrap()),
      Arc::new(RareCriticalScorer::new("rare-1".into(), RareModelParams::default()).unwrap()),
    ]
  }

  #[test]
  fn vote_follows_confidence_mass() {
    let vocab = Vocabulary::standard();
    let v = SymptomVectorBuilder::new(&vocab)
      .symptom("chest_pain", SymptomValue::with_intensity(9.0).onset(Onset::Sudden))
      .symptom("dyspnea", SymptomValue::present())
      .build()
      .unwrap();
    let r = EnsembleScorer::new("ens-1".into(), members()).score(&v).unwrap();
    assert_eq!(r.family, ScorerFamily::Ensemble);
    assert_eq!(r.severity, SeverityClass::Acute);
    assert_eq!(r.condition.as_deref(), Some("acute coronary syndrome"));
    assert!(r.confidence > 0.5 && r.confidence < 1.0);
  }

  #[test]
  fn unavailable_members_are_skipped() {
    let vocab = Vocabulary::standard();
    let v = SymptomVectorBuilder::new(&vocab)
      .symptom("cough", SymptomValue::with_intensity(3.0))
      .build()
      .unwrap();
    let mut with_down = members();
    with_down.push(Arc::new(Down));
    let r = EnsembleScorer::new("ens-1".into(), with_down).score(&v).unwrap();
    assert_eq!(r.severity, SeverityClass::None);

    let err = EnsembleScorer::new("ens-2".into(), vec![Arc::new(Down)])
      .score(&v)
      .unwrap_err();
    let CoreError::ScorerUnavailable { family, reason } = &err else {
      panic!("expected ScorerUnavailable, got {err:?}");
    };
    assert_eq!(*family, ScorerFamily::Ensemble);
    assert!(reason.contains("down: "), "member failure missing from {reason:?}");
  }
}
