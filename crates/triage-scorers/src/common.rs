//! Common-disease scorer: weighted symptom score plus disease patterns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use triage_core::{
  Error as CoreError,
  model::ModelVersion,
  score::{ScoreResult, ScorerFamily},
  scorer::Scorer,
  severity::SeverityClass,
  symptom::{SymptomCode, SymptomVector},
};

use crate::{Error, Result};

/// A named set of symptoms characteristic of one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseasePattern {
  pub condition: String,
  pub symptoms:  Vec<String>,
}

/// Parameters of the common-disease model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonModelParams {
  /// Importance of each symptom, in `(0, 1]`.
  pub weights:    BTreeMap<String, f64>,
  pub patterns:   Vec<DiseasePattern>,
  /// Upper bounds of NONE, MILD, and ACUTE on the adjusted score; anything
  /// above the last is CHRONIC.
  pub thresholds: [f64; 3],
  /// Weight used for a pattern symptom missing from `weights`.
  pub default_weight: f64,
}

impl Default for CommonModelParams {
  fn default() -> Self {
    let weights = [
      ("fever", 0.8),
      ("headache", 0.6),
      ("nausea", 0.5),
      ("fatigue", 0.4),
      ("chest_pain", 0.9),
      ("dyspnea", 0.95),
      ("abdominal_pain", 0.7),
      ("dizziness", 0.5),
      ("weight_loss", 0.6),
      ("cough", 0.6),
      ("nasal_congestion", 0.3),
      ("sore_throat", 0.4),
      ("muscle_pain", 0.4),
      ("joint_pain", 0.5),
      ("skin_rash", 0.6),
      ("bleeding", 0.8),
      ("vision_changes", 0.7),
      ("confusion", 0.9),
      ("seizures", 0.95),
      ("back_pain", 0.5),
    ];
    let patterns: [(&str, &[&str]); 10] = [
      ("respiratory infection", &["fever", "cough", "nasal_congestion", "sore_throat"]),
      ("gastroenteritis", &["nausea", "abdominal_pain", "fatigue"]),
      ("migraine", &["headache", "nausea", "dizziness"]),
      ("anxiety", &["chest_pain", "dyspnea", "dizziness", "fatigue"]),
      ("diabetes", &["weight_loss", "fatigue", "vision_changes"]),
      ("hypertension", &["headache", "dizziness", "chest_pain"]),
      ("arthritis", &["joint_pain", "muscle_pain", "fatigue"]),
      ("renal disease", &["fatigue", "nausea", "back_pain"]),
      ("hepatic disease", &["fatigue", "nausea", "abdominal_pain", "skin_rash"]),
      ("autoimmune disease", &["fatigue", "joint_pain", "skin_rash", "fever"]),
    ];
    Self {
      weights: weights.iter().map(|(c, w)| ((*c).to_owned(), *w)).collect(),
      patterns: patterns
        .iter()
        .map(|(condition, symptoms)| DiseasePattern {
          condition: (*condition).to_owned(),
          symptoms:  symptoms.iter().map(|s| (*s).to_owned()).collect(),
        })
        .collect(),
      thresholds: [0.3, 0.6, 0.8],
      default_weight: 0.5,
    }
  }
}

impl CommonModelParams {
  pub fn validate(&self) -> Result<()> {
    if self.weights.is_empty() {
      return Err(Error::Invalid("weight table is empty".into()));
    }
    if let Some((code, w)) = self
      .weights
      .iter()
      .find(|(_, w)| !w.is_finite() || **w <= 0.0 || **w > 1.0)
    {
      return Err(Error::Invalid(format!("weight {w} for {code} outside (0, 1]")));
    }
    if self.patterns.iter().any(|p| p.symptoms.is_empty()) {
      return Err(Error::Invalid("pattern with no symptoms".into()));
    }
    let [a, b, c] = self.thresholds;
    if !(0.0 < a && a < b && b < c && c < 1.0) {
      return Err(Error::Invalid(format!(
        "thresholds {:?} must increase strictly within (0, 1)",
        self.thresholds
      )));
    }
    Ok(())
  }
}

/// Scorer for high-volume conditions.
#[derive(Debug, Clone)]
pub struct CommonDiseaseScorer {
  version: ModelVersion,
  params:  CommonModelParams,
}

impl CommonDiseaseScorer {
  pub fn new(version: ModelVersion, params: CommonModelParams) -> Result<Self> {
    params.validate()?;
    Ok(Self { version, params })
  }

  pub fn params(&self) -> &CommonModelParams { &self.params }

  fn severity_for(&self, adjusted: f64) -> SeverityClass {
    let [none, mild, acute] = self.params.thresholds;
    if adjusted < none {
      SeverityClass::None
    } else if adjusted < mild {
      SeverityClass::Mild
    } else if adjusted < acute {
      SeverityClass::Acute
    } else {
      SeverityClass::Chronic
    }
  }

  /// Confidence grows with the distance from the nearest class boundary.
  fn confidence_for(&self, adjusted: f64) -> f64 {
    let margin = self
      .params
      .thresholds
      .iter()
      .map(|t| (adjusted - t).abs())
      .fold(f64::INFINITY, f64::min);
    (0.5 + 2.5 * margin).min(0.95)
  }
}

fn normalised(intensity: f64) -> f64 { (intensity / 10.0).clamp(0.0, 1.0) }

impl Scorer for CommonDiseaseScorer {
  fn family(&self) -> ScorerFamily { ScorerFamily::Common }

  fn model_version(&self) -> &ModelVersion { &self.version }

  fn score(&self, vector: &SymptomVector) -> triage_core::Result<ScoreResult> {
    vector.ensure_valid()?;

    let mut total = 0.0;
    let mut total_weight = 0.0;
    for (code, value) in vector.iter() {
      if let Some(w) = self.params.weights.get(code.as_str()) {
        total += normalised(value.effective_intensity()) * w;
        total_weight += w;
      }
    }
    if total_weight == 0.0 {
      return Err(CoreError::ScorerUnavailable {
        family: ScorerFamily::Common,
        reason: "no reported symptom is covered by the model".into(),
      });
    }
    let overall = total / total_weight;

    let mut best: Option<(&DiseasePattern, f64)> = None;
    let mut condition_scores = BTreeMap::new();
    for pattern in &self.params.patterns {
      let score: f64 = pattern
        .symptoms
        .iter()
        .filter_map(|s| vector.get(s).filter(|v| v.present).map(|v| (s, v)))
        .map(|(s, v)| {
          let w = self
            .params
            .weights
            .get(s)
            .copied()
            .unwrap_or(self.params.default_weight);
          normalised(v.effective_intensity()) * w
        })
        .sum::<f64>()
        / pattern.symptoms.len() as f64;
      condition_scores.insert(pattern.condition.clone(), score);
      if score > 0.0 && best.is_none_or(|(_, b)| score > b) {
        best = Some((pattern, score));
      }
    }

    let adjusted = (overall + best.map_or(0.0, |(_, s)| s)) / 2.0;
    let severity = self.severity_for(adjusted);

    // The best pattern's present symptoms first, then everything else
    // present, heaviest weight first.
    let mut contributing: Vec<SymptomCode> = Vec::new();
    if let Some((pattern, _)) = best {
      contributing.extend(
        vector
          .present_codes()
          .filter(|c| pattern.symptoms.iter().any(|s| s == c.as_str()))
          .cloned(),
      );
    }
    let mut rest: Vec<(&SymptomCode, f64)> = vector
      .present_codes()
      .filter(|c| !contributing.contains(*c))
      .filter_map(|c| self.params.weights.get(c.as_str()).map(|w| (c, *w)))
      .collect();
    rest.sort_by(|a, b| b.1.total_cmp(&a.1));
    contributing.extend(rest.into_iter().map(|(c, _)| c.clone()));

    ScoreResult::new(
      ScorerFamily::Common,
      self.version.clone(),
      best.map(|(p, _)| p.condition.clone()),
      severity,
      self.confidence_for(adjusted),
      contributing,
    )
    .map(|r| r.with_condition_scores(condition_scores))
  }
}
