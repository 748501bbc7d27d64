//! Rare/critical-disease scorer: symptom-combination rules.
//!
//! Each rule has an `all` list that must hold in full and an `any` list of
//! which at least `min_any` must hold. Rules are evaluated three-valued: a
//! criterion that needs an intensity from a present symptom reported without
//! one cannot be decided, and the scorer refuses to guess when such a rule
//! could outrank what did match.

use serde::{Deserialize, Serialize};
use triage_core::{
  Error as CoreError,
  model::ModelVersion,
  score::{ScoreResult, ScorerFamily},
  scorer::Scorer,
  severity::SeverityClass,
  symptom::{Onset, SymptomCode, SymptomVector, Trend},
};

use crate::{Error, Result};

/// Confidence added when a matched symptom is getting worse.
const WORSENING_BONUS: f64 = 0.1;

/// One condition on one symptom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
  pub symptom:       String,
  /// Required intensity; `None` means presence is enough.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub min_intensity: Option<f64>,
  /// Requires sudden onset.
  #[serde(default)]
  pub sudden:        bool,
}

impl Criterion {
  pub fn present(symptom: &str) -> Self {
    Self { symptom: symptom.to_owned(), min_intensity: None, sudden: false }
  }

  pub fn at_least(symptom: &str, intensity: f64) -> Self {
    Self { symptom: symptom.to_owned(), min_intensity: Some(intensity), sudden: false }
  }

  pub fn sudden(symptom: &str) -> Self {
    Self { symptom: symptom.to_owned(), min_intensity: None, sudden: true }
  }

  /// `None` when the criterion cannot be decided from the vector.
  fn holds(&self, vector: &SymptomVector) -> Option<bool> {
    let Some(value) = vector.get(&self.symptom).filter(|v| v.present) else {
      return Some(false);
    };
    if self.sudden && value.onset != Onset::Sudden {
      return Some(false);
    }
    match (self.min_intensity, value.intensity) {
      (None, _) => Some(true),
      (Some(min), Some(i)) => Some(i >= min),
      (Some(_), None) => None,
    }
  }
}

/// A symptom-combination rule for one critical condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalRule {
  pub condition:  String,
  pub severity:   SeverityClass,
  pub confidence: f64,
  #[serde(default)]
  pub all:        Vec<Criterion>,
  #[serde(default)]
  pub any:        Vec<Criterion>,
  #[serde(default)]
  pub min_any:    usize,
}

enum RuleMatch {
  Matched(Vec<String>),
  NotMatched,
  Undecidable,
}

impl CriticalRule {
  fn evaluate(&self, vector: &SymptomVector) -> RuleMatch {
    let mut matched = Vec::new();
    let mut undecided = false;

    for c in &self.all {
      match c.holds(vector) {
        Some(false) => return RuleMatch::NotMatched,
        Some(true) => matched.push(c.symptom.clone()),
        None => undecided = true,
      }
    }

    let mut hits = 0;
    let mut unknown = 0;
    for c in &self.any {
      match c.holds(vector) {
        Some(true) => {
          hits += 1;
          if !matched.contains(&c.symptom) {
            matched.push(c.symptom.clone());
          }
        }
        Some(false) => {}
        None => unknown += 1,
      }
    }
    if hits + unknown < self.min_any {
      return RuleMatch::NotMatched;
    }
    if undecided || hits < self.min_any {
      return RuleMatch::Undecidable;
    }
    RuleMatch::Matched(matched)
  }
}

/// Parameters of the rare/critical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RareModelParams {
  pub rules:               Vec<CriticalRule>,
  /// Confidence of the NONE result when no rule matches.
  pub no_match_confidence: f64,
}

impl Default for RareModelParams {
  fn default() -> Self {
    use Criterion as C;
    let rule = |condition: &str,
                severity,
                confidence,
                all: Vec<Criterion>,
                any: Vec<Criterion>,
                min_any| CriticalRule {
      condition: condition.to_owned(),
      severity,
      confidence,
      all,
      any,
      min_any,
    };
    Self {
      rules: vec![
        rule(
          "acute coronary syndrome",
          SeverityClass::Acute,
          0.8,
          vec![C::at_least("chest_pain", 7.0)],
          vec![C::present("dyspnea"), C::sudden("chest_pain")],
          1,
        ),
        rule(
          "neurological emergency",
          SeverityClass::Acute,
          0.85,
          vec![],
          vec![
            C::present("seizures"),
            C::at_least("confusion", 5.0),
            C::sudden("vision_changes"),
            C::at_least("dizziness", 7.0),
          ],
          2,
        ),
        rule(
          "sepsis",
          SeverityClass::Acute,
          0.75,
          vec![C::at_least("fever", 8.0)],
          vec![
            C::present("confusion"),
            C::present("dyspnea"),
            C::at_least("dizziness", 6.0),
          ],
          1,
        ),
        rule(
          "haemorrhage",
          SeverityClass::Acute,
          0.7,
          vec![C::at_least("bleeding", 6.0)],
          vec![],
          0,
        ),
        rule(
          "malignancy",
          SeverityClass::Chronic,
          0.7,
          vec![C::at_least("weight_loss", 5.0)],
          vec![
            C::present("bleeding"),
            C::at_least("fatigue", 6.0),
            C::at_least("abdominal_pain", 5.0),
          ],
          2,
        ),
        rule(
          "systemic autoimmune disease",
          SeverityClass::Chronic,
          0.65,
          vec![C::present("joint_pain"), C::present("skin_rash")],
          vec![C::present("fever"), C::present("fatigue")],
          1,
        ),
      ],
      no_match_confidence: 0.6,
    }
  }
}

impl RareModelParams {
  pub fn validate(&self) -> Result<()> {
    let ok = |x: f64| x.is_finite() && (0.0..=1.0).contains(&x);
    if !ok(self.no_match_confidence) {
      return Err(Error::Invalid("no_match_confidence outside [0, 1]".into()));
    }
    for r in &self.rules {
      if !ok(r.confidence) {
        return Err(Error::Invalid(format!("rule {:?}: confidence outside [0, 1]", r.condition)));
      }
      if r.all.is_empty() && r.min_any == 0 {
        return Err(Error::Invalid(format!("rule {:?} matches every case", r.condition)));
      }
      if r.min_any > r.any.len() {
        return Err(Error::Invalid(format!("rule {:?} can never match", r.condition)));
      }
    }
    Ok(())
  }
}

/// Scorer for rare and critical conditions.
#[derive(Debug, Clone)]
pub struct RareCriticalScorer {
  version: ModelVersion,
  params:  RareModelParams,
}

impl RareCriticalScorer {
  pub fn new(version: ModelVersion, params: RareModelParams) -> Result<Self> {
    params.validate()?;
    Ok(Self { version, params })
  }

  pub fn params(&self) -> &RareModelParams { &self.params }
}

impl Scorer for RareCriticalScorer {
  fn family(&self) -> ScorerFamily { ScorerFamily::RareCritical }

  fn model_version(&self) -> &ModelVersion { &self.version }

  fn score(&self, vector: &SymptomVector) -> triage_core::Result<ScoreResult> {
    vector.ensure_valid()?;

    let mut best: Option<(&CriticalRule, f64, Vec<String>)> = None;
    let mut undecidable: Vec<&CriticalRule> = Vec::new();

    for rule in &self.params.rules {
      match rule.evaluate(vector) {
        RuleMatch::Matched(symptoms) => {
          let worsening = symptoms
            .iter()
            .any(|s| vector.get(s).is_some_and(|v| v.trend == Trend::Worsening));
          let confidence = if worsening {
            (rule.confidence + WORSENING_BONUS).min(1.0)
          } else {
            rule.confidence
          };
          let better = best.as_ref().is_none_or(|(b, c, _)| {
            rule
              .severity
              .escalation_cmp(b.severity)
              .then(confidence.total_cmp(c))
              .is_gt()
          });
          if better {
            best = Some((rule, confidence, symptoms));
          }
        }
        RuleMatch::Undecidable => undecidable.push(rule),
        RuleMatch::NotMatched => {}
      }
    }

    let floor = best
      .as_ref()
      .map_or(SeverityClass::None, |(r, _, _)| r.severity);
    if let Some(rule) = undecidable
      .iter()
      .find(|r| r.severity.escalation_cmp(floor).is_gt())
    {
      return Err(CoreError::ScorerUnavailable {
        family: ScorerFamily::RareCritical,
        reason: format!("rule {:?} needs an intensity that was not reported", rule.condition),
      });
    }

    let resolve = |names: Vec<String>| -> Vec<SymptomCode> {
      names
        .iter()
        .filter_map(|n| vector.iter().find(|(c, _)| c.as_str() == n.as_str()))
        .map(|(c, _)| c.clone())
        .collect()
    };

    match best {
      Some((rule, confidence, symptoms)) => ScoreResult::new(
        ScorerFamily::RareCritical,
        self.version.clone(),
        Some(rule.condition.clone()),
        rule.severity,
        confidence,
        resolve(symptoms),
      ),
      None => ScoreResult::new(
        ScorerFamily::RareCritical,
        self.version.clone(),
        None,
        SeverityClass::None,
        self.params.no_match_confidence,
        vec![],
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use triage_core::symptom::{SymptomValue, SymptomVectorBuilder, Vocabulary};

  use super::*;

  fn scorer() -> RareCriticalScorer {
    RareCriticalScorer::new("rare-1".into(), RareModelParams::default()).unwrap()
  }

  fn build(entries: Vec<(&str, SymptomValue)>) -> SymptomVector {
    let vocab = Vocabulary::standard();
    entries
      .into_iter()
      .fold(SymptomVectorBuilder::new(&vocab), |b, (c, v)| b.symptom(c, v))
      .build()
      .unwrap()
  }

  #[test]
  fn chest_pain_with_dyspnea_is_acs() {
    let v = build(vec![
      ("chest_pain", SymptomValue::with_intensity(9.0).onset(Onset::Sudden)),
      ("dyspnea", SymptomValue::present()),
    ]);
    let r = scorer().score(&v).unwrap();
    assert_eq!(r.severity, SeverityClass::Acute);
    assert_eq!(r.condition.as_deref(), Some("acute coronary syndrome"));
    assert_eq!(r.confidence, 0.8);
    let codes: Vec<&str> = r.contributing.iter().map(|c| c.as_str()).collect();
    assert_eq!(codes, ["chest_pain", "dyspnea"]);
  }

  #[test]
  fn worsening_raises_confidence() {
    let v = build(vec![
      ("chest_pain", SymptomValue::with_intensity(8.0).trend(Trend::Worsening)),
      ("dyspnea", SymptomValue::with_intensity(4.0)),
    ]);
    let r = scorer().score(&v).unwrap();
    assert!((r.confidence - 0.9).abs() < 1e-9);
  }

  #[test]
  fn acute_rule_outranks_chronic_rule() {
    let v = build(vec![
      ("weight_loss", SymptomValue::with_intensity(7.0)),
      ("bleeding", SymptomValue::with_intensity(8.0)),
      ("fatigue", SymptomValue::with_intensity(7.0)),
    ]);
    let r = scorer().score(&v).unwrap();
    assert_eq!(r.condition.as_deref(), Some("haemorrhage"));
    assert_eq!(r.severity, SeverityClass::Acute);
  }

  #[test]
  fn no_match_is_none() {
    let v = build(vec![("cough", SymptomValue::with_intensity(3.0))]);
    let r = scorer().score(&v).unwrap();
    assert_eq!(r.severity, SeverityClass::None);
    assert_eq!(r.condition, None);
    assert_eq!(r.confidence, 0.6);
  }

  #[test]
  fn missing_intensity_on_urgent_rule_is_unavailable() {
    // Chest pain reported without an intensity: ACS cannot be ruled out.
    let v = build(vec![
      ("chest_pain", SymptomValue::present()),
      ("dyspnea", SymptomValue::present()),
    ]);
    let err = scorer().score(&v).unwrap_err();
    assert!(matches!(err, CoreError::ScorerUnavailable { .. }));
  }

  #[test]
  fn undecidable_rule_below_match_is_ignored() {
    // Haemorrhage matches (ACUTE); malignancy (CHRONIC) is undecidable but
    // could not outrank it.
    let v = build(vec![
      ("bleeding", SymptomValue::with_intensity(9.0)),
      ("fatigue", SymptomValue::with_intensity(7.0)),
      ("weight_loss", SymptomValue::present()),
    ]);
    let r = scorer().score(&v).unwrap();
    assert_eq!(r.condition.as_deref(), Some("haemorrhage"));
  }

  #[test]
  fn params_round_trip_through_json() {
    let json = serde_json::to_string(&RareModelParams::default()).unwrap();
    let parsed: RareModelParams = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, RareModelParams::default());
  }
}
