//! The risk aggregator: worst-case-wins over every scorer's outcome.
//!
//! The aggregator never averages. It picks the most clinically urgent
//! severity among results that clear the confidence floor; ties go to the
//! more cautious family (rare/critical first). Any ambiguity resolves towards
//! the higher severity.

use std::{cmp::Ordering, collections::BTreeMap};

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  score::{ScoreResult, ScorerFamily, ScorerOutcome, UnavailableScorer},
  symptom::{SymptomCode, SymptomVector},
  verdict::Verdict,
};

/// Aggregator settings (`[aggregator]` in `config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
  /// A result must exceed this confidence to be considered, unless no
  /// result does.
  pub min_confidence: f64,
}

impl Default for AggregatorConfig {
  fn default() -> Self { Self { min_confidence: 0.5 } }
}

#[derive(Debug, Clone)]
pub struct RiskAggregator {
  config:   AggregatorConfig,
  /// Families that must report for every case.
  required: Vec<ScorerFamily>,
}

impl RiskAggregator {
  pub fn new(config: AggregatorConfig, required: Vec<ScorerFamily>) -> Self {
    Self { config, required }
  }

  pub fn config(&self) -> &AggregatorConfig { &self.config }

  pub fn required(&self) -> &[ScorerFamily] { &self.required }

  /// Reconcile every scorer outcome for one case into a single verdict.
  pub fn aggregate(
    &self,
    vector: &SymptomVector,
    outcomes: &[ScorerOutcome],
  ) -> Result<Verdict> {
    vector.ensure_valid()?;
    if outcomes.is_empty() {
      return Err(Error::EmptyInput);
    }

    let mut scored: Vec<&ScoreResult> = Vec::new();
    let mut unavailable: Vec<UnavailableScorer> = Vec::new();
    for outcome in outcomes {
      match outcome {
        ScorerOutcome::Scored(r) => scored.push(r),
        ScorerOutcome::Unavailable(u) => unavailable.push(u.clone()),
      }
    }
    for family in &self.required {
      if !outcomes.iter().any(|o| o.family() == *family) {
        unavailable.push(UnavailableScorer {
          family: *family,
          reason: "no result".into(),
        });
      }
    }

    if scored.is_empty() {
      return Err(Error::AllScorersUnavailable(unavailable));
    }

    let floor = self.config.min_confidence;
    let mut considered: Vec<&ScoreResult> =
      scored.iter().copied().filter(|r| r.confidence > floor).collect();
    let below_confidence_floor = considered.is_empty();
    if below_confidence_floor {
      considered = scored.clone();
    }

    // `considered` is non-empty here; the first result wins exact ties.
    let mut winner = considered[0];
    for candidate in &considered[1..] {
      if outranks(candidate, winner) {
        winner = candidate;
      }
    }

    let mut evidence: Vec<SymptomCode> = Vec::new();
    for r in considered
      .iter()
      .filter(|r| r.severity.urgency() >= winner.severity.urgency())
    {
      for code in &r.contributing {
        if !evidence.contains(code) {
          evidence.push(code.clone());
        }
      }
    }

    let model_versions: BTreeMap<_, _> = scored
      .iter()
      .map(|r| (r.family, r.model_version.clone()))
      .collect();

    let explanation = explain(winner, &evidence, &unavailable, below_confidence_floor);

    Ok(Verdict {
      severity: winner.severity,
      condition: winner.condition.clone(),
      decided_by: winner.family,
      contributing: considered.into_iter().cloned().collect(),
      evidence,
      explanation,
      model_versions,
      unavailable,
      below_confidence_floor,
      recommendations: winner
        .severity
        .recommendations()
        .iter()
        .map(|s| (*s).to_owned())
        .collect(),
    })
  }
}

/// Strictly better winner: more urgent, then more cautious family, then more
/// confident.
fn outranks(a: &ScoreResult, b: &ScoreResult) -> bool {
  let ord = a
    .severity
    .escalation_cmp(b.severity)
    .then(a.family.caution_rank().cmp(&b.family.caution_rank()))
    .then(a.confidence.total_cmp(&b.confidence));
  ord == Ordering::Greater
}

fn explain(
  winner: &ScoreResult,
  evidence: &[SymptomCode],
  unavailable: &[UnavailableScorer],
  below_floor: bool,
) -> String {
  let mut text = format!(
    "{} ({}) from {} at confidence {:.2}",
    winner.severity,
    winner.condition.as_deref().unwrap_or("no specific condition"),
    winner.family,
    winner.confidence,
  );
  if !evidence.is_empty() {
    let codes: Vec<&str> = evidence.iter().map(SymptomCode::as_str).collect();
    text.push_str(&format!("; evidence: {}", codes.join(", ")));
  }
  if !unavailable.is_empty() {
    let names: Vec<String> = unavailable
      .iter()
      .map(|u| format!("{} ({})", u.family, u.reason))
      .collect();
    text.push_str(&format!("; unavailable: {}", names.join(", ")));
  }
  if below_floor {
    text.push_str("; no result cleared the confidence floor");
  }
  text
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;
  use crate::{
    model::ModelVersion,
    severity::SeverityClass,
    symptom::{Onset, SymptomValue, SymptomVectorBuilder, Vocabulary},
  };

  fn vector() -> SymptomVector {
    let vocab = Vocabulary::standard();
    SymptomVectorBuilder::new(&vocab)
      .symptom("chest_pain", SymptomValue::with_intensity(9.0).onset(Onset::Sudden))
      .symptom("dyspnea", SymptomValue::present())
      .build()
      .unwrap()
  }

  fn result(
    family: ScorerFamily,
    condition: Option<&str>,
    severity: SeverityClass,
    confidence: f64,
    contributing: &[&str],
  ) -> ScoreResult {
    let vocab = Vocabulary::standard();
    ScoreResult::new(
      family,
      ModelVersion::new(format!("{family}-1")),
      condition.map(str::to_owned),
      severity,
      confidence,
      contributing.iter().map(|c| vocab.code(c).unwrap()).collect(),
    )
    .unwrap()
  }

  fn aggregator() -> RiskAggregator {
    RiskAggregator::new(
      AggregatorConfig { min_confidence: 0.5 },
      vec![ScorerFamily::Common, ScorerFamily::RareCritical],
    )
  }

  #[test]
  fn acute_rare_finding_wins_over_mild_common() {
    let outcomes = vec![
      ScorerOutcome::Scored(result(
        ScorerFamily::Common,
        Some("bronchitis"),
        SeverityClass::Mild,
        0.6,
        &["dyspnea"],
      )),
      ScorerOutcome::Scored(result(
        ScorerFamily::RareCritical,
        Some("acute coronary syndrome"),
        SeverityClass::Acute,
        0.8,
        &["chest_pain", "dyspnea"],
      )),
    ];
    let verdict = aggregator().aggregate(&vector(), &outcomes).unwrap();
    assert_eq!(verdict.severity, SeverityClass::Acute);
    assert_eq!(verdict.condition.as_deref(), Some("acute coronary syndrome"));
    assert_eq!(verdict.decided_by, ScorerFamily::RareCritical);
    assert_eq!(verdict.contributing.len(), 2);
    assert!(verdict.unavailable.is_empty());
    let evidence: Vec<&str> = verdict.evidence.iter().map(|c| c.as_str()).collect();
    assert_eq!(evidence, ["chest_pain", "dyspnea"]);
  }

  #[test]
  fn acute_beats_chronic() {
    let outcomes = vec![
      ScorerOutcome::Scored(result(
        ScorerFamily::RareCritical,
        Some("malignancy"),
        SeverityClass::Chronic,
        0.9,
        &[],
      )),
      ScorerOutcome::Scored(result(
        ScorerFamily::Common,
        Some("hypertension"),
        SeverityClass::Acute,
        0.6,
        &[],
      )),
    ];
    let verdict = aggregator().aggregate(&vector(), &outcomes).unwrap();
    assert_eq!(verdict.severity, SeverityClass::Acute);
    assert_eq!(verdict.condition.as_deref(), Some("hypertension"));
  }

  #[test]
  fn chronic_tie_prefers_rare_critical_label() {
    let outcomes = vec![
      ScorerOutcome::Scored(result(
        ScorerFamily::Common,
        Some("arthritis"),
        SeverityClass::Chronic,
        0.95,
        &["joint_pain"],
      )),
      ScorerOutcome::Scored(result(
        ScorerFamily::RareCritical,
        Some("systemic autoimmune disease"),
        SeverityClass::Chronic,
        0.7,
        &["skin_rash", "joint_pain"],
      )),
    ];
    let verdict = aggregator().aggregate(&vector(), &outcomes).unwrap();
    assert_eq!(verdict.severity, SeverityClass::Chronic);
    assert_eq!(verdict.condition.as_deref(), Some("systemic autoimmune disease"));
    let evidence: Vec<&str> = verdict.evidence.iter().map(|c| c.as_str()).collect();
    assert_eq!(evidence, ["joint_pain", "skin_rash"]);
  }

  #[test]
  fn unavailable_rare_scorer_is_flagged() {
    let outcomes = vec![
      ScorerOutcome::Scored(result(
        ScorerFamily::Common,
        Some("migraine"),
        SeverityClass::Mild,
        0.7,
        &["headache"],
      )),
      ScorerOutcome::unavailable(ScorerFamily::RareCritical, "timed out"),
    ];
    let verdict = aggregator().aggregate(&vector(), &outcomes).unwrap();
    assert_eq!(verdict.severity, SeverityClass::Mild);
    assert!(verdict.was_unavailable(ScorerFamily::RareCritical));
    assert!(verdict.explanation.contains("rare_critical (timed out)"));
  }

  #[test]
  fn missing_required_family_is_recorded() {
    let outcomes = vec![ScorerOutcome::Scored(result(
      ScorerFamily::Common,
      None,
      SeverityClass::None,
      0.9,
      &[],
    ))];
    let verdict = aggregator().aggregate(&vector(), &outcomes).unwrap();
    assert_eq!(verdict.unavailable.len(), 1);
    assert_eq!(verdict.unavailable[0].family, ScorerFamily::RareCritical);
    assert_eq!(verdict.unavailable[0].reason, "no result");
  }

  #[test]
  fn low_confidence_results_are_ignored_when_others_clear_floor() {
    let outcomes = vec![
      ScorerOutcome::Scored(result(
        ScorerFamily::Common,
        Some("cold"),
        SeverityClass::Mild,
        0.9,
        &[],
      )),
      ScorerOutcome::Scored(result(
        ScorerFamily::RareCritical,
        Some("sepsis"),
        SeverityClass::Acute,
        0.2,
        &[],
      )),
    ];
    let verdict = aggregator().aggregate(&vector(), &outcomes).unwrap();
    assert_eq!(verdict.severity, SeverityClass::Mild);
    assert!(!verdict.below_confidence_floor);
  }

  #[test]
  fn confidence_at_the_floor_does_not_clear_it() {
    let outcomes = vec![
      ScorerOutcome::Scored(result(
        ScorerFamily::Common,
        Some("cold"),
        SeverityClass::Mild,
        0.51,
        &[],
      )),
      ScorerOutcome::Scored(result(
        ScorerFamily::RareCritical,
        Some("sepsis"),
        SeverityClass::Acute,
        0.5,
        &[],
      )),
    ];
    let verdict = aggregator().aggregate(&vector(), &outcomes).unwrap();
    assert_eq!(verdict.severity, SeverityClass::Mild);
    assert!(!verdict.below_confidence_floor);

    let alone = &outcomes[1..];
    let verdict = aggregator().aggregate(&vector(), alone).unwrap();
    assert_eq!(verdict.severity, SeverityClass::Acute);
    assert!(verdict.below_confidence_floor);
  }

  #[test]
  fn nothing_clears_floor_escalates_over_all_results() {
    let outcomes = vec![
      ScorerOutcome::Scored(result(
        ScorerFamily::Common,
        Some("cold"),
        SeverityClass::Mild,
        0.3,
        &[],
      )),
      ScorerOutcome::Scored(result(
        ScorerFamily::RareCritical,
        Some("sepsis"),
        SeverityClass::Acute,
        0.2,
        &[],
      )),
    ];
    let verdict = aggregator().aggregate(&vector(), &outcomes).unwrap();
    assert_eq!(verdict.severity, SeverityClass::Acute);
    assert!(verdict.below_confidence_floor);
  }

  #[test]
  fn empty_input_fails() {
    let err = aggregator().aggregate(&vector(), &[]).unwrap_err();
    assert!(matches!(err, Error::EmptyInput));
  }

  #[test]
  fn invalid_sentinel_fails() {
    let outcomes = vec![ScorerOutcome::Scored(result(
      ScorerFamily::Common,
      None,
      SeverityClass::None,
      0.9,
      &[],
    ))];
    let err = aggregator()
      .aggregate(&SymptomVector::invalid("upstream rejected"), &outcomes)
      .unwrap_err();
    assert!(matches!(err, Error::InvalidVector(_)));
  }

  #[test]
  fn all_unavailable_is_an_explicit_rejection() {
    let outcomes = vec![
      ScorerOutcome::unavailable(ScorerFamily::Common, "no features"),
      ScorerOutcome::unavailable(ScorerFamily::RareCritical, "timed out"),
    ];
    let err = aggregator().aggregate(&vector(), &outcomes).unwrap_err();
    assert!(matches!(err, Error::AllScorersUnavailable(ref u) if u.len() == 2));
  }

  fn severity_strategy() -> impl Strategy<Value = SeverityClass> {
    prop_oneof![
      Just(SeverityClass::None),
      Just(SeverityClass::Mild),
      Just(SeverityClass::Acute),
      Just(SeverityClass::Chronic),
    ]
  }

  fn family_strategy() -> impl Strategy<Value = ScorerFamily> {
    prop_oneof![
      Just(ScorerFamily::Common),
      Just(ScorerFamily::RareCritical),
      Just(ScorerFamily::Ensemble),
    ]
  }

  fn outcome_strategy() -> impl Strategy<Value = ScorerOutcome> {
    (family_strategy(), severity_strategy(), 0.0f64..=1.0).prop_map(
      |(family, severity, confidence)| {
        ScorerOutcome::Scored(result(family, None, severity, confidence, &[]))
      },
    )
  }

  proptest! {
    #[test]
    fn adding_acute_never_lowers_severity(
      outcomes in prop::collection::vec(outcome_strategy(), 1..6),
      family in family_strategy(),
      confidence in 0.0f64..=1.0,
    ) {
      let agg = aggregator();
      let before = agg.aggregate(&vector(), &outcomes).unwrap();

      let mut extended = outcomes.clone();
      extended.push(ScorerOutcome::Scored(
        result(family, None, SeverityClass::Acute, confidence, &[]),
      ));
      let after = agg.aggregate(&vector(), &extended).unwrap();

      prop_assert!(after.severity.urgency() >= before.severity.urgency());
    }

    #[test]
    fn aggregation_is_deterministic(
      outcomes in prop::collection::vec(outcome_strategy(), 1..6),
    ) {
      let agg = aggregator();
      let a = agg.aggregate(&vector(), &outcomes).unwrap();
      let b = agg.aggregate(&vector(), &outcomes).unwrap();
      prop_assert_eq!(a, b);
    }
  }
}
