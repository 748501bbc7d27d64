//! Reading cases and logs from disk.
//!
//! A case file is a JSON object keyed by symptom code. Each value is either
//! a bare intensity (`{"fever": 7}`), a presence flag (`{"cough": true}`),
//! or a detailed object:
//!
//! ```json
//! { "chest_pain": { "intensity": 9, "onset": "sudden", "trend": "worsening" } }
//! ```

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context as _, Result};
use serde::{Deserialize, de::DeserializeOwned};
use triage_core::symptom::{
  Onset, SymptomValue, SymptomVector, SymptomVectorBuilder, Trend, Vocabulary,
};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CaseValue {
  Intensity(f64),
  Present(bool),
  Detailed(DetailedValue),
}

#[derive(Debug, Deserialize)]
struct DetailedValue {
  present:   Option<bool>,
  intensity: Option<f64>,
  #[serde(default)]
  onset:     Onset,
  #[serde(default)]
  trend:     Trend,
}

impl From<CaseValue> for SymptomValue {
  fn from(value: CaseValue) -> Self {
    match value {
      CaseValue::Intensity(i) => SymptomValue::with_intensity(i),
      CaseValue::Present(true) => SymptomValue::present(),
      CaseValue::Present(false) => SymptomValue::with_intensity(0.0),
      CaseValue::Detailed(d) => SymptomValue {
        present:   d.present.unwrap_or_else(|| d.intensity.is_none_or(|i| i > 0.0)),
        intensity: d.intensity,
        onset:     d.onset,
        trend:     d.trend,
      },
    }
  }
}

/// Parse a case document into a validated vector.
pub fn parse_case(text: &str, vocabulary: &Vocabulary, min_symptoms: usize) -> Result<SymptomVector> {
  let raw: BTreeMap<String, CaseValue> =
    serde_json::from_str(text).context("case must be a JSON object keyed by symptom code")?;
  let builder = raw.into_iter().fold(
    SymptomVectorBuilder::new(vocabulary).min_symptoms(min_symptoms),
    |b, (code, value)| b.symptom(&code, value.into()),
  );
  Ok(builder.build()?)
}

pub fn read_case(path: &Path, vocabulary: &Vocabulary, min_symptoms: usize) -> Result<SymptomVector> {
  let text =
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
  parse_case(&text, vocabulary, min_symptoms).with_context(|| format!("invalid case {}", path.display()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
  let text =
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
  serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

/// One JSON document per line; blank lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
  let text =
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
  text
    .lines()
    .enumerate()
    .filter(|(_, line)| !line.trim().is_empty())
    .map(|(n, line)| {
      serde_json::from_str(line)
        .with_context(|| format!("{}:{}: invalid record", path.display(), n + 1))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn intensity_map_format() {
    let v = parse_case(r#"{"fever": 7, "cough": 0, "headache": true}"#, &Vocabulary::standard(), 1)
      .unwrap();
    assert_eq!(v.len(), 3);
    assert!(v.is_present("fever"));
    assert!(!v.is_present("cough"));
    assert!(v.is_present("headache"));
    assert_eq!(v.get("headache").unwrap().intensity, None);
  }

  #[test]
  fn detailed_format() {
    let v = parse_case(
      r#"{"chest_pain": {"intensity": 9, "onset": "sudden", "trend": "worsening"},
          "dyspnea": {"present": true}}"#,
      &Vocabulary::standard(),
      1,
    )
    .unwrap();
    let chest = v.get("chest_pain").unwrap();
    assert!(chest.present);
    assert_eq!(chest.onset, Onset::Sudden);
    assert_eq!(chest.trend, Trend::Worsening);
    assert!(v.is_present("dyspnea"));
  }

  #[test]
  fn unknown_code_and_too_few_symptoms_fail() {
    let vocab = Vocabulary::standard();
    assert!(parse_case(r#"{"hiccups": 3}"#, &vocab, 1).is_err());
    assert!(parse_case(r#"{"fever": 3, "cough": 2}"#, &vocab, 3).is_err());
    assert!(parse_case("[1, 2]", &vocab, 1).is_err());
  }

  #[test]
  fn absent_symptoms_count_towards_minimum() {
    let vocab = Vocabulary::standard();
    let v = parse_case(r#"{"fever": 6, "cough": 0, "nausea": false}"#, &vocab, 3).unwrap();
    assert_eq!(v.len(), 3);
    assert!(!v.is_present("nausea"));
  }
}
