//! Symptom vocabulary and the normalised, ready-to-score case vector.
//!
//! A [`SymptomVector`] is immutable once built. The only way to build one is
//! through [`SymptomVectorBuilder`], which rejects (never repairs) unknown
//! codes and out-of-range values.

use std::{
  borrow::Borrow,
  collections::{BTreeMap, BTreeSet},
  fmt,
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Codes ───────────────────────────────────────────────────────────────────

/// A symptom identifier from the vocabulary, e.g. `chest_pain`.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SymptomCode(String);

impl SymptomCode {
  pub fn as_str(&self) -> &str { &self.0 }
}

impl Borrow<str> for SymptomCode {
  fn borrow(&self) -> &str { &self.0 }
}

impl fmt::Display for SymptomCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// The closed set of symptom codes a deployment accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vocabulary {
  codes: BTreeSet<SymptomCode>,
}

impl Vocabulary {
  /// Codes of the standard vocabulary.
  pub const STANDARD_CODES: [&'static str; 20] = [
    "fever",
    "headache",
    "nausea",
    "fatigue",
    "chest_pain",
    "dyspnea",
    "abdominal_pain",
    "dizziness",
    "weight_loss",
    "cough",
    "nasal_congestion",
    "sore_throat",
    "muscle_pain",
    "joint_pain",
    "skin_rash",
    "bleeding",
    "vision_changes",
    "confusion",
    "seizures",
    "back_pain",
  ];

  pub fn new<I, S>(codes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      codes: codes.into_iter().map(|c| SymptomCode(c.into())).collect(),
    }
  }

  pub fn standard() -> Self { Self::new(Self::STANDARD_CODES) }

  pub fn contains(&self, code: &str) -> bool { self.codes.contains(code) }

  /// Resolve a raw code against the vocabulary.
  pub fn code(&self, raw: &str) -> Result<SymptomCode> {
    self
      .codes
      .get(raw)
      .cloned()
      .ok_or_else(|| Error::UnknownSymptom(raw.to_owned()))
  }

  pub fn codes(&self) -> impl Iterator<Item = &SymptomCode> { self.codes.iter() }

  pub fn len(&self) -> usize { self.codes.len() }

  pub fn is_empty(&self) -> bool { self.codes.is_empty() }
}

impl Default for Vocabulary {
  fn default() -> Self { Self::standard() }
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// When the symptom started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Onset {
  /// Abrupt onset, minutes rather than hours.
  Sudden,
  /// Started roughly this many hours ago.
  Hours(u32),
  #[default]
  Unknown,
}

/// Direction of the symptom since it was first noticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
  #[default]
  New,
  Worsening,
  Stable,
  Improving,
}

/// Structured value for one symptom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymptomValue {
  pub present:   bool,
  /// Intensity on a 0–10 scale, when it was measured.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub intensity: Option<f64>,
  #[serde(default)]
  pub onset:     Onset,
  #[serde(default)]
  pub trend:     Trend,
}

impl SymptomValue {
  /// Intensity assumed for a symptom reported present without a measurement.
  pub const PRESENT_DEFAULT_INTENSITY: f64 = 5.0;

  /// A symptom with a measured intensity; zero means absent.
  pub fn with_intensity(intensity: f64) -> Self {
    Self {
      present:   intensity > 0.0,
      intensity: Some(intensity),
      onset:     Onset::Unknown,
      trend:     Trend::New,
    }
  }

  /// A symptom reported present with no intensity.
  pub fn present() -> Self {
    Self {
      present:   true,
      intensity: None,
      onset:     Onset::Unknown,
      trend:     Trend::New,
    }
  }

  pub fn onset(mut self, onset: Onset) -> Self {
    self.onset = onset;
    self
  }

  pub fn trend(mut self, trend: Trend) -> Self {
    self.trend = trend;
    self
  }

  /// Intensity used for weighted scoring: the measurement, the present
  /// default, or zero for an absent symptom.
  pub fn effective_intensity(&self) -> f64 {
    match (self.present, self.intensity) {
      (false, _) => 0.0,
      (true, Some(i)) => i,
      (true, None) => Self::PRESENT_DEFAULT_INTENSITY,
    }
  }

  fn validate(&self) -> std::result::Result<(), String> {
    if let Some(i) = self.intensity {
      if !i.is_finite() || !(0.0..=10.0).contains(&i) {
        return Err(format!("intensity {i} outside 0..=10"));
      }
      if self.present != (i > 0.0) {
        return Err(format!(
          "presence flag {} contradicts intensity {i}",
          self.present
        ));
      }
    }
    Ok(())
  }
}

// ─── Vector ──────────────────────────────────────────────────────────────────

/// An immutable, validated mapping from symptom code to value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymptomVector {
  entries:   BTreeMap<SymptomCode, SymptomValue>,
  /// Set only on the upstream invalid sentinel.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  rejection: Option<String>,
}

impl SymptomVector {
  /// The sentinel an upstream collaborator hands over when it has already
  /// flagged a case invalid. Every consumer rejects it explicitly.
  pub fn invalid(reason: impl Into<String>) -> Self {
    Self { entries: BTreeMap::new(), rejection: Some(reason.into()) }
  }

  pub fn is_invalid(&self) -> bool { self.rejection.is_some() }

  /// Fail with [`Error::InvalidVector`] if this is the invalid sentinel.
  pub fn ensure_valid(&self) -> Result<()> {
    match &self.rejection {
      Some(reason) => Err(Error::InvalidVector(reason.clone())),
      None => Ok(()),
    }
  }

  pub fn get(&self, code: &str) -> Option<&SymptomValue> { self.entries.get(code) }

  pub fn is_present(&self, code: &str) -> bool {
    self.get(code).is_some_and(|v| v.present)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&SymptomCode, &SymptomValue)> {
    self.entries.iter()
  }

  /// Codes of all symptoms flagged present, in code order.
  pub fn present_codes(&self) -> impl Iterator<Item = &SymptomCode> {
    self.entries.iter().filter(|(_, v)| v.present).map(|(c, _)| c)
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

/// Validating builder for [`SymptomVector`].
#[derive(Debug)]
pub struct SymptomVectorBuilder<'v> {
  vocabulary:   &'v Vocabulary,
  entries:      BTreeMap<SymptomCode, SymptomValue>,
  min_symptoms: usize,
  error:        Option<Error>,
}

impl<'v> SymptomVectorBuilder<'v> {
  pub fn new(vocabulary: &'v Vocabulary) -> Self {
    Self {
      vocabulary,
      entries: BTreeMap::new(),
      min_symptoms: 1,
      error: None,
    }
  }

  /// Minimum number of reported symptoms (present or explicitly absent).
  pub fn min_symptoms(mut self, n: usize) -> Self {
    self.min_symptoms = n;
    self
  }

  /// Add one symptom. The first problem encountered is kept and reported by
  /// [`build`](Self::build).
  pub fn symptom(mut self, code: &str, value: SymptomValue) -> Self {
    if self.error.is_some() {
      return self;
    }
    let code = match self.vocabulary.code(code) {
      Ok(c) => c,
      Err(e) => {
        self.error = Some(e);
        return self;
      }
    };
    if let Err(reason) = value.validate() {
      self.error = Some(Error::InvalidVector(format!("{code}: {reason}")));
      return self;
    }
    if self.entries.insert(code.clone(), value).is_some() {
      self.error = Some(Error::InvalidVector(format!("duplicate symptom {code}")));
    }
    self
  }

  pub fn build(self) -> Result<SymptomVector> {
    if let Some(e) = self.error {
      return Err(e);
    }
    if self.entries.len() < self.min_symptoms {
      return Err(Error::InvalidVector(format!(
        "{} symptoms reported, at least {} required",
        self.entries.len(),
        self.min_symptoms
      )));
    }
    Ok(SymptomVector { entries: self.entries, rejection: None })
  }
}
