//! Severity classes and their two orderings.
//!
//! The derived `Ord` is the display order (`NONE < MILD < ACUTE < CHRONIC`).
//! Escalation uses [`SeverityClass::urgency`], where ACUTE is the maximum: an
//! acute finding is never downgraded by a chronic or mild reading.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityClass {
  #[serde(alias = "NO_ENFERMO")]
  #[strum(to_string = "NONE", serialize = "NO_ENFERMO")]
  None,
  #[serde(alias = "ENFERMEDAD_LEVE")]
  #[strum(to_string = "MILD", serialize = "ENFERMEDAD_LEVE")]
  Mild,
  #[serde(alias = "ENFERMEDAD_AGUDA")]
  #[strum(to_string = "ACUTE", serialize = "ENFERMEDAD_AGUDA")]
  Acute,
  #[serde(alias = "ENFERMEDAD_CRONICA")]
  #[strum(to_string = "CHRONIC", serialize = "ENFERMEDAD_CRONICA")]
  Chronic,
}

impl SeverityClass {
  /// All classes in display order.
  pub const ALL: [SeverityClass; 4] =
    [Self::None, Self::Mild, Self::Acute, Self::Chronic];

  /// Rank used for escalation: `NONE < MILD < CHRONIC < ACUTE`.
  pub fn urgency(self) -> u8 {
    match self {
      Self::None => 0,
      Self::Mild => 1,
      Self::Chronic => 2,
      Self::Acute => 3,
    }
  }

  /// Compare by clinical urgency rather than display order.
  pub fn escalation_cmp(self, other: Self) -> Ordering {
    self.urgency().cmp(&other.urgency())
  }

  /// The more urgent of two classes.
  pub fn escalate(self, other: Self) -> Self {
    if other.escalation_cmp(self).is_gt() { other } else { self }
  }

  /// Position in [`SeverityClass::ALL`]; used to index distributions.
  pub fn index(self) -> usize {
    match self {
      Self::None => 0,
      Self::Mild => 1,
      Self::Acute => 2,
      Self::Chronic => 3,
    }
  }

  /// Operator-facing guidance surfaced alongside a verdict.
  pub fn recommendations(self) -> &'static [&'static str] {
    match self {
      Self::None => &[
        "Continue routine health monitoring",
        "Maintain healthy habits",
        "Seek advice if new symptoms appear",
      ],
      Self::Mild => &[
        "Monitor symptoms closely",
        "Consider a medical consultation if symptoms persist",
        "Rest and keep adequately hydrated",
        "Avoid strenuous activity",
      ],
      Self::Acute => &[
        "IMMEDIATE MEDICAL CONSULTATION RECOMMENDED",
        "Seek medical attention within the next 24 hours",
        "Monitor vital signs regularly",
        "Avoid self-medication",
        "Consider the emergency department if the condition worsens",
      ],
      Self::Chronic => &[
        "URGENT MEDICAL CONSULTATION REQUIRED",
        "Seek specialist care promptly",
        "Hospital admission may be required",
        "Continuous medical monitoring is needed",
        "Arrange specialist follow-up",
      ],
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn acute_outranks_chronic_for_escalation() {
    assert!(SeverityClass::Acute > SeverityClass::Mild);
    assert!(SeverityClass::Chronic > SeverityClass::Acute);
    assert!(SeverityClass::Acute.escalation_cmp(SeverityClass::Chronic).is_gt());
    assert_eq!(
      SeverityClass::Chronic.escalate(SeverityClass::Acute),
      SeverityClass::Acute
    );
    assert_eq!(
      SeverityClass::Mild.escalate(SeverityClass::None),
      SeverityClass::Mild
    );
  }

  #[test]
  fn parses_legacy_labels() {
    assert_eq!(
      "ENFERMEDAD_AGUDA".parse::<SeverityClass>().unwrap(),
      SeverityClass::Acute
    );
    assert_eq!("MILD".parse::<SeverityClass>().unwrap(), SeverityClass::Mild);
    assert_eq!(SeverityClass::Chronic.to_string(), "CHRONIC");

    let parsed: SeverityClass = serde_json::from_str("\"NO_ENFERMO\"").unwrap();
    assert_eq!(parsed, SeverityClass::None);
    assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"NONE\"");
  }
}
