//! Model descriptors: the identity, provenance, and validation record of a
//! trained model.
//!
//! Descriptors are never deleted. Their fields never change after
//! registration; only the lifecycle status moves, and every move is recorded
//! alongside a ledger entry.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::score::ScorerFamily;

/// A model version identifier, unique across all families.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ModelVersion(String);

impl ModelVersion {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ModelVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ModelVersion {
  fn from(s: &str) -> Self { Self(s.to_owned()) }
}

/// Lifecycle status of a descriptor.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelStatus {
  /// Evaluated in parallel without influencing production.
  Shadow,
  /// Serving production traffic; at most one per family.
  Active,
  /// Superseded or rejected; kept for the audit trail.
  Retired,
}

/// Sensitivity and specificity for one patient subgroup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubgroupMetrics {
  pub sensitivity: f64,
  pub specificity: f64,
}

/// Validation metrics recorded at training time, or measured in shadow.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationMetrics {
  /// Recall on urgent cases (ACUTE and CHRONIC).
  pub sensitivity: f64,
  pub specificity: f64,
  /// Per-subgroup breakdown, keyed by subgroup name (e.g. `"pediatric"`).
  #[serde(default)]
  pub subgroups:   BTreeMap<String, SubgroupMetrics>,
}

impl ValidationMetrics {
  /// The lowest subgroup sensitivity, the fairness metric tracked for
  /// promotion. `None` when no subgroups are reported.
  pub fn worst_subgroup_sensitivity(&self) -> Option<f64> {
    self
      .subgroups
      .values()
      .map(|m| m.sensitivity)
      .min_by(f64::total_cmp)
  }

  /// True when every value is a finite number in `[0, 1]`.
  pub fn is_well_formed(&self) -> bool {
    let ok = |x: f64| x.is_finite() && (0.0..=1.0).contains(&x);
    ok(self.sensitivity)
      && ok(self.specificity)
      && self
        .subgroups
        .values()
        .all(|m| ok(m.sensitivity) && ok(m.specificity))
  }
}

/// A registered model with its current lifecycle status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
  pub version:           ModelVersion,
  pub family:            ScorerFamily,
  /// Identifier of the training-data snapshot.
  pub training_snapshot: String,
  /// Where the weights or parameters live (path or URI).
  pub artifact_ref:      String,
  pub metrics:           ValidationMetrics,
  pub status:            ModelStatus,
  /// Server-assigned; never changes after registration.
  pub created_at:        DateTime<Utc>,
}

/// Input to [`crate::store::ModelStore::register_descriptor`]. New
/// descriptors always start in [`ModelStatus::Shadow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDescriptor {
  pub version:           ModelVersion,
  pub family:            ScorerFamily,
  pub training_snapshot: String,
  pub artifact_ref:      String,
  #[serde(default)]
  pub metrics:           ValidationMetrics,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn worst_subgroup_picks_minimum() {
    let mut m = ValidationMetrics { sensitivity: 0.9, specificity: 0.8, ..Default::default() };
    assert_eq!(m.worst_subgroup_sensitivity(), None);

    m.subgroups.insert("adult".into(), SubgroupMetrics { sensitivity: 0.92, specificity: 0.8 });
    m.subgroups.insert("pediatric".into(), SubgroupMetrics { sensitivity: 0.85, specificity: 0.7 });
    assert_eq!(m.worst_subgroup_sensitivity(), Some(0.85));
    assert!(m.is_well_formed());

    m.sensitivity = f64::NAN;
    assert!(!m.is_well_formed());
  }

  #[test]
  fn status_string_forms() {
    assert_eq!(ModelStatus::Active.to_string(), "active");
    assert_eq!("retired".parse::<ModelStatus>().unwrap(), ModelStatus::Retired);
  }
}
