//! Runtime configuration, deserialised from `config.toml` and `TRIAGE__*`
//! environment variables by the binary.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use triage_core::{
  aggregate::AggregatorConfig,
  drift::DriftConfig,
  promotion::PromotionPolicy,
  symptom::Vocabulary,
};

/// Top-level configuration. Every section has defaults, so an empty file is
/// a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
  pub store_path:   PathBuf,
  /// Accepted symptom codes; the standard vocabulary when absent.
  pub vocabulary:   Option<Vec<String>>,
  /// Fewest reported symptoms a case must carry to be scored. Symptoms
  /// reported as absent count.
  pub min_symptoms: usize,
  pub aggregator:   AggregatorConfig,
  pub scoring:      ScoringConfig,
  pub drift:        DriftConfig,
  pub promotion:    PromotionPolicy,
}

impl Default for TriageConfig {
  fn default() -> Self {
    Self {
      store_path:   PathBuf::from("triage.db"),
      vocabulary:   None,
      min_symptoms: 1,
      aggregator:   AggregatorConfig::default(),
      scoring:      ScoringConfig::default(),
      drift:        DriftConfig::default(),
      promotion:    PromotionPolicy::default(),
    }
  }
}

impl TriageConfig {
  pub fn vocabulary(&self) -> Vocabulary {
    match &self.vocabulary {
      Some(codes) => Vocabulary::new(codes.iter().cloned()),
      None => Vocabulary::standard(),
    }
  }
}

/// `[scoring]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
  /// Per-scorer wait bound; a scorer that misses it counts as unavailable.
  pub scorer_timeout_ms:  u64,
  /// Capacity of the queue feeding the drift monitor.
  pub observation_buffer: usize,
}

impl Default for ScoringConfig {
  fn default() -> Self {
    Self { scorer_timeout_ms: 250, observation_buffer: 1024 }
  }
}

impl ScoringConfig {
  pub fn scorer_timeout(&self) -> Duration {
    Duration::from_millis(self.scorer_timeout_ms)
  }
}
