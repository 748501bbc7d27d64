//! The `Scorer` trait and the family-keyed registry.
//!
//! Implementations live in `triage-scorers` (or in a deployment's own crate).
//! The runtime depends on this abstraction only.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
  Result,
  model::ModelVersion,
  score::{ScoreResult, ScorerFamily},
  symptom::SymptomVector,
};

/// What a scorer can do for a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
  pub predict_severity:  bool,
  pub predict_condition: bool,
  /// Reports the symptoms that drove its result.
  pub explain:           bool,
}

impl Capabilities {
  pub const FULL: Self = Self {
    predict_severity:  true,
    predict_condition: true,
    explain:           true,
  };
}

/// A polymorphic prediction unit.
///
/// `score` must be deterministic for a fixed model version and input: no
/// hidden mutable state may influence the output. A scorer that cannot score
/// a case fails with [`Error::ScorerUnavailable`](crate::Error) instead of
/// fabricating a low-confidence result.
pub trait Scorer: Send + Sync {
  fn family(&self) -> ScorerFamily;

  fn model_version(&self) -> &ModelVersion;

  fn capabilities(&self) -> Capabilities { Capabilities::FULL }

  fn score(&self, vector: &SymptomVector) -> Result<ScoreResult>;
}

/// Registered scorers, one per family. Every registered family is required
/// for aggregation; a missing result counts as unavailable.
#[derive(Clone, Default)]
pub struct ScorerRegistry {
  scorers: BTreeMap<ScorerFamily, Arc<dyn Scorer>>,
}

impl ScorerRegistry {
  pub fn new() -> Self { Self::default() }

  /// Register `scorer` under its own family, replacing (and returning) any
  /// scorer previously registered for that family.
  pub fn register(
    &mut self,
    scorer: Arc<dyn Scorer>,
  ) -> Option<Arc<dyn Scorer>> {
    self.scorers.insert(scorer.family(), scorer)
  }

  /// Builder-style [`register`](Self::register).
  pub fn with(mut self, scorer: Arc<dyn Scorer>) -> Self {
    self.register(scorer);
    self
  }

  pub fn get(&self, family: ScorerFamily) -> Option<&Arc<dyn Scorer>> {
    self.scorers.get(&family)
  }

  pub fn families(&self) -> Vec<ScorerFamily> { self.scorers.keys().copied().collect() }

  /// Scorers in family order.
  pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Scorer>> { self.scorers.values() }

  /// Version of every registered scorer's model.
  pub fn versions(&self) -> BTreeMap<ScorerFamily, ModelVersion> {
    self
      .scorers
      .iter()
      .map(|(f, s)| (*f, s.model_version().clone()))
      .collect()
  }

  pub fn len(&self) -> usize { self.scorers.len() }

  pub fn is_empty(&self) -> bool { self.scorers.is_empty() }
}

impl fmt::Debug for ScorerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_map().entries(self.versions()).finish()
  }
}
