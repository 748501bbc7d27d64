//! The serving path: score one case with every registered scorer and reduce
//! the outcomes to a verdict.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
  sync::{mpsc, watch},
  time::Instant,
};
use tracing::{debug, instrument, warn};
use triage_core::{
  Error as CoreError,
  aggregate::{AggregatorConfig, RiskAggregator},
  drift::Observation,
  score::ScorerOutcome,
  scorer::ScorerRegistry,
  symptom::SymptomVector,
  verdict::Verdict,
};

use crate::{Error, Result};

pub struct TriageEngine {
  registry:     watch::Sender<Arc<ScorerRegistry>>,
  aggregator:   AggregatorConfig,
  timeout:      Duration,
  observations: Option<mpsc::Sender<Observation>>,
}

impl TriageEngine {
  pub fn new(registry: ScorerRegistry, aggregator: AggregatorConfig, timeout: Duration) -> Self {
    let (registry, _) = watch::channel(Arc::new(registry));
    Self { registry, aggregator, timeout, observations: None }
  }

  /// Feed every verdict to the drift monitor through `tx`.
  pub fn with_observations(mut self, tx: mpsc::Sender<Observation>) -> Self {
    self.observations = Some(tx);
    self
  }

  pub fn registry(&self) -> Arc<ScorerRegistry> { self.registry.borrow().clone() }

  /// Replace the scorer set. Cases already in flight finish on the old one.
  pub fn swap_registry(&self, registry: ScorerRegistry) {
    self.registry.send_replace(Arc::new(registry));
  }

  /// Score `vector` with every registered scorer concurrently and aggregate.
  ///
  /// Each scorer runs on the blocking pool and must answer within the
  /// configured timeout; a scorer that errors, panics, or misses the deadline
  /// is recorded as unavailable in the verdict.
  #[instrument(skip_all, fields(symptoms = vector.len()))]
  pub async fn diagnose(&self, vector: SymptomVector) -> Result<Verdict> {
    vector.ensure_valid()?;
    let registry = self.registry();
    if registry.is_empty() {
      return Err(CoreError::EmptyInput.into());
    }

    let vector = Arc::new(vector);
    let deadline = Instant::now() + self.timeout;
    let handles: Vec<_> = registry
      .iter()
      .map(|scorer| {
        let scorer = Arc::clone(scorer);
        let vector = Arc::clone(&vector);
        let family = scorer.family();
        (family, tokio::task::spawn_blocking(move || scorer.score(&vector)))
      })
      .collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    for (family, handle) in handles {
      let outcome = match tokio::time::timeout_at(deadline, handle).await {
        Ok(Ok(result)) => ScorerOutcome::from_result(family, result),
        Ok(Err(join)) => {
          warn!(%family, error = %join, "scorer task failed");
          ScorerOutcome::unavailable(family, "scorer task failed")
        }
        Err(_) => {
          warn!(%family, timeout_ms = self.timeout.as_millis() as u64, "scorer timed out");
          ScorerOutcome::unavailable(family, "timed out")
        }
      };
      outcomes.push(outcome);
    }

    let aggregator = RiskAggregator::new(self.aggregator.clone(), registry.families());
    let verdict = aggregator.aggregate(&vector, &outcomes)?;
    debug!(
      severity = %verdict.severity,
      decided_by = %verdict.decided_by,
      unavailable = verdict.unavailable.len(),
      "verdict"
    );

    self.observe(&vector, &verdict);
    Ok(verdict)
  }

  /// Queue a case for the drift monitor without waiting.
  fn observe(&self, vector: &SymptomVector, verdict: &Verdict) {
    let Some(tx) = &self.observations else { return };
    let observation = Observation {
      observed_at: Utc::now(),
      vector:      vector.clone(),
      verdict:     verdict.clone(),
      confirmed:   None,
    };
    match tx.try_send(observation) {
      Ok(()) => {}
      Err(mpsc::error::TrySendError::Full(_)) => {
        warn!("drift monitor buffer full; observation dropped");
      }
      Err(mpsc::error::TrySendError::Closed(_)) => {
        debug!("drift monitor stopped; observation dropped");
      }
    }
  }

  /// Hand an observation (typically one carrying clinician feedback) to the
  /// drift monitor, waiting for buffer space.
  pub async fn ingest(&self, observation: Observation) -> Result<()> {
    let tx = self.observations.as_ref().ok_or(Error::MonitorClosed)?;
    tx.send(observation).await.map_err(|_| Error::MonitorClosed)
  }
}

impl std::fmt::Debug for TriageEngine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TriageEngine")
      .field("registry", &*self.registry.borrow())
      .field("timeout", &self.timeout)
      .finish_non_exhaustive()
  }
}
