//! Async orchestration for the triage engine.
//!
//! [`Runtime`] wires the pieces together over any
//! [`ModelStore`](triage_core::store::ModelStore):
//!
//! - a [`TriageEngine`] that serves `diagnose`, scoring concurrently with a
//!   per-scorer deadline;
//! - the [`ActiveModelSet`], loaded from the store at startup and swapped by
//!   promotions, with the engine's scorers rebuilt on every swap;
//! - the [`PromotionController`], serialising decisions per family;
//! - the drift monitor task, when the store holds a baseline.

pub mod active;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod promotion;

use std::sync::Arc;

use tokio::{
  sync::{mpsc, watch},
  task::JoinHandle,
};
use tracing::{info, warn};
use triage_core::{
  drift::{DriftMonitor, DriftSignal, Observation},
  scorer::ScorerRegistry,
  store::ModelStore,
  symptom::SymptomVector,
  verdict::Verdict,
};

pub use active::{ActiveModelSet, ActiveModels, PromotionEvent};
pub use config::{ScoringConfig, TriageConfig};
pub use engine::TriageEngine;
pub use error::{Error, Result};
pub use promotion::PromotionController;

/// Scorers for an active set. Falls back to the built-in reference scorers
/// while no family has been bootstrapped.
fn registry_for(active: &ActiveModels) -> Result<ScorerRegistry> {
  if active.is_empty() {
    return Ok(triage_scorers::builtin_registry()?);
  }
  let descriptors: Vec<_> = active.descriptors.values().cloned().collect();
  Ok(triage_scorers::build_registry(&descriptors)?)
}

pub struct Runtime<S> {
  config:     TriageConfig,
  store:      Arc<S>,
  engine:     Arc<TriageEngine>,
  active:     Arc<ActiveModelSet>,
  controller: PromotionController<S>,
  drift:      watch::Receiver<Vec<DriftSignal>>,
  shutdown:   watch::Sender<bool>,
  tasks:      Vec<JoinHandle<()>>,
}

impl<S: ModelStore + 'static> Runtime<S> {
  /// Load the active set from `store`, build the scorers, and start the
  /// background tasks.
  pub async fn start(config: TriageConfig, store: S) -> Result<Self> {
    let store = Arc::new(store);
    let active = Arc::new(ActiveModelSet::load(&*store).await?);
    let snapshot = active.snapshot();
    if snapshot.is_empty() {
      warn!("no active models in the store; serving with built-in scorers");
    }

    let mut engine = TriageEngine::new(
      registry_for(&snapshot)?,
      config.aggregator.clone(),
      config.scoring.scorer_timeout(),
    );

    let (shutdown, shutdown_rx) = watch::channel(false);
    let (drift_tx, drift) = watch::channel(Vec::new());
    let mut tasks = Vec::new();

    match store.latest_baseline().await.map_err(Error::store)? {
      Some(baseline) => {
        let (tx, rx) = mpsc::channel(config.scoring.observation_buffer.max(1));
        engine = engine.with_observations(tx);
        let monitor = DriftMonitor::new(config.drift.clone(), baseline);
        tasks.push(monitor::spawn_monitor(
          Arc::clone(&store),
          monitor,
          rx,
          drift_tx,
          shutdown_rx.clone(),
        ));
      }
      None => warn!("no drift baseline in the store; drift monitor disabled"),
    }

    let monitoring = !tasks.is_empty();
    let engine = Arc::new(engine);
    tasks.push(spawn_refresher(Arc::clone(&engine), &active, shutdown_rx));

    let controller =
      PromotionController::new(Arc::clone(&store), config.promotion.clone(), Arc::clone(&active));

    info!(
      families = ?snapshot.descriptors.keys().collect::<Vec<_>>(),
      monitoring,
      "runtime started"
    );
    Ok(Self { config, store, engine, active, controller, drift, shutdown, tasks })
  }

  pub fn config(&self) -> &TriageConfig { &self.config }

  pub fn store(&self) -> &Arc<S> { &self.store }

  pub fn engine(&self) -> &Arc<TriageEngine> { &self.engine }

  pub fn active(&self) -> &Arc<ActiveModelSet> { &self.active }

  pub fn controller(&self) -> &PromotionController<S> { &self.controller }

  pub async fn diagnose(&self, vector: SymptomVector) -> Result<Verdict> {
    self.engine.diagnose(vector).await
  }

  pub async fn ingest(&self, observation: Observation) -> Result<()> {
    self.engine.ingest(observation).await
  }

  /// Signals from the monitor's most recent cycle.
  pub fn drift_signals(&self) -> Vec<DriftSignal> { self.drift.borrow().clone() }

  /// Stop the background tasks and wait for them to finish.
  pub async fn shutdown(self) {
    self.shutdown.send_replace(true);
    for task in self.tasks {
      if let Err(e) = task.await {
        warn!(error = %e, "background task failed");
      }
    }
    info!("runtime stopped");
  }
}

/// Rebuild the engine's scorers whenever the active set changes. A set that
/// fails to build keeps the previous scorers serving.
fn spawn_refresher(
  engine: Arc<TriageEngine>,
  active: &ActiveModelSet,
  mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
  let mut updates = active.subscribe();
  tokio::spawn(async move {
    loop {
      tokio::select! {
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
        }
        changed = updates.changed() => {
          if changed.is_err() {
            break;
          }
          let snapshot = updates.borrow_and_update().clone();
          match registry_for(&snapshot) {
            Ok(registry) => {
              info!(generation = snapshot.generation, versions = ?registry.versions(), "scorers reloaded");
              engine.swap_registry(registry);
            }
            Err(e) => warn!(error = %e, generation = snapshot.generation, "failed to rebuild scorers; keeping previous set"),
          }
        }
      }
    }
  })
}
