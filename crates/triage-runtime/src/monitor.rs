//! The drift monitor task.
//!
//! Buffers observations from the serving path into consecutive,
//! non-overlapping windows of `drift.window_secs`. Every `drift.cycle_secs`
//! it evaluates the windows that have closed, publishes the latest signals,
//! and archives the triggered ones. Nothing here can fail a diagnosis: store
//! errors are logged and the archive is retried on the next cycle.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
  sync::{mpsc, watch},
  task::JoinHandle,
  time::MissedTickBehavior,
};
use tracing::{debug, info, warn};
use triage_core::{
  drift::{DriftMonitor, DriftSignal, Observation, TumblingWindows},
  store::ModelStore,
};

/// Spawn the monitor loop. It stops when `shutdown` flips to `true` or its
/// sender is dropped.
pub fn spawn_monitor<S>(
  store: Arc<S>,
  mut monitor: DriftMonitor,
  mut observations: mpsc::Receiver<Observation>,
  signals: watch::Sender<Vec<DriftSignal>>,
  mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
  S: ModelStore + 'static,
{
  tokio::spawn(async move {
    let config = monitor.config().clone();
    let width = chrono::Duration::seconds(config.window_secs.max(1) as i64);
    let mut windows = TumblingWindows::new(Utc::now(), width);
    let mut interval = tokio::time::interval(Duration::from_secs(config.cycle_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending: Vec<DriftSignal> = Vec::new();

    loop {
      tokio::select! {
        biased;
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
        }
        Some(observation) = observations.recv() => windows.push(observation),
        _ = interval.tick() => {
          let closed = windows.close_due(Utc::now());
          let mut latest = None;
          for window in &closed {
            let evaluated = monitor.evaluate(window);
            debug!(window = %window.id, observations = window.len(), signals = evaluated.len(), "drift window closed");
            for s in evaluated.iter().filter(|s| s.triggered) {
              info!(window = %window.id, metric = %s.metric, deviation = s.deviation, threshold = s.threshold, "drift triggered");
            }
            pending.extend(evaluated.iter().filter(|s| s.triggered).cloned());
            latest = Some(evaluated);
          }
          if let Some(latest) = latest {
            signals.send_replace(latest);
          }

          if !pending.is_empty() {
            match store.archive_signals(pending.clone()).await {
              Ok(n) => {
                debug!(archived = n, "drift signals archived");
                pending.clear();
              }
              Err(e) => warn!(error = %e, pending = pending.len(), "failed to archive drift signals; retrying next cycle"),
            }
          }
        }
      }
    }
    debug!("drift monitor stopped");
  })
}
