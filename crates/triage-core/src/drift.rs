//! Drift detection over windows of production cases.
//!
//! Distribution drift is measured with the population stability index (PSI)
//! against a stored [`Baseline`]. Outcome drift compares the under-triage rate
//! (clinician-confirmed severity more urgent than the verdict) with the
//! baseline rate. A metric only triggers after exceeding its threshold in
//! `consecutive_windows` evaluated windows in a row.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
  Error, Result,
  severity::SeverityClass,
  symptom::{SymptomCode, SymptomVector},
  verdict::Verdict,
};

/// Floor applied to empty buckets so the PSI stays finite.
const PSI_EPSILON: f64 = 1e-4;

/// Upper edges of the pooled intensity histogram bins; the last bin is closed.
const INTENSITY_BIN_EDGES: [f64; 4] = [2.0, 4.0, 6.0, 8.0];

// ─── Metrics and signals ─────────────────────────────────────────────────────

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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DriftMetric {
  /// PSI of the final-severity distribution.
  SeverityDistribution,
  /// PSI of symptom-mention shares.
  SymptomFrequency,
  /// PSI of the pooled intensity histogram.
  SymptomIntensity,
  /// Rise of the under-triage rate over the baseline rate.
  OutcomeUnderTriage,
}

/// One metric's evaluation for one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftSignal {
  pub window_id: String,
  pub metric:    DriftMetric,
  /// Reference value: `0.0` for PSI metrics, the baseline rate otherwise.
  pub baseline:  f64,
  pub observed:  f64,
  pub deviation: f64,
  pub threshold: f64,
  pub triggered: bool,
}

// ─── Observations ────────────────────────────────────────────────────────────

/// One production case, plus clinician feedback when it is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  pub observed_at: DateTime<Utc>,
  pub vector:      SymptomVector,
  pub verdict:     Verdict,
  /// Severity confirmed by a clinician after the fact.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub confirmed:   Option<SeverityClass>,
}

impl Observation {
  /// `None` without feedback; otherwise whether the verdict was less urgent
  /// than the confirmed severity.
  pub fn under_triaged(&self) -> Option<bool> {
    self
      .confirmed
      .map(|c| c.escalation_cmp(self.verdict.severity).is_gt())
  }
}

/// A time-bounded slice of observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationWindow {
  pub id:           String,
  pub start:        DateTime<Utc>,
  pub end:          DateTime<Utc>,
  pub observations: Vec<Observation>,
}

impl ObservationWindow {
  /// The window `(end - width, end]` over `observations`.
  pub fn ending_at(
    observations: &[Observation],
    end: DateTime<Utc>,
    width: Duration,
  ) -> Self {
    let start = end - width;
    Self {
      id: window_id(start, end),
      start,
      end,
      observations: observations
        .iter()
        .filter(|o| o.observed_at > start && o.observed_at <= end)
        .cloned()
        .collect(),
    }
  }

  /// Split a log into consecutive windows of `width`, starting at the
  /// earliest observation. Empty windows in the middle are kept so that
  /// streaks reset across gaps.
  pub fn partition(observations: &[Observation], width: Duration) -> Vec<Self> {
    let Some(first) = observations.iter().map(|o| o.observed_at).min() else {
      return Vec::new();
    };
    let last = observations
      .iter()
      .map(|o| o.observed_at)
      .max()
      .unwrap_or(first);

    let mut windows = Vec::new();
    let mut start = first;
    while start <= last {
      let end = start + width;
      windows.push(Self {
        id: window_id(start, end),
        start,
        end,
        observations: observations
          .iter()
          .filter(|o| o.observed_at >= start && o.observed_at < end)
          .cloned()
          .collect(),
      });
      start = end;
    }
    windows
  }

  pub fn len(&self) -> usize { self.observations.len() }

  pub fn is_empty(&self) -> bool { self.observations.is_empty() }
}

/// Consecutive, non-overlapping windows over a live stream.
///
/// Every observation is evaluated in exactly one window, so a single burst
/// of traffic can count towards at most one step of a trigger streak.
/// Observations stamped before the open window (late feedback) are counted
/// in the open window.
#[derive(Debug, Clone)]
pub struct TumblingWindows {
  width:   Duration,
  start:   DateTime<Utc>,
  pending: Vec<Observation>,
}

impl TumblingWindows {
  /// The first window is `[start, start + width)`.
  pub fn new(start: DateTime<Utc>, width: Duration) -> Self {
    Self { width, start, pending: Vec::new() }
  }

  /// End of the window currently collecting observations.
  pub fn open_until(&self) -> DateTime<Utc> { self.start + self.width }

  pub fn pending(&self) -> usize { self.pending.len() }

  pub fn push(&mut self, observation: Observation) { self.pending.push(observation); }

  /// Close every window that ended at or before `now`, oldest first.
  /// Windows that saw no traffic are returned empty.
  pub fn close_due(&mut self, now: DateTime<Utc>) -> Vec<ObservationWindow> {
    let mut closed = Vec::new();
    while self.open_until() <= now {
      let (start, end) = (self.start, self.open_until());
      let (observations, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
        .into_iter()
        .partition(|o| o.observed_at < end);
      self.pending = rest;
      closed.push(ObservationWindow { id: window_id(start, end), start, end, observations });
      self.start = end;
    }
    closed
  }
}

fn window_id(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
  format!("{}/{}", start.to_rfc3339(), end.to_rfc3339())
}

// ─── Baseline ────────────────────────────────────────────────────────────────

/// Reference distributions from the last validated deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
  /// Share of each severity, indexed by [`SeverityClass::index`].
  pub severity:          [f64; 4],
  /// Share of all present-symptom mentions taken by each code.
  pub symptom_shares:    BTreeMap<SymptomCode, f64>,
  /// Pooled intensity histogram over present symptoms (five bins of width 2).
  pub intensity:         [f64; 5],
  /// `None` when no feedback was available at capture time.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub under_triage_rate: Option<f64>,
  pub observations:      usize,
  pub captured_at:       DateTime<Utc>,
}

impl Baseline {
  pub fn capture(
    observations: &[Observation],
    captured_at: DateTime<Utc>,
  ) -> Result<Self> {
    if observations.is_empty() {
      return Err(Error::InsufficientEvidence(
        "cannot capture a baseline from zero observations".into(),
      ));
    }
    let stats = WindowStats::collect(observations);
    Ok(Self {
      severity: stats.severity,
      symptom_shares: stats.symptom_shares,
      intensity: stats.intensity,
      under_triage_rate: stats.under_triage_rate,
      observations: observations.len(),
      captured_at,
    })
  }
}

/// Distributions of one window, in the same shape as the baseline.
struct WindowStats {
  severity:          [f64; 4],
  symptom_shares:    BTreeMap<SymptomCode, f64>,
  mentions:          usize,
  intensity:         [f64; 5],
  under_triage_rate: Option<f64>,
  feedback:          usize,
}

impl WindowStats {
  fn collect(observations: &[Observation]) -> Self {
    let mut severity = [0.0; 4];
    let mut shares: BTreeMap<SymptomCode, f64> = BTreeMap::new();
    let mut intensity = [0.0; 5];
    let mut mentions = 0usize;
    let mut feedback = 0usize;
    let mut under = 0usize;

    for o in observations {
      severity[o.verdict.severity.index()] += 1.0;
      for (code, value) in o.vector.iter().filter(|(_, v)| v.present) {
        *shares.entry(code.clone()).or_default() += 1.0;
        intensity[intensity_bin(value.effective_intensity())] += 1.0;
        mentions += 1;
      }
      if let Some(u) = o.under_triaged() {
        feedback += 1;
        if u {
          under += 1;
        }
      }
    }

    let n = observations.len().max(1) as f64;
    severity.iter_mut().for_each(|x| *x /= n);
    if mentions > 0 {
      let m = mentions as f64;
      shares.values_mut().for_each(|x| *x /= m);
      intensity.iter_mut().for_each(|x| *x /= m);
    }

    Self {
      severity,
      symptom_shares: shares,
      mentions,
      intensity,
      under_triage_rate: (feedback > 0).then(|| under as f64 / feedback as f64),
      feedback,
    }
  }
}

fn intensity_bin(intensity: f64) -> usize {
  INTENSITY_BIN_EDGES
    .iter()
    .position(|edge| intensity < *edge)
    .unwrap_or(INTENSITY_BIN_EDGES.len())
}

/// Population stability index over paired bucket shares.
pub fn psi(baseline: &[f64], observed: &[f64]) -> f64 {
  baseline
    .iter()
    .zip(observed)
    .map(|(b, o)| {
      let b = b.max(PSI_EPSILON);
      let o = o.max(PSI_EPSILON);
      (o - b) * (o / b).ln()
    })
    .sum()
}

/// PSI over two keyed distributions, treating missing keys as empty buckets.
fn keyed_psi(
  baseline: &BTreeMap<SymptomCode, f64>,
  observed: &BTreeMap<SymptomCode, f64>,
) -> f64 {
  let keys: BTreeSet<&SymptomCode> = baseline.keys().chain(observed.keys()).collect();
  let (b, o): (Vec<f64>, Vec<f64>) = keys
    .into_iter()
    .map(|k| {
      (
        baseline.get(k).copied().unwrap_or(0.0),
        observed.get(k).copied().unwrap_or(0.0),
      )
    })
    .unzip();
  psi(&b, &o)
}

// ─── Monitor ─────────────────────────────────────────────────────────────────

/// Drift settings (`[drift]` in `config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
  pub psi_threshold:       f64,
  /// Allowed rise of the under-triage rate over the baseline rate.
  pub outcome_threshold:   f64,
  /// Below this many observations a metric is not evaluated.
  pub min_observations:    usize,
  pub consecutive_windows: u32,
  /// Width of each non-overlapping evaluation window.
  pub window_secs:         u64,
  /// How often the runtime monitor checks for closed windows.
  pub cycle_secs:          u64,
}

impl Default for DriftConfig {
  fn default() -> Self {
    Self {
      psi_threshold:       0.2,
      outcome_threshold:   0.05,
      min_observations:    30,
      consecutive_windows: 2,
      window_secs:         3600,
      cycle_secs:          300,
    }
  }
}

/// Evaluates windows against a baseline and debounces triggers.
#[derive(Debug, Clone)]
pub struct DriftMonitor {
  config:   DriftConfig,
  baseline: Baseline,
  streaks:  BTreeMap<DriftMetric, u32>,
}

impl DriftMonitor {
  pub fn new(config: DriftConfig, baseline: Baseline) -> Self {
    Self { config, baseline, streaks: BTreeMap::new() }
  }

  pub fn config(&self) -> &DriftConfig { &self.config }

  pub fn baseline(&self) -> &Baseline { &self.baseline }

  /// Replace the baseline, e.g. after a promotion. Clears every streak.
  pub fn rebase(&mut self, baseline: Baseline) {
    self.baseline = baseline;
    self.streaks.clear();
  }

  pub fn streak(&self, metric: DriftMetric) -> u32 {
    self.streaks.get(&metric).copied().unwrap_or(0)
  }

  /// Evaluate one window. Metrics without enough data emit no signal and
  /// have their streak reset.
  pub fn evaluate(&mut self, window: &ObservationWindow) -> Vec<DriftSignal> {
    let min = self.config.min_observations;
    if window.len() < min {
      self.streaks.clear();
      return Vec::new();
    }

    let stats = WindowStats::collect(&window.observations);
    let psi_threshold = self.config.psi_threshold;
    let mut signals = Vec::new();

    let severity = psi(&self.baseline.severity, &stats.severity);
    signals.push(self.psi_signal(
      window,
      DriftMetric::SeverityDistribution,
      severity,
      psi_threshold,
    ));

    if stats.mentions > 0 {
      let frequency =
        keyed_psi(&self.baseline.symptom_shares, &stats.symptom_shares);
      signals.push(self.psi_signal(
        window,
        DriftMetric::SymptomFrequency,
        frequency,
        psi_threshold,
      ));

      let intensity = psi(&self.baseline.intensity, &stats.intensity);
      signals.push(self.psi_signal(
        window,
        DriftMetric::SymptomIntensity,
        intensity,
        psi_threshold,
      ));
    } else {
      self.streaks.remove(&DriftMetric::SymptomFrequency);
      self.streaks.remove(&DriftMetric::SymptomIntensity);
    }

    match (self.baseline.under_triage_rate, stats.under_triage_rate) {
      (Some(base), Some(observed)) if stats.feedback >= min => {
        let threshold = self.config.outcome_threshold;
        signals.push(self.signal(
          window,
          DriftMetric::OutcomeUnderTriage,
          base,
          observed,
          observed - base,
          threshold,
        ));
      }
      _ => {
        self.streaks.remove(&DriftMetric::OutcomeUnderTriage);
      }
    }

    signals
  }

  fn psi_signal(
    &mut self,
    window: &ObservationWindow,
    metric: DriftMetric,
    value: f64,
    threshold: f64,
  ) -> DriftSignal {
    self.signal(window, metric, 0.0, value, value, threshold)
  }

  fn signal(
    &mut self,
    window: &ObservationWindow,
    metric: DriftMetric,
    baseline: f64,
    observed: f64,
    deviation: f64,
    threshold: f64,
  ) -> DriftSignal {
    let streak = self.streaks.entry(metric).or_default();
    if deviation > threshold {
      *streak += 1;
    } else {
      *streak = 0;
    }
    DriftSignal {
      window_id: window.id.clone(),
      metric,
      baseline,
      observed,
      deviation,
      threshold,
      triggered: *streak >= self.config.consecutive_windows,
    }
  }
}
