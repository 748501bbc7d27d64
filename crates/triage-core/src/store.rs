//! The `ModelStore` trait: descriptors, the promotion ledger, drift archives.
//!
//! Implemented by storage backends (e.g. `triage-store-sqlite`). The runtime
//! and the CLI depend on this abstraction, not on a concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  drift::{Baseline, DriftSignal},
  ledger::{DecisionDraft, PromotionLedgerEntry},
  model::{ModelDescriptor, ModelStatus, ModelVersion, NewDescriptor},
  score::ScorerFamily,
};

/// Persistence for the model lifecycle.
///
/// Descriptors and ledger entries are append-only. A descriptor's status is
/// derived from its append-only transition history; the only way to move it
/// is [`commit_decision`](ModelStore::commit_decision).
///
/// All methods return `Send` futures so the trait can be used from spawned
/// tokio tasks.
pub trait ModelStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Descriptors ───────────────────────────────────────────────────────

  /// Persist a new descriptor in [`ModelStatus::Shadow`]. Fails if the
  /// version is already registered.
  fn register_descriptor(
    &self,
    input: NewDescriptor,
  ) -> impl Future<Output = Result<ModelDescriptor, Self::Error>> + Send + '_;

  /// Retrieve a descriptor with its current status. `None` if unknown.
  fn get_descriptor(
    &self,
    version: ModelVersion,
  ) -> impl Future<Output = Result<Option<ModelDescriptor>, Self::Error>> + Send + '_;

  /// List descriptors in registration order, optionally filtered.
  fn list_descriptors(
    &self,
    family: Option<ScorerFamily>,
    status: Option<ModelStatus>,
  ) -> impl Future<Output = Result<Vec<ModelDescriptor>, Self::Error>> + Send + '_;

  /// The active descriptor of a family, if it has been bootstrapped.
  fn active_descriptor(
    &self,
    family: ScorerFamily,
  ) -> impl Future<Output = Result<Option<ModelDescriptor>, Self::Error>> + Send + '_;

  // ── Ledger ────────────────────────────────────────────────────────────

  /// Atomically check every transition's expected status, apply the
  /// transitions, and append the sealed ledger entry. Nothing is written if
  /// any check fails.
  fn commit_decision(
    &self,
    draft: DecisionDraft,
  ) -> impl Future<Output = Result<PromotionLedgerEntry, Self::Error>> + Send + '_;

  /// Ledger entries in sequence order, optionally for one family.
  fn ledger_entries(
    &self,
    family: Option<ScorerFamily>,
  ) -> impl Future<Output = Result<Vec<PromotionLedgerEntry>, Self::Error>> + Send + '_;

  // ── Drift ─────────────────────────────────────────────────────────────

  /// Archive the triggered signals among `signals`; returns how many were
  /// written.
  fn archive_signals(
    &self,
    signals: Vec<DriftSignal>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Most recent archived signals first.
  fn archived_signals(
    &self,
    limit: Option<usize>,
  ) -> impl Future<Output = Result<Vec<DriftSignal>, Self::Error>> + Send + '_;

  /// Signals archived at or after `since`, oldest first.
  fn archived_signals_since(
    &self,
    since: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<DriftSignal>, Self::Error>> + Send + '_;

  /// Record a new reference baseline. Earlier baselines are kept.
  fn store_baseline(
    &self,
    baseline: Baseline,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn latest_baseline(
    &self,
  ) -> impl Future<Output = Result<Option<Baseline>, Self::Error>> + Send + '_;
}
