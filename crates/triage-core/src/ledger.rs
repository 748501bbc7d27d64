//! The promotion ledger: an append-only, digest-chained record of every
//! promotion decision.
//!
//! Each entry's digest is the SHA-256 of the canonical JSON of its body, which
//! includes the previous entry's digest. Rewriting any earlier entry breaks
//! every digest after it, and [`verify_chain`] reports the first break.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::{
  Error, Result,
  drift::DriftSignal,
  model::{ModelStatus, ModelVersion},
  score::ScorerFamily,
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
  Promoted,
  Rejected,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReasonCode {
  /// First activation of a family.
  InitialDeployment,
  MetricImprovement,
  /// Promoted only because the incumbent was degraded by drift.
  RelaxedForDegradedIncumbent,
  SensitivityRegression,
  NoMaterialImprovement,
}

/// Candidate minus incumbent for each tracked metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDeltas {
  pub sensitivity:                f64,
  pub specificity:                f64,
  /// Absent when neither side reports subgroups.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub worst_subgroup_sensitivity: Option<f64>,
}

/// What started a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
  Manual { approver: String },
  Drift { window_id: String },
  Scheduled,
  Bootstrap { approver: String },
}

/// Records a safety-tolerance relaxation granted for a degraded incumbent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relaxation {
  pub normal_tolerance:  f64,
  pub applied_tolerance: f64,
  /// The triggered drift signals that justified the relaxation.
  pub signals:           Vec<DriftSignal>,
}

/// A status move the store must apply alongside the ledger entry. The store
/// refuses the whole commit if `version` is not currently in `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
  pub version: ModelVersion,
  pub from:    ModelStatus,
  pub to:      ModelStatus,
}

/// A decision before the store sequences and seals it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionDraft {
  pub family:          ScorerFamily,
  pub candidate:       ModelVersion,
  /// Status the candidate must still be in when the decision commits.
  pub candidate_from:  ModelStatus,
  pub previous_active: Option<ModelVersion>,
  pub new_active:      ModelVersion,
  pub outcome:         Outcome,
  pub reason:          ReasonCode,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deltas:          Option<MetricDeltas>,
  pub trigger:         Trigger,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub relaxation:      Option<Relaxation>,
  /// Where a rejected candidate ends up; ignored for promotions.
  pub reject_to:       ModelStatus,
}

impl DecisionDraft {
  /// The status moves this decision implies, in application order.
  pub fn transitions(&self) -> Vec<StatusTransition> {
    let mut moves = Vec::new();
    match self.outcome {
      Outcome::Promoted => {
        if let Some(previous) = &self.previous_active {
          moves.push(StatusTransition {
            version: previous.clone(),
            from:    ModelStatus::Active,
            to:      ModelStatus::Retired,
          });
        }
        moves.push(StatusTransition {
          version: self.candidate.clone(),
          from:    self.candidate_from,
          to:      ModelStatus::Active,
        });
      }
      Outcome::Rejected if self.reject_to != self.candidate_from => {
        moves.push(StatusTransition {
          version: self.candidate.clone(),
          from:    self.candidate_from,
          to:      self.reject_to,
        });
      }
      Outcome::Rejected => {}
    }
    moves
  }
}

/// Everything an entry's digest covers.
#[derive(Serialize)]
struct EntryBody<'a> {
  entry_id:        Uuid,
  sequence:        u64,
  recorded_at:     &'a DateTime<Utc>,
  family:          ScorerFamily,
  candidate:       &'a ModelVersion,
  previous_active: &'a Option<ModelVersion>,
  new_active:      &'a ModelVersion,
  outcome:         Outcome,
  reason:          ReasonCode,
  deltas:          &'a Option<MetricDeltas>,
  trigger:         &'a Trigger,
  relaxation:      &'a Option<Relaxation>,
  prev_digest:     &'a Option<String>,
}

/// A sealed, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionLedgerEntry {
  pub entry_id:        Uuid,
  /// Position in the global ledger, starting at 1.
  pub sequence:        u64,
  pub recorded_at:     DateTime<Utc>,
  pub family:          ScorerFamily,
  pub candidate:       ModelVersion,
  pub previous_active: Option<ModelVersion>,
  pub new_active:      ModelVersion,
  pub outcome:         Outcome,
  pub reason:          ReasonCode,
  pub deltas:          Option<MetricDeltas>,
  pub trigger:         Trigger,
  pub relaxation:      Option<Relaxation>,
  pub prev_digest:     Option<String>,
  pub digest:          String,
}

impl PromotionLedgerEntry {
  /// Sequence and seal a draft behind the entry whose digest is
  /// `prev_digest` (`None` for the first entry).
  pub fn seal(
    draft: DecisionDraft,
    sequence: u64,
    prev_digest: Option<String>,
    recorded_at: DateTime<Utc>,
  ) -> Result<Self> {
    let mut entry = Self {
      entry_id: Uuid::new_v4(),
      sequence,
      recorded_at,
      family: draft.family,
      candidate: draft.candidate,
      previous_active: draft.previous_active,
      new_active: draft.new_active,
      outcome: draft.outcome,
      reason: draft.reason,
      deltas: draft.deltas,
      trigger: draft.trigger,
      relaxation: draft.relaxation,
      prev_digest,
      digest: String::new(),
    };
    entry.digest = entry.compute_digest()?;
    Ok(entry)
  }

  pub fn compute_digest(&self) -> Result<String> {
    let body = EntryBody {
      entry_id:        self.entry_id,
      sequence:        self.sequence,
      recorded_at:     &self.recorded_at,
      family:          self.family,
      candidate:       &self.candidate,
      previous_active: &self.previous_active,
      new_active:      &self.new_active,
      outcome:         self.outcome,
      reason:          self.reason,
      deltas:          &self.deltas,
      trigger:         &self.trigger,
      relaxation:      &self.relaxation,
      prev_digest:     &self.prev_digest,
    };
    let canonical = serde_json::to_vec(&body)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
  }

  pub fn is_promotion(&self) -> bool { self.outcome == Outcome::Promoted }
}

/// Check a full ledger, in sequence order: contiguous sequence numbers, each
/// digest matches its body, each entry links to its predecessor.
pub fn verify_chain(entries: &[PromotionLedgerEntry]) -> Result<()> {
  let mut prev: Option<&PromotionLedgerEntry> = None;
  for entry in entries {
    let expected_sequence = prev.map_or(1, |p| p.sequence + 1);
    let expected_prev = prev.map(|p| p.digest.as_str());
    if entry.sequence != expected_sequence
      || entry.prev_digest.as_deref() != expected_prev
      || entry.compute_digest()? != entry.digest
    {
      return Err(Error::LedgerTampered(entry.sequence));
    }
    prev = Some(entry);
  }
  Ok(())
}
