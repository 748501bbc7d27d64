//! Error types for `triage-core`.

use thiserror::Error;

use crate::{
  model::{ModelStatus, ModelVersion},
  score::{ScorerFamily, UnavailableScorer},
};

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed input, or the upstream invalid sentinel. Never scored.
  #[error("invalid symptom vector: {0}")]
  InvalidVector(String),

  #[error("unknown symptom code: {0:?}")]
  UnknownSymptom(String),

  /// A single scorer could not produce a result for this case.
  #[error("scorer {family} unavailable: {reason}")]
  ScorerUnavailable {
    family: ScorerFamily,
    reason: String,
  },

  /// Every scorer was unavailable; there is no evidence to aggregate.
  #[error("no scorer produced a result ({} unavailable)", .0.len())]
  AllScorersUnavailable(Vec<UnavailableScorer>),

  #[error("no score results supplied")]
  EmptyInput,

  #[error("invalid score from {family}: {reason}")]
  InvalidScore {
    family: ScorerFamily,
    reason: String,
  },

  /// Promotion is on hold until more shadow evidence accumulates.
  #[error("insufficient evidence for promotion: {0}")]
  InsufficientEvidence(String),

  #[error("model not found: {0}")]
  ModelNotFound(ModelVersion),

  #[error("model {0} is already registered")]
  DuplicateModel(ModelVersion),

  #[error("model {version} belongs to family {actual}, expected {expected}")]
  FamilyMismatch {
    version:  ModelVersion,
    expected: ScorerFamily,
    actual:   ScorerFamily,
  },

  #[error("status conflict for {version}: expected {expected}, found {actual}")]
  StatusConflict {
    version:  ModelVersion,
    expected: ModelStatus,
    actual:   ModelStatus,
  },

  #[error("no active model for family {0}")]
  NoIncumbent(ScorerFamily),

  #[error("family {0} already has an active model")]
  AlreadyBootstrapped(ScorerFamily),

  #[error("ledger chain broken at sequence {0}")]
  LedgerTampered(u64),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Stable taxonomy code for operators and callers that match on strings.
  pub fn code(&self) -> &'static str {
    match self {
      Self::InvalidVector(_) | Self::UnknownSymptom(_) => "INVALID_VECTOR",
      Self::EmptyInput => "EMPTY_INPUT",
      Self::ScorerUnavailable { .. }
      | Self::AllScorersUnavailable(_)
      | Self::InvalidScore { .. } => "SCORER_UNAVAILABLE",
      Self::InsufficientEvidence(_) => "INSUFFICIENT_EVIDENCE",
      Self::StatusConflict { .. } | Self::AlreadyBootstrapped(_) => {
        "STATUS_CONFLICT"
      }
      Self::ModelNotFound(_) | Self::NoIncumbent(_) => "MODEL_NOT_FOUND",
      Self::DuplicateModel(_) | Self::FamilyMismatch { .. } => "INVALID_MODEL",
      Self::LedgerTampered(_) => "LEDGER_TAMPERED",
      Self::Serialization(_) => "SERIALIZATION",
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
