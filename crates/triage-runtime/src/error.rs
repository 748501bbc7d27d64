//! Error type for `triage-runtime`.

use thiserror::Error;
use triage_core::{model::ModelVersion, promotion::CandidateState};

#[derive(Debug, Error)]
pub enum Error {
  /// Domain errors: invalid input, holds, stale decisions.
  #[error(transparent)]
  Core(#[from] triage_core::Error),

  #[error("failed to build scorers: {0}")]
  Scorers(#[from] triage_scorers::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// A candidate workflow move that `SHADOW → COMPARING → {PROMOTED,
  /// REJECTED}` does not allow.
  #[error("candidate {version} cannot move from {from} to {to}")]
  InvalidTransition {
    version: ModelVersion,
    from:    CandidateState,
    to:      CandidateState,
  },

  /// The drift monitor has stopped; the runtime is shutting down.
  #[error("drift monitor is not running")]
  MonitorClosed,
}

impl Error {
  pub(crate) fn store<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    Self::Store(Box::new(e))
  }

  /// Taxonomy code, for domain errors and scorer construction failures.
  pub fn code(&self) -> &'static str {
    match self {
      Self::Core(e) => e.code(),
      Self::Scorers(_) => "INVALID_MODEL",
      Self::Store(_) => "STORE",
      Self::InvalidTransition { .. } => "STATUS_CONFLICT",
      Self::MonitorClosed => "MONITOR_CLOSED",
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
