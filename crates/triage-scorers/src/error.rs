//! Error type for `triage-scorers`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] triage_core::Error),

  #[error("cannot read model parameters from {path}: {source}")]
  Io {
    path:   PathBuf,
    source: std::io::Error,
  },

  #[error("invalid model parameters in {path}: {source}")]
  Params {
    path:   PathBuf,
    source: serde_json::Error,
  },

  /// Parameters parsed but describe an unusable model.
  #[error("invalid model parameters: {0}")]
  Invalid(String),

  /// An ensemble named a member family with no scorer available.
  #[error("ensemble member {0} is not available")]
  MissingMember(triage_core::score::ScorerFamily),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
