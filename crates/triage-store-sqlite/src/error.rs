//! Error type for `triage-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// Domain rejections: unknown model, duplicate registration, stale status.
  #[error(transparent)]
  Core(#[from] triage_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored enum column holds a value this build does not know.
  #[error("cannot decode column value: {0}")]
  Decode(String),
}

impl Error {
  /// The domain error, when this is a rejection rather than an I/O failure.
  pub fn as_core(&self) -> Option<&triage_core::Error> {
    match self {
      Self::Core(e) => Some(e),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
