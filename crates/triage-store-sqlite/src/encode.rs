//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase, enums their
//! snake_case names. Structured values (metrics, ledger entries, signals,
//! baselines) are compact JSON.

use chrono::{DateTime, Utc};
use triage_core::{
  model::{ModelDescriptor, ModelStatus, ModelVersion},
  score::ScorerFamily,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn encode_family(f: ScorerFamily) -> String { f.to_string() }

pub fn decode_family(s: &str) -> Result<ScorerFamily> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown scorer family: {s:?}")))
}

pub fn encode_status(s: ModelStatus) -> String { s.to_string() }

pub fn decode_status(s: &str) -> Result<ModelStatus> {
  s.parse()
    .map_err(|_| Error::Decode(format!("unknown model status: {s:?}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read from a `model_descriptors` row plus its current status.
pub struct RawDescriptor {
  pub version:           String,
  pub family:            String,
  pub training_snapshot: String,
  pub artifact_ref:      String,
  pub metrics_json:      String,
  pub created_at:        String,
  /// `None` only if the initial transition is missing.
  pub status:            Option<String>,
}

impl RawDescriptor {
  /// Read the columns selected by
  /// [`DESCRIPTOR_COLUMNS`](crate::schema::DESCRIPTOR_COLUMNS).
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      version:           row.get(0)?,
      family:            row.get(1)?,
      training_snapshot: row.get(2)?,
      artifact_ref:      row.get(3)?,
      metrics_json:      row.get(4)?,
      created_at:        row.get(5)?,
      status:            row.get(6)?,
    })
  }

  pub fn into_descriptor(self) -> Result<ModelDescriptor> {
    let status = self
      .status
      .as_deref()
      .ok_or_else(|| Error::Decode(format!("descriptor {} has no status", self.version)))
      .and_then(decode_status)?;
    Ok(ModelDescriptor {
      version: ModelVersion::new(self.version),
      family: decode_family(&self.family)?,
      training_snapshot: self.training_snapshot,
      artifact_ref: self.artifact_ref,
      metrics: serde_json::from_str(&self.metrics_json)?,
      status,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}
