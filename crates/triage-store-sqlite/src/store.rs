//! [`SqliteStore`]: the SQLite implementation of [`ModelStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use triage_core::{
  Error as CoreError,
  drift::{Baseline, DriftSignal},
  ledger::{DecisionDraft, Outcome, PromotionLedgerEntry},
  model::{ModelDescriptor, ModelStatus, ModelVersion, NewDescriptor},
  score::ScorerFamily,
  store::ModelStore,
};

use crate::{
  Result,
  encode::{
    RawDescriptor, decode_dt, decode_status, encode_dt, encode_family, encode_status, encode_uuid,
  },
  schema::{DESCRIPTOR_COLUMNS, SCHEMA},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A model store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests and one-shot CLI runs.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_descriptors(
    &self,
    filter: &'static str,
    params: Vec<Option<String>>,
  ) -> Result<Vec<ModelDescriptor>> {
    let raws: Vec<RawDescriptor> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {DESCRIPTOR_COLUMNS} FROM model_descriptors d WHERE {filter} ORDER BY d.rowid"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawDescriptor::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDescriptor::into_descriptor).collect()
  }
}

/// Current status of `version` inside an open transaction.
fn current_status(
  tx: &rusqlite::Transaction<'_>,
  version: &str,
) -> rusqlite::Result<Option<String>> {
  tx.query_row(
    "SELECT to_status FROM status_transitions
      WHERE version = ?1 ORDER BY transition_id DESC LIMIT 1",
    rusqlite::params![version],
    |r| r.get(0),
  )
  .optional()
}

/// Check a draft against the current state inside an open transaction.
/// `Ok(Err(..))` is a domain rejection; nothing has been written yet.
fn check_draft(
  tx: &rusqlite::Transaction<'_>,
  draft: &DecisionDraft,
) -> rusqlite::Result<Result<(), CoreError>> {
  let family: Option<String> = tx
    .query_row(
      "SELECT family FROM model_descriptors WHERE version = ?1",
      rusqlite::params![draft.candidate.as_str()],
      |r| r.get(0),
    )
    .optional()?;
  match family {
    None => return Ok(Err(CoreError::ModelNotFound(draft.candidate.clone()))),
    Some(f) if f != encode_family(draft.family) => {
      return Ok(Err(CoreError::FamilyMismatch {
        version:  draft.candidate.clone(),
        expected: draft.family,
        actual:   f.parse().unwrap_or(draft.family),
      }));
    }
    Some(_) => {}
  }

  for t in draft.transitions() {
    let Some(actual) = current_status(tx, t.version.as_str())? else {
      return Ok(Err(CoreError::ModelNotFound(t.version.clone())));
    };
    let actual = decode_status(&actual).unwrap_or(ModelStatus::Retired);
    if actual != t.from {
      return Ok(Err(CoreError::StatusConflict {
        version: t.version.clone(),
        expected: t.from,
        actual,
      }));
    }
  }

  // A promotion with no incumbent is a bootstrap; the family must not
  // already have an active model.
  if draft.outcome == Outcome::Promoted && draft.previous_active.is_none() {
    let active: i64 = tx.query_row(
      "SELECT COUNT(*) FROM model_descriptors d
        WHERE d.family = ?1
          AND (SELECT t.to_status FROM status_transitions t
                WHERE t.version = d.version
                ORDER BY t.transition_id DESC LIMIT 1) = 'active'",
      rusqlite::params![encode_family(draft.family)],
      |r| r.get(0),
    )?;
    if active > 0 {
      return Ok(Err(CoreError::AlreadyBootstrapped(draft.family)));
    }
  }
  Ok(Ok(()))
}

// ─── ModelStore impl ─────────────────────────────────────────────────────────

impl ModelStore for SqliteStore {
  type Error = crate::Error;

  // ── Descriptors ───────────────────────────────────────────────────────

  async fn register_descriptor(&self, input: NewDescriptor) -> Result<ModelDescriptor> {
    let descriptor = ModelDescriptor {
      version:           input.version,
      family:            input.family,
      training_snapshot: input.training_snapshot,
      artifact_ref:      input.artifact_ref,
      metrics:           input.metrics,
      status:            ModelStatus::Shadow,
      created_at:        Utc::now(),
    };

    let version      = descriptor.version.as_str().to_owned();
    let family       = encode_family(descriptor.family);
    let snapshot     = descriptor.training_snapshot.clone();
    let artifact     = descriptor.artifact_ref.clone();
    let metrics_json = serde_json::to_string(&descriptor.metrics)?;
    let at_str       = encode_dt(descriptor.created_at);
    let shadow       = encode_status(ModelStatus::Shadow);

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let n = tx.execute(
          "INSERT OR IGNORE INTO model_descriptors (
             version, family, training_snapshot, artifact_ref, metrics_json, created_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![version, family, snapshot, artifact, metrics_json, at_str],
        )?;
        if n == 0 {
          return Ok(false);
        }
        tx.execute(
          "INSERT INTO status_transitions (version, from_status, to_status, entry_id, recorded_at)
           VALUES (?1, NULL, ?2, NULL, ?3)",
          rusqlite::params![version, shadow, at_str],
        )?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    if !inserted {
      return Err(CoreError::DuplicateModel(descriptor.version).into());
    }
    Ok(descriptor)
  }

  async fn get_descriptor(&self, version: ModelVersion) -> Result<Option<ModelDescriptor>> {
    let mut found = self
      .query_descriptors("d.version = ?1", vec![Some(version.as_str().to_owned())])
      .await?;
    Ok(found.pop())
  }

  async fn list_descriptors(
    &self,
    family: Option<ScorerFamily>,
    status: Option<ModelStatus>,
  ) -> Result<Vec<ModelDescriptor>> {
    self
      .query_descriptors(
        "(?1 IS NULL OR d.family = ?1) AND (?2 IS NULL OR status = ?2)",
        vec![family.map(encode_family), status.map(encode_status)],
      )
      .await
  }

  async fn active_descriptor(&self, family: ScorerFamily) -> Result<Option<ModelDescriptor>> {
    let mut active = self
      .list_descriptors(Some(family), Some(ModelStatus::Active))
      .await?;
    Ok(active.pop())
  }

  // ── Ledger ────────────────────────────────────────────────────────────

  async fn commit_decision(&self, draft: DecisionDraft) -> Result<PromotionLedgerEntry> {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if let Err(rejection) = check_draft(&tx, &draft)? {
          return Ok(Err(rejection));
        }

        let last: Option<(i64, String)> = tx
          .query_row(
            "SELECT sequence, digest FROM ledger_entries ORDER BY sequence DESC LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
          )
          .optional()?;
        let (sequence, prev_digest) = match last {
          Some((seq, digest)) => (seq as u64 + 1, Some(digest)),
          None => (1, None),
        };

        let transitions = draft.transitions();
        let entry = match PromotionLedgerEntry::seal(draft, sequence, prev_digest, Utc::now()) {
          Ok(entry) => entry,
          Err(e) => return Ok(Err(e)),
        };
        let entry_json = match serde_json::to_string(&entry) {
          Ok(json) => json,
          Err(e) => return Ok(Err(e.into())),
        };
        let entry_id = encode_uuid(entry.entry_id);
        let at_str = encode_dt(entry.recorded_at);

        tx.execute(
          "INSERT INTO ledger_entries (sequence, entry_id, family, recorded_at, digest, entry_json)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            entry.sequence as i64,
            entry_id,
            encode_family(entry.family),
            at_str,
            entry.digest,
            entry_json,
          ],
        )?;
        for t in transitions {
          tx.execute(
            "INSERT INTO status_transitions (version, from_status, to_status, entry_id, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
              t.version.as_str(),
              encode_status(t.from),
              encode_status(t.to),
              entry_id,
              at_str,
            ],
          )?;
        }
        tx.commit()?;
        Ok(Ok(entry))
      })
      .await?;

    Ok(outcome?)
  }

  async fn ledger_entries(
    &self,
    family: Option<ScorerFamily>,
  ) -> Result<Vec<PromotionLedgerEntry>> {
    let family = family.map(encode_family);
    let rows: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT entry_json FROM ledger_entries
            WHERE (?1 IS NULL OR family = ?1)
            ORDER BY sequence",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![family], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .iter()
      .map(|json| Ok(serde_json::from_str(json)?))
      .collect()
  }

  // ── Drift ─────────────────────────────────────────────────────────────

  async fn archive_signals(&self, signals: Vec<DriftSignal>) -> Result<usize> {
    let rows = signals
      .iter()
      .filter(|s| s.triggered)
      .map(|s| Ok((s.window_id.clone(), s.metric.to_string(), serde_json::to_string(s)?)))
      .collect::<Result<Vec<(String, String, String)>>>()?;
    if rows.is_empty() {
      return Ok(0);
    }
    let at_str = encode_dt(Utc::now());

    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for (window_id, metric, json) in &rows {
          tx.execute(
            "INSERT INTO drift_signals (window_id, metric, archived_at, signal_json)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![window_id, metric, at_str, json],
          )?;
        }
        tx.commit()?;
        Ok(rows.len())
      })
      .await?;
    Ok(written)
  }

  async fn archived_signals(&self, limit: Option<usize>) -> Result<Vec<DriftSignal>> {
    // SQLite treats a negative LIMIT as "no limit".
    let limit = limit.map_or(-1, |n| n as i64);
    let rows: Vec<String> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT signal_json FROM drift_signals ORDER BY signal_id DESC LIMIT ?1",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![limit], |r| r.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .iter()
      .map(|json| Ok(serde_json::from_str(json)?))
      .collect()
  }

  async fn archived_signals_since(&self, since: DateTime<Utc>) -> Result<Vec<DriftSignal>> {
    let rows: Vec<(String, String)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn
          .prepare("SELECT archived_at, signal_json FROM drift_signals ORDER BY signal_id")?;
        let rows = stmt
          .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
          .collect::<rusqlite::Result<Vec<(String, String)>>>()?;
        Ok(rows)
      })
      .await?;

    let mut signals = Vec::new();
    for (at, json) in rows {
      if decode_dt(&at)? >= since {
        signals.push(serde_json::from_str(&json)?);
      }
    }
    Ok(signals)
  }

  async fn store_baseline(&self, baseline: Baseline) -> Result<()> {
    let at_str = encode_dt(baseline.captured_at);
    let json = serde_json::to_string(&baseline)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO baselines (captured_at, baseline_json) VALUES (?1, ?2)",
          rusqlite::params![at_str, json],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn latest_baseline(&self) -> Result<Option<Baseline>> {
    let json: Option<String> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT baseline_json FROM baselines ORDER BY baseline_id DESC LIMIT 1",
              [],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
  }
}
