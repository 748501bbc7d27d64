//! SQL schema for the triage SQLite store.
//!
//! Executed once at connection startup. Migrations, when needed, are gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Descriptor rows never change; status lives in status_transitions.
CREATE TABLE IF NOT EXISTS model_descriptors (
    version           TEXT PRIMARY KEY,
    family            TEXT NOT NULL,   -- 'common' | 'rare_critical' | 'ensemble'
    training_snapshot TEXT NOT NULL,
    artifact_ref      TEXT NOT NULL,
    metrics_json      TEXT NOT NULL,
    created_at        TEXT NOT NULL    -- ISO 8601 UTC; server-assigned
);

-- Every status a descriptor has held. The latest row per version is the
-- current status. entry_id is NULL for the initial 'shadow' row.
CREATE TABLE IF NOT EXISTS status_transitions (
    transition_id INTEGER PRIMARY KEY AUTOINCREMENT,
    version       TEXT NOT NULL REFERENCES model_descriptors(version),
    from_status   TEXT,
    to_status     TEXT NOT NULL,
    entry_id      TEXT REFERENCES ledger_entries(entry_id),
    recorded_at   TEXT NOT NULL
);

-- The promotion ledger. entry_json holds the full sealed entry, digest
-- included; the other columns are for lookup.
CREATE TABLE IF NOT EXISTS ledger_entries (
    sequence    INTEGER PRIMARY KEY,
    entry_id    TEXT NOT NULL UNIQUE,
    family      TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    digest      TEXT NOT NULL UNIQUE,
    entry_json  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS drift_signals (
    signal_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    window_id   TEXT NOT NULL,
    metric      TEXT NOT NULL,
    archived_at TEXT NOT NULL,
    signal_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS baselines (
    baseline_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    captured_at   TEXT NOT NULL,
    baseline_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS descriptors_family_idx  ON model_descriptors(family);
CREATE INDEX IF NOT EXISTS transitions_version_idx ON status_transitions(version);
CREATE INDEX IF NOT EXISTS ledger_family_idx       ON ledger_entries(family);

CREATE TRIGGER IF NOT EXISTS descriptors_no_update
BEFORE UPDATE ON model_descriptors
BEGIN SELECT RAISE(ABORT, 'model_descriptors is append-only'); END;

CREATE TRIGGER IF NOT EXISTS descriptors_no_delete
BEFORE DELETE ON model_descriptors
BEGIN SELECT RAISE(ABORT, 'model_descriptors is append-only'); END;

CREATE TRIGGER IF NOT EXISTS transitions_no_update
BEFORE UPDATE ON status_transitions
BEGIN SELECT RAISE(ABORT, 'status_transitions is append-only'); END;

CREATE TRIGGER IF NOT EXISTS transitions_no_delete
BEFORE DELETE ON status_transitions
BEGIN SELECT RAISE(ABORT, 'status_transitions is append-only'); END;

CREATE TRIGGER IF NOT EXISTS ledger_no_update
BEFORE UPDATE ON ledger_entries
BEGIN SELECT RAISE(ABORT, 'ledger_entries is append-only'); END;

CREATE TRIGGER IF NOT EXISTS ledger_no_delete
BEFORE DELETE ON ledger_entries
BEGIN SELECT RAISE(ABORT, 'ledger_entries is append-only'); END;

PRAGMA user_version = 1;
";

/// Descriptor columns plus the current status, for `SELECT ... FROM
/// model_descriptors d`.
pub const DESCRIPTOR_COLUMNS: &str = "
    d.version, d.family, d.training_snapshot, d.artifact_ref,
    d.metrics_json, d.created_at,
    (SELECT t.to_status FROM status_transitions t
      WHERE t.version = d.version
      ORDER BY t.transition_id DESC LIMIT 1) AS status
";
