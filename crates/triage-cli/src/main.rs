//! `triage`: operator CLI for the triage engine.
//!
//! Reads `config.toml` (or the path given with `--config`), overlaid with
//! `TRIAGE__*` environment variables, and opens the SQLite store named by
//! `store_path`.
//!
//! # Usage
//!
//! ```text
//! triage diagnose case.json
//! triage models register descriptor.json
//! triage models bootstrap common-7 --approver dr.ops
//! triage promote common-8 --comparison shadow.json --signals drift.json
//! triage ledger --verify
//! triage baseline traffic.jsonl --save
//! triage drift traffic.jsonl --baseline baseline.json
//! ```

mod input;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use triage_core::{
  drift::{Baseline, DriftMonitor, DriftSignal, Observation, ObservationWindow},
  ledger::{PromotionLedgerEntry, Trigger, verify_chain},
  model::{ModelStatus, ModelVersion, NewDescriptor},
  promotion::ComparisonMetrics,
  score::ScorerFamily,
  store::ModelStore,
};
use triage_runtime::{Runtime, TriageConfig};
use triage_store_sqlite::SqliteStore;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "triage", author, version, about = "Clinical triage engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Score one case and print the verdict as JSON.
  Diagnose {
    /// Case file: a JSON object keyed by symptom code.
    case: PathBuf,
  },

  /// Register, list, and bootstrap model descriptors.
  Models {
    #[command(subcommand)]
    command: ModelsCommand,
  },

  /// Compare a shadow candidate with its family's active model.
  Promote {
    candidate: String,

    /// Shadow-evaluation metrics (JSON `ComparisonMetrics`).
    #[arg(long)]
    comparison: PathBuf,

    /// Records the decision as a manual one by this approver.
    #[arg(long)]
    approver: Option<String>,

    /// Drift signals (JSON array) describing the incumbent's health. When
    /// omitted, the signals archived since the incumbent went live are used.
    #[arg(long)]
    signals: Option<PathBuf>,
  },

  /// Print the promotion ledger.
  Ledger {
    #[arg(long)]
    family: Option<ScorerFamily>,

    /// Check the digest chain of the whole ledger.
    #[arg(long)]
    verify: bool,
  },

  /// Evaluate drift over consecutive windows of an observation log.
  Drift {
    /// Observation log, one JSON record per line.
    observations: PathBuf,

    /// Baseline JSON; the store's latest baseline when omitted.
    #[arg(long)]
    baseline: Option<PathBuf>,

    /// Archive the triggered signals in the store.
    #[arg(long)]
    archive: bool,
  },

  /// Capture a drift baseline from an observation log.
  Baseline {
    observations: PathBuf,

    /// Store the baseline as the monitor's reference.
    #[arg(long)]
    save: bool,
  },
}

#[derive(Subcommand)]
enum ModelsCommand {
  /// Register a descriptor (JSON `NewDescriptor`) in shadow.
  Register { descriptor: PathBuf },

  List {
    #[arg(long)]
    family: Option<ScorerFamily>,

    #[arg(long)]
    status: Option<ModelStatus>,
  },

  /// Activate the first model of a family.
  Bootstrap {
    version: String,

    #[arg(long)]
    approver: String,
  },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("TRIAGE").separator("__"))
    .build()
    .context("failed to read config file")?;
  let config: TriageConfig = settings
    .try_deserialize()
    .context("failed to deserialise TriageConfig")?;

  let store_path = expand_tilde(&config.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  match cli.command {
    Command::Diagnose { case } => {
      let vector = input::read_case(&case, &config.vocabulary(), config.min_symptoms)?;
      let rt = Runtime::start(config, store).await.map_err(coded)?;
      let verdict = rt.diagnose(vector).await.map_err(coded);
      rt.shutdown().await;
      print_json(&verdict?)?;
    }

    Command::Models { command } => models(command, config, store).await?,

    Command::Promote { candidate, comparison, approver, signals } => {
      let candidate = ModelVersion::new(candidate);
      let comparison: ComparisonMetrics = input::read_json(&comparison)?;
      let signals: Option<Vec<DriftSignal>> = signals.map(|p| input::read_json(&p)).transpose()?;

      let descriptor = store
        .get_descriptor(candidate.clone())
        .await?
        .with_context(|| format!("unknown model {candidate}"))?;
      let incumbent = store
        .active_descriptor(descriptor.family)
        .await?
        .with_context(|| format!("family {} has no active model; bootstrap it first", descriptor.family))?;

      let rt = Runtime::start(config, store).await.map_err(coded)?;
      let entry = promote(&rt, &candidate, &incumbent.version, &comparison, signals, approver).await;
      rt.shutdown().await;
      print_json(&entry?)?;
    }

    Command::Ledger { family, verify } => {
      let all = store.ledger_entries(None).await?;
      if verify {
        verify_chain(&all).map_err(|e| anyhow::anyhow!("[{}] {e}", e.code()))?;
        eprintln!("ledger verified: {} entries", all.len());
      }
      let shown: Vec<_> = all
        .into_iter()
        .filter(|e| family.is_none_or(|f| e.family == f))
        .collect();
      print_json(&shown)?;
    }

    Command::Drift { observations, baseline, archive } => {
      let log: Vec<Observation> = input::read_jsonl(&observations)?;
      let baseline = match baseline {
        Some(path) => input::read_json(&path)?,
        None => store
          .latest_baseline()
          .await?
          .context("no baseline in the store; pass --baseline or run `triage baseline --save`")?,
      };

      let width = Duration::seconds(config.drift.window_secs as i64);
      let mut monitor = DriftMonitor::new(config.drift.clone(), baseline);
      let signals: Vec<DriftSignal> = ObservationWindow::partition(&log, width)
        .iter()
        .flat_map(|w| monitor.evaluate(w))
        .collect();

      if archive {
        let n = store.archive_signals(signals.clone()).await?;
        eprintln!("archived {n} triggered signals");
      }
      print_json(&signals)?;
    }

    Command::Baseline { observations, save } => {
      let log: Vec<Observation> = input::read_jsonl(&observations)?;
      let baseline = Baseline::capture(&log, Utc::now()).map_err(|e| anyhow::anyhow!("[{}] {e}", e.code()))?;
      if save {
        store.store_baseline(baseline.clone()).await?;
        eprintln!("baseline saved from {} observations", baseline.observations);
      }
      print_json(&baseline)?;
    }
  }

  Ok(())
}

async fn models(command: ModelsCommand, config: TriageConfig, store: SqliteStore) -> anyhow::Result<()> {
  match command {
    ModelsCommand::Register { descriptor } => {
      let input: NewDescriptor = input::read_json(&descriptor)?;
      let registered = store.register_descriptor(input).await?;
      print_json(&registered)?;
    }

    ModelsCommand::List { family, status } => {
      for d in store.list_descriptors(family, status).await? {
        println!(
          "{:<24} {:<14} {:<8} {}  {}",
          d.version.as_str(),
          d.family.to_string(),
          d.status.to_string(),
          d.created_at.format("%Y-%m-%d %H:%M"),
          d.artifact_ref
        );
      }
    }

    ModelsCommand::Bootstrap { version, approver } => {
      let rt = Runtime::start(config, store).await.map_err(coded)?;
      let entry = rt
        .controller()
        .bootstrap(&ModelVersion::new(version), &approver)
        .await
        .map_err(coded);
      rt.shutdown().await;
      print_json(&entry?)?;
    }
  }
  Ok(())
}

/// Decide a promotion. Without explicit signals the incumbent's health is
/// judged from the drift archived since it went live.
async fn promote(
  rt: &Runtime<SqliteStore>,
  candidate: &ModelVersion,
  incumbent: &ModelVersion,
  comparison: &ComparisonMetrics,
  signals: Option<Vec<DriftSignal>>,
  approver: Option<String>,
) -> anyhow::Result<PromotionLedgerEntry> {
  let signals = match signals {
    Some(signals) => signals,
    None => {
      let recorded = rt.controller().recorded_drift(incumbent).await.map_err(coded)?;
      if !recorded.is_empty() {
        eprintln!("incumbent {incumbent} has {} archived drift signals", recorded.len());
      }
      recorded
    }
  };

  let trigger = match (approver, signals.iter().find(|s| s.triggered)) {
    (Some(approver), _) => Trigger::Manual { approver },
    (None, Some(signal)) => Trigger::Drift { window_id: signal.window_id.clone() },
    (None, None) => Trigger::Scheduled,
  };

  rt.controller()
    .decide(candidate, incumbent, comparison, &signals, trigger)
    .await
    .map_err(coded)
}

/// Prefix runtime errors with their taxonomy code.
fn coded(e: triage_runtime::Error) -> anyhow::Error {
  let code = e.code();
  anyhow::Error::new(e).context(code)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  let text = serde_json::to_string_pretty(value).context("failed to serialise output")?;
  println!("{text}");
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
