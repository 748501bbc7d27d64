//! The promotion controller: the only writer of model status.
//!
//! Decisions for one family run one at a time under that family's mutex.
//! Inside the critical section the controller re-reads both descriptors,
//! refuses stale inputs, applies the promotion rule, commits the decision to
//! the store, and only then swaps the active set.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument};
use triage_core::{
  Error as CoreError,
  drift::DriftSignal,
  ledger::{DecisionDraft, Outcome, PromotionLedgerEntry, ReasonCode, Trigger},
  model::{ModelDescriptor, ModelStatus, ModelVersion},
  promotion::{CandidateState, ComparisonMetrics, PromotionPolicy},
  score::ScorerFamily,
  store::ModelStore,
};

use crate::{Error, Result, active::ActiveModelSet};

pub struct PromotionController<S> {
  store:     Arc<S>,
  policy:    PromotionPolicy,
  active:    Arc<ActiveModelSet>,
  locks:     BTreeMap<ScorerFamily, AsyncMutex<()>>,
  /// Candidates with a decision in flight. Settled states live in the ledger.
  comparing: Mutex<BTreeSet<ModelVersion>>,
}

impl<S: ModelStore> PromotionController<S> {
  pub fn new(store: Arc<S>, policy: PromotionPolicy, active: Arc<ActiveModelSet>) -> Self {
    Self {
      store,
      policy,
      active,
      locks: ScorerFamily::ALL.into_iter().map(|f| (f, AsyncMutex::new(()))).collect(),
      comparing: Mutex::new(BTreeSet::new()),
    }
  }

  pub fn policy(&self) -> &PromotionPolicy { &self.policy }

  /// Where `version` stands in the promotion workflow: `COMPARING` while a
  /// decision is in flight, otherwise the outcome of its latest ledger entry
  /// (`SHADOW` if it has none).
  pub async fn candidate_state(&self, version: &ModelVersion) -> Result<CandidateState> {
    let comparing = self.in_flight().contains(version);
    if comparing {
      return Ok(CandidateState::Comparing);
    }
    let family = self.descriptor(version).await?.family;
    self.settled_state(family, version).await
  }

  /// Candidates with a decision in flight.
  pub fn comparing(&self) -> Vec<ModelVersion> { self.in_flight().iter().cloned().collect() }

  /// Triggered drift signals archived since `incumbent` became active: the
  /// evidence that it is degraded.
  pub async fn recorded_drift(&self, incumbent: &ModelVersion) -> Result<Vec<DriftSignal>> {
    let descriptor = self.descriptor(incumbent).await?;
    expect_status(&descriptor, ModelStatus::Active)?;
    let activated = self
      .store
      .ledger_entries(Some(descriptor.family))
      .await
      .map_err(Error::store)?
      .into_iter()
      .rev()
      .find(|e| e.outcome == Outcome::Promoted && e.new_active == *incumbent)
      .map(|e| e.recorded_at)
      .ok_or(CoreError::NoIncumbent(descriptor.family))?;
    let signals = self
      .store
      .archived_signals_since(activated)
      .await
      .map_err(Error::store)?;
    Ok(signals.into_iter().filter(|s| s.triggered).collect())
  }

  /// Compare `candidate` against the active `incumbent` and record the
  /// outcome.
  ///
  /// Fails with `INSUFFICIENT_EVIDENCE` (nothing recorded, candidate stays
  /// in shadow) or `STATUS_CONFLICT` when either descriptor moved since the
  /// caller looked.
  #[instrument(skip(self, comparison, signals), fields(family = tracing::field::Empty))]
  pub async fn decide(
    &self,
    candidate: &ModelVersion,
    incumbent: &ModelVersion,
    comparison: &ComparisonMetrics,
    signals: &[DriftSignal],
    trigger: Trigger,
  ) -> Result<PromotionLedgerEntry> {
    let family = self.descriptor(candidate).await?.family;
    tracing::Span::current().record("family", tracing::field::display(family));
    let _guard = self.lock(family).lock().await;

    let cand = self.descriptor(candidate).await?;
    let inc = self.descriptor(incumbent).await?;
    if inc.family != family {
      return Err(
        CoreError::FamilyMismatch {
          version:  inc.version,
          expected: family,
          actual:   inc.family,
        }
        .into(),
      );
    }
    expect_status(&cand, ModelStatus::Shadow)?;
    expect_status(&inc, ModelStatus::Active)?;

    let from = self.settled_state(family, candidate).await?;
    if !from.can_advance_to(CandidateState::Comparing) {
      return Err(Error::InvalidTransition {
        version: candidate.clone(),
        from,
        to: CandidateState::Comparing,
      });
    }
    let _comparing = self.begin(candidate);

    let assessment = match self.policy.assess(comparison, signals) {
      Ok(a) => a,
      Err(e) => {
        info!(candidate = %candidate, reason = %e, "promotion on hold");
        return Err(e.into());
      }
    };

    let draft = assessment.into_draft(
      family,
      cand.version.clone(),
      inc.version.clone(),
      trigger,
      self.policy.reject_to,
    );
    let entry = self.store.commit_decision(draft).await.map_err(Error::store)?;

    match entry.outcome {
      Outcome::Promoted => {
        info!(
          candidate = %candidate,
          retired = %incumbent,
          reason = %entry.reason,
          sequence = entry.sequence,
          "candidate promoted"
        );
        self.activate(cand, entry.clone());
      }
      Outcome::Rejected => {
        info!(
          candidate = %candidate,
          reason = %entry.reason,
          sequence = entry.sequence,
          "candidate rejected"
        );
      }
    }
    Ok(entry)
  }

  /// Activate the first model of a family. Refused if the family already
  /// has an active model.
  #[instrument(skip(self))]
  pub async fn bootstrap(
    &self,
    version: &ModelVersion,
    approver: &str,
  ) -> Result<PromotionLedgerEntry> {
    let family = self.descriptor(version).await?.family;
    let _guard = self.lock(family).lock().await;

    let descriptor = self.descriptor(version).await?;
    expect_status(&descriptor, ModelStatus::Shadow)?;
    if self
      .store
      .active_descriptor(family)
      .await
      .map_err(Error::store)?
      .is_some()
    {
      return Err(CoreError::AlreadyBootstrapped(family).into());
    }

    let draft = DecisionDraft {
      family,
      candidate: version.clone(),
      candidate_from: ModelStatus::Shadow,
      previous_active: None,
      new_active: version.clone(),
      outcome: Outcome::Promoted,
      reason: ReasonCode::InitialDeployment,
      deltas: None,
      trigger: Trigger::Bootstrap { approver: approver.to_owned() },
      relaxation: None,
      reject_to: ModelStatus::Shadow,
    };
    let entry = self.store.commit_decision(draft).await.map_err(Error::store)?;
    info!(%family, version = %version, approver, sequence = entry.sequence, "family bootstrapped");
    self.activate(descriptor, entry.clone());
    Ok(entry)
  }

  async fn descriptor(&self, version: &ModelVersion) -> Result<ModelDescriptor> {
    self
      .store
      .get_descriptor(version.clone())
      .await
      .map_err(Error::store)?
      .ok_or_else(|| CoreError::ModelNotFound(version.clone()).into())
  }

  /// Swap a just-committed descriptor into the active set. Nothing between
  /// the commit and the swap can fail.
  fn activate(&self, mut descriptor: ModelDescriptor, entry: PromotionLedgerEntry) {
    descriptor.status = ModelStatus::Active;
    self.active.swap(descriptor, entry);
  }

  /// The candidate's state according to the ledger alone.
  async fn settled_state(
    &self,
    family: ScorerFamily,
    version: &ModelVersion,
  ) -> Result<CandidateState> {
    let last = self
      .store
      .ledger_entries(Some(family))
      .await
      .map_err(Error::store)?
      .into_iter()
      .rev()
      .find(|e| e.candidate == *version);
    Ok(match last.map(|e| e.outcome) {
      Some(Outcome::Promoted) => CandidateState::Promoted,
      Some(Outcome::Rejected) => CandidateState::Rejected,
      None => CandidateState::Shadow,
    })
  }

  fn lock(&self, family: ScorerFamily) -> &AsyncMutex<()> {
    // Every family is inserted in `new`.
    &self.locks[&family]
  }

  fn in_flight(&self) -> MutexGuard<'_, BTreeSet<ModelVersion>> {
    self.comparing.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn begin(&self, version: &ModelVersion) -> Comparing<'_> {
    self.in_flight().insert(version.clone());
    Comparing { set: &self.comparing, version: version.clone() }
  }
}

/// Marks a candidate as `COMPARING` until dropped, whichever way the
/// decision ends.
struct Comparing<'a> {
  set:     &'a Mutex<BTreeSet<ModelVersion>>,
  version: ModelVersion,
}

impl Drop for Comparing<'_> {
  fn drop(&mut self) {
    self.set.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.version);
  }
}

fn expect_status(descriptor: &ModelDescriptor, expected: ModelStatus) -> Result<()> {
  if descriptor.status == expected {
    return Ok(());
  }
  Err(
    CoreError::StatusConflict {
      version: descriptor.version.clone(),
      expected,
      actual: descriptor.status,
    }
    .into(),
  )
}
