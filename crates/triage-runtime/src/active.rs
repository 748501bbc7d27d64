//! The active model set: which descriptor serves each family right now.
//!
//! Readers take a whole snapshot from a `watch` channel, so they never see a
//! half-applied promotion. Only the promotion controller writes.

use std::{
  collections::BTreeMap,
  sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::watch;
use triage_core::{
  ledger::PromotionLedgerEntry,
  model::{ModelDescriptor, ModelVersion},
  score::ScorerFamily,
  store::ModelStore,
};

use crate::{Error, Result};

/// One consistent view of the active descriptors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveModels {
  /// Bumped on every swap; `0` is the state loaded at startup.
  pub generation:  u64,
  pub descriptors: BTreeMap<ScorerFamily, ModelDescriptor>,
}

impl ActiveModels {
  pub fn get(&self, family: ScorerFamily) -> Option<&ModelDescriptor> {
    self.descriptors.get(&family)
  }

  pub fn is_empty(&self) -> bool { self.descriptors.is_empty() }
}

/// Delivered to `on_promotion` callbacks after the ledger commit and the swap.
#[derive(Debug, Clone)]
pub struct PromotionEvent {
  pub family:     ScorerFamily,
  pub previous:   Option<ModelVersion>,
  pub descriptor: ModelDescriptor,
  pub entry:      PromotionLedgerEntry,
  pub generation: u64,
}

type PromotionCallback = Arc<dyn Fn(&PromotionEvent) + Send + Sync>;

pub struct ActiveModelSet {
  tx:        watch::Sender<Arc<ActiveModels>>,
  callbacks: Mutex<Vec<PromotionCallback>>,
}

impl ActiveModelSet {
  pub fn new(initial: ActiveModels) -> Self {
    let (tx, _) = watch::channel(Arc::new(initial));
    Self { tx, callbacks: Mutex::new(Vec::new()) }
  }

  /// Read the active descriptor of every family from `store`.
  pub async fn load<S: ModelStore>(store: &S) -> Result<Self> {
    let mut descriptors = BTreeMap::new();
    for family in ScorerFamily::ALL {
      if let Some(d) = store.active_descriptor(family).await.map_err(Error::store)? {
        descriptors.insert(family, d);
      }
    }
    Ok(Self::new(ActiveModels { generation: 0, descriptors }))
  }

  pub fn snapshot(&self) -> Arc<ActiveModels> { self.tx.borrow().clone() }

  pub fn subscribe(&self) -> watch::Receiver<Arc<ActiveModels>> { self.tx.subscribe() }

  pub fn active_model(&self, family: ScorerFamily) -> Option<ModelDescriptor> {
    self.tx.borrow().get(family).cloned()
  }

  /// Register a callback fired after every promotion, in registration order.
  pub fn on_promotion<F>(&self, callback: F)
  where
    F: Fn(&PromotionEvent) + Send + Sync + 'static,
  {
    self
      .callbacks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(Arc::new(callback));
  }

  /// Install `descriptor` as the active model of its family and notify.
  /// The caller has already committed `entry`.
  pub(crate) fn swap(&self, descriptor: ModelDescriptor, entry: PromotionLedgerEntry) {
    let family = descriptor.family;
    let mut generation = 0;
    let mut previous = None;
    self.tx.send_modify(|current| {
      let mut next = ActiveModels::clone(current);
      next.generation += 1;
      previous = next
        .descriptors
        .insert(family, descriptor.clone())
        .map(|d| d.version);
      generation = next.generation;
      *current = Arc::new(next);
    });

    let event = PromotionEvent { family, previous, descriptor, entry, generation };
    let callbacks = self
      .callbacks
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    for callback in callbacks {
      callback(&event);
    }
  }
}

impl std::fmt::Debug for ActiveModelSet {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ActiveModelSet")
      .field("active", &*self.tx.borrow())
      .finish_non_exhaustive()
  }
}
