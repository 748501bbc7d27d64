//! Reference scorers for the triage engine.
//!
//! Three deterministic implementations of [`triage_core::scorer::Scorer`]:
//! a weighted common-disease model, a rule-based rare/critical model, and an
//! ensemble that votes over the other two. Parameters are plain serde structs
//! with built-in defaults; a descriptor's `artifact_ref` either names a JSON
//! parameter file or is [`BUILTIN`].
//!
//! # Quick start
//!
//! ```no_run
//! use triage_scorers::builtin_registry;
//!
//! let registry = builtin_registry().unwrap();
//! println!("{registry:?}");
//! ```

pub mod common;
pub mod ensemble;
pub mod error;
pub mod rare;

use std::{path::Path, sync::Arc};

pub use error::{Error, Result};
use serde::de::DeserializeOwned;
use triage_core::{
  model::{ModelDescriptor, ModelVersion},
  score::ScorerFamily,
  scorer::{Scorer, ScorerRegistry},
};

use crate::{
  common::{CommonDiseaseScorer, CommonModelParams},
  ensemble::{EnsembleParams, EnsembleScorer},
  rare::{RareCriticalScorer, RareModelParams},
};

/// Artifact reference meaning "use the built-in default parameters".
pub const BUILTIN: &str = "builtin";

/// Versions used by [`builtin_registry`].
pub const BUILTIN_COMMON_VERSION: &str = "common-builtin";
pub const BUILTIN_RARE_VERSION: &str = "rare-critical-builtin";

fn load<T: DeserializeOwned + Default>(artifact_ref: &str) -> Result<T> {
  if artifact_ref == BUILTIN {
    return Ok(T::default());
  }
  let path = Path::new(artifact_ref);
  let text = std::fs::read_to_string(path)
    .map_err(|source| Error::Io { path: path.to_owned(), source })?;
  serde_json::from_str(&text).map_err(|source| Error::Params { path: path.to_owned(), source })
}

/// Build a common or rare/critical scorer from its descriptor. Ensembles
/// need their members and go through [`build_registry`].
pub fn build_scorer(descriptor: &ModelDescriptor) -> Result<Arc<dyn Scorer>> {
  let version = descriptor.version.clone();
  match descriptor.family {
    ScorerFamily::Common => Ok(Arc::new(CommonDiseaseScorer::new(
      version,
      load::<CommonModelParams>(&descriptor.artifact_ref)?,
    )?)),
    ScorerFamily::RareCritical => Ok(Arc::new(RareCriticalScorer::new(
      version,
      load::<RareModelParams>(&descriptor.artifact_ref)?,
    )?)),
    ScorerFamily::Ensemble => Err(Error::Invalid(format!(
      "ensemble {version} must be built with its members"
    ))),
  }
}

/// Build a registry from the active descriptor of each family. Ensemble
/// members resolve against the scorers built here.
pub fn build_registry(active: &[ModelDescriptor]) -> Result<ScorerRegistry> {
  let mut registry = ScorerRegistry::new();
  for d in active.iter().filter(|d| d.family != ScorerFamily::Ensemble) {
    registry.register(build_scorer(d)?);
  }
  for d in active.iter().filter(|d| d.family == ScorerFamily::Ensemble) {
    let params: EnsembleParams = load(&d.artifact_ref)?;
    let members = params
      .members
      .iter()
      .map(|f| registry.get(*f).cloned().ok_or(Error::MissingMember(*f)))
      .collect::<Result<Vec<_>>>()?;
    registry.register(Arc::new(EnsembleScorer::new(d.version.clone(), members)));
  }
  Ok(registry)
}

/// Common and rare/critical scorers with default parameters.
pub fn builtin_registry() -> Result<ScorerRegistry> {
  Ok(
    ScorerRegistry::new()
      .with(Arc::new(CommonDiseaseScorer::new(
        ModelVersion::from(BUILTIN_COMMON_VERSION),
        CommonModelParams::default(),
      )?))
      .with(Arc::new(RareCriticalScorer::new(
        ModelVersion::from(BUILTIN_RARE_VERSION),
        RareModelParams::default(),
      )?)),
  )
}
