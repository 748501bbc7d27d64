//! Core types and decision logic for the triage engine.
//!
//! This crate is deliberately free of runtime and database dependencies. It
//! holds the domain model, the worst-case-wins risk aggregator, the drift
//! monitor, the promotion rule, and the [`store::ModelStore`] abstraction that
//! storage backends implement.

pub mod aggregate;
pub mod drift;
pub mod error;
pub mod ledger;
pub mod model;
pub mod promotion;
pub mod score;
pub mod scorer;
pub mod severity;
pub mod store;
pub mod symptom;
pub mod verdict;

pub use error::{Error, Result};
