#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod adapters;
pub mod aggregate;
pub mod config;
pub mod controller;
pub mod error;
pub mod genome;
pub mod model;
pub mod penalty;
pub mod progress;
pub mod tiebreak;
pub mod trace;

#[cfg(test)]
mod test_fixtures;

#[path = "../prepare/mod.rs"]
pub mod prepare;

#[path = "../regress/mod.rs"]
pub mod regress;

pub use aggregate::AggregationPolicy;
pub use config::{InteractionPolicy, RegressionMethod, SearchConfig, SearchSettings};
pub use controller::{ModelSpaceSearch, SearchOutcome};
pub use error::SearchError;
pub use genome::{GenomeDescription, Locus};
pub use model::{Formula, ModelState, QtlSet, ScoreRecord, Term};
pub use penalty::{PenaltyVector, TermCounts};
