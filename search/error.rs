use thiserror::Error;

use crate::adapters::AdapterError;
use crate::model::{FormulaError, Term};
use crate::progress::SearchPhase;

/// Failures that abort a search. Validation failures happen before the first
/// model is built; every other variant names the phase and step that failed.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid search input: {0}")]
    Validation(String),

    #[error("Invalid starting model: {0}")]
    StartingModel(#[from] FormulaError),

    #[error(
        "{phase}, step {step}: no candidate produced a finite {what}; no next model can be chosen."
    )]
    NoFiniteScore {
        phase: SearchPhase,
        step: usize,
        what: &'static str,
    },

    #[error(
        "{phase}, step {step}: term {term} chosen for removal has no drop-one statistic for phenotype column {column}. The formula bookkeeping is inconsistent."
    )]
    UnresolvedTerm {
        phase: SearchPhase,
        step: usize,
        term: Term,
        column: usize,
    },

    #[error("{phase}, step {step}: {source}")]
    Adapter {
        phase: SearchPhase,
        step: usize,
        source: AdapterError,
    },

    #[error("{phase}, step {step}: formula update failed: {source}")]
    Formula {
        phase: SearchPhase,
        step: usize,
        source: FormulaError,
    },
}
