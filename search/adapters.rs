//! Contracts between the search engine and the statistical backend.
//!
//! The engine never fits a regression itself. It asks a [`GenomeScanAdapter`] for
//! LOD profiles over candidate positions, a [`ModelFitAdapter`] for the LOD of a
//! fixed model and the drop-one contribution of each of its terms, and a
//! [`PositionRefinementAdapter`] to move loci along their chromosomes.
//!
//! Adapters are bound to one prepared dataset, covariates included. Per-column
//! statistics are always returned in the order of the `columns` slice passed in.
//! All adapters are `Sync` so independent candidates may be evaluated in parallel.

use thiserror::Error;

use crate::aggregate::AggregationPolicy;
use crate::genome::Locus;
use crate::model::{Formula, QtlSet, Term};

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("genome scan failed: {0}")]
    Scan(String),
    #[error("model fit failed: {0}")]
    Fit(String),
    #[error("position refinement failed: {0}")]
    Refine(String),
    #[error("phenotype column {0} is not available to the backend")]
    UnknownColumn(usize),
    #[error("locus {0} is not on the backend's genome grid")]
    UnknownLocus(Locus),
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// LOD profile at one candidate position, one value per requested column.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPoint {
    pub locus: Locus,
    pub lod: Vec<f64>,
}

/// Two-locus scan result for one pair of positions.
#[derive(Debug, Clone, PartialEq)]
pub struct PairScanPoint {
    pub first: Locus,
    pub second: Locus,
    /// Two loci plus their interaction, against the null model.
    pub lod_full: Vec<f64>,
    /// Two additive loci, against the null model.
    pub lod_additive: Vec<f64>,
}

/// Fit of a fixed model to one phenotype column.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    /// LOD of the model against the covariates-only null model.
    pub lod: f64,
    /// LOD lost when each QTL term is removed alone. Removing a main effect also
    /// removes the interactions that reference its locus.
    pub drop_one: Vec<(Term, f64)>,
}

impl FitResult {
    pub fn drop_one_for(&self, term: &Term) -> Option<f64> {
        self.drop_one
            .iter()
            .find(|(candidate, _)| candidate == term)
            .map(|&(_, lod)| lod)
    }
}

pub trait GenomeScanAdapter: Sync {
    /// One-locus scan over every candidate position, in genome order.
    fn scan_single_locus(&self, columns: &[usize]) -> Result<Vec<ScanPoint>, AdapterError>;

    /// Two-locus scan over every pair of distinct candidate positions.
    fn scan_two_locus(&self, columns: &[usize]) -> Result<Vec<PairScanPoint>, AdapterError>;

    /// Scan for one more locus given the current model. The LOD at each position
    /// is the improvement over the current model; with `interacting_with = Some(j)`
    /// the new locus also enters an interaction with locus `j`. Positions that
    /// cannot be evaluated report `NaN`.
    fn scan_add_locus(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        columns: &[usize],
        interacting_with: Option<usize>,
    ) -> Result<Vec<ScanPoint>, AdapterError>;
}

pub trait ModelFitAdapter: Sync {
    fn fit(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        column: usize,
    ) -> Result<FitResult, AdapterError>;
}

pub trait PositionRefinementAdapter: Sync {
    /// Moves loci along their chromosomes to improve the aggregated model LOD.
    /// The term structure is unchanged; only positions may differ in the result.
    fn refine(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        columns: &[usize],
        policy: AggregationPolicy,
    ) -> Result<QtlSet, AdapterError>;
}
