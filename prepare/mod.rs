//! # Data preparation
//!
//! Everything between user files on disk and the regression backend: TSV loaders
//! for phenotypes, covariates and genotype probabilities, the cross-file
//! reconciliation that yields a [`PreparedData`], and the reconciliation of a
//! recorded starting model with the prepared dataset.
//!
//! Missing values are carried as `NaN` until [`prepare_dataset`] drops every
//! individual that is incomplete for the selected phenotypes or the covariates.

use ndarray::{Array2, Array3, ArrayView2, Axis};
use thiserror::Error;

use crate::genome::{GenomeDescription, GenomeError, Locus};
use crate::model::FormulaError;

pub mod dataset;
pub mod io;
pub mod start;

pub use dataset::prepare_dataset;
pub use io::{load_covariates, load_genotype_probabilities, load_phenotypes};
pub use start::{ReconciledStart, StartingLocus, StartingModel, reconcile_starting_model};

/// Which genotype encodings a prepared dataset carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenotypeRepresentation {
    /// Conditional genotype probabilities on the position grid.
    pub probabilities: bool,
    /// Number of imputed genotype draws, if any were generated.
    pub draws: Option<usize>,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to read tabular input: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse starting model TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("'{path}' must start with a '{expected}' column, found '{found}'.")]
    UnexpectedHeader {
        path: String,
        expected: &'static str,
        found: String,
    },
    #[error("'{path}' has no data columns after the identifier column(s).")]
    NoDataColumns { path: String },
    #[error("'{path}', line {line}, column '{column}': cannot parse '{value}' as a number.")]
    ParseValue {
        path: String,
        line: u64,
        column: String,
        value: String,
    },
    #[error("'{path}', line {line}: non-finite value in column '{column}'.")]
    NonFiniteValue {
        path: String,
        line: u64,
        column: String,
    },
    #[error("Individual '{0}' appears more than once.")]
    DuplicateIndividual(String),
    #[error(
        "Genotype probability rows for chromosome '{0}' are not contiguous. Rows must be grouped by chromosome."
    )]
    NonContiguousChromosome(String),
    #[error(
        "Position {locus} lists genotype classes {found:?}, but the first position lists {expected:?}."
    )]
    InconsistentGenotypeClasses {
        locus: Locus,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("Probability {value} for individual '{individual}' at {locus} is outside [0, 1].")]
    ProbabilityOutOfRange {
        locus: Locus,
        individual: String,
        value: f64,
    },
    #[error("Genotype probabilities for individual '{individual}' at {locus} sum to {sum}, not 1.")]
    ProbabilitiesDoNotSum {
        locus: Locus,
        individual: String,
        sum: f64,
    },
    #[error("At least two genotype classes are required, found {0}.")]
    TooFewGenotypeClasses(usize),
    #[error("Invalid genome grid: {0}")]
    Genome(#[from] GenomeError),
    #[error("No phenotype columns were selected.")]
    NoColumnsSelected,
    #[error("Phenotype column {index} does not exist; the file has {available} column(s).")]
    ColumnOutOfRange { index: usize, available: usize },
    #[error("Phenotype column {0} was selected more than once.")]
    DuplicateColumn(usize),
    #[error(
        "Only {found} individual(s) have genotypes and complete phenotype and covariate data; at least {required} are needed."
    )]
    InsufficientIndividuals { found: usize, required: usize },
    #[error("Phenotype '{0}' has zero variance among the retained individuals.")]
    ZeroVariance(String),
    #[error("The starting model lists no loci.")]
    EmptyStartingModel,
    #[error("Starting locus {0} lies on a chromosome absent from the genotype data.")]
    UnknownChromosome(Locus),
    #[error("Starting loci {0} and {1} fall on the same grid position.")]
    CollidingLoci(Locus, Locus),
    #[error("Starting interaction Q{0}:Q{1} refers to a locus the model does not list.")]
    InteractionOutOfRange(usize, usize),
    #[error("Invalid starting formula: {0}")]
    Formula(#[from] FormulaError),
}

/// Phenotype or covariate table, one row per individual. Missing values are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericTable {
    pub ids: Vec<String>,
    pub names: Vec<String>,
    /// Shape: [n_individuals, n_columns].
    pub values: Array2<f64>,
}

impl NumericTable {
    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.values.ncols()
    }

    pub fn row_of(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|candidate| candidate == id)
    }
}

/// Conditional genotype probabilities on a position grid.
#[derive(Debug, Clone)]
pub struct GenotypeProbabilities {
    pub genome: GenomeDescription,
    /// Genotype class labels, identical at every position.
    pub classes: Vec<String>,
    pub ids: Vec<String>,
    /// Shape: [n_positions, n_individuals, n_classes], positions in genome order.
    pub probs: Array3<f64>,
}

impl GenotypeProbabilities {
    pub fn n_individuals(&self) -> usize {
        self.ids.len()
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Probabilities at one grid position. Shape: [n_individuals, n_classes].
    pub fn at(&self, position: usize) -> ArrayView2<'_, f64> {
        self.probs.index_axis(Axis(0), position)
    }

    /// Keeps the given individuals, in the given order.
    pub fn select_individuals(&self, rows: &[usize]) -> Self {
        Self {
            genome: self.genome.clone(),
            classes: self.classes.clone(),
            ids: rows.iter().map(|&r| self.ids[r].clone()).collect(),
            probs: self.probs.select(Axis(1), rows),
        }
    }
}

/// A dataset ready for regression: complete individuals only, aligned across
/// phenotypes, covariates and genotypes.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub ids: Vec<String>,
    /// Names of the selected phenotype columns, in selection order.
    pub phenotype_names: Vec<String>,
    /// Indices of the selected columns in the phenotype file.
    pub source_columns: Vec<usize>,
    /// Shape: [n_individuals, n_selected_columns].
    pub phenotypes: Array2<f64>,
    pub covariate_names: Vec<String>,
    /// Shape: [n_individuals, n_covariates]; zero columns when none were given.
    pub covariates: Array2<f64>,
    pub genotypes: GenotypeProbabilities,
}

impl PreparedData {
    pub fn n_individuals(&self) -> usize {
        self.ids.len()
    }

    pub fn n_phenotypes(&self) -> usize {
        self.phenotypes.ncols()
    }

    pub fn genome(&self) -> &GenomeDescription {
        &self.genotypes.genome
    }

    /// Column indices the search should pass to the backend.
    pub fn columns(&self) -> Vec<usize> {
        (0..self.n_phenotypes()).collect()
    }

    pub fn representation(&self) -> GenotypeRepresentation {
        GenotypeRepresentation {
            probabilities: true,
            draws: None,
        }
    }
}
