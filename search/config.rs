//! # Search configuration
//!
//! `SearchConfig` is the user-facing, serializable configuration (TOML file and
//! CLI flags). `SearchConfig::resolve` applies the calling policy and produces the
//! `SearchSettings` the controller runs with:
//!
//! - interaction modeling is always forced off; a request for it is downgraded
//!   with a warning,
//! - the penalty list is normalized to exactly three values,
//! - the regression method is reconciled with the genotype representation the
//!   prepared dataset actually carries.
//!
//! Every substitution is logged with `log::warn!` and recorded as a
//! [`ConfigNotice`] on the resolved settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::aggregate::AggregationPolicy;
use crate::penalty::{PenaltyError, PenaltyVector};
use crate::prepare::GenotypeRepresentation;

/// Whether candidate models may carry pairwise interaction terms.
///
/// Only `AdditiveOnly` is produced by [`SearchConfig::resolve`]. The controller
/// keeps the interaction branches live behind `WithInteractions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionPolicy {
    AdditiveOnly,
    WithInteractions,
}

impl InteractionPolicy {
    pub fn allows_interactions(self) -> bool {
        matches!(self, Self::WithInteractions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegressionMethod {
    /// Haley-Knott regression on genotype probabilities.
    #[serde(rename = "hk")]
    HaleyKnott,
    /// Regression averaged over imputed genotype draws.
    #[serde(rename = "imp")]
    Imputation,
}

impl RegressionMethod {
    pub fn describe(self) -> &'static str {
        match self {
            Self::HaleyKnott => "hk",
            Self::Imputation => "imp",
        }
    }
}

impl fmt::Display for RegressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

impl FromStr for RegressionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hk" | "haley-knott" => Ok(Self::HaleyKnott),
            "imp" | "imputation" => Ok(Self::Imputation),
            other => Err(format!(
                "unknown regression method '{other}' (expected 'hk' or 'imp')"
            )),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("max_loci must be at least 1, found {0}.")]
    InvalidMaxLoci(usize),
    #[error("Invalid penalty vector: {0}")]
    Penalty(#[from] PenaltyError),
    #[error(
        "The dataset carries neither genotype probabilities nor imputed genotypes; no regression method can run."
    )]
    NoGenotypeRepresentation,
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// A policy substitution made while resolving the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigNotice {
    InteractionsDowngraded,
    PenaltiesTruncated {
        dropped: usize,
    },
    MethodSubstituted {
        requested: RegressionMethod,
        used: RegressionMethod,
    },
}

impl fmt::Display for ConfigNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InteractionsDowngraded => f.write_str(
                "interaction modeling was requested but only additive models are supported; searching additive models only",
            ),
            Self::PenaltiesTruncated { dropped } => write!(
                f,
                "more than three penalties were supplied; ignoring the last {dropped}"
            ),
            Self::MethodSubstituted { requested, used } => write!(
                f,
                "regression method '{requested}' needs a genotype representation the dataset lacks; using '{used}' instead"
            ),
        }
    }
}

/// User-facing configuration, as read from TOML and overridden by CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Zero-based phenotype columns to analyze. `None` selects every column.
    pub phenotype_columns: Option<Vec<usize>>,
    pub max_loci: usize,
    pub method: RegressionMethod,
    pub aggregation: AggregationPolicy,
    /// One to three penalties: main effect, heavy interaction, light interaction.
    pub penalties: Vec<f64>,
    pub additive_only: bool,
    pub refine: bool,
    pub keep_trace: bool,
    pub seed: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            phenotype_columns: None,
            max_loci: 10,
            method: RegressionMethod::HaleyKnott,
            aggregation: AggregationPolicy::Slod,
            penalties: Vec::new(),
            additive_only: true,
            refine: true,
            keep_trace: false,
            seed: 1,
        }
    }
}

impl SearchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Applies the calling policy and validates the result.
    pub fn resolve(
        &self,
        representation: GenotypeRepresentation,
    ) -> Result<SearchSettings, ConfigError> {
        if self.max_loci < 1 {
            return Err(ConfigError::InvalidMaxLoci(self.max_loci));
        }
        let mut notices = Vec::new();

        if !self.additive_only {
            notices.push(ConfigNotice::InteractionsDowngraded);
        }
        let interactions = InteractionPolicy::AdditiveOnly;

        let normalized = PenaltyVector::normalize(&self.penalties, interactions)?;
        if normalized.truncated > 0 {
            notices.push(ConfigNotice::PenaltiesTruncated {
                dropped: normalized.truncated,
            });
        }

        let method = resolve_method(self.method, representation)?;
        if method != self.method {
            notices.push(ConfigNotice::MethodSubstituted {
                requested: self.method,
                used: method,
            });
        }

        for notice in &notices {
            log::warn!("{notice}");
        }

        Ok(SearchSettings {
            max_loci: self.max_loci,
            method,
            aggregation: self.aggregation,
            penalties: normalized.penalties,
            interactions,
            refine: self.refine,
            keep_trace: self.keep_trace,
            seed: self.seed,
            notices,
        })
    }
}

fn resolve_method(
    requested: RegressionMethod,
    representation: GenotypeRepresentation,
) -> Result<RegressionMethod, ConfigError> {
    let has_draws = representation.draws.is_some();
    match requested {
        RegressionMethod::HaleyKnott if representation.probabilities => Ok(requested),
        RegressionMethod::Imputation if has_draws => Ok(requested),
        RegressionMethod::HaleyKnott if has_draws => Ok(RegressionMethod::Imputation),
        RegressionMethod::Imputation if representation.probabilities => {
            Ok(RegressionMethod::HaleyKnott)
        }
        _ => Err(ConfigError::NoGenotypeRepresentation),
    }
}

/// Fully resolved settings for one search run.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub max_loci: usize,
    pub method: RegressionMethod,
    pub aggregation: AggregationPolicy,
    pub penalties: PenaltyVector,
    pub interactions: InteractionPolicy,
    pub refine: bool,
    pub keep_trace: bool,
    pub seed: u64,
    pub notices: Vec<ConfigNotice>,
}

impl SearchSettings {
    /// Settings with refinement on, tracing off and seed 1.
    pub fn new(
        max_loci: usize,
        aggregation: AggregationPolicy,
        penalties: PenaltyVector,
        interactions: InteractionPolicy,
    ) -> Self {
        Self {
            max_loci,
            method: RegressionMethod::HaleyKnott,
            aggregation,
            penalties,
            interactions,
            refine: true,
            keep_trace: false,
            seed: 1,
            notices: Vec::new(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_trace(mut self, keep_trace: bool) -> Self {
        self.keep_trace = keep_trace;
        self
    }

    pub fn with_refine(mut self, refine: bool) -> Self {
        self.refine = refine;
        self
    }
}
