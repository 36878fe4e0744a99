//! # Haley-Knott regression backend
//!
//! A reference implementation of the search adapters over a
//! [`PreparedData`](crate::prepare::PreparedData). Each locus enters the
//! regression through its genotype probabilities (the first class is the
//! baseline), an interaction through the products of its two loci's columns, and
//! covariates additively. A model's LOD against a reduced model is
//! `n / 2 * log10(RSS_reduced / RSS_model)`.

use thiserror::Error;

use crate::adapters::AdapterError;

pub mod haley_knott;
pub mod linalg;

pub use haley_knott::HaleyKnott;

#[derive(Error, Debug)]
pub enum RegressionError {
    #[error(
        "Regression needs more individuals than parameters: {individuals} individuals for {parameters} parameters."
    )]
    TooFewIndividuals { individuals: usize, parameters: usize },
    #[error("Normal equations are singular even after ridge regularization: {0}")]
    Singular(String),
    #[error("Phenotype '{0}' is fitted exactly by the covariates alone.")]
    DegenerateNullModel(String),
}

impl From<RegressionError> for AdapterError {
    fn from(err: RegressionError) -> Self {
        AdapterError::Backend(Box::new(err))
    }
}

/// LOD score of a model with residual sum of squares `rss_model` against a
/// nested model with `rss_reduced`, on `n` individuals.
pub fn lod_score(n: usize, rss_reduced: f64, rss_model: f64) -> f64 {
    let floor = f64::MIN_POSITIVE;
    n as f64 / 2.0 * (rss_reduced.max(floor) / rss_model.max(floor)).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn lod_is_log_ratio_scaled_by_half_n() {
        assert_abs_diff_eq!(lod_score(100, 10.0, 1.0), 50.0, epsilon = 1e-12);
        assert_abs_diff_eq!(lod_score(20, 4.0, 4.0), 0.0);
        assert!(lod_score(20, 2.0, 4.0) < 0.0);
    }
}
