use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::InteractionPolicy;

/// Penalties on main effects, heavy interactions and light interactions.
///
/// Interaction penalties may be `f64::INFINITY`; any model carrying such a term
/// then scores `-inf` and can never be adopted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyVector {
    pub main: f64,
    pub heavy: f64,
    pub light: f64,
}

/// Number of penalized terms in a formula, as `(main, heavy, light)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TermCounts {
    pub main: usize,
    pub heavy: usize,
    pub light: usize,
}

impl TermCounts {
    pub const fn new(main: usize, heavy: usize, light: usize) -> Self {
        Self { main, heavy, light }
    }

    pub fn interactions(&self) -> usize {
        self.heavy + self.light
    }
}

impl fmt::Display for TermCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.main, self.heavy, self.light)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum PenaltyError {
    #[error("At least one penalty value is required.")]
    Missing,
    #[error("Penalty values must be non-negative numbers, found {0}.")]
    InvalidValue(f64),
    #[error(
        "A single penalty only determines the main-effect penalty; models with interactions need 2 or 3 penalties."
    )]
    UnderdeterminedInteractions,
}

/// Outcome of normalizing a user-supplied penalty list.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPenalties {
    pub penalties: PenaltyVector,
    /// Number of trailing values that were discarded.
    pub truncated: usize,
}

impl PenaltyVector {
    pub const fn new(main: f64, heavy: f64, light: f64) -> Self {
        Self { main, heavy, light }
    }

    /// Main-effect penalty only; interactions are categorically rejected.
    pub const fn additive(main: f64) -> Self {
        Self::new(main, f64::INFINITY, f64::INFINITY)
    }

    /// Expands a list of 1, 2 or 3+ values into exactly three penalties.
    ///
    /// One value is only accepted under the additive-only policy and becomes
    /// `(p, inf, inf)`. Two values become `(p1, p2, p2)`. Extra values beyond the
    /// third are dropped and reported through `truncated`.
    pub fn normalize(
        values: &[f64],
        policy: InteractionPolicy,
    ) -> Result<NormalizedPenalties, PenaltyError> {
        if let Some(&bad) = values.iter().find(|v| v.is_nan() || **v < 0.0) {
            return Err(PenaltyError::InvalidValue(bad));
        }
        let penalties = match values {
            [] => return Err(PenaltyError::Missing),
            [main] => match policy {
                InteractionPolicy::AdditiveOnly => Self::additive(*main),
                InteractionPolicy::WithInteractions => {
                    return Err(PenaltyError::UnderdeterminedInteractions);
                }
            },
            [main, interaction] => Self::new(*main, *interaction, *interaction),
            [main, heavy, light, ..] => Self::new(*main, *heavy, *light),
        };
        Ok(NormalizedPenalties {
            penalties,
            truncated: values.len().saturating_sub(3),
        })
    }

    /// Penalized LOD: `lod - main*n_main - heavy*n_heavy - light*n_light`.
    ///
    /// A zero count never multiplies its penalty, so an infinite penalty only
    /// bites when the corresponding term is present.
    pub fn penalized_lod(&self, lod: f64, counts: TermCounts) -> f64 {
        [
            (counts.main, self.main),
            (counts.heavy, self.heavy),
            (counts.light, self.light),
        ]
        .into_iter()
        .filter(|&(n, _)| n > 0)
        .fold(lod, |acc, (n, penalty)| acc - n as f64 * penalty)
    }
}
