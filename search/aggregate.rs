use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a statistic computed separately for every phenotype column is collapsed
/// into the single value the search compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationPolicy {
    /// Arithmetic mean across columns.
    Slod,
    /// Maximum across columns.
    Mlod,
}

impl AggregationPolicy {
    /// Collapses per-column values. A `NaN` in any column, or no columns at all,
    /// yields `NaN` so the candidate drops out of every comparison.
    pub fn aggregate(self, per_column: &[f64]) -> f64 {
        if per_column.is_empty() || per_column.iter().any(|v| v.is_nan()) {
            return f64::NAN;
        }
        match self {
            Self::Slod => per_column.iter().sum::<f64>() / per_column.len() as f64,
            Self::Mlod => per_column
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max),
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Slod => "slod",
            Self::Mlod => "mlod",
        }
    }
}

impl fmt::Display for AggregationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

impl FromStr for AggregationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "slod" => Ok(Self::Slod),
            "mlod" => Ok(Self::Mlod),
            other => Err(format!(
                "unknown aggregation policy '{other}' (expected 'slod' or 'mlod')"
            )),
        }
    }
}
