//! Starting models recorded from an earlier analysis.
//!
//! ```toml
//! n_individuals = 120
//! imputation_draws = 16
//! # 1-based, matching the Q1, Q2, ... names.
//! interactions = [[1, 2]]
//!
//! [[loci]]
//! chromosome = "1"
//! position = 42.3
//!
//! [[loci]]
//! chromosome = "4"
//! position = 11.0
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::{DataError, PreparedData};
use crate::genome::{Locus, POSITION_TOLERANCE};
use crate::model::{Formula, QtlSet, Term};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartingLocus {
    pub chromosome: String,
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartingModel {
    /// Individuals the model was recorded on, if known.
    #[serde(default)]
    pub n_individuals: Option<usize>,
    /// Imputation depth the model was recorded with, if any.
    #[serde(default)]
    pub imputation_draws: Option<usize>,
    pub loci: Vec<StartingLocus>,
    #[serde(default)]
    pub interactions: Vec<[usize; 2]>,
}

impl StartingModel {
    pub fn load(path: &Path) -> Result<Self, DataError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// A starting model placed on the prepared dataset's grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledStart {
    pub qtl: QtlSet,
    pub formula: Formula,
    /// The recorded genotype context did not match the dataset. A starting model
    /// stores only positions and terms, never per-individual fits, so the rebuilt
    /// model is the same positions and terms placed on this dataset's grid; the
    /// flag only reports that its recorded LOD no longer applies.
    pub rebuilt: bool,
}

pub fn reconcile_starting_model(
    start: &StartingModel,
    data: &PreparedData,
) -> Result<ReconciledStart, DataError> {
    if start.loci.is_empty() {
        return Err(DataError::EmptyStartingModel);
    }
    let genome = data.genome();

    let mut loci: Vec<Locus> = Vec::with_capacity(start.loci.len());
    for recorded in &start.loci {
        let locus = Locus::new(recorded.chromosome.clone(), recorded.position);
        let snapped = genome
            .nearest(&locus)
            .ok_or_else(|| DataError::UnknownChromosome(locus.clone()))?;
        if (snapped.position - locus.position).abs() > POSITION_TOLERANCE {
            log::debug!("Starting locus {locus} snapped to grid position {snapped}");
        }
        if let Some(other) = loci.iter().find(|l| l.same_site(&snapped)) {
            return Err(DataError::CollidingLoci(other.clone(), snapped));
        }
        loci.push(snapped);
    }

    let mut rebuilt = false;
    if let Some(recorded) = start.n_individuals {
        if recorded != data.n_individuals() {
            log::warn!(
                "Starting model was recorded on {recorded} individuals but the dataset has {}; rebuilding it from its positions.",
                data.n_individuals()
            );
            rebuilt = true;
        }
    }
    if start.imputation_draws != data.representation().draws {
        log::warn!(
            "Starting model was recorded with imputation depth {:?} but the dataset has {:?}; rebuilding it from its positions.",
            start.imputation_draws,
            data.representation().draws
        );
        rebuilt = true;
    }

    let n = loci.len();
    let mut terms: Vec<Term> = (0..n).map(Term::Main).collect();
    for &[a, b] in &start.interactions {
        if a == 0 || b == 0 || a > n || b > n {
            return Err(DataError::InteractionOutOfRange(a, b));
        }
        terms.push(Term::Interaction(a - 1, b - 1));
    }
    let formula = Formula::from_terms(terms, data.covariate_names.clone())?;

    Ok(ReconciledStart {
        qtl: QtlSet::new(loci),
        formula,
        rebuilt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::{Chromosome, GenomeDescription};
    use crate::prepare::GenotypeProbabilities;
    use ndarray::{Array2, Array3};

    fn prepared(n: usize) -> PreparedData {
        let genome = GenomeDescription::new(vec![
            Chromosome {
                name: "1".into(),
                positions: vec![0.0, 5.0, 10.0],
            },
            Chromosome {
                name: "2".into(),
                positions: vec![0.0, 20.0],
            },
        ])
        .unwrap();
        let ids: Vec<String> = (0..n).map(|i| format!("i{i}")).collect();
        PreparedData {
            ids: ids.clone(),
            phenotype_names: vec!["t1".into()],
            source_columns: vec![0],
            phenotypes: Array2::from_shape_fn((n, 1), |(i, _)| i as f64),
            covariate_names: vec!["sex".into()],
            covariates: Array2::zeros((n, 1)),
            genotypes: GenotypeProbabilities {
                genome,
                classes: vec!["A".into(), "H".into()],
                ids,
                probs: Array3::from_elem((5, n, 2), 0.5),
            },
        }
    }

    fn parse(text: &str) -> StartingModel {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn snaps_loci_and_builds_formula() {
        let start = parse(
            r#"
            n_individuals = 4
            interactions = [[2, 1]]

            [[loci]]
            chromosome = "2"
            position = 17.5

            [[loci]]
            chromosome = "1"
            position = 3.0
            "#,
        );
        let reconciled = reconcile_starting_model(&start, &prepared(4)).unwrap();
        assert_eq!(
            reconciled.qtl.loci(),
            &[Locus::new("2", 20.0), Locus::new("1", 5.0)]
        );
        assert_eq!(reconciled.formula.to_string(), "y ~ Q1 + Q2 + Q1:Q2 + sex");
        assert!(!reconciled.rebuilt);
    }

    #[test]
    fn mismatched_context_is_rebuilt() {
        let start = parse(
            r#"
            n_individuals = 10
            imputation_draws = 16

            [[loci]]
            chromosome = "1"
            position = 10.0
            "#,
        );
        let reconciled = reconcile_starting_model(&start, &prepared(4)).unwrap();
        assert!(reconciled.rebuilt);
        assert_eq!(reconciled.qtl.loci(), &[Locus::new("1", 10.0)]);
    }

    #[test]
    fn rejects_unknown_chromosomes_and_bad_terms() {
        let unknown = parse("[[loci]]\nchromosome = \"X\"\nposition = 1.0\n");
        assert!(matches!(
            reconcile_starting_model(&unknown, &prepared(4)),
            Err(DataError::UnknownChromosome(_))
        ));

        let colliding = parse(
            "[[loci]]\nchromosome = \"1\"\nposition = 4.0\n[[loci]]\nchromosome = \"1\"\nposition = 6.0\n",
        );
        assert!(matches!(
            reconcile_starting_model(&colliding, &prepared(4)),
            Err(DataError::CollidingLoci(..))
        ));

        let dangling = parse(
            "interactions = [[1, 3]]\n[[loci]]\nchromosome = \"1\"\nposition = 0.0\n[[loci]]\nchromosome = \"2\"\nposition = 0.0\n",
        );
        assert!(matches!(
            reconcile_starting_model(&dangling, &prepared(4)),
            Err(DataError::InteractionOutOfRange(1, 3))
        ));

        let empty = parse("loci = []\n");
        assert!(matches!(
            reconcile_starting_model(&empty, &prepared(4)),
            Err(DataError::EmptyStartingModel)
        ));
    }
}
