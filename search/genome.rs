//! Genome description: the ordered chromosomes and the grid of candidate
//! positions on each of them that the scans evaluate.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Grid positions closer than this (in cM) are treated as the same position.
pub const POSITION_TOLERANCE: f64 = 1e-8;

/// A placed locus. Only position refinement ever replaces the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locus {
    pub chromosome: String,
    pub position: f64,
}

impl Locus {
    pub fn new(chromosome: impl Into<String>, position: f64) -> Self {
        Self {
            chromosome: chromosome.into(),
            position,
        }
    }

    pub fn same_site(&self, other: &Locus) -> bool {
        self.chromosome == other.chromosome
            && (self.position - other.position).abs() <= POSITION_TOLERANCE
    }
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:.2}", self.chromosome, self.position)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chromosome {
    pub name: String,
    /// Candidate positions in cM, strictly increasing.
    pub positions: Vec<f64>,
}

#[derive(Error, Debug, PartialEq)]
pub enum GenomeError {
    #[error("The genome description contains no chromosomes.")]
    Empty,
    #[error("Chromosome '{0}' appears more than once in the genome description.")]
    DuplicateChromosome(String),
    #[error("Chromosome '{0}' has no candidate positions.")]
    EmptyChromosome(String),
    #[error("Positions on chromosome '{0}' must be finite and strictly increasing.")]
    UnsortedPositions(String),
}

/// Ordered chromosomes plus a flat index over every candidate position.
///
/// Global position indices run chromosome by chromosome in genome order, which
/// is also the order in which scans report their points.
#[derive(Debug, Clone)]
pub struct GenomeDescription {
    chromosomes: Vec<Chromosome>,
    index: AHashMap<String, usize>,
    offsets: Vec<usize>,
}

impl GenomeDescription {
    pub fn new(chromosomes: Vec<Chromosome>) -> Result<Self, GenomeError> {
        if chromosomes.is_empty() {
            return Err(GenomeError::Empty);
        }
        let mut index = AHashMap::with_capacity(chromosomes.len());
        let mut offsets = Vec::with_capacity(chromosomes.len() + 1);
        let mut total = 0usize;
        for (order, chromosome) in chromosomes.iter().enumerate() {
            if chromosome.positions.is_empty() {
                return Err(GenomeError::EmptyChromosome(chromosome.name.clone()));
            }
            let increasing = chromosome.positions.iter().all(|p| p.is_finite())
                && chromosome
                    .positions
                    .windows(2)
                    .all(|w| w[1] - w[0] > POSITION_TOLERANCE);
            if !increasing {
                return Err(GenomeError::UnsortedPositions(chromosome.name.clone()));
            }
            if index.insert(chromosome.name.clone(), order).is_some() {
                return Err(GenomeError::DuplicateChromosome(chromosome.name.clone()));
            }
            offsets.push(total);
            total += chromosome.positions.len();
        }
        offsets.push(total);
        Ok(Self {
            chromosomes,
            index,
            offsets,
        })
    }

    pub fn chromosomes(&self) -> &[Chromosome] {
        &self.chromosomes
    }

    pub fn contains(&self, chromosome: &str) -> bool {
        self.index.contains_key(chromosome)
    }

    /// Position of the chromosome in genome order.
    pub fn chromosome_order(&self, chromosome: &str) -> Option<usize> {
        self.index.get(chromosome).copied()
    }

    pub fn n_positions(&self) -> usize {
        self.offsets[self.chromosomes.len()]
    }

    /// Global index range covering every grid position of `chromosome`.
    pub fn chromosome_range(&self, chromosome: &str) -> Option<Range<usize>> {
        let order = self.chromosome_order(chromosome)?;
        Some(self.offsets[order]..self.offsets[order + 1])
    }

    pub fn locus_at(&self, global: usize) -> Option<Locus> {
        if global >= self.n_positions() {
            return None;
        }
        let order = self.offsets.partition_point(|&offset| offset <= global) - 1;
        let chromosome = &self.chromosomes[order];
        Some(Locus::new(
            chromosome.name.clone(),
            chromosome.positions[global - self.offsets[order]],
        ))
    }

    /// Global index of the grid position exactly matching `locus`.
    pub fn position_index(&self, locus: &Locus) -> Option<usize> {
        let order = self.chromosome_order(&locus.chromosome)?;
        self.chromosomes[order]
            .positions
            .iter()
            .position(|&p| (p - locus.position).abs() <= POSITION_TOLERANCE)
            .map(|local| self.offsets[order] + local)
    }

    /// Grid position on the same chromosome closest to `locus`.
    pub fn nearest(&self, locus: &Locus) -> Option<Locus> {
        let order = self.chromosome_order(&locus.chromosome)?;
        let chromosome = &self.chromosomes[order];
        chromosome
            .positions
            .iter()
            .copied()
            .min_by(|a, b| {
                (a - locus.position)
                    .abs()
                    .total_cmp(&(b - locus.position).abs())
            })
            .map(|position| Locus::new(chromosome.name.clone(), position))
    }

    /// Every candidate position in genome order.
    pub fn loci(&self) -> impl Iterator<Item = Locus> + '_ {
        self.chromosomes.iter().flat_map(|chromosome| {
            chromosome
                .positions
                .iter()
                .map(move |&p| Locus::new(chromosome.name.clone(), p))
        })
    }

    /// Genome order: chromosome order first, then position. Unknown chromosomes
    /// sort after every known one.
    pub fn compare(&self, a: &Locus, b: &Locus) -> Ordering {
        let order_a = self.chromosome_order(&a.chromosome).unwrap_or(usize::MAX);
        let order_b = self.chromosome_order(&b.chromosome).unwrap_or(usize::MAX);
        order_a
            .cmp(&order_b)
            .then_with(|| a.position.total_cmp(&b.position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genome() -> GenomeDescription {
        GenomeDescription::new(vec![
            Chromosome {
                name: "1".into(),
                positions: vec![0.0, 10.0, 20.0],
            },
            Chromosome {
                name: "X".into(),
                positions: vec![5.0, 15.0],
            },
        ])
        .unwrap()
    }

    #[test]
    fn global_indices_run_in_genome_order() {
        let g = genome();
        assert_eq!(g.n_positions(), 5);
        assert_eq!(g.locus_at(0), Some(Locus::new("1", 0.0)));
        assert_eq!(g.locus_at(3), Some(Locus::new("X", 5.0)));
        assert_eq!(g.locus_at(5), None);
        assert_eq!(g.chromosome_range("X"), Some(3..5));
        assert_eq!(g.position_index(&Locus::new("X", 15.0)), Some(4));
        assert_eq!(g.position_index(&Locus::new("X", 14.0)), None);
    }

    #[test]
    fn nearest_snaps_within_chromosome() {
        let g = genome();
        assert_eq!(g.nearest(&Locus::new("1", 13.0)), Some(Locus::new("1", 10.0)));
        assert_eq!(g.nearest(&Locus::new("2", 13.0)), None);
    }

    #[test]
    fn compare_orders_by_chromosome_then_position() {
        let g = genome();
        let a = Locus::new("X", 5.0);
        let b = Locus::new("1", 20.0);
        assert_eq!(g.compare(&a, &b), Ordering::Greater);
        assert_eq!(
            g.compare(&Locus::new("1", 0.0), &Locus::new("1", 10.0)),
            Ordering::Less
        );
    }

    #[test]
    fn rejects_malformed_descriptions() {
        assert_eq!(GenomeDescription::new(vec![]).unwrap_err(), GenomeError::Empty);
        let unsorted = GenomeDescription::new(vec![Chromosome {
            name: "1".into(),
            positions: vec![10.0, 5.0],
        }]);
        assert_eq!(
            unsorted.unwrap_err(),
            GenomeError::UnsortedPositions("1".into())
        );
        let duplicated = GenomeDescription::new(vec![
            Chromosome {
                name: "1".into(),
                positions: vec![0.0],
            },
            Chromosome {
                name: "1".into(),
                positions: vec![0.0],
            },
        ]);
        assert_eq!(
            duplicated.unwrap_err(),
            GenomeError::DuplicateChromosome("1".into())
        );
    }
}
