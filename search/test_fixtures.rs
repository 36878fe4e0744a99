//! Table-driven synthetic backend for exercising the search controller.
//!
//! Every grid position carries a fixed per-column LOD contribution, and the LOD
//! of a model is the sum of the contributions of its distinct positions plus any
//! configured interaction bonuses. That makes every statistic the controller sees
//! exactly predictable.

use ahash::AHashMap;

use crate::adapters::{
    AdapterError, FitResult, GenomeScanAdapter, ModelFitAdapter, PairScanPoint,
    PositionRefinementAdapter, ScanPoint,
};
use crate::aggregate::AggregationPolicy;
use crate::genome::{Chromosome, GenomeDescription, Locus};
use crate::model::{Formula, QtlSet, Term};

pub struct ProfileBackend {
    pub genome: GenomeDescription,
    /// `profiles[column][global position]`.
    pub profiles: Vec<Vec<f64>>,
    /// Extra LOD, in every column, for an interaction between two positions.
    pub interaction_bonus: AHashMap<(usize, usize), f64>,
    /// Leave this term out of every drop-one report.
    pub omit_drop_one: Option<Term>,
}

impl ProfileBackend {
    pub fn new(genome: GenomeDescription, profiles: Vec<Vec<f64>>) -> Self {
        for profile in &profiles {
            assert_eq!(profile.len(), genome.n_positions());
        }
        Self {
            genome,
            profiles,
            interaction_bonus: AHashMap::new(),
            omit_drop_one: None,
        }
    }

    /// One chromosome "1" with positions `0, 10, ..` and one profile per column.
    pub fn single_chromosome(profiles: Vec<Vec<f64>>) -> Self {
        let n = profiles[0].len();
        let genome = GenomeDescription::new(vec![Chromosome {
            name: "1".into(),
            positions: (0..n).map(|i| 10.0 * i as f64).collect(),
        }])
        .unwrap();
        Self::new(genome, profiles)
    }

    pub fn with_interaction(mut self, a: &Locus, b: &Locus, bonus: f64) -> Self {
        let (a, b) = (self.index(a).unwrap(), self.index(b).unwrap());
        self.interaction_bonus.insert((a.min(b), a.max(b)), bonus);
        self
    }

    pub fn columns(&self) -> Vec<usize> {
        (0..self.profiles.len()).collect()
    }

    fn index(&self, locus: &Locus) -> Result<usize, AdapterError> {
        self.genome
            .position_index(locus)
            .ok_or_else(|| AdapterError::UnknownLocus(locus.clone()))
    }

    fn bonus(&self, a: usize, b: usize) -> f64 {
        self.interaction_bonus
            .get(&(a.min(b), a.max(b)))
            .copied()
            .unwrap_or(0.0)
    }

    fn model_lod(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        column: usize,
    ) -> Result<f64, AdapterError> {
        let sites: Vec<usize> = qtl
            .loci()
            .iter()
            .map(|l| self.index(l))
            .collect::<Result<_, _>>()?;
        let mut seen = Vec::new();
        let mut lod = 0.0;
        for i in formula.main_effects() {
            if !seen.contains(&sites[i]) {
                seen.push(sites[i]);
                lod += self.profiles[column][sites[i]];
            }
        }
        for (i, j) in formula.interactions() {
            lod += self.bonus(sites[i], sites[j]);
        }
        Ok(lod)
    }
}

impl GenomeScanAdapter for ProfileBackend {
    fn scan_single_locus(&self, columns: &[usize]) -> Result<Vec<ScanPoint>, AdapterError> {
        Ok(self
            .genome
            .loci()
            .enumerate()
            .map(|(p, locus)| ScanPoint {
                locus,
                lod: columns.iter().map(|&c| self.profiles[c][p]).collect(),
            })
            .collect())
    }

    fn scan_two_locus(&self, columns: &[usize]) -> Result<Vec<PairScanPoint>, AdapterError> {
        let loci: Vec<Locus> = self.genome.loci().collect();
        let mut points = Vec::new();
        for p in 0..loci.len() {
            for q in (p + 1)..loci.len() {
                let additive: Vec<f64> = columns
                    .iter()
                    .map(|&c| self.profiles[c][p] + self.profiles[c][q])
                    .collect();
                points.push(PairScanPoint {
                    first: loci[p].clone(),
                    second: loci[q].clone(),
                    lod_full: additive.iter().map(|v| v + self.bonus(p, q)).collect(),
                    lod_additive: additive,
                });
            }
        }
        Ok(points)
    }

    fn scan_add_locus(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        columns: &[usize],
        interacting_with: Option<usize>,
    ) -> Result<Vec<ScanPoint>, AdapterError> {
        let new_index = qtl.len();
        let mut extended = formula
            .with_main_effect(new_index)
            .map_err(|e| AdapterError::Scan(e.to_string()))?;
        if let Some(partner) = interacting_with {
            extended = extended
                .with_interaction(partner, new_index)
                .map_err(|e| AdapterError::Scan(e.to_string()))?;
        }
        self.genome
            .loci()
            .map(|locus| {
                let lod = if qtl.occupies(&locus) {
                    vec![f64::NAN; columns.len()]
                } else {
                    let grown = qtl.with_locus(locus.clone());
                    columns
                        .iter()
                        .map(|&c| {
                            Ok(self.model_lod(&grown, &extended, c)?
                                - self.model_lod(qtl, formula, c)?)
                        })
                        .collect::<Result<Vec<f64>, AdapterError>>()?
                };
                Ok(ScanPoint { locus, lod })
            })
            .collect()
    }
}

impl ModelFitAdapter for ProfileBackend {
    fn fit(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        column: usize,
    ) -> Result<FitResult, AdapterError> {
        if column >= self.profiles.len() {
            return Err(AdapterError::UnknownColumn(column));
        }
        let lod = self.model_lod(qtl, formula, column)?;
        let mut drop_one = Vec::new();
        for term in formula.qtl_terms() {
            if Some(*term) == self.omit_drop_one {
                continue;
            }
            let reduced = formula
                .without(term)
                .map_err(|e| AdapterError::Fit(e.to_string()))?;
            let reduced_qtl = match *term {
                Term::Main(i) => qtl.without(i),
                Term::Interaction(..) => qtl.clone(),
            };
            drop_one.push((*term, lod - self.model_lod(&reduced_qtl, &reduced, column)?));
        }
        Ok(FitResult { lod, drop_one })
    }
}

impl PositionRefinementAdapter for ProfileBackend {
    /// One greedy pass: each locus moves to the best free position on its
    /// chromosome with the others held fixed. Ties keep the current position.
    fn refine(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        columns: &[usize],
        policy: AggregationPolicy,
    ) -> Result<QtlSet, AdapterError> {
        let mut current = qtl.clone();
        for i in 0..current.len() {
            let locus = current.loci()[i].clone();
            let score = |set: &QtlSet| -> Result<f64, AdapterError> {
                let lods = columns
                    .iter()
                    .map(|&c| self.model_lod(set, formula, c))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(policy.aggregate(&lods))
            };
            let mut best = (score(&current)?, locus.clone());
            let range = self
                .genome
                .chromosome_range(&locus.chromosome)
                .ok_or_else(|| AdapterError::UnknownLocus(locus.clone()))?;
            for global in range {
                let candidate = self.genome.locus_at(global).unwrap();
                let others = current.without(i);
                if others.occupies(&candidate) {
                    continue;
                }
                let mut loci = current.loci().to_vec();
                loci[i] = candidate.clone();
                let value = score(&QtlSet::new(loci))?;
                if value > best.0 {
                    best = (value, candidate);
                }
            }
            let mut loci = current.loci().to_vec();
            loci[i] = best.1;
            current = QtlSet::new(loci);
        }
        Ok(current)
    }
}
