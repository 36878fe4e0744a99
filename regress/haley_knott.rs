use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use rayon::prelude::*;

use super::linalg::residual_sum_of_squares;
use super::{RegressionError, lod_score};
use crate::adapters::{
    AdapterError, FitResult, GenomeScanAdapter, ModelFitAdapter, PairScanPoint,
    PositionRefinementAdapter, ScanPoint,
};
use crate::aggregate::AggregationPolicy;
use crate::genome::Locus;
use crate::model::{Formula, QtlSet, Term};
use crate::prepare::PreparedData;

pub const DEFAULT_MAX_REFINE_ITERATIONS: usize = 10;

/// Residual variance below this share of the total counts as an exact fit.
const DEGENERATE_RSS_RATIO: f64 = 1e-12;

/// Haley-Knott regression over one prepared dataset.
pub struct HaleyKnott<'a> {
    data: &'a PreparedData,
    /// Null-model (intercept and covariates) RSS for every prepared column.
    null_rss: Array1<f64>,
    max_refine_iterations: usize,
}

impl<'a> HaleyKnott<'a> {
    pub fn new(data: &'a PreparedData) -> Result<Self, RegressionError> {
        let null_rss = residual_sum_of_squares(&base_design(data), &data.phenotypes)?;
        for ((name, &rss), column) in data
            .phenotype_names
            .iter()
            .zip(null_rss.iter())
            .zip(data.phenotypes.columns())
        {
            let mean = column.mean().unwrap_or(0.0);
            let total: f64 = column.iter().map(|v| (v - mean).powi(2)).sum();
            if rss <= DEGENERATE_RSS_RATIO * total {
                return Err(RegressionError::DegenerateNullModel(name.clone()));
            }
        }
        log::debug!(
            "Haley-Knott backend ready: {} individuals, {} genotype classes, {} covariate(s)",
            data.n_individuals(),
            data.genotypes.n_classes(),
            data.covariate_names.len()
        );
        Ok(Self {
            data,
            null_rss,
            max_refine_iterations: DEFAULT_MAX_REFINE_ITERATIONS,
        })
    }

    pub fn with_max_refine_iterations(mut self, iterations: usize) -> Self {
        self.max_refine_iterations = iterations.max(1);
        self
    }

    fn n(&self) -> usize {
        self.data.n_individuals()
    }

    fn sites(&self, qtl: &QtlSet) -> Result<Vec<usize>, AdapterError> {
        qtl.loci()
            .iter()
            .map(|locus| {
                self.data
                    .genome()
                    .position_index(locus)
                    .ok_or_else(|| AdapterError::UnknownLocus(locus.clone()))
            })
            .collect()
    }

    fn locus(&self, site: usize) -> Result<Locus, AdapterError> {
        self.data
            .genome()
            .locus_at(site)
            .ok_or_else(|| AdapterError::Refine(format!("grid position {site} does not exist")))
    }

    fn phenotypes(&self, columns: &[usize]) -> Result<Array2<f64>, AdapterError> {
        if let Some(&bad) = columns.iter().find(|&&c| c >= self.data.n_phenotypes()) {
            return Err(AdapterError::UnknownColumn(bad));
        }
        Ok(self.data.phenotypes.select(Axis(1), columns))
    }

    fn genotype_block(&self, site: usize) -> ArrayView2<'_, f64> {
        self.data.genotypes.at(site).slice_move(s![.., 1..])
    }

    /// Design matrix: intercept, covariates, main-effect blocks, interaction blocks.
    fn design(&self, sites: &[usize], formula: &Formula) -> Array2<f64> {
        let base = base_design(self.data);
        let width = self.data.genotypes.n_classes() - 1;
        let mains: Vec<usize> = formula.main_effects().collect();
        let pairs: Vec<(usize, usize)> = formula.interactions().collect();
        let k = base.ncols() + mains.len() * width + pairs.len() * width * width;

        let mut design = Array2::zeros((self.n(), k));
        design.slice_mut(s![.., ..base.ncols()]).assign(&base);
        let mut col = base.ncols();
        for &i in &mains {
            design
                .slice_mut(s![.., col..col + width])
                .assign(&self.genotype_block(sites[i]));
            col += width;
        }
        for &(i, j) in &pairs {
            let a = self.genotype_block(sites[i]);
            let b = self.genotype_block(sites[j]);
            for ca in a.columns() {
                for cb in b.columns() {
                    design.column_mut(col).assign(&(&ca * &cb));
                    col += 1;
                }
            }
        }
        design
    }

    fn model_rss(
        &self,
        sites: &[usize],
        formula: &Formula,
        y: &Array2<f64>,
    ) -> Result<Array1<f64>, AdapterError> {
        Ok(residual_sum_of_squares(&self.design(sites, formula), y)?)
    }

    fn lods_against_null(&self, rss: &Array1<f64>, columns: &[usize]) -> Vec<f64> {
        columns
            .iter()
            .zip(rss.iter())
            .map(|(&c, &r)| lod_score(self.n(), self.null_rss[c], r))
            .collect()
    }

    fn aggregated_lod(
        &self,
        sites: &[usize],
        formula: &Formula,
        y: &Array2<f64>,
        columns: &[usize],
        policy: AggregationPolicy,
    ) -> Result<f64, AdapterError> {
        let rss = self.model_rss(sites, formula, y)?;
        Ok(policy.aggregate(&self.lods_against_null(&rss, columns)))
    }
}

fn base_design(data: &PreparedData) -> Array2<f64> {
    let n = data.n_individuals();
    let mut base = Array2::ones((n, 1 + data.covariates.ncols()));
    base.slice_mut(s![.., 1..]).assign(&data.covariates);
    base
}

fn formula_error(err: impl std::fmt::Display) -> AdapterError {
    AdapterError::Scan(err.to_string())
}

impl GenomeScanAdapter for HaleyKnott<'_> {
    fn scan_single_locus(&self, columns: &[usize]) -> Result<Vec<ScanPoint>, AdapterError> {
        let y = self.phenotypes(columns)?;
        let formula = Formula::additive(1, Vec::new());
        let loci: Vec<Locus> = self.data.genome().loci().collect();
        loci.into_par_iter()
            .enumerate()
            .map(|(site, locus)| {
                let rss = self.model_rss(&[site], &formula, &y)?;
                Ok(ScanPoint {
                    locus,
                    lod: self.lods_against_null(&rss, columns),
                })
            })
            .collect()
    }

    fn scan_two_locus(&self, columns: &[usize]) -> Result<Vec<PairScanPoint>, AdapterError> {
        let y = self.phenotypes(columns)?;
        let additive = Formula::additive(2, Vec::new());
        let full = additive.with_interaction(0, 1).map_err(formula_error)?;
        let loci: Vec<Locus> = self.data.genome().loci().collect();
        let pairs: Vec<(usize, usize)> = (0..loci.len()).tuple_combinations().collect();
        pairs
            .into_par_iter()
            .map(|(p, q)| {
                let rss_additive = self.model_rss(&[p, q], &additive, &y)?;
                let rss_full = self.model_rss(&[p, q], &full, &y)?;
                Ok(PairScanPoint {
                    first: loci[p].clone(),
                    second: loci[q].clone(),
                    lod_full: self.lods_against_null(&rss_full, columns),
                    lod_additive: self.lods_against_null(&rss_additive, columns),
                })
            })
            .collect()
    }

    fn scan_add_locus(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        columns: &[usize],
        interacting_with: Option<usize>,
    ) -> Result<Vec<ScanPoint>, AdapterError> {
        let y = self.phenotypes(columns)?;
        let sites = self.sites(qtl)?;
        let base_rss = self.model_rss(&sites, formula, &y)?;

        let new_index = sites.len();
        let mut extended = formula.with_main_effect(new_index).map_err(formula_error)?;
        if let Some(partner) = interacting_with {
            extended = extended
                .with_interaction(partner, new_index)
                .map_err(formula_error)?;
        }

        let loci: Vec<Locus> = self.data.genome().loci().collect();
        loci.into_par_iter()
            .enumerate()
            .map(|(site, locus)| {
                if sites.contains(&site) {
                    return Ok(ScanPoint {
                        locus,
                        lod: vec![f64::NAN; columns.len()],
                    });
                }
                let mut grown = sites.clone();
                grown.push(site);
                let rss = self.model_rss(&grown, &extended, &y)?;
                let lod = base_rss
                    .iter()
                    .zip(rss.iter())
                    .map(|(&reduced, &model)| lod_score(self.n(), reduced, model))
                    .collect();
                Ok(ScanPoint { locus, lod })
            })
            .collect()
    }
}

impl ModelFitAdapter for HaleyKnott<'_> {
    fn fit(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        column: usize,
    ) -> Result<FitResult, AdapterError> {
        let y = self.phenotypes(&[column])?;
        let sites = self.sites(qtl)?;
        formula
            .validate(sites.len())
            .map_err(|e| AdapterError::Fit(e.to_string()))?;
        let rss = self.model_rss(&sites, formula, &y)?[0];
        let lod = lod_score(self.n(), self.null_rss[column], rss);

        let mut drop_one = Vec::new();
        for term in formula.qtl_terms() {
            let reduced = formula
                .without(term)
                .map_err(|e| AdapterError::Fit(e.to_string()))?;
            let reduced_sites: Vec<usize> = match *term {
                Term::Main(i) => sites
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .map(|(_, &s)| s)
                    .collect(),
                Term::Interaction(..) => sites.clone(),
            };
            let reduced_rss = self.model_rss(&reduced_sites, &reduced, &y)?[0];
            drop_one.push((*term, lod_score(self.n(), reduced_rss, rss)));
        }
        Ok(FitResult { lod, drop_one })
    }
}

impl PositionRefinementAdapter for HaleyKnott<'_> {
    /// Cycles through the loci, moving each to the best free position on its
    /// chromosome with the others fixed, until a full cycle moves nothing.
    fn refine(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        columns: &[usize],
        policy: AggregationPolicy,
    ) -> Result<QtlSet, AdapterError> {
        let y = self.phenotypes(columns)?;
        let mut sites = self.sites(qtl)?;
        let genome = self.data.genome();

        for iteration in 1..=self.max_refine_iterations {
            let mut moved = false;
            for i in 0..sites.len() {
                let chromosome = &qtl.loci()[i].chromosome;
                let range = genome
                    .chromosome_range(chromosome)
                    .ok_or_else(|| AdapterError::UnknownLocus(qtl.loci()[i].clone()))?;
                let candidates: Vec<usize> = range
                    .filter(|&p| p == sites[i] || !sites.contains(&p))
                    .collect();
                let scores: Vec<f64> = candidates
                    .par_iter()
                    .map(|&p| {
                        let mut trial = sites.clone();
                        trial[i] = p;
                        self.aggregated_lod(&trial, formula, &y, columns, policy)
                    })
                    .collect::<Result<_, AdapterError>>()?;

                let mut best = (sites[i], f64::NEG_INFINITY);
                for (&p, &score) in candidates.iter().zip(&scores) {
                    if p == sites[i] && score.is_finite() {
                        best = (p, score);
                    }
                }
                for (&p, &score) in candidates.iter().zip(&scores) {
                    if score > best.1 {
                        best = (p, score);
                    }
                }
                if best.0 != sites[i] {
                    sites[i] = best.0;
                    moved = true;
                }
            }
            if !moved {
                log::trace!("Refinement converged after {iteration} cycle(s)");
                break;
            }
            if iteration == self.max_refine_iterations {
                log::debug!(
                    "Refinement stopped at the cap of {} cycle(s)",
                    self.max_refine_iterations
                );
            }
        }

        let loci = sites
            .into_iter()
            .map(|site| self.locus(site))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QtlSet::new(loci))
    }
}
