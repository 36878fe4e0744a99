// search/controller.rs

//! # Stepwise model-space search
//!
//! The controller walks model space in four phases:
//!
//! 1.  **Initialization:** either a caller-supplied model (optionally refined, then
//!     refit and scored) or a null start built from a genome scan. Under the
//!     additive-only policy a null start is the best single locus. With
//!     interactions enabled it is the best of a single locus, an additive pair and
//!     an interacting pair.
//! 2.  **Forward selection:** while the model holds fewer than `max_loci` loci, add
//!     the best new locus (and, with interactions enabled, consider new loci that
//!     interact with a placed one and new interactions among placed loci).
//! 3.  **Backward elimination:** while more than one locus remains, drop the term
//!     whose aggregated drop-one LOD is smallest.
//! 4.  **Finalization:** return the best model ever visited, reordered into genome
//!     order.
//!
//! Every model the search visits is scored with the same aggregation policy and
//! penalty vector, offered to the best-so-far tracker, and optionally traced.
//! Candidate statistics may be computed in parallel; they are always collected in
//! a fixed order before the seeded tie-break selector looks at them.

use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;

use crate::adapters::{
    AdapterError, FitResult, GenomeScanAdapter, ModelFitAdapter, PositionRefinementAdapter,
    ScanPoint,
};
use crate::config::SearchSettings;
use crate::error::SearchError;
use crate::genome::{GenomeDescription, Locus};
use crate::model::{Formula, FormulaError, ModelState, QtlSet, ScoreRecord, Term};
use crate::penalty::TermCounts;
use crate::progress::{NoopSearchProgress, SearchPhase, SearchProgressObserver};
use crate::tiebreak::TieBreakSelector;
use crate::trace::{TraceEntry, TraceRecorder};

/// Term counts used to score the null-start candidates. These weights belong to
/// the two-locus initialization and are applied as-is.
pub const SINGLE_LOCUS_TERMS: TermCounts = TermCounts::new(1, 0, 0);
pub const ADDITIVE_PAIR_TERMS: TermCounts = TermCounts::new(2, 0, 0);
pub const INTERACTING_PAIR_TERMS: TermCounts = TermCounts::new(2, 0, 1);

/// A locus of the final model together with its display name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedLocus {
    pub name: String,
    pub chromosome: String,
    pub position: f64,
}

/// Result of a search: the best model visited, in genome order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub formula: String,
    pub lod: f64,
    pub plod: f64,
    /// Written as a string: TOML integers stop at `i64::MAX`.
    #[serde(serialize_with = "seed_as_string")]
    pub seed: u64,
    /// Number of exact ties resolved by the seeded selector.
    pub tie_breaks: u64,
    pub loci: Vec<NamedLocus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<TraceEntry>>,
    #[serde(skip)]
    pub model: ModelState,
}

impl SearchOutcome {
    fn new(model: ModelState, trace: Option<Vec<TraceEntry>>, seed: u64, tie_breaks: u64) -> Self {
        let loci = model
            .qtl
            .loci()
            .iter()
            .zip(model.qtl.names())
            .map(|(locus, name)| NamedLocus {
                name,
                chromosome: locus.chromosome.clone(),
                position: locus.position,
            })
            .collect();
        Self {
            formula: model.formula.to_string(),
            lod: model.score.lod,
            plod: model.score.plod,
            seed,
            tie_breaks,
            loci,
            trace,
            model,
        }
    }

    pub fn n_loci(&self) -> usize {
        self.loci.len()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn seed_as_string<S: serde::Serializer>(seed: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(seed)
}

/// Mutable bookkeeping owned by a single run.
struct RunState {
    selector: TieBreakSelector,
    trace: TraceRecorder,
    best: ModelState,
    step: usize,
}

impl RunState {
    /// Adopts `candidate` as the best model if its pLOD strictly improves on it.
    fn offer(&mut self, candidate: &ModelState) {
        if candidate.score.plod > self.best.score.plod {
            log::debug!(
                "New best model at step {}: {} (pLOD {:.4})",
                self.step,
                candidate.formula,
                candidate.score.plod
            );
            self.best = candidate.clone();
        }
    }

    fn visit(
        &mut self,
        phase: SearchPhase,
        state: &ModelState,
        observer: &mut dyn SearchProgressObserver,
    ) {
        self.trace.record(self.step, phase, state);
        self.offer(state);
        observer.on_step(phase, self.step, state.n_loci(), state.score.plod);
    }
}

/// Stepwise forward/backward search driver over one prepared dataset.
pub struct ModelSpaceSearch<'a, S, F, R> {
    genome: &'a GenomeDescription,
    columns: Vec<usize>,
    covariates: Vec<String>,
    settings: SearchSettings,
    scanner: &'a S,
    fitter: &'a F,
    refiner: &'a R,
}

impl<'a, S, F, R> ModelSpaceSearch<'a, S, F, R>
where
    S: GenomeScanAdapter,
    F: ModelFitAdapter,
    R: PositionRefinementAdapter,
{
    pub fn new(
        genome: &'a GenomeDescription,
        columns: Vec<usize>,
        covariates: Vec<String>,
        settings: SearchSettings,
        scanner: &'a S,
        fitter: &'a F,
        refiner: &'a R,
    ) -> Result<Self, SearchError> {
        if columns.is_empty() {
            return Err(SearchError::Validation(
                "at least one phenotype column must be selected".into(),
            ));
        }
        let mut sorted = columns.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != columns.len() {
            return Err(SearchError::Validation(
                "phenotype columns must not repeat".into(),
            ));
        }
        if settings.max_loci < 1 {
            return Err(SearchError::Validation(format!(
                "max_loci must be at least 1, found {}",
                settings.max_loci
            )));
        }
        Ok(Self {
            genome,
            columns,
            covariates,
            settings,
            scanner,
            fitter,
            refiner,
        })
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn run(&self, start: Option<(QtlSet, Formula)>) -> Result<SearchOutcome, SearchError> {
        self.run_with_progress(start, &mut NoopSearchProgress)
    }

    pub fn run_with_progress(
        &self,
        start: Option<(QtlSet, Formula)>,
        observer: &mut dyn SearchProgressObserver,
    ) -> Result<SearchOutcome, SearchError> {
        log::info!(
            "Starting stepwise search: {} phenotype column(s), max {} loci, {} aggregation, penalties ({}, {}, {}).",
            self.columns.len(),
            self.settings.max_loci,
            self.settings.aggregation,
            self.settings.penalties.main,
            self.settings.penalties.heavy,
            self.settings.penalties.light
        );
        let mut run = RunState {
            selector: TieBreakSelector::new(self.settings.seed),
            trace: TraceRecorder::new(self.settings.keep_trace),
            best: ModelState::empty(self.covariates.clone()),
            step: 0,
        };

        // --- Initialization ---
        observer.on_phase_start(SearchPhase::Initial, 1);
        let mut current = match start {
            Some((qtl, formula)) => self.warm_start(qtl, formula)?,
            None => self.null_start(&mut run)?,
        };
        log::info!(
            "Initial model: {} (LOD {:.4}, pLOD {:.4})",
            current.formula,
            current.score.lod,
            current.score.plod
        );
        run.visit(SearchPhase::Initial, &current, observer);
        observer.on_phase_finish(SearchPhase::Initial);

        // --- Forward selection ---
        let forward_steps = self.settings.max_loci.saturating_sub(current.n_loci());
        observer.on_phase_start(SearchPhase::Forward, forward_steps);
        while current.n_loci() < self.settings.max_loci {
            run.step += 1;
            current = self.forward_step(&current, &mut run)?;
            log::info!(
                "Forward step {}: {} (LOD {:.4}, pLOD {:.4})",
                run.step,
                current.formula,
                current.score.lod,
                current.score.plod
            );
            run.visit(SearchPhase::Forward, &current, observer);
        }
        observer.on_phase_finish(SearchPhase::Forward);

        // --- Backward elimination ---
        let backward_steps =
            current.n_loci().saturating_sub(1) + current.formula.interactions().count();
        observer.on_phase_start(SearchPhase::Backward, backward_steps);
        while current.n_loci() > 1 {
            run.step += 1;
            current = self.backward_step(&current, &mut run)?;
            log::info!(
                "Backward step {}: {} (LOD {:.4}, pLOD {:.4})",
                run.step,
                current.formula,
                current.score.lod,
                current.score.plod
            );
            run.visit(SearchPhase::Backward, &current, observer);
        }
        observer.on_phase_finish(SearchPhase::Backward);

        // --- Finalization ---
        observer.on_phase_start(SearchPhase::Finalize, 1);
        let RunState {
            selector,
            trace,
            best,
            ..
        } = run;
        if best.n_loci() == 0 {
            log::warn!("No visited model reached a positive pLOD; returning the empty model.");
        }
        let canonical = best.canonicalize(self.genome);
        log::info!(
            "Best model: {} (LOD {:.4}, pLOD {:.4}), {} tie(s) broken",
            canonical.formula,
            canonical.score.lod,
            canonical.score.plod,
            selector.draws()
        );
        observer.on_phase_finish(SearchPhase::Finalize);
        Ok(SearchOutcome::new(
            canonical,
            trace.into_entries(),
            selector.seed(),
            selector.draws(),
        ))
    }

    fn warm_start(&self, qtl: QtlSet, formula: Formula) -> Result<ModelState, SearchError> {
        if qtl.is_empty() {
            return Err(SearchError::Validation(
                "a starting model must contain at least one locus".into(),
            ));
        }
        if let Some(locus) = qtl
            .loci()
            .iter()
            .find(|l| !self.genome.contains(&l.chromosome))
        {
            return Err(SearchError::Validation(format!(
                "starting locus {locus} lies on a chromosome absent from the genome description"
            )));
        }
        formula.validate(qtl.len())?;
        let formula = Formula::from_terms(formula.qtl_terms().copied(), self.covariates.clone())?;
        if formula.main_effects().count() != qtl.len() {
            return Err(SearchError::Validation(format!(
                "the starting formula has {} main effects for {} loci",
                formula.main_effects().count(),
                qtl.len()
            )));
        }
        if qtl.len() > self.settings.max_loci {
            log::warn!(
                "Starting model holds {} loci, more than max_loci = {}; only backward elimination will run.",
                qtl.len(),
                self.settings.max_loci
            );
        }
        if formula.has_interactions() && !self.settings.interactions.allows_interactions() {
            log::warn!(
                "Starting model carries interaction terms under the additive-only policy; it scores -inf until they are dropped."
            );
        }
        let qtl = match self.refine_positions(&qtl, &formula, SearchPhase::Initial, 0)? {
            Some(moved) => moved,
            None => qtl,
        };
        self.score(qtl, formula, SearchPhase::Initial, 0)
    }

    fn null_start(&self, run: &mut RunState) -> Result<ModelState, SearchError> {
        let phase = SearchPhase::Initial;
        let points = self
            .scanner
            .scan_single_locus(&self.columns)
            .map_err(|source| adapter_error(phase, 0, source))?;
        let (locus, lod) =
            self.best_scan_point(&points, &mut run.selector, phase, 0, "single-locus LOD")?;
        let penalties = &self.settings.penalties;
        let mut best = ModelState::new(
            QtlSet::new(vec![locus]),
            Formula::additive(1, self.covariates.clone()),
            ScoreRecord::new(lod, SINGLE_LOCUS_TERMS, penalties),
        );
        if !self.settings.interactions.allows_interactions() {
            return Ok(best);
        }

        let pairs = self
            .scanner
            .scan_two_locus(&self.columns)
            .map_err(|source| adapter_error(phase, 0, source))?;
        let policy = self.settings.aggregation;
        let additive: Vec<f64> = pairs
            .iter()
            .map(|p| policy.aggregate(&p.lod_additive))
            .collect();
        let full: Vec<f64> = pairs.iter().map(|p| policy.aggregate(&p.lod_full)).collect();

        if let Some(k) = run.selector.select_max(&additive) {
            let candidate = ModelState::new(
                QtlSet::new(vec![pairs[k].first.clone(), pairs[k].second.clone()]),
                Formula::additive(2, self.covariates.clone()),
                ScoreRecord::new(additive[k], ADDITIVE_PAIR_TERMS, penalties),
            );
            if candidate.score.plod > best.score.plod {
                best = candidate;
            }
        }
        if let Some(k) = run.selector.select_max(&full) {
            let formula = Formula::additive(2, self.covariates.clone())
                .with_interaction(0, 1)
                .map_err(|source| formula_error(phase, 0, source))?;
            let candidate = ModelState::new(
                QtlSet::new(vec![pairs[k].first.clone(), pairs[k].second.clone()]),
                formula,
                ScoreRecord::new(full[k], INTERACTING_PAIR_TERMS, penalties),
            );
            if candidate.score.plod > best.score.plod {
                best = candidate;
            }
        }
        Ok(best)
    }

    fn forward_step(
        &self,
        current: &ModelState,
        run: &mut RunState,
    ) -> Result<ModelState, SearchError> {
        let phase = SearchPhase::Forward;
        let step = run.step;
        let new_index = current.n_loci();

        let mut best = self.add_locus_candidate(current, None, run, step)?;

        if self.settings.interactions.allows_interactions() {
            for partner in 0..current.n_loci() {
                let candidate = self.add_locus_candidate(current, Some(partner), run, step)?;
                if candidate.score.plod > best.score.plod {
                    best = candidate;
                }
            }
            if let Some(candidate) = self.add_interaction_candidate(current, run, step)? {
                if candidate.score.plod > best.score.plod {
                    best = candidate;
                }
            }
        }

        if best.n_loci() > new_index {
            log::debug!(
                "Forward step {step}: adding {} at {}",
                crate::model::qtl_name(new_index),
                best.qtl.loci()[new_index]
            );
        }
        self.refined(best, phase, step)
    }

    /// Best model with one more locus, optionally interacting with `partner`.
    fn add_locus_candidate(
        &self,
        current: &ModelState,
        partner: Option<usize>,
        run: &mut RunState,
        step: usize,
    ) -> Result<ModelState, SearchError> {
        let phase = SearchPhase::Forward;
        let points = self
            .scanner
            .scan_add_locus(&current.qtl, &current.formula, &self.columns, partner)
            .map_err(|source| adapter_error(phase, step, source))?;
        let (locus, _) =
            self.best_scan_point(&points, &mut run.selector, phase, step, "add-locus LOD")?;
        let new_index = current.n_loci();
        let mut formula = current
            .formula
            .with_main_effect(new_index)
            .map_err(|source| formula_error(phase, step, source))?;
        if let Some(partner) = partner {
            formula = formula
                .with_interaction(partner, new_index)
                .map_err(|source| formula_error(phase, step, source))?;
        }
        self.score(current.qtl.with_locus(locus), formula, phase, step)
    }

    /// Best single new interaction among already placed loci, if any pair is
    /// still free.
    fn add_interaction_candidate(
        &self,
        current: &ModelState,
        run: &mut RunState,
        step: usize,
    ) -> Result<Option<ModelState>, SearchError> {
        let phase = SearchPhase::Forward;
        let pairs = current.formula.absent_interactions(current.n_loci());
        if pairs.is_empty() {
            return Ok(None);
        }
        let formulas: Vec<Formula> = pairs
            .iter()
            .map(|&(i, j)| current.formula.with_interaction(i, j))
            .collect::<Result<_, FormulaError>>()
            .map_err(|source| formula_error(phase, step, source))?;
        let lods: Vec<f64> = formulas
            .par_iter()
            .map(|formula| {
                let fits = self.fit_columns(&current.qtl, formula, phase, step)?;
                let per_column: Vec<f64> = fits.iter().map(|fit| fit.lod).collect();
                Ok(self.settings.aggregation.aggregate(&per_column))
            })
            .collect::<Result<_, SearchError>>()?;
        let k = run
            .selector
            .select_max(&lods)
            .ok_or(SearchError::NoFiniteScore {
                phase,
                step,
                what: "interaction LOD",
            })?;
        let formula = formulas[k].clone();
        let counts = formula.term_counts();
        Ok(Some(ModelState::new(
            current.qtl.clone(),
            formula,
            ScoreRecord::new(lods[k], counts, &self.settings.penalties),
        )))
    }

    fn backward_step(
        &self,
        current: &ModelState,
        run: &mut RunState,
    ) -> Result<ModelState, SearchError> {
        let phase = SearchPhase::Backward;
        let step = run.step;
        let fits = self.fit_columns(&current.qtl, &current.formula, phase, step)?;
        let terms: Vec<Term> = current.formula.qtl_terms().copied().collect();

        let mut contributions = Vec::with_capacity(terms.len());
        for term in &terms {
            let per_column = fits
                .iter()
                .zip(&self.columns)
                .map(|(fit, &column)| {
                    fit.drop_one_for(term).ok_or(SearchError::UnresolvedTerm {
                        phase,
                        step,
                        term: *term,
                        column,
                    })
                })
                .collect::<Result<Vec<f64>, _>>()?;
            contributions.push(self.settings.aggregation.aggregate(&per_column));
        }

        let k = run
            .selector
            .select_min(&contributions)
            .ok_or(SearchError::NoFiniteScore {
                phase,
                step,
                what: "drop-one LOD",
            })?;
        let dropped = terms[k];
        log::debug!(
            "Backward step {step}: dropping {dropped} (aggregated drop-one LOD {:.4})",
            contributions[k]
        );
        let formula = current
            .formula
            .without(&dropped)
            .map_err(|source| formula_error(phase, step, source))?;
        let qtl = match dropped {
            Term::Main(locus) => current.qtl.without(locus),
            Term::Interaction(..) => current.qtl.clone(),
        };
        let state = self.score(qtl, formula, phase, step)?;
        self.refined(state, phase, step)
    }

    /// Refines positions when enabled; refits only if a locus moved.
    fn refined(
        &self,
        state: ModelState,
        phase: SearchPhase,
        step: usize,
    ) -> Result<ModelState, SearchError> {
        match self.refine_positions(&state.qtl, &state.formula, phase, step)? {
            Some(moved) => self.score(moved, state.formula, phase, step),
            None => Ok(state),
        }
    }

    /// Runs the refiner when enabled. `None` means no locus moved.
    fn refine_positions(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        phase: SearchPhase,
        step: usize,
    ) -> Result<Option<QtlSet>, SearchError> {
        if !self.settings.refine {
            return Ok(None);
        }
        let moved = self
            .refiner
            .refine(qtl, formula, &self.columns, self.settings.aggregation)
            .map_err(|source| adapter_error(phase, step, source))?;
        if moved.len() != qtl.len() {
            return Err(adapter_error(
                phase,
                step,
                AdapterError::Refine(format!(
                    "refinement returned {} loci for a model with {}",
                    moved.len(),
                    qtl.len()
                )),
            ));
        }
        if !moved.moved_from(qtl) {
            return Ok(None);
        }
        log::debug!(
            "Refinement moved loci: [{}] -> [{}]",
            describe_loci(qtl.loci()),
            describe_loci(moved.loci())
        );
        Ok(Some(moved))
    }

    /// Fits `formula` to every column and scores the aggregated LOD.
    fn score(
        &self,
        qtl: QtlSet,
        formula: Formula,
        phase: SearchPhase,
        step: usize,
    ) -> Result<ModelState, SearchError> {
        let fits = self.fit_columns(&qtl, &formula, phase, step)?;
        let per_column: Vec<f64> = fits.iter().map(|fit| fit.lod).collect();
        let lod = self.settings.aggregation.aggregate(&per_column);
        if !lod.is_finite() {
            return Err(SearchError::NoFiniteScore {
                phase,
                step,
                what: "model LOD",
            });
        }
        let counts = formula.term_counts();
        Ok(ModelState::new(
            qtl,
            formula,
            ScoreRecord::new(lod, counts, &self.settings.penalties),
        ))
    }

    fn fit_columns(
        &self,
        qtl: &QtlSet,
        formula: &Formula,
        phase: SearchPhase,
        step: usize,
    ) -> Result<Vec<FitResult>, SearchError> {
        self.columns
            .par_iter()
            .map(|&column| self.fitter.fit(qtl, formula, column))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| adapter_error(phase, step, source))
    }

    /// Position with the highest aggregated LOD, ties broken by the selector.
    fn best_scan_point(
        &self,
        points: &[ScanPoint],
        selector: &mut TieBreakSelector,
        phase: SearchPhase,
        step: usize,
        what: &'static str,
    ) -> Result<(Locus, f64), SearchError> {
        let policy = self.settings.aggregation;
        let aggregated: Vec<f64> = points.iter().map(|p| policy.aggregate(&p.lod)).collect();
        let k = selector
            .select_max(&aggregated)
            .ok_or(SearchError::NoFiniteScore { phase, step, what })?;
        Ok((points[k].locus.clone(), aggregated[k]))
    }
}

fn adapter_error(phase: SearchPhase, step: usize, source: AdapterError) -> SearchError {
    SearchError::Adapter {
        phase,
        step,
        source,
    }
}

fn formula_error(phase: SearchPhase, step: usize, source: FormulaError) -> SearchError {
    SearchError::Formula {
        phase,
        step,
        source,
    }
}

fn describe_loci(loci: &[Locus]) -> String {
    loci.iter().join(", ")
}
