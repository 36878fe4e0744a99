//! # Candidate models
//!
//! A candidate model is a QTL set, a formula over that set, and the score the
//! formula earned. Loci are identified by their zero-based position in the QTL
//! set and displayed as `Q1..Qn`, so the names are dense by construction: removing
//! a locus shifts every later locus down by one, and the formula is rewritten
//! through the same index mapping.
//!
//! Formula terms are structured values rather than strings. Renumbering after a
//! drop and reordering into genome order are both pure index mappings applied to
//! every term at once; display strings are generated on demand.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use crate::genome::{GenomeDescription, Locus};
use crate::penalty::{PenaltyVector, TermCounts};

/// A QTL term of a model formula. Indices are zero-based locus indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    Main(usize),
    /// Pairwise interaction, always stored with the smaller index first.
    Interaction(usize, usize),
}

impl Term {
    pub fn interaction(a: usize, b: usize) -> Self {
        debug_assert_ne!(a, b, "a locus cannot interact with itself");
        Self::Interaction(a.min(b), a.max(b))
    }

    pub fn references(&self, locus: usize) -> bool {
        match *self {
            Self::Main(i) => i == locus,
            Self::Interaction(i, j) => i == locus || j == locus,
        }
    }

    pub fn is_interaction(&self) -> bool {
        matches!(self, Self::Interaction(..))
    }

    fn remap(&self, mapping: impl Fn(usize) -> usize) -> Self {
        match *self {
            Self::Main(i) => Self::Main(mapping(i)),
            Self::Interaction(i, j) => Self::interaction(mapping(i), mapping(j)),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Main(i) => write!(f, "{}", qtl_name(i)),
            Self::Interaction(i, j) => write!(f, "{}:{}", qtl_name(i), qtl_name(j)),
        }
    }
}

/// Display name of the locus at zero-based index `index`.
pub fn qtl_name(index: usize) -> String {
    format!("Q{}", index + 1)
}

#[derive(Error, Debug, PartialEq)]
pub enum FormulaError {
    #[error("Interaction {0} references a locus without a main effect in the formula.")]
    MissingMainEffect(Term),
    #[error("Term {0} is already part of the formula.")]
    DuplicateTerm(Term),
    #[error("Term {0} is not part of the formula.")]
    UnknownTerm(Term),
    #[error("Q{} cannot interact with itself.", .0 + 1)]
    SelfInteraction(usize),
    #[error("Formula references Q{found} but the QTL set holds {loci} loci.")]
    LocusOutOfRange { found: usize, loci: usize },
}

/// Model formula: QTL terms plus additive covariate terms.
///
/// Invariant: every locus that appears in an interaction also has a main effect.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Formula {
    terms: BTreeSet<Term>,
    covariates: Vec<String>,
}

impl Formula {
    /// Main effects for loci `0..n_loci` plus the given covariates.
    pub fn additive(n_loci: usize, covariates: Vec<String>) -> Self {
        Self {
            terms: (0..n_loci).map(Term::Main).collect(),
            covariates,
        }
    }

    /// Builds a formula from explicit terms, checking the main-effect invariant.
    pub fn from_terms(
        terms: impl IntoIterator<Item = Term>,
        covariates: Vec<String>,
    ) -> Result<Self, FormulaError> {
        let mut normalized = BTreeSet::new();
        for term in terms {
            if let Term::Interaction(i, j) = term {
                if i == j {
                    return Err(FormulaError::SelfInteraction(i));
                }
            }
            normalized.insert(term.remap(|i| i));
        }
        let terms = normalized;
        for term in &terms {
            if let Term::Interaction(i, j) = *term {
                if !terms.contains(&Term::Main(i)) || !terms.contains(&Term::Main(j)) {
                    return Err(FormulaError::MissingMainEffect(*term));
                }
            }
        }
        Ok(Self { terms, covariates })
    }

    /// QTL terms in canonical order: main effects by index, then interactions.
    pub fn qtl_terms(&self) -> impl Iterator<Item = &Term> {
        self.terms.iter()
    }

    pub fn covariates(&self) -> &[String] {
        &self.covariates
    }

    pub fn contains(&self, term: &Term) -> bool {
        self.terms.contains(term)
    }

    pub fn main_effects(&self) -> impl Iterator<Item = usize> + '_ {
        self.terms.iter().filter_map(|t| match *t {
            Term::Main(i) => Some(i),
            Term::Interaction(..) => None,
        })
    }

    pub fn interactions(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.terms.iter().filter_map(|t| match *t {
            Term::Interaction(i, j) => Some((i, j)),
            Term::Main(_) => None,
        })
    }

    pub fn has_interactions(&self) -> bool {
        self.terms.iter().any(Term::is_interaction)
    }

    /// Adds a main effect for a new locus.
    pub fn with_main_effect(&self, locus: usize) -> Result<Self, FormulaError> {
        let term = Term::Main(locus);
        if self.terms.contains(&term) {
            return Err(FormulaError::DuplicateTerm(term));
        }
        let mut next = self.clone();
        next.terms.insert(term);
        Ok(next)
    }

    pub fn with_interaction(&self, a: usize, b: usize) -> Result<Self, FormulaError> {
        if a == b {
            return Err(FormulaError::SelfInteraction(a));
        }
        let term = Term::interaction(a, b);
        if self.terms.contains(&term) {
            return Err(FormulaError::DuplicateTerm(term));
        }
        if !self.terms.contains(&Term::Main(a)) || !self.terms.contains(&Term::Main(b)) {
            return Err(FormulaError::MissingMainEffect(term));
        }
        let mut next = self.clone();
        next.terms.insert(term);
        Ok(next)
    }

    /// Interaction pairs among `0..n_loci` that are not yet in the formula.
    pub fn absent_interactions(&self, n_loci: usize) -> Vec<(usize, usize)> {
        (0..n_loci)
            .flat_map(|i| ((i + 1)..n_loci).map(move |j| (i, j)))
            .filter(|&(i, j)| !self.terms.contains(&Term::Interaction(i, j)))
            .collect()
    }

    /// Removes `term`. Dropping a main effect also drops every interaction that
    /// references the locus, and renumbers later loci down by one.
    pub fn without(&self, term: &Term) -> Result<Self, FormulaError> {
        if !self.terms.contains(term) {
            return Err(FormulaError::UnknownTerm(*term));
        }
        match *term {
            Term::Interaction(..) => {
                let mut next = self.clone();
                next.terms.remove(term);
                Ok(next)
            }
            Term::Main(dropped) => Ok(Self {
                terms: self
                    .terms
                    .iter()
                    .filter(|t| !t.references(dropped))
                    .map(|t| t.remap(|i| if i > dropped { i - 1 } else { i }))
                    .collect(),
                covariates: self.covariates.clone(),
            }),
        }
    }

    /// Rewrites every term through `mapping`, where `mapping[old] = new`.
    pub fn remap(&self, mapping: &[usize]) -> Self {
        Self {
            terms: self.terms.iter().map(|t| t.remap(|i| mapping[i])).collect(),
            covariates: self.covariates.clone(),
        }
    }

    /// Checks that every referenced locus exists and that interactions are
    /// backed by main effects.
    pub fn validate(&self, n_loci: usize) -> Result<(), FormulaError> {
        for term in &self.terms {
            let highest = match *term {
                Term::Main(i) => i,
                Term::Interaction(i, j) => {
                    if !self.terms.contains(&Term::Main(i)) || !self.terms.contains(&Term::Main(j))
                    {
                        return Err(FormulaError::MissingMainEffect(*term));
                    }
                    j
                }
            };
            if highest >= n_loci {
                return Err(FormulaError::LocusOutOfRange {
                    found: highest + 1,
                    loci: n_loci,
                });
            }
        }
        Ok(())
    }

    /// Penalized term counts.
    ///
    /// Interactions are grouped into connected clusters of loci. Within a cluster
    /// of `k` loci the first `k - 1` interactions (a spanning tree) are heavy and
    /// any further interactions are light. Covariates are never penalized.
    pub fn term_counts(&self) -> TermCounts {
        let main = self.main_effects().count();
        let edges: Vec<(usize, usize)> = self.interactions().collect();
        if edges.is_empty() {
            return TermCounts::new(main, 0, 0);
        }
        let size = edges.iter().map(|&(_, j)| j + 1).max().unwrap_or(0);
        let mut parent: Vec<usize> = (0..size).collect();
        fn root(parent: &mut [usize], mut node: usize) -> usize {
            while parent[node] != node {
                parent[node] = parent[parent[node]];
                node = parent[node];
            }
            node
        }
        let mut heavy = 0;
        for &(i, j) in &edges {
            let (ri, rj) = (root(&mut parent, i), root(&mut parent, j));
            if ri != rj {
                parent[ri] = rj;
                heavy += 1;
            }
        }
        TermCounts::new(main, heavy, edges.len() - heavy)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.terms.iter().map(Term::to_string).collect();
        parts.extend(self.covariates.iter().cloned());
        if parts.is_empty() {
            f.write_str("y ~ 1")
        } else {
            write!(f, "y ~ {}", parts.join(" + "))
        }
    }
}

/// Loci of a candidate model, in insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QtlSet {
    loci: Vec<Locus>,
}

impl QtlSet {
    pub fn new(loci: Vec<Locus>) -> Self {
        Self { loci }
    }

    pub fn len(&self) -> usize {
        self.loci.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loci.is_empty()
    }

    pub fn loci(&self) -> &[Locus] {
        &self.loci
    }

    pub fn get(&self, index: usize) -> Option<&Locus> {
        self.loci.get(index)
    }

    pub fn names(&self) -> Vec<String> {
        (0..self.loci.len()).map(qtl_name).collect()
    }

    /// Appends a locus; it receives the next name.
    pub fn with_locus(&self, locus: Locus) -> Self {
        let mut loci = self.loci.clone();
        loci.push(locus);
        Self { loci }
    }

    /// Removes the locus at `index`; later loci move down by one.
    pub fn without(&self, index: usize) -> Self {
        let mut loci = self.loci.clone();
        if index < loci.len() {
            loci.remove(index);
        }
        Self { loci }
    }

    pub fn occupies(&self, locus: &Locus) -> bool {
        self.loci.iter().any(|l| l.same_site(locus))
    }

    /// True when any locus sits at a different position than in `other`.
    pub fn moved_from(&self, other: &QtlSet) -> bool {
        self.loci.len() != other.loci.len()
            || self
                .loci
                .iter()
                .zip(&other.loci)
                .any(|(a, b)| !a.same_site(b))
    }

    /// Permutation `order` such that `order[new] = old` sorts the loci into
    /// genome order. Ties keep insertion order.
    pub fn genome_order(&self, genome: &GenomeDescription) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.loci.len()).collect();
        order.sort_by(|&a, &b| genome.compare(&self.loci[a], &self.loci[b]));
        order
    }
}

/// Score of a model. `plod` is always derived from `lod`, `counts` and the run's
/// penalty vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub lod: f64,
    pub plod: f64,
    pub counts: TermCounts,
}

impl ScoreRecord {
    pub fn new(lod: f64, counts: TermCounts, penalties: &PenaltyVector) -> Self {
        Self {
            lod,
            plod: penalties.penalized_lod(lod, counts),
            counts,
        }
    }

    /// Score of the empty model; anything adopted as best must beat it.
    pub fn sentinel() -> Self {
        Self {
            lod: 0.0,
            plod: 0.0,
            counts: TermCounts::default(),
        }
    }
}

/// A scored candidate model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub qtl: QtlSet,
    pub formula: Formula,
    pub score: ScoreRecord,
}

impl ModelState {
    pub fn new(qtl: QtlSet, formula: Formula, score: ScoreRecord) -> Self {
        Self {
            qtl,
            formula,
            score,
        }
    }

    /// Zero-locus model with pLOD 0.
    pub fn empty(covariates: Vec<String>) -> Self {
        Self::new(
            QtlSet::default(),
            Formula::additive(0, covariates),
            ScoreRecord::sentinel(),
        )
    }

    pub fn n_loci(&self) -> usize {
        self.qtl.len()
    }

    /// Same model with loci sorted into genome order and the formula rewritten
    /// to the new indices.
    pub fn canonicalize(&self, genome: &GenomeDescription) -> Self {
        let order = self.qtl.genome_order(genome);
        let mut mapping = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            mapping[old] = new;
        }
        let loci = order.iter().map(|&old| self.qtl.loci[old].clone()).collect();
        Self {
            qtl: QtlSet::new(loci),
            formula: self.formula.remap(&mapping),
            score: self.score,
        }
    }
}
