use serde::{Deserialize, Serialize};

use crate::genome::Locus;
use crate::model::ModelState;
use crate::progress::SearchPhase;

/// Snapshot of one visited model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// 0 for the initial model, then 1, 2, ... across both phases.
    pub step: usize,
    pub phase: SearchPhase,
    pub loci: Vec<Locus>,
    pub formula: String,
    pub lod: f64,
    pub plod: f64,
}

impl TraceEntry {
    pub fn n_loci(&self) -> usize {
        self.loci.len()
    }
}

/// Append-only log of visited models. Recording is a no-op when disabled.
#[derive(Debug, Clone, Default)]
pub struct TraceRecorder {
    entries: Option<Vec<TraceEntry>>,
}

impl TraceRecorder {
    pub fn new(enabled: bool) -> Self {
        Self {
            entries: enabled.then(Vec::new),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn record(&mut self, step: usize, phase: SearchPhase, state: &ModelState) {
        if let Some(entries) = self.entries.as_mut() {
            entries.push(TraceEntry {
                step,
                phase,
                loci: state.qtl.loci().to_vec(),
                formula: state.formula.to_string(),
                lod: state.score.lod,
                plod: state.score.plod,
            });
        }
    }

    pub fn entries(&self) -> Option<&[TraceEntry]> {
        self.entries.as_deref()
    }

    pub fn into_entries(self) -> Option<Vec<TraceEntry>> {
        self.entries
    }
}
