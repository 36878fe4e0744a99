use std::fmt;

/// Phases of a stepwise search.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPhase {
    Initial,
    Forward,
    Backward,
    Finalize,
}

impl SearchPhase {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Initial => "initialization",
            Self::Forward => "forward selection",
            Self::Backward => "backward elimination",
            Self::Finalize => "finalization",
        }
    }
}

impl fmt::Display for SearchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting progress while the search runs.
///
/// `total_steps` is the number of model updates the phase will make.
pub trait SearchProgressObserver {
    fn on_phase_start(&mut self, phase: SearchPhase, total_steps: usize) {
        let _ = (phase, total_steps);
    }
    fn on_step(&mut self, phase: SearchPhase, step: usize, n_loci: usize, plod: f64) {
        let _ = (phase, step, n_loci, plod);
    }
    fn on_phase_finish(&mut self, phase: SearchPhase) {
        let _ = phase;
    }
}

#[derive(Default)]
pub struct NoopSearchProgress;

impl SearchProgressObserver for NoopSearchProgress {}
