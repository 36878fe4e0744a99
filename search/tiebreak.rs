use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extremum {
    Max,
    Min,
}

/// Picks the index of the best score, breaking exact ties uniformly at random
/// with an explicitly seeded generator.
///
/// Non-finite scores never take part. The generator is only consumed when two or
/// more candidates share the extremal value, so the draw sequence depends solely
/// on the seed and the tie pattern of the inputs.
#[derive(Debug, Clone)]
pub struct TieBreakSelector {
    rng: StdRng,
    seed: u64,
    draws: u64,
}

impl TieBreakSelector {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
            draws: 0,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of ties resolved so far.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    pub fn select_max(&mut self, scores: &[f64]) -> Option<usize> {
        self.select(scores, Extremum::Max)
    }

    pub fn select_min(&mut self, scores: &[f64]) -> Option<usize> {
        self.select(scores, Extremum::Min)
    }

    fn select(&mut self, scores: &[f64], extremum: Extremum) -> Option<usize> {
        let best = scores
            .iter()
            .copied()
            .filter(|s| s.is_finite())
            .reduce(|a, b| match extremum {
                Extremum::Max => a.max(b),
                Extremum::Min => a.min(b),
            })?;
        let tied: Vec<usize> = scores
            .iter()
            .enumerate()
            .filter(|&(_, &s)| s == best)
            .map(|(i, _)| i)
            .collect();
        if tied.len() == 1 {
            return Some(tied[0]);
        }
        self.draws += 1;
        let pick = self.rng.gen_range(0..tied.len());
        log::debug!(
            "Broke a {}-way tie at score {best:.6} (draw #{}), picked candidate {}",
            tied.len(),
            self.draws,
            tied[pick]
        );
        Some(tied[pick])
    }
}
