use crate::config::{AdaptiveConfig, SearchMode};
use serde::{Deserialize, Serialize};

/// Level probed by one iteration and whether it held up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStep {
    pub level: usize,
    pub stable: bool,
}

/// Chooses the next concurrency level from the results so far
pub trait SearchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Next level to probe, or `None` when the search is done
    fn next_level(&self, history: &[SearchStep]) -> Option<usize>;
}

/// Start high and step down until a level is stable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearDecrease {
    pub start: usize,
    pub step: usize,
    pub min: usize,
}

impl SearchStrategy for LinearDecrease {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn next_level(&self, history: &[SearchStep]) -> Option<usize> {
        let last = match history.last() {
            None => return Some(self.start.max(self.min)),
            Some(last) => last,
        };

        if last.stable || last.level <= self.min {
            return None;
        }

        Some(last.level.saturating_sub(self.step.max(1)).max(self.min))
    }
}

/// Bisect between the highest stable and lowest unstable level seen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySearch {
    pub min: usize,
    pub max: usize,
    /// First level probed, clamped into `[min, max]`
    pub initial: usize,
    /// Stop once the bracket is narrower than this
    pub granularity: usize,
}

impl BinarySearch {
    /// Current bracket `(highest stable, lowest unstable)`, with `min - 1` and
    /// `max + 1` standing in for levels not yet observed
    pub fn bounds(&self, history: &[SearchStep]) -> (usize, usize) {
        let low = history
            .iter()
            .filter(|step| step.stable)
            .map(|step| step.level)
            .max()
            .unwrap_or(self.min.saturating_sub(1));
        let high = history
            .iter()
            .filter(|step| !step.stable)
            .map(|step| step.level)
            .min()
            .unwrap_or(self.max + 1);
        (low, high)
    }
}

impl SearchStrategy for BinarySearch {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn next_level(&self, history: &[SearchStep]) -> Option<usize> {
        if history.is_empty() {
            return Some(self.initial.clamp(self.min, self.max));
        }

        let (low, high) = self.bounds(history);
        // Stable above unstable means noisy measurements; the bracket is meaningless
        if low >= high || high - low < self.granularity.max(2) {
            return None;
        }

        let mid = low + (high - low) / 2;
        if history.iter().any(|step| step.level == mid) {
            return None;
        }
        Some(mid)
    }
}

pub fn from_config(config: &AdaptiveConfig) -> Box<dyn SearchStrategy> {
    let start = config.initial_level.clamp(config.min_level, config.max_level);
    match config.mode {
        SearchMode::Linear => Box::new(LinearDecrease {
            start,
            step: config.effective_step(),
            min: config.min_level,
        }),
        SearchMode::Binary => Box::new(BinarySearch {
            min: config.min_level,
            max: config.max_level,
            initial: start,
            granularity: config.granularity,
        }),
    }
}
