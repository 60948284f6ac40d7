use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Every random draw made by the engine goes through this trait, so tests
/// can script the outcomes.
pub trait Randomness: Send + Sync {
    /// Uniform index in `0..len`. `len` is never 0.
    fn index(&self, len: usize) -> usize;

    /// Uniform integer in `0..100`, used for the reply-chance roll.
    fn percent(&self) -> u8;

    /// Uniform count in `1..=max`.
    fn count(&self, max: usize) -> usize {
        self.index(max) + 1
    }
}

/// Seedable standard generator.
pub struct StdRandomness {
    rng: Mutex<StdRng>,
}

impl StdRandomness {
    pub fn from_os() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        // A poisoned lock still holds a usable generator.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }
}

impl Default for StdRandomness {
    fn default() -> Self {
        Self::from_os()
    }
}

impl Randomness for StdRandomness {
    fn index(&self, len: usize) -> usize {
        self.with_rng(|rng| rng.random_range(0..len))
    }

    fn percent(&self) -> u8 {
        self.with_rng(|rng| rng.random_range(0..100))
    }
}

/// Replays queued draws, falling back to 0 once a queue is exhausted.
/// Queued values are clamped into the requested range.
#[derive(Default)]
pub struct ScriptedRandomness {
    indices: Mutex<VecDeque<usize>>,
    percents: Mutex<VecDeque<u8>>,
}

impl ScriptedRandomness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_indices(self, values: impl IntoIterator<Item = usize>) -> Self {
        self.lock_indices().extend(values);
        self
    }

    pub fn with_percents(self, values: impl IntoIterator<Item = u8>) -> Self {
        self.lock_percents().extend(values);
        self
    }

    fn lock_indices(&self) -> std::sync::MutexGuard<'_, VecDeque<usize>> {
        self.indices.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_percents(&self) -> std::sync::MutexGuard<'_, VecDeque<u8>> {
        self.percents.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Randomness for ScriptedRandomness {
    fn index(&self, len: usize) -> usize {
        self.lock_indices()
            .pop_front()
            .unwrap_or(0)
            .min(len.saturating_sub(1))
    }

    fn percent(&self) -> u8 {
        self.lock_percents().pop_front().unwrap_or(0).min(99)
    }
}
