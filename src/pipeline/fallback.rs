//! Canned replies used when the completion service cannot be reached

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Apology texts returned as mock replies after retries run out
pub const FALLBACK_RESPONSES: [&str; 3] = [
    "Sorry, the network connection is having problems and the AI server cannot be reached. This is a simulated reply.",
    "Because of network problems the AI reply is temporarily unavailable. Please check your connection and try again.",
    "The AI service is temporarily unavailable. This may be caused by network problems or server maintenance.",
];

/// Chooses which canned reply to use
pub trait FallbackPicker: Send + Sync {
    /// Index in `0..len`; `len` is never zero
    fn pick(&self, len: usize) -> usize;
}

/// Uniform random choice
pub struct RandomPicker {
    rng: Mutex<StdRng>,
}

impl RandomPicker {
    /// Seeded from the operating system
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic sequence for reproducible runs
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackPicker for RandomPicker {
    fn pick(&self, len: usize) -> usize {
        match self.rng.lock() {
            Ok(mut rng) => rng.random_range(0..len),
            Err(_) => 0,
        }
    }
}

/// Always picks the same index (wrapped into range)
#[derive(Debug, Clone, Copy)]
pub struct FixedPicker(pub usize);

impl FallbackPicker for FixedPicker {
    fn pick(&self, len: usize) -> usize {
        self.0 % len
    }
}

/// Canned reply selected by `picker`
pub fn fallback_text(picker: &dyn FallbackPicker) -> &'static str {
    FALLBACK_RESPONSES[picker.pick(FALLBACK_RESPONSES.len())]
}
