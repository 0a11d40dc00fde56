use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Source of uniform draws in `[0, 1)` used to decide cache-busting refetches.
///
/// Injected so tests can pin the decision to always or never.
pub trait UniformSource: Send + Sync {
    fn draw(&self) -> f64;
}

/// Thread-local RNG; the production default
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl UniformSource for ThreadRandom {
    fn draw(&self) -> f64 {
        rand::random::<f64>()
    }
}

/// Always returns the same value. `FixedDraw(0.0)` forces every fetch,
/// `FixedDraw(1.0)` never does.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub f64);

impl UniformSource for FixedDraw {
    fn draw(&self) -> f64 {
        self.0
    }
}

/// Reproducible sequence of draws from a seed
pub struct SeededRandom(Mutex<StdRng>);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl UniformSource for SeededRandom {
    fn draw(&self) -> f64 {
        match self.0.lock() {
            Ok(mut rng) => rng.random::<f64>(),
            // A poisoned lock still holds a usable RNG
            Err(poisoned) => poisoned.into_inner().random::<f64>(),
        }
    }
}

/// Whether a draw selects a forced refetch at the given probability
pub fn draw_selects_force(draw: f64, probability: f64) -> bool {
    draw <= probability
}
