//! Seeded start-delay generator.
//!
//! Entities spawned in the same batch would otherwise start their movement
//! pattern in lockstep. Each one gets a random delay drawn from a seeded
//! generator so identical seeds reproduce identical swarms.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::StaggerConfig;

pub struct StaggerGenerator {
    rng: StdRng,
    max_delay: f32,
}

impl StaggerGenerator {
    pub fn new(seed: u64, max_delay: f32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            max_delay: if max_delay.is_finite() { max_delay.max(0.0) } else { 0.0 },
        }
    }

    pub fn from_config(config: &StaggerConfig) -> Self {
        Self::new(config.seed, config.max_delay)
    }

    /// Delay in seconds, uniform in `[0, max_delay)`
    pub fn next_delay(&mut self) -> f32 {
        if self.max_delay <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(0.0..self.max_delay)
    }

    pub fn max_delay(&self) -> f32 {
        self.max_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = StaggerGenerator::new(99, 2.0);
        let mut b = StaggerGenerator::new(99, 2.0);
        for _ in 0..32 {
            assert_eq!(a.next_delay(), b.next_delay());
        }
    }

    #[test]
    fn test_delays_stay_in_range() {
        let mut stagger = StaggerGenerator::new(1, 0.5);
        for _ in 0..1000 {
            let d = stagger.next_delay();
            assert!((0.0..0.5).contains(&d));
        }
    }

    #[test]
    fn test_zero_max_disables_stagger() {
        let mut stagger = StaggerGenerator::new(1, 0.0);
        assert_eq!(stagger.next_delay(), 0.0);
        let mut negative = StaggerGenerator::new(1, -3.0);
        assert_eq!(negative.next_delay(), 0.0);
    }

    #[test]
    fn test_non_finite_max_disables_stagger() {
        for max in [f32::INFINITY, f32::NAN] {
            let mut stagger = StaggerGenerator::new(1, max);
            assert_eq!(stagger.max_delay(), 0.0);
            assert_eq!(stagger.next_delay(), 0.0);
        }
    }
}
