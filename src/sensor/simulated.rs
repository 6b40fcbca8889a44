//! Simulated sensor used when no GPIO controller is available.

use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Ranger, RangingError};

/// Range of the simulated readings. Straddles the default 30cm threshold so
/// both detector states are reached.
pub const SIMULATED_RANGE_CM: RangeInclusive<f64> = 10.0..=50.0;

pub struct SimulatedRanger {
    rng: StdRng,
}

impl SimulatedRanger {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic sequence for tests and reproducible runs
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SimulatedRanger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ranger for SimulatedRanger {
    fn measure_distance(&mut self) -> Result<f64, RangingError> {
        Ok(self.rng.gen_range(SIMULATED_RANGE_CM))
    }

    fn describe(&self) -> String {
        "simulated ranger".to_string()
    }
}
