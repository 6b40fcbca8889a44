//! Motion detector subsystem
//!
//! Turns a stream of ultrasonic distance readings into debounced motion edges:
//!
//! 1. [`state`] - pure debounce / edge detection state machine
//! 2. [`engine`] - sampling loop driving sensor, indicator and event hand-off
//! 3. [`detector_handle`] - lifecycle management and task spawning
//!
//! # Architecture
//!
//! ```text
//! Ranger ──► evaluate() ──► SideEffect ──┬──► Indicator
//!            (DetectorState)             └──► DetectorEvent ──► ReportDispatcher
//! ```
//!
//! The sampling loop runs on a dedicated blocking worker; it is the only owner
//! of the detector state and the only writer of the indicator.

pub mod detector_handle;
pub mod engine;
pub mod state;

use std::time::Duration;

pub use detector_handle::{DetectorError, DetectorHandle};
pub use engine::{EngineStats, MotionEngine};
pub use state::{evaluate, DetectorState, Sample, SideEffect};

/// Thresholds for the debounce state machine
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Readings at or below this distance count as motion
    pub distance_threshold_cm: f64,

    /// How long motion must be absent before it is cleared
    pub release_timeout: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            distance_threshold_cm: 30.0,
            release_timeout: Duration::from_secs(5),
        }
    }
}
