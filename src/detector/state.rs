//! Debounce / edge detection state machine
//!
//! Pure transition function over [`DetectorState`]. No I/O happens here; the
//! engine measures, calls [`evaluate`] and applies whatever [`SideEffect`] comes
//! back.
//!
//! # Transitions
//!
//! ```text
//!            valid, d <= threshold
//!   Idle ─────────────────────────────► Active ◄──┐ valid, d <= threshold
//!    ▲        (MotionStarted)             │  └────┘ (refresh last_motion)
//!    │                                    │
//!    └────────────────────────────────────┘
//!      valid, d > threshold, idle for >= release_timeout
//!                 (MotionCleared)
//! ```
//!
//! Missing samples are a no-op in every state: they never start, extend or
//! clear motion.

use std::time::{Duration, Instant};

use super::DetectorConfig;
use crate::sensor::RangingError;

/// Outcome of one ranging attempt as seen by the state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Valid(f64),
    Missing,
}

impl From<Result<f64, RangingError>> for Sample {
    fn from(result: Result<f64, RangingError>) -> Self {
        match result {
            Ok(distance_cm) => Sample::Valid(distance_cm),
            Err(_) => Sample::Missing,
        }
    }
}

impl From<Option<f64>> for Sample {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Sample::Missing, Sample::Valid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorState {
    #[default]
    Idle,
    Active {
        /// When the current activation started
        since: Instant,
        /// Last valid sample at or below the threshold
        last_motion: Instant,
    },
}

impl DetectorState {
    pub fn is_active(&self) -> bool {
        matches!(self, DetectorState::Active { .. })
    }

    pub fn last_motion(&self) -> Option<Instant> {
        match self {
            DetectorState::Idle => None,
            DetectorState::Active { last_motion, .. } => Some(*last_motion),
        }
    }
}

/// Action the driver must perform after a transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SideEffect {
    /// Idle -> Active: indicator on, notify
    MotionStarted { distance_cm: f64 },
    /// Active -> Idle: indicator off, report clear
    MotionCleared {
        distance_cm: f64,
        active_for: Duration,
    },
}

/// Advance the detector by one sample.
pub fn evaluate(
    sample: Sample,
    state: DetectorState,
    config: &DetectorConfig,
    now: Instant,
) -> (DetectorState, Option<SideEffect>) {
    let Sample::Valid(distance_cm) = sample else {
        return (state, None);
    };

    let qualifies = distance_cm <= config.distance_threshold_cm;

    match state {
        DetectorState::Idle if qualifies => (
            DetectorState::Active {
                since: now,
                last_motion: now,
            },
            Some(SideEffect::MotionStarted { distance_cm }),
        ),
        DetectorState::Idle => (state, None),
        DetectorState::Active { since, .. } if qualifies => (
            DetectorState::Active {
                since,
                last_motion: now,
            },
            None,
        ),
        DetectorState::Active { since, last_motion } => {
            if now.saturating_duration_since(last_motion) >= config.release_timeout {
                (
                    DetectorState::Idle,
                    Some(SideEffect::MotionCleared {
                        distance_cm,
                        active_for: now.saturating_duration_since(since),
                    }),
                )
            } else {
                (state, None)
            }
        }
    }
}
