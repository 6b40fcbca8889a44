//! Sensor hardware subsystem
//!
//! Wraps the two pieces of hardware the detector talks to:
//!
//! 1. [`ultrasonic`] - HC-SR04 style time-of-flight ranging over a trigger/echo pin pair
//! 2. [`indicator`] - a single digital output mirroring the motion state (LED)
//! 3. [`simulated`] - stand-ins used when no GPIO controller is available
//!
//! # Architecture
//!
//! ```text
//! trigger ──► [10µs pulse] ──► echo high ... echo low ──► round trip ──► distance (cm)
//! ```
//!
//! Both the real and the simulated variants implement [`Ranger`] and
//! [`indicator::Indicator`], so the detector never knows which one it drives.

pub mod indicator;
pub mod simulated;
pub mod ultrasonic;

use std::time::Duration;

use rppal::gpio::Gpio;
use serde::Serialize;
use tracing::{debug, info};

use indicator::GpioIndicator;
use ultrasonic::GpioRanger;

/// Speed of sound at room temperature in cm/s
pub const SPEED_OF_SOUND_CM_PER_S: f64 = 34_300.0;

/// Readings at or beyond this distance are echo noise or max-range artifacts
pub const MAX_RANGE_CM: f64 = 400.0;

/// Width of the trigger pulse
pub const TRIGGER_PULSE: Duration = Duration::from_micros(10);

/// Absolute deadline for one measurement, counted from the start of the attempt
pub const ECHO_DEADLINE: Duration = Duration::from_millis(100);

/// Which edge of the echo line we were waiting for when the deadline passed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoPhase {
    Rising,
    Falling,
}

/// A measurement attempt that produced no usable distance.
///
/// Both variants mean the same thing to the detector: skip this cycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RangingError {
    #[error("Echo timeout while waiting for {phase:?} edge")]
    EchoTimeout { phase: EchoPhase },

    #[error("Distance {distance_cm:.1}cm is outside the valid range")]
    OutOfRange { distance_cm: f64 },
}

/// Errors while claiming the GPIO lines at startup
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("GPIO unavailable: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("Pin {0} is assigned to more than one channel")]
    PinConflict(u8),
}

/// Source of distance measurements
pub trait Ranger: Send {
    /// Perform one measurement. Blocks for at most [`ECHO_DEADLINE`] on real hardware.
    fn measure_distance(&mut self) -> Result<f64, RangingError>;

    /// Human readable name for logs
    fn describe(&self) -> String;
}

/// GPIO channel assignment (BCM numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Channels {
    pub trigger: u8,
    pub echo: u8,
    pub indicator: u8,
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            trigger: 23,
            echo: 24,
            indicator: 25,
        }
    }
}

/// Convert an echo round trip into a validated distance.
pub fn distance_from_round_trip(round_trip: Duration) -> Result<f64, RangingError> {
    let distance_cm = round_trip.as_secs_f64() * SPEED_OF_SOUND_CM_PER_S / 2.0;
    validate_distance(distance_cm)
}

/// Discard readings that can't come from a real reflection.
pub fn validate_distance(distance_cm: f64) -> Result<f64, RangingError> {
    if distance_cm.is_finite() && (0.0..MAX_RANGE_CM).contains(&distance_cm) {
        Ok(distance_cm)
    } else {
        Err(RangingError::OutOfRange { distance_cm })
    }
}

/// Claim the trigger, echo and indicator pins.
///
/// Fails if the GPIO controller can't be opened (not running on a Pi, missing
/// permissions) or a pin is already claimed. Callers fall back to the
/// simulated variants on error.
pub fn claim_hardware(channels: Channels) -> Result<(GpioRanger, GpioIndicator), HardwareError> {
    if channels.trigger == channels.echo || channels.trigger == channels.indicator {
        return Err(HardwareError::PinConflict(channels.trigger));
    }
    if channels.echo == channels.indicator {
        return Err(HardwareError::PinConflict(channels.echo));
    }

    debug!("Opening GPIO controller");
    let gpio = Gpio::new()?;

    let trigger = gpio.get(channels.trigger)?.into_output_low();
    let echo = gpio.get(channels.echo)?.into_input();
    let indicator = gpio.get(channels.indicator)?.into_output_low();

    info!(
        "GPIO configured - trigger: {}, echo: {}, indicator: {}",
        channels.trigger, channels.echo, channels.indicator
    );

    Ok((
        GpioRanger::new(trigger, echo),
        GpioIndicator::new(indicator, channels.indicator),
    ))
}
