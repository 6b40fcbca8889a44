use std::time::{Duration, Instant};

use rppal::gpio::{InputPin, OutputPin};
use tracing::trace;

use super::{
    distance_from_round_trip, EchoPhase, Ranger, RangingError, ECHO_DEADLINE, TRIGGER_PULSE,
};

// HC-SR04 style sensor on a trigger/echo pin pair
pub struct GpioRanger {
    trigger: OutputPin,
    echo: InputPin,
}

impl GpioRanger {
    pub fn new(trigger: OutputPin, echo: InputPin) -> Self {
        Self { trigger, echo }
    }
}

impl Ranger for GpioRanger {
    fn measure_distance(&mut self) -> Result<f64, RangingError> {
        let started = Instant::now();

        self.trigger.set_high();
        std::thread::sleep(TRIGGER_PULSE);
        self.trigger.set_low();

        let echo = &self.echo;
        let round_trip = time_echo(|| echo.is_high(), started)?;
        trace!("Echo round trip: {}µs", round_trip.as_micros());

        distance_from_round_trip(round_trip)
    }

    fn describe(&self) -> String {
        format!(
            "ultrasonic (trigger {}, echo {})",
            self.trigger.pin(),
            self.echo.pin()
        )
    }
}

/// Time one echo pulse on a line read through `is_high`.
///
/// Both edges must arrive before [`ECHO_DEADLINE`] counted from `started`,
/// the moment the measurement began (before the trigger pulse).
pub fn time_echo(
    mut is_high: impl FnMut() -> bool,
    started: Instant,
) -> Result<Duration, RangingError> {
    let deadline = started + ECHO_DEADLINE;

    let start = wait_for_level(&mut is_high, true, deadline, EchoPhase::Rising)?;
    let end = wait_for_level(&mut is_high, false, deadline, EchoPhase::Falling)?;

    Ok(end.duration_since(start))
}

// Busy-wait until the line reads `high` or the deadline passes.
// Returns the last timestamp taken while waiting.
fn wait_for_level(
    is_high: &mut impl FnMut() -> bool,
    high: bool,
    deadline: Instant,
    phase: EchoPhase,
) -> Result<Instant, RangingError> {
    let mut now = Instant::now();
    while is_high() != high {
        now = Instant::now();
        if now > deadline {
            return Err(RangingError::EchoTimeout { phase });
        }
    }
    Ok(now)
}
