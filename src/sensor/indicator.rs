use rppal::gpio::OutputPin;
use tracing::{debug, info};

/// Digital output mirroring the detector state.
///
/// Driving it to the level it already has must be harmless.
pub trait Indicator: Send {
    fn set(&mut self, on: bool);

    fn describe(&self) -> String;
}

// LED on a GPIO output pin
pub struct GpioIndicator {
    pin: OutputPin,
    channel: u8,
}

impl GpioIndicator {
    pub fn new(pin: OutputPin, channel: u8) -> Self {
        Self { pin, channel }
    }
}

impl Indicator for GpioIndicator {
    fn set(&mut self, on: bool) {
        if on {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        info!(
            "Indicator {} (GPIO {})",
            if on { "ON" } else { "OFF" },
            self.channel
        );
    }

    fn describe(&self) -> String {
        format!("GPIO indicator on pin {}", self.channel)
    }
}

impl Drop for GpioIndicator {
    fn drop(&mut self) {
        // Never leave the LED lit when the pin is released
        self.pin.set_low();
        debug!("Indicator pin {} released", self.channel);
    }
}

#[derive(Debug, Default)]
pub struct SimulatedIndicator {
    on: bool,
}

impl SimulatedIndicator {
    pub fn is_on(&self) -> bool {
        self.on
    }
}

impl Indicator for SimulatedIndicator {
    fn set(&mut self, on: bool) {
        self.on = on;
        info!("Simulating: indicator {}", if on { "ON" } else { "OFF" });
    }

    fn describe(&self) -> String {
        "simulated indicator".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_indicator_follows_writes() {
        let mut indicator = SimulatedIndicator::default();
        assert!(!indicator.is_on());

        indicator.set(true);
        indicator.set(true);
        assert!(indicator.is_on());

        indicator.set(false);
        assert!(!indicator.is_on());
    }
}
