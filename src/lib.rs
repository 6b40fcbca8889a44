//! Ultrasonic motion detector for a Raspberry Pi home-automation node.
//!
//! Measures distance with an HC-SR04 style sensor, debounces the readings into
//! motion edges, mirrors them on an indicator LED and reports them to the
//! backend and the message bus.

pub mod config;
pub mod detector;
pub mod reporting;
pub mod sensor;
