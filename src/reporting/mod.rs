//! # Reporting Module
//!
//! Carries motion edges out of the sampling loop to the rest of the deployment.
//!
//! ## Why This Module Exists
//!
//! The detector commits a transition the moment it happens. Telling the outside
//! world about it is a side channel: the backend may be slow, the broker may be
//! unreachable, and neither may ever hold up the next measurement. This module
//! owns that side channel.
//!
//! ## Module Architecture
//!
//! ```text
//! reporting/
//! ├── mod.rs             - Event records, sink trait and the dispatcher task
//! ├── http_reporter.rs   - POSTs activations to the backend REST endpoint
//! └── mqtt_publisher.rs  - Publishes status records on the message bus
//! ```
//!
//! ```text
//! MotionEngine ──try_send──► mpsc ──► ReportDispatcher ──┬──► HttpReporter
//!  (blocking worker)                   (tokio task)      └──► MqttStatusPublisher
//! ```
//!
//! ## Delivery Semantics
//!
//! - **Best effort**: a failed delivery is logged and dropped, never retried
//! - **Non-blocking hand-off**: the engine uses `try_send`; a full queue drops
//!   the event with a warning instead of stalling the loop
//! - **Bounded**: HTTP deliveries carry their own timeout (5s by default)

pub mod http_reporter;
pub mod mqtt_publisher;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::sensor::Channels;

pub use http_reporter::HttpReporter;
pub use mqtt_publisher::MqttStatusPublisher;

pub const SENSOR_TYPE: &str = "motion_sensor";
pub const MOTION_DESCRIPTION: &str = "Motion detected by ultrasonic sensor";

/// Record sent to the backend on every Idle -> Active transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionEvent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: &'static str,
    pub description: &'static str,
    pub status: bool,
    pub location: String,
    pub device: String,
    pub threshold_cm: f64,
    pub distance_cm: f64,
    pub channels: Channels,
    pub timestamp: DateTime<Local>,
}

/// Record for the Active -> Idle transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClearedEvent {
    pub location: String,
    pub device: String,
    pub distance_cm: f64,
    pub active_for_ms: u64,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectorEvent {
    MotionDetected(MotionEvent),
    MotionCleared(ClearedEvent),
}

impl DetectorEvent {
    pub fn label(&self) -> &'static str {
        match self {
            DetectorEvent::MotionDetected(_) => "motion_detected",
            DetectorEvent::MotionCleared(_) => "motion_cleared",
        }
    }
}

/// Static facts about the detector stamped onto every event
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorIdentity {
    pub device: String,
    pub location: String,
    pub channels: Channels,
    pub threshold_cm: f64,
}

impl DetectorIdentity {
    pub fn motion_detected(&self, distance_cm: f64) -> DetectorEvent {
        DetectorEvent::MotionDetected(MotionEvent {
            kind: SENSOR_TYPE,
            value: "motion_detected",
            description: MOTION_DESCRIPTION,
            status: true,
            location: self.location.clone(),
            device: self.device.clone(),
            threshold_cm: self.threshold_cm,
            distance_cm,
            channels: self.channels,
            timestamp: Local::now(),
        })
    }

    pub fn motion_cleared(&self, distance_cm: f64, active_for: Duration) -> DetectorEvent {
        DetectorEvent::MotionCleared(ClearedEvent {
            location: self.location.clone(),
            device: self.device.clone(),
            distance_cm,
            active_for_ms: u64::try_from(active_for.as_millis()).unwrap_or(u64::MAX),
            timestamp: Local::now(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected response status: {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Bus publish failed: {0}")]
    Publish(String),
}

/// Destination for detector events
#[async_trait]
pub trait EventSink: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this sink cares about the event at all
    fn accepts(&self, _event: &DetectorEvent) -> bool {
        true
    }

    async fn deliver(&self, event: &DetectorEvent) -> Result<(), ReportError>;
}

/// Delivery counters, logged when the dispatcher stops
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    pub events: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Fans detector events out to every configured sink
pub struct ReportDispatcher {
    sinks: Vec<Box<dyn EventSink>>,
    stats: DispatchStats,
}

impl ReportDispatcher {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self {
            sinks,
            stats: DispatchStats::default(),
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Deliver one event to every interested sink. Failures are logged only.
    pub async fn dispatch(&mut self, event: &DetectorEvent) {
        self.stats.events += 1;

        for sink in &self.sinks {
            if !sink.accepts(event) {
                continue;
            }
            match sink.deliver(event).await {
                Ok(()) => {
                    self.stats.delivered += 1;
                    debug!("{} delivered via {}", event.label(), sink.name());
                }
                Err(e) => {
                    self.stats.failed += 1;
                    warn!("Failed to deliver {} via {}: {}", event.label(), sink.name(), e);
                }
            }
        }
    }

    /// Consume events until every sender is dropped
    pub fn spawn(mut self, mut events: mpsc::Receiver<DetectorEvent>) -> JoinHandle<DispatchStats> {
        tokio::spawn(async move {
            info!("Report dispatcher started with {} sink(s)", self.sink_count());

            while let Some(event) = events.recv().await {
                self.dispatch(&event).await;
            }

            info!(
                "Report dispatcher stopped: {} events, {} delivered, {} failed",
                self.stats.events, self.stats.delivered, self.stats.failed
            );
            self.stats
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Sink that records every event and optionally fails
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub events: Arc<Mutex<Vec<DetectorEvent>>>,
        pub fail: bool,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, event: &DetectorEvent) -> Result<(), ReportError> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                Err(ReportError::Status(503))
            } else {
                Ok(())
            }
        }
    }

    pub fn identity() -> DetectorIdentity {
        DetectorIdentity {
            device: "ultrasonic_sensor".to_string(),
            location: "entrada".to_string(),
            channels: Channels::default(),
            threshold_cm: 30.0,
        }
    }

    #[test]
    fn motion_event_serializes_to_backend_shape() {
        let DetectorEvent::MotionDetected(event) = identity().motion_detected(21.5) else {
            panic!("expected a detection event");
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "motion_sensor");
        assert_eq!(json["value"], "motion_detected");
        assert_eq!(json["status"], true);
        assert_eq!(json["threshold_cm"], 30.0);
        assert_eq!(json["distance_cm"], 21.5);
        assert_eq!(json["location"], "entrada");
        assert_eq!(json["channels"]["trigger"], 23);
        assert_eq!(json["channels"]["echo"], 24);
        assert_eq!(json["channels"]["indicator"], 25);
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_the_others() {
        let failing = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let healthy = RecordingSink::default();
        let mut dispatcher =
            ReportDispatcher::new(vec![Box::new(failing.clone()), Box::new(healthy.clone())]);
        assert_eq!(dispatcher.sink_count(), 2);

        dispatcher.dispatch(&identity().motion_detected(20.0)).await;
        dispatcher
            .dispatch(&identity().motion_cleared(45.0, Duration::from_secs(6)))
            .await;

        assert_eq!(failing.events.lock().unwrap().len(), 2);
        assert_eq!(healthy.events.lock().unwrap().len(), 2);
        assert_eq!(
            dispatcher.stats(),
            &DispatchStats {
                events: 2,
                delivered: 2,
                failed: 2,
            }
        );
    }

    #[tokio::test]
    async fn spawned_dispatcher_drains_until_senders_drop() {
        let sink = RecordingSink::default();
        let dispatcher = ReportDispatcher::new(vec![Box::new(sink.clone())]);
        let (tx, rx) = mpsc::channel(8);
        let handle = dispatcher.spawn(rx);

        tx.send(identity().motion_detected(12.0)).await.unwrap();
        tx.send(identity().motion_cleared(60.0, Duration::from_secs(5)))
            .await
            .unwrap();
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.events, 2);
        let labels: Vec<_> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .map(DetectorEvent::label)
            .collect();
        assert_eq!(labels, vec!["motion_detected", "motion_cleared"]);
    }
}
