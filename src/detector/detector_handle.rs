//! Detector Handle - lifecycle management for the motion detector
//!
//! Wires the sampling engine to its hardware and to the report dispatcher, and
//! spawns both. The engine runs on a dedicated blocking worker because a
//! measurement busy-waits on the echo line; the dispatcher is a regular tokio
//! task.
//!
//! ```text
//! spawn_blocking: MotionEngine ─[DetectorEvent]→ tokio::spawn: ReportDispatcher
//!                              (mpsc::channel(32))
//! ```

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{EngineStats, MotionEngine};
use crate::config::Config;
use crate::reporting::mqtt_publisher::MqttConnection;
use crate::reporting::{
    DispatchStats, EventSink, HttpReporter, MqttStatusPublisher, ReportDispatcher, ReportError,
};
use crate::sensor::indicator::{Indicator, SimulatedIndicator};
use crate::sensor::simulated::SimulatedRanger;
use crate::sensor::{claim_hardware, Ranger};

/// Events waiting for delivery before the engine starts dropping them
const EVENT_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("Reporting setup failed: {0}")]
    ReportingError(#[from] ReportError),

    #[error("Worker task failed: {0}")]
    WorkerError(String),
}

/// Running detector: sampling worker, dispatcher and optional bus connection
pub struct DetectorHandle {
    cancel: CancellationToken,
    engine_task: JoinHandle<EngineStats>,
    dispatcher_task: JoinHandle<DispatchStats>,
    mqtt: Option<MqttConnection>,
}

impl DetectorHandle {
    /// Spawn the detector. Must be called from within a tokio runtime.
    ///
    /// Falls back to the simulated sensor if the GPIO lines can't be claimed;
    /// only an unusable reporting setup is an error.
    pub fn spawn(config: &Config, cancel: CancellationToken) -> Result<Self, DetectorError> {
        info!("Initializing motion detector with config: {:?}", config);

        let (ranger, indicator) = acquire_hardware(config);

        let mut sinks: Vec<Box<dyn EventSink>> = Vec::new();
        sinks.push(Box::new(HttpReporter::new(
            &config.reporting_endpoint,
            config.report_timeout(),
        )?));
        info!("Backend URL: {}", config.reporting_endpoint);

        // Closed only after the dispatcher has drained, see `join`
        let mqtt = config.mqtt.as_ref().map(|settings| {
            let (publisher, connection) = MqttStatusPublisher::connect(settings);
            sinks.push(Box::new(publisher));
            connection
        });

        let (event_sender, event_receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        debug!("Created event channel with capacity {}", EVENT_QUEUE_CAPACITY);

        let dispatcher_task = ReportDispatcher::new(sinks).spawn(event_receiver);

        let engine = MotionEngine::create(
            ranger,
            indicator,
            config.detector_config(),
            config.identity(),
            event_sender,
            Some(config.engine_settings()),
        )
        .initialize();

        let engine_cancel = cancel.clone();
        let engine_task = tokio::task::spawn_blocking(move || {
            let stopped = engine.run(&engine_cancel);
            stopped.stats().clone()
        });

        info!("Motion detector started");
        Ok(Self {
            cancel,
            engine_task,
            dispatcher_task,
            mqtt,
        })
    }

    /// Ask the sampling loop to stop at the end of its current cycle
    pub fn stop(&self) {
        info!("Stopping motion detector");
        self.cancel.cancel();
    }

    /// Wait for the engine to stop and pending reports to drain
    pub async fn join(self) -> Result<EngineStats, DetectorError> {
        let engine_stats = self
            .engine_task
            .await
            .map_err(|e| DetectorError::WorkerError(e.to_string()))?;

        // The engine owned the only sender, so the dispatcher finishes its queue and exits
        let dispatch_stats = self
            .dispatcher_task
            .await
            .map_err(|e| DetectorError::WorkerError(e.to_string()))?;
        debug!("Dispatcher finished: {:?}", dispatch_stats);

        // Statuses queued by the last dispatch are flushed before disconnecting
        if let Some(connection) = self.mqtt {
            connection.close().await;
        }

        info!("Motion detector stopped");
        Ok(engine_stats)
    }
}

fn acquire_hardware(config: &Config) -> (Box<dyn Ranger>, Box<dyn Indicator>) {
    if config.simulate {
        info!("Simulation requested, not touching GPIO");
        return simulated_hardware();
    }

    match claim_hardware(config.channels()) {
        Ok((ranger, indicator)) => (Box::new(ranger), Box::new(indicator)),
        Err(e) => {
            warn!("GPIO not available ({}), falling back to simulation mode", e);
            simulated_hardware()
        }
    }
}

fn simulated_hardware() -> (Box<dyn Ranger>, Box<dyn Indicator>) {
    (
        Box::new(SimulatedRanger::new()),
        Box::new(SimulatedIndicator::default()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MqttSettings;
    use crate::reporting::mqtt_publisher::FLUSH_TIMEOUT;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn simulated_detector_runs_until_stopped() {
        let config = Config {
            simulate: true,
            sample_period_seconds: 0.005,
            // Nothing listens here; deliveries fail and are only logged
            reporting_endpoint: "http://127.0.0.1:9".to_string(),
            report_timeout_seconds: 0.5,
            ..Config::default()
        };
        let cancel = CancellationToken::new();
        let handle = DetectorHandle::spawn(&config, cancel).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop();

        let stats = handle.join().await.unwrap();
        assert!(stats.samples > 0);
        assert_eq!(stats.failed_reads, 0);
        // [10, 50] straddles 30cm, so the first activation comes quickly
        assert!(stats.activations >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn join_is_bounded_when_the_broker_is_unreachable() {
        let config = Config {
            simulate: true,
            sample_period_seconds: 0.005,
            reporting_endpoint: "http://127.0.0.1:9".to_string(),
            report_timeout_seconds: 0.5,
            mqtt: Some(MqttSettings {
                host: "127.0.0.1".to_string(),
                port: 1,
                ..MqttSettings::default()
            }),
            ..Config::default()
        };
        let handle = DetectorHandle::spawn(&config, CancellationToken::new()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();

        let joined = tokio::time::timeout(FLUSH_TIMEOUT * 4, handle.join()).await;
        assert!(joined.unwrap().unwrap().samples > 0);
    }
}
