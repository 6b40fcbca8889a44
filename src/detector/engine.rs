use std::time::{Duration, Instant};

use statum::{machine, state};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{evaluate, DetectorState, Sample, SideEffect};
use super::DetectorConfig;
use crate::reporting::{DetectorEvent, DetectorIdentity};
use crate::sensor::indicator::Indicator;
use crate::sensor::Ranger;

// Engine settings
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub sample_period: Duration,
    pub stats_log_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sample_period: Duration::from_millis(100),
            stats_log_interval: Duration::from_secs(30),
        }
    }
}

// Counters since the engine started
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub samples: u64,
    pub failed_reads: u64,
    pub activations: u64,
    pub clears: u64,
    pub dropped_events: u64,
}

// Engine lifecycle states
#[state]
#[derive(Debug, Clone)]
pub enum EngineState {
    Initializing,
    Sampling,
    Stopped,
}

#[machine]
pub struct MotionEngine<S: EngineState> {
    // Distance source (GPIO or simulated)
    ranger: Box<dyn Ranger>,

    // Output mirroring the motion state
    indicator: Box<dyn Indicator>,

    // Debounce thresholds
    detector_config: DetectorConfig,

    // Current debounce state, owned exclusively by the sampling loop
    detector_state: DetectorState,

    // Static facts stamped onto outgoing events
    identity: DetectorIdentity,

    // Hand-off to the report dispatcher
    event_sender: mpsc::Sender<DetectorEvent>,

    settings: EngineSettings,

    stats: EngineStats,

    // Stats snapshot at the last periodic log line
    last_logged: EngineStats,
    last_log_time: Instant,
}

// Methods available in all states
impl<S: EngineState> MotionEngine<S> {
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn detector_state(&self) -> DetectorState {
        self.detector_state
    }
}

impl MotionEngine<Initializing> {
    pub fn create(
        ranger: Box<dyn Ranger>,
        indicator: Box<dyn Indicator>,
        detector_config: DetectorConfig,
        identity: DetectorIdentity,
        event_sender: mpsc::Sender<DetectorEvent>,
        settings: Option<EngineSettings>,
    ) -> Self {
        let settings = settings.unwrap_or_default();
        debug!("Creating motion engine with settings: {:?}", settings);

        Self::new(
            ranger,
            indicator,
            detector_config,
            DetectorState::Idle,
            identity,
            event_sender,
            settings,
            EngineStats::default(),
            EngineStats::default(),
            Instant::now(),
        )
    }

    pub fn initialize(self) -> MotionEngine<Sampling> {
        info!(
            "Motion engine using {} and {}",
            self.ranger.describe(),
            self.indicator.describe()
        );
        info!(
            "Detection threshold: {}cm, release timeout: {:?}, sample period: {:?}",
            self.detector_config.distance_threshold_cm,
            self.detector_config.release_timeout,
            self.settings.sample_period
        );

        self.transition()
    }
}

impl MotionEngine<Sampling> {
    /// Run measure -> evaluate -> act until `cancel` fires.
    ///
    /// Cancellation is checked once per cycle, never mid-measurement. The
    /// indicator is forced off on the way out whatever the detector state.
    pub fn run(mut self, cancel: &CancellationToken) -> MotionEngine<Stopped> {
        info!("Starting motion sampling loop");

        while !cancel.is_cancelled() {
            self.step();
            std::thread::sleep(self.settings.sample_period);
        }

        self.shutdown()
    }

    /// One sampling cycle: measure, evaluate and apply the resulting side effect.
    pub fn step(&mut self) -> Option<SideEffect> {
        let reading = self.ranger.measure_distance();
        self.stats.samples += 1;

        if let Err(e) = &reading {
            self.stats.failed_reads += 1;
            debug!("Skipping sample: {}", e);
        }

        let (next, effect) = evaluate(
            Sample::from(reading),
            self.detector_state,
            &self.detector_config,
            Instant::now(),
        );
        self.detector_state = next;

        if let Some(effect) = effect {
            self.apply(effect);
        }

        self.log_stats_if_due();
        effect
    }

    pub fn shutdown(mut self) -> MotionEngine<Stopped> {
        info!("Stopping motion engine (motion active: {})", self.detector_state.is_active());

        self.indicator.set(false);

        info!(
            "Motion engine stopped: {} samples, {} failed reads, {} activations, {} clears",
            self.stats.samples, self.stats.failed_reads, self.stats.activations, self.stats.clears
        );
        self.transition()
    }

    fn apply(&mut self, effect: SideEffect) {
        match effect {
            SideEffect::MotionStarted { distance_cm } => {
                info!("MOTION DETECTED - distance: {:.1}cm", distance_cm);
                self.stats.activations += 1;
                self.indicator.set(true);
                let event = self.identity.motion_detected(distance_cm);
                self.emit(event);
            }
            SideEffect::MotionCleared {
                distance_cm,
                active_for,
            } => {
                info!(
                    "No motion for {:?} - clearing (active for {:.1}s)",
                    self.detector_config.release_timeout,
                    active_for.as_secs_f64()
                );
                self.stats.clears += 1;
                self.indicator.set(false);
                let event = self.identity.motion_cleared(distance_cm, active_for);
                self.emit(event);
            }
        }
    }

    // Never block the sampling loop on the dispatcher
    fn emit(&mut self, event: DetectorEvent) {
        match self.event_sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.stats.dropped_events += 1;
                warn!("Report queue full, dropping {}", event.label());
            }
            Err(TrySendError::Closed(event)) => {
                self.stats.dropped_events += 1;
                debug!("Report dispatcher gone, dropping {}", event.label());
            }
        }
    }

    fn log_stats_if_due(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_log_time);
        if elapsed < self.settings.stats_log_interval {
            return;
        }

        let samples = self.stats.samples - self.last_logged.samples;
        let failed = self.stats.failed_reads - self.last_logged.failed_reads;
        info!(
            "Motion engine stats: {} samples in last {}s ({} failed), {} activations / {} clears total",
            samples,
            elapsed.as_secs(),
            failed,
            self.stats.activations,
            self.stats.clears
        );

        self.last_logged = self.stats.clone();
        self.last_log_time = now;
    }
}
