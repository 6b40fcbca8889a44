use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info};

use super::{DetectorEvent, EventSink, MotionEvent, ReportError};

/// Backend route that records motion activations
pub const MOTION_ROUTE: &str = "/api/sensors/motion";

pub const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts activation events to the backend.
///
/// Only `200 OK` counts as success. Nothing is retried: a missed notification
/// stays missed.
pub struct HttpReporter {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpReporter {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ReportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReportError::Transport(e.to_string()))?;

        let url = format!("{}{}", endpoint.trim_end_matches('/'), MOTION_ROUTE);
        debug!("HTTP reporter targeting {} (timeout {:?})", url, timeout);

        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn report(&self, event: &MotionEvent) -> Result<(), ReportError> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReportError::Timeout(self.timeout)
                } else {
                    ReportError::Transport(e.to_string())
                }
            })?;

        match response.status() {
            StatusCode::OK => {
                info!("Motion registered with backend");
                Ok(())
            }
            status => Err(ReportError::Status(status.as_u16())),
        }
    }
}

#[async_trait]
impl EventSink for HttpReporter {
    fn name(&self) -> &str {
        "backend"
    }

    // Only activations are recorded by the backend
    fn accepts(&self, event: &DetectorEvent) -> bool {
        matches!(event, DetectorEvent::MotionDetected(_))
    }

    async fn deliver(&self, event: &DetectorEvent) -> Result<(), ReportError> {
        match event {
            DetectorEvent::MotionDetected(motion) => self.report(motion).await,
            DetectorEvent::MotionCleared(_) => Ok(()),
        }
    }
}
