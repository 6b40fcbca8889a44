//! Motion status on the message bus
//!
//! Every other controller in the house announces its state on the broker after
//! each change; the detector does the same on both edges so dashboards and
//! automations can follow it without polling the backend.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{DetectorEvent, EventSink, ReportError, SENSOR_TYPE};
use crate::config::MqttSettings;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 10;

/// How long shutdown waits for queued statuses to reach the broker
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Serialize)]
struct StatusRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    device: &'a str,
    location: &'a str,
    state: &'static str,
    status: bool,
    distance_cm: f64,
    timestamp: DateTime<Local>,
}

/// JSON status payload for a detector event
pub fn status_payload(event: &DetectorEvent) -> Result<Vec<u8>, ReportError> {
    let record = match event {
        DetectorEvent::MotionDetected(e) => StatusRecord {
            kind: SENSOR_TYPE,
            device: &e.device,
            location: &e.location,
            state: "detected",
            status: true,
            distance_cm: e.distance_cm,
            timestamp: e.timestamp,
        },
        DetectorEvent::MotionCleared(e) => StatusRecord {
            kind: SENSOR_TYPE,
            device: &e.device,
            location: &e.location,
            state: "clear",
            status: false,
            distance_cm: e.distance_cm,
            timestamp: e.timestamp,
        },
    };
    Ok(serde_json::to_vec(&record)?)
}

pub struct MqttStatusPublisher {
    client: AsyncClient,
    topic: String,
}

impl MqttStatusPublisher {
    /// Create the client and spawn the task driving its event loop.
    ///
    /// The connection is established in the background; publishes issued
    /// before it is up are queued by the client, up to its request capacity.
    pub fn connect(settings: &MqttSettings) -> (Self, MqttConnection) {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_seconds));

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        info!(
            "MQTT status publisher for {}:{} on topic {}",
            settings.host, settings.port, settings.status_topic
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive_event_loop(event_loop, cancel.clone()));

        (
            Self {
                client: client.clone(),
                topic: settings.status_topic.clone(),
            },
            MqttConnection {
                client,
                cancel,
                task,
            },
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// The background event loop of a publisher
pub struct MqttConnection {
    client: AsyncClient,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MqttConnection {
    /// Disconnect after everything already queued has been written.
    ///
    /// The disconnect request queues behind pending publishes. If the broker
    /// is unreachable the loop never gets to it, so after [`FLUSH_TIMEOUT`]
    /// the loop is cancelled and whatever is still queued is lost.
    pub async fn close(mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect request not queued: {}", e);
        }

        match tokio::time::timeout(FLUSH_TIMEOUT, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("MQTT task ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "MQTT broker did not take pending statuses within {:?}, dropping them",
                    FLUSH_TIMEOUT
                );
                self.cancel.cancel();
                if let Err(e) = self.task.await {
                    warn!("MQTT task ended abnormally: {}", e);
                }
            }
        }
    }
}

#[async_trait]
impl EventSink for MqttStatusPublisher {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn deliver(&self, event: &DetectorEvent) -> Result<(), ReportError> {
        let payload = status_payload(event)?;
        // Never wait on a full request queue; the broker may be gone
        self.client
            .try_publish(self.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .map_err(|e| ReportError::Publish(e.to_string()))
    }
}

async fn drive_event_loop(mut event_loop: EventLoop, cancel: CancellationToken) {
    let mut state = ConnectionState::Connecting;
    debug!("MQTT connection state: {:?}", state);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            polled = event_loop.poll() => match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    state = ConnectionState::Connected;
                    info!("Connected to MQTT broker");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("MQTT disconnect sent");
                    break;
                }
                Ok(event) => trace!("MQTT event: {:?}", event),
                Err(e) => {
                    if state != ConnectionState::Reconnecting {
                        warn!("MQTT connection error: {}", e);
                    } else {
                        debug!("MQTT reconnect failed: {}", e);
                    }
                    state = ConnectionState::Reconnecting;
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
                    }
                }
            }
        }
    }

    state = ConnectionState::Disconnected;
    info!("MQTT event loop stopped ({:?})", state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::tests::identity;

    #[test]
    fn detection_payload_reports_active_status() {
        let payload = status_payload(&identity().motion_detected(22.0)).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(json["type"], "motion_sensor");
        assert_eq!(json["state"], "detected");
        assert_eq!(json["status"], true);
        assert_eq!(json["device"], "ultrasonic_sensor");
        assert_eq!(json["distance_cm"], 22.0);
    }

    #[test]
    fn cleared_payload_reports_inactive_status() {
        let payload =
            status_payload(&identity().motion_cleared(75.0, Duration::from_secs(8))).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(json["state"], "clear");
        assert_eq!(json["status"], false);
        assert_eq!(json["location"], "entrada");
    }

    #[tokio::test]
    async fn close_gives_up_when_broker_is_unreachable() {
        let settings = MqttSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..MqttSettings::default()
        };
        let (publisher, connection) = MqttStatusPublisher::connect(&settings);

        assert_eq!(publisher.topic(), "/motion/status");
        publisher
            .deliver(&identity().motion_detected(15.0))
            .await
            .unwrap();

        let closing = tokio::time::timeout(FLUSH_TIMEOUT * 2, connection.close());
        assert!(closing.await.is_ok());
    }

    #[tokio::test]
    async fn close_flushes_the_last_status_to_the_broker() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        // Minimal broker: accept CONNECT, answer CONNACK, record the rest
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut connect = [0u8; 256];
            let n = socket.read(&mut connect).await.unwrap();
            assert_eq!(connect[0] >> 4, 1, "expected CONNECT, got {:?}", &connect[..n]);
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();

            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let settings = MqttSettings {
            host: "127.0.0.1".to_string(),
            port,
            ..MqttSettings::default()
        };
        let (publisher, connection) = MqttStatusPublisher::connect(&settings);

        publisher
            .deliver(&identity().motion_cleared(80.0, Duration::from_secs(6)))
            .await
            .unwrap();
        connection.close().await;

        let received = tokio::time::timeout(Duration::from_secs(5), broker)
            .await
            .unwrap()
            .unwrap();
        let text = String::from_utf8_lossy(&received);
        assert!(text.contains("/motion/status"));
        assert!(text.contains("\"state\":\"clear\""));
    }
}
