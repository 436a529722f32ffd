use crate::config::Config;
use crate::record::NormalizedTable;
use anyhow::anyhow;
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, Incoming, MqttOptions, Outgoing, QoS,
};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use uuid::Uuid;

const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Shape of the published JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadMode {
    /// Array of every normalized row.
    #[default]
    Full,
    /// Only the earliest row, as a single object.
    FirstRow,
}

impl FromStr for PayloadMode {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "full" | "all" => Ok(Self::Full),
            "first-row" | "first_row" | "first" => Ok(Self::FirstRow),
            other => Err(anyhow!("unknown payload mode {other}; expected full or first-row")),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode payload for {topic}: {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to queue publish to {topic}: {source}")]
    Client {
        topic: String,
        #[source]
        source: ClientError,
    },

    #[error("broker connection failed while publishing to {topic}: {source}")]
    Connection {
        topic: String,
        #[source]
        source: ConnectionError,
    },

    #[error("broker did not confirm publish to {topic} within {timeout:?}")]
    Timeout { topic: String, timeout: Duration },
}

pub fn station_topic(prefix: &str, station: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), station)
}

pub fn encode_payload(table: &NormalizedTable, mode: PayloadMode) -> serde_json::Result<Vec<u8>> {
    match mode {
        PayloadMode::Full => serde_json::to_vec(table),
        PayloadMode::FirstRow => serde_json::to_vec(&table.first()),
    }
}

/// Publishes one payload per connection and waits for the broker to confirm
/// delivery at the configured QoS.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    client_id: String,
    qos: QoS,
    payload_mode: PayloadMode,
    confirm_timeout: Duration,
    max_packet_bytes: usize,
}

impl MqttPublisher {
    pub fn new(config: &Config) -> Self {
        Self {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            client_id: config.mqtt_client_id.clone(),
            qos: config.mqtt_qos,
            payload_mode: config.payload_mode,
            confirm_timeout: config.publish_timeout,
            max_packet_bytes: config.mqtt_max_packet_bytes,
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let client_id = format!("{}-{}", self.client_id, Uuid::new_v4().simple());
        let mut mqttoptions = MqttOptions::new(client_id, self.host.clone(), self.port);
        mqttoptions.set_keep_alive(Duration::from_secs(15));
        mqttoptions.set_clean_session(true);
        mqttoptions.set_max_packet_size(self.max_packet_bytes, self.max_packet_bytes);
        if let Some(username) = &self.username {
            mqttoptions.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        mqttoptions
    }

    pub async fn publish_table(
        &self,
        topic: &str,
        table: &NormalizedTable,
    ) -> Result<(), PublishError> {
        let payload =
            encode_payload(table, self.payload_mode).map_err(|source| PublishError::Encode {
                topic: topic.to_string(),
                source,
            })?;
        let bytes = payload.len();

        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), 10);
        client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|source| PublishError::Client {
                topic: topic.to_string(),
                source,
            })?;

        let qos = self.qos;
        let confirmed = timeout(self.confirm_timeout, async {
            loop {
                let event = eventloop.poll().await?;
                if is_confirmation(&event, qos) {
                    return Ok::<(), ConnectionError>(());
                }
            }
        })
        .await;
        match confirmed {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(PublishError::Connection {
                    topic: topic.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(PublishError::Timeout {
                    topic: topic.to_string(),
                    timeout: self.confirm_timeout,
                })
            }
        }

        if let Err(err) = client.disconnect().await {
            tracing::debug!(error=%err, topic, "failed to queue MQTT disconnect");
        }
        // Drive the event loop once more so the DISCONNECT packet is written.
        let _ = timeout(DISCONNECT_GRACE, eventloop.poll()).await;

        tracing::info!(topic, rows = table.len(), bytes, "published station data");
        Ok(())
    }
}

fn is_confirmation(event: &Event, qos: QoS) -> bool {
    matches!(
        (qos, event),
        (QoS::AtMostOnce, Event::Outgoing(Outgoing::Publish(_)))
            | (QoS::AtLeastOnce, Event::Incoming(Incoming::PubAck(_)))
            | (QoS::ExactlyOnce, Event::Incoming(Incoming::PubComp(_)))
    )
}
