use crate::mqtt::PayloadMode;
use crate::pipeline::MissingDataPolicy;
use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use dotenvy::dotenv;
use rumqttc::QoS;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Large enough for a 100-hour backfill chunk of a station with a dozen components.
pub const DEFAULT_MAX_PACKET_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub lubw_base_url: Url,
    pub lubw_username: String,
    pub lubw_password: String,
    pub stations_file: PathBuf,
    pub timezone: Tz,
    pub lag_hours: u32,
    pub window_hours: u32,
    pub request_timeout: Duration,
    pub max_pages: u32,
    pub poll_interval: Duration,
    pub missing_data_policy: MissingDataPolicy,

    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_topic_prefix: String,
    pub mqtt_qos: QoS,
    pub publish_timeout: Duration,
    pub payload_mode: PayloadMode,
    pub mqtt_max_packet_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let base_url = env_string("LUBW_BASE_URL", None)?;
        let lubw_base_url = Url::parse(&base_url).context("invalid LUBW_BASE_URL")?;
        let lubw_username = env_string("LUBW_USERNAME", None)?;
        let lubw_password = env_string("LUBW_PASSWORD", None)?;

        let stations_file = PathBuf::from(env_string(
            "LUBW_STATIONS_FILE",
            Some("stations.yaml".to_string()),
        )?);

        let timezone_name = env_string("LUBW_TIMEZONE", Some("Europe/Berlin".to_string()))?;
        let timezone = timezone_name
            .parse::<Tz>()
            .map_err(|err| anyhow!("invalid LUBW_TIMEZONE {timezone_name}: {err}"))?;

        let lag_hours = env_u32("LUBW_LAG_HOURS", Some(3))?;
        let window_hours = env_u32("LUBW_WINDOW_HOURS", Some(1))?;
        if window_hours == 0 {
            bail!("LUBW_WINDOW_HOURS must be at least 1");
        }

        let request_timeout =
            Duration::from_secs(env_u64("LUBW_REQUEST_TIMEOUT_SECS", Some(30))?);
        let max_pages = env_u32("LUBW_MAX_PAGES", Some(1000))?;
        if max_pages == 0 {
            bail!("LUBW_MAX_PAGES must be at least 1");
        }
        let poll_interval = Duration::from_secs(env_u64("LUBW_POLL_INTERVAL_SECS", Some(3600))?);
        if poll_interval.is_zero() {
            bail!("LUBW_POLL_INTERVAL_SECS must be at least 1");
        }
        let missing_data_policy = env_string("LUBW_MISSING_DATA_POLICY", Some("skip".to_string()))?
            .parse::<MissingDataPolicy>()
            .context("invalid LUBW_MISSING_DATA_POLICY")?;

        let mqtt_host = env_string("MQTT_SERVER", Some("127.0.0.1".to_string()))?;
        let mqtt_port = env_u64("MQTT_PORT", Some(1883))?;
        let mqtt_port = u16::try_from(mqtt_port).context("invalid MQTT_PORT")?;
        let mqtt_username = env_optional("MQTT_USERNAME");
        let mqtt_password = env_optional("MQTT_PASSWORD");
        let mqtt_client_id = env_string(
            "MQTT_CLIENT_ID",
            Some(format!("lubw-forwarder-{}", std::process::id())),
        )?;
        let mqtt_topic_prefix =
            env_string("MQTT_TOPIC_PREFIX", Some("sensors/lubw-hour".to_string()))?;
        let mqtt_qos = parse_qos(env_u64("MQTT_QOS", Some(2))?)?;
        let publish_timeout =
            Duration::from_secs(env_u64("MQTT_PUBLISH_TIMEOUT_SECS", Some(10))?);
        let payload_mode = env_string("MQTT_PAYLOAD_MODE", Some("full".to_string()))?
            .parse::<PayloadMode>()
            .context("invalid MQTT_PAYLOAD_MODE")?;
        let mqtt_max_packet_bytes =
            env_u64("MQTT_MAX_PACKET_BYTES", Some(DEFAULT_MAX_PACKET_BYTES))?;
        let mqtt_max_packet_bytes =
            usize::try_from(mqtt_max_packet_bytes).context("invalid MQTT_MAX_PACKET_BYTES")?;
        if mqtt_max_packet_bytes == 0 {
            bail!("MQTT_MAX_PACKET_BYTES must be at least 1");
        }

        Ok(Self {
            lubw_base_url,
            lubw_username,
            lubw_password,
            stations_file,
            timezone,
            lag_hours,
            window_hours,
            request_timeout,
            max_pages,
            poll_interval,
            missing_data_policy,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_topic_prefix,
            mqtt_qos,
            publish_timeout,
            payload_mode,
            mqtt_max_packet_bytes,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(lubw_base_url: Url) -> Self {
        Self {
            lubw_base_url,
            lubw_username: "user".to_string(),
            lubw_password: "password".to_string(),
            stations_file: PathBuf::from("stations.yaml"),
            timezone: chrono_tz::Europe::Berlin,
            lag_hours: 3,
            window_hours: 1,
            request_timeout: Duration::from_secs(5),
            max_pages: 10,
            poll_interval: Duration::from_secs(3600),
            missing_data_policy: MissingDataPolicy::Skip,
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: 1883,
            mqtt_username: None,
            mqtt_password: None,
            mqtt_client_id: "lubw-forwarder-test".to_string(),
            mqtt_topic_prefix: "sensors/lubw-hour".to_string(),
            mqtt_qos: QoS::ExactlyOnce,
            publish_timeout: Duration::from_secs(1),
            payload_mode: PayloadMode::Full,
            mqtt_max_packet_bytes: DEFAULT_MAX_PACKET_BYTES as usize,
        }
    }
}

fn parse_qos(raw: u64) -> Result<QoS> {
    match raw {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(anyhow!("invalid MQTT_QOS {other}; expected 0, 1 or 2")),
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u32(key: &str, default: Option<u32>) -> Result<u32> {
    let value = env_u64(key, default.map(u64::from))?;
    u32::try_from(value).with_context(|| format!("invalid {key}: {value} is out of range"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
