use crate::config::Config;
use crate::lubw::{FetchError, LubwClient};
use crate::mqtt::{station_topic, MqttPublisher, PublishError};
use crate::record::{normalize, MergedStationRecord, NormalizedTable};
use crate::stations::{StationConfig, StationEntry};
use crate::window::{chunk_windows, split_hourly, OffsetPolicy, TimeWindow};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::str::FromStr;

/// What to do with the rest of a run once a station returns no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingDataPolicy {
    #[default]
    Skip,
    Abort,
}

impl FromStr for MissingDataPolicy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "skip" | "continue" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(anyhow!("unknown missing data policy {other}; expected skip or abort")),
        }
    }
}

pub trait StationSource {
    fn fetch(
        &self,
        station: &str,
        components: &[String],
        window: &TimeWindow,
    ) -> impl Future<Output = Result<MergedStationRecord, FetchError>>;
}

pub trait TableSink {
    fn publish(
        &self,
        topic: &str,
        table: &NormalizedTable,
    ) -> impl Future<Output = Result<(), PublishError>>;
}

impl StationSource for LubwClient {
    async fn fetch(
        &self,
        station: &str,
        components: &[String],
        window: &TimeWindow,
    ) -> Result<MergedStationRecord, FetchError> {
        self.fetch_station(station, components, window).await
    }
}

impl TableSink for MqttPublisher {
    async fn publish(&self, topic: &str, table: &NormalizedTable) -> Result<(), PublishError> {
        self.publish_table(topic, table).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationStatus {
    Published { rows: usize },
    NotAvailable(String),
    InvalidWindow(String),
    InvalidData(String),
    PublishFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationOutcome {
    pub station: String,
    pub window: TimeWindow,
    pub status: StationStatus,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<StationOutcome>,
    pub aborted: bool,
}

impl RunReport {
    pub fn published(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.status, StationStatus::Published { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.published()
    }

    fn merge(&mut self, other: RunReport) {
        self.outcomes.extend(other.outcomes);
        self.aborted |= other.aborted;
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub topic_prefix: String,
    pub window_policy: OffsetPolicy,
    pub missing_data_policy: MissingDataPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            topic_prefix: config.mqtt_topic_prefix.clone(),
            window_policy: OffsetPolicy {
                timezone: config.timezone,
                lag_hours: config.lag_hours,
                window_hours: config.window_hours,
            },
            missing_data_policy: config.missing_data_policy,
        }
    }
}

pub struct Pipeline<S, P> {
    source: S,
    sink: P,
    stations: StationConfig,
    settings: PipelineSettings,
}

impl<S: StationSource, P: TableSink> Pipeline<S, P> {
    pub fn new(source: S, sink: P, stations: StationConfig, settings: PipelineSettings) -> Self {
        Self {
            source,
            sink,
            stations,
            settings,
        }
    }

    /// Scheduled mode: one lagging window for every station.
    pub async fn run_incremental(&self, now: DateTime<Utc>) -> RunReport {
        let window = match self.settings.window_policy.window_at(now) {
            Ok(window) => window,
            Err(err) => {
                tracing::error!(error=%err, "could not compute query window");
                return RunReport::default();
            }
        };
        tracing::info!(
            start = %window.start.to_rfc3339(),
            end = %window.end.to_rfc3339(),
            stations = self.stations.len(),
            "starting incremental run"
        );
        let report = self.run_window(&window).await;
        tracing::info!(
            published = report.published(),
            failed = report.failed(),
            aborted = report.aborted,
            "incremental run finished"
        );
        report
    }

    /// Backfill mode: the explicit range split into hourly steps and grouped
    /// into chunks, each chunk requested as one window per station.
    pub async fn run_backfill(
        &self,
        range: &TimeWindow,
        step_hours: u32,
        chunk_size: usize,
    ) -> RunReport {
        let timezone = self.settings.window_policy.timezone;
        let chunks: Vec<TimeWindow> = chunk_windows(&split_hourly(range, step_hours), chunk_size)
            .iter()
            .map(|chunk| chunk.in_zone(&timezone))
            .collect();
        tracing::info!(
            start = %range.start.to_rfc3339(),
            end = %range.end.to_rfc3339(),
            chunks = chunks.len(),
            "start fetching LUBW data"
        );

        let mut report = RunReport::default();
        for (index, chunk) in chunks.iter().enumerate() {
            tracing::debug!(chunk = index + 1, window = %chunk, "processing chunk");
            report.merge(self.run_window(chunk).await);
        }

        tracing::info!(
            published = report.published(),
            failed = report.failed(),
            "finished fetching LUBW data"
        );
        report
    }

    async fn run_window(&self, window: &TimeWindow) -> RunReport {
        let mut report = RunReport::default();
        for entry in self.stations.iter() {
            let status = self.process_station(entry, window).await;
            let missing = matches!(status, StationStatus::NotAvailable(_));
            report.outcomes.push(StationOutcome {
                station: entry.station.clone(),
                window: *window,
                status,
            });
            if missing && self.settings.missing_data_policy == MissingDataPolicy::Abort {
                tracing::warn!(station = %entry.station, "aborting window after missing station data");
                report.aborted = true;
                break;
            }
        }
        report
    }

    async fn process_station(&self, entry: &StationEntry, window: &TimeWindow) -> StationStatus {
        let station = entry.station.as_str();
        let start = window.start.to_rfc3339();
        let end = window.end.to_rfc3339();

        let record = match self.source.fetch(station, &entry.components, window).await {
            Ok(record) => record,
            Err(err) if err.is_not_available() => {
                tracing::error!(station, %start, %end, error=%err, "no data received from station");
                return StationStatus::NotAvailable(err.to_string());
            }
            Err(err) => {
                tracing::error!(station, %start, %end, error=%err, "rejected station query");
                return StationStatus::InvalidWindow(err.to_string());
            }
        };

        let table = match normalize(record) {
            Ok(table) => table,
            Err(err) => {
                tracing::error!(station, %start, %end, error=%err, "could not normalize station data");
                return StationStatus::InvalidData(err.to_string());
            }
        };

        if table.is_empty() {
            tracing::error!(station, %start, %end, "no rows left to publish");
            return StationStatus::NotAvailable(format!("no rows for station {station}"));
        }

        let topic = station_topic(&self.settings.topic_prefix, station);
        match self.sink.publish(&topic, &table).await {
            Ok(()) => StationStatus::Published { rows: table.len() },
            Err(err) => {
                tracing::warn!(station, %start, %end, topic = %topic, error=%err, "could not publish station data");
                StationStatus::PublishFailed(err.to_string())
            }
        }
    }
}
