use crate::window::{DEFAULT_CHUNK_SIZE, DEFAULT_STEP_HOURS};
use chrono::{DateTime, FixedOffset};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "lubw-forwarder",
    version,
    about = "Fetch LUBW air-quality measurements and republish them over MQTT"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch the lagging window every poll interval (default).
    Run,
    /// Fetch the lagging window once and exit.
    Once,
    /// Fetch and republish an explicit historical range, then exit.
    Backfill {
        /// Range start, e.g. 2024-10-15T00:00:00+01:00.
        #[arg(long, value_parser = parse_timestamp)]
        start: DateTime<FixedOffset>,
        /// Range end (exclusive).
        #[arg(long, value_parser = parse_timestamp)]
        end: DateTime<FixedOffset>,
        /// Hourly steps grouped into one upstream request.
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        #[arg(long, default_value_t = DEFAULT_STEP_HOURS)]
        step_hours: u32,
    },
}

fn parse_timestamp(raw: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map_err(|err| format!("expected an RFC 3339 timestamp with offset: {err}"))
}
