//! Client for the LUBW measurement API.
//!
//! Each (station, component) pair is requested with `komponente`, `von`,
//! `bis` and `station` query parameters. Responses carry a `messwerte` list
//! and an optional `nextLink` that is followed verbatim until exhausted.
//! A failure on any page discards everything fetched for the station.

use crate::config::Config;
use crate::record::MergedStationRecord;
use crate::window::{InvalidWindow, TimeWindow};
use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use url::Url;

#[derive(Debug, Deserialize)]
struct MeasurementPage {
    #[serde(default)]
    messwerte: Option<Vec<Measurement>>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Measurement {
    #[serde(rename = "endZeit")]
    end: String,
    #[serde(rename = "wert", default)]
    value: JsonValue,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    InvalidWindow(#[from] InvalidWindow),

    #[error("request for {component} at {station} failed: {source}")]
    Transport {
        station: String,
        component: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream answered {status} for {component} at {station}")]
    Status {
        station: String,
        component: String,
        status: StatusCode,
    },

    #[error("malformed response for {component} at {station}: {source}")]
    Decode {
        station: String,
        component: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid nextLink {link:?} for {component} at {station}: {source}")]
    InvalidLink {
        station: String,
        component: String,
        link: String,
        #[source]
        source: url::ParseError,
    },

    #[error("pagination for {component} at {station} exceeded {limit} pages")]
    PaginationLimit {
        station: String,
        component: String,
        limit: u32,
    },

    #[error("no measurements returned for station {station}")]
    NoData { station: String },
}

impl FetchError {
    /// Whether the station should be skipped for this window rather than the
    /// call being rejected outright.
    pub fn is_not_available(&self) -> bool {
        !matches!(self, FetchError::InvalidWindow(_))
    }
}

pub fn basic_auth_header(username: &str, password: &str) -> String {
    let credentials = format!("{username}:{password}");
    format!("Basic {}", STANDARD.encode(credentials.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct LubwClient {
    http: Client,
    base_url: Url,
    authorization: HeaderValue,
    max_pages: u32,
}

impl LubwClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("build LUBW HTTP client")?;
        let mut authorization = HeaderValue::from_str(&basic_auth_header(
            &config.lubw_username,
            &config.lubw_password,
        ))
        .context("LUBW credentials do not form a valid header value")?;
        authorization.set_sensitive(true);
        Ok(Self {
            http,
            base_url: config.lubw_base_url.clone(),
            authorization,
            max_pages: config.max_pages.max(1),
        })
    }

    pub async fn fetch_station(
        &self,
        station: &str,
        components: &[String],
        window: &TimeWindow,
    ) -> Result<MergedStationRecord, FetchError> {
        window.validate()?;

        let mut record = MergedStationRecord::new();
        for component in components {
            self.fetch_component(station, component, window, &mut record)
                .await?;
        }
        if record.is_empty() {
            return Err(FetchError::NoData {
                station: station.to_string(),
            });
        }
        tracing::debug!(station, rows = record.len(), window = %window, "station fetched");
        Ok(record)
    }

    async fn fetch_component(
        &self,
        station: &str,
        component: &str,
        window: &TimeWindow,
        record: &mut MergedStationRecord,
    ) -> Result<(), FetchError> {
        let von = window.wire_start();
        let bis = window.wire_end();
        let mut next_link: Option<Url> = None;

        for page in 1..=self.max_pages {
            let request = match &next_link {
                Some(link) => self.http.get(link.clone()),
                None => self.http.get(self.base_url.clone()).query(&[
                    ("komponente", component),
                    ("von", von.as_str()),
                    ("bis", bis.as_str()),
                    ("station", station),
                ]),
            };
            let body = self.get_page(request, station, component).await?;

            let entries = body.messwerte.unwrap_or_else(|| {
                tracing::debug!(station, component, page, "response without messwerte");
                Vec::new()
            });
            for entry in entries {
                record.insert(&entry.end, component, entry.value);
            }

            let link = body
                .next_link
                .as_deref()
                .map(str::trim)
                .filter(|link| !link.is_empty());
            match link {
                Some(link) => {
                    let resolved =
                        self.base_url
                            .join(link)
                            .map_err(|source| FetchError::InvalidLink {
                                station: station.to_string(),
                                component: component.to_string(),
                                link: link.to_string(),
                                source,
                            })?;
                    next_link = Some(resolved);
                }
                None => return Ok(()),
            }
        }

        Err(FetchError::PaginationLimit {
            station: station.to_string(),
            component: component.to_string(),
            limit: self.max_pages,
        })
    }

    async fn get_page(
        &self,
        request: RequestBuilder,
        station: &str,
        component: &str,
    ) -> Result<MeasurementPage, FetchError> {
        let transport = |source| FetchError::Transport {
            station: station.to_string(),
            component: component.to_string(),
            source,
        };

        let response = request
            .header(AUTHORIZATION, self.authorization.clone())
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                station: station.to_string(),
                component: component.to_string(),
                status,
            });
        }
        let bytes = response.bytes().await.map_err(transport)?;
        serde_json::from_slice(&bytes).map_err(|source| FetchError::Decode {
            station: station.to_string(),
            component: component.to_string(),
            source,
        })
    }
}
