use anyhow::{bail, Context, Result};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

const RESERVED_COLUMNS: [&str; 3] = ["datetime", "datetime_utc", "unix_time"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationEntry {
    pub station: String,
    pub components: Vec<String>,
}

/// Stations to poll, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationConfig {
    stations: Vec<StationEntry>,
}

impl StationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read station config {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("parse station config {}", path.display()))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let mapping: Mapping = serde_yaml::from_str(raw)?;
        let mut stations = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let station = match key {
                Value::String(name) => name.trim().to_string(),
                other => bail!("station id must be a string, got {other:?}"),
            };
            if station.is_empty() {
                bail!("station id must not be empty");
            }
            let components: Vec<String> = serde_yaml::from_value(value)
                .with_context(|| format!("components of {station} must be a list of strings"))?;
            let components = validate_components(&station, components)?;
            stations.push(StationEntry {
                station,
                components,
            });
        }
        if stations.is_empty() {
            bail!("station config lists no stations");
        }
        Ok(Self { stations })
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationEntry> {
        self.stations.iter()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    #[cfg(test)]
    pub(crate) fn components(&self, station: &str) -> Option<&[String]> {
        self.stations
            .iter()
            .find(|entry| entry.station == station)
            .map(|entry| entry.components.as_slice())
    }
}

impl FromIterator<StationEntry> for StationConfig {
    fn from_iter<I: IntoIterator<Item = StationEntry>>(iter: I) -> Self {
        Self {
            stations: iter.into_iter().collect(),
        }
    }
}

fn validate_components(station: &str, components: Vec<String>) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(components.len());
    for component in components {
        let component = component.trim().to_string();
        if component.is_empty() {
            bail!("station {station} lists an empty component code");
        }
        if RESERVED_COLUMNS.contains(&component.as_str()) {
            bail!("station {station} uses reserved column name {component}");
        }
        if !seen.insert(component.clone()) {
            bail!("station {station} lists component {component} twice");
        }
        out.push(component);
    }
    Ok(out)
}
