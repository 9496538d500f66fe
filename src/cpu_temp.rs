//! CPU temperature readings from the iLO Redfish thermal endpoint

use crate::config::FanControlConfig;
use crate::errors::{FanControlError, Result};
use log::{debug, warn};
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

/// Per-CPU temperatures in whole degrees Celsius, keyed by logical CPU id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemperatureSnapshot {
    readings: BTreeMap<u8, i32>,
}

impl TemperatureSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading. When a CPU reports more than once the hottest wins.
    pub fn insert(&mut self, cpu: u8, celsius: i32) {
        self.readings
            .entry(cpu)
            .and_modify(|t| *t = (*t).max(celsius))
            .or_insert(celsius);
    }

    pub fn get(&self, cpu: u8) -> Option<i32> {
        self.readings.get(&cpu).copied()
    }

    /// Readings in ascending CPU order
    pub fn iter(&self) -> impl Iterator<Item = (u8, i32)> + '_ {
        self.readings.iter().map(|(cpu, t)| (*cpu, *t))
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl FromIterator<(u8, i32)> for TemperatureSnapshot {
    fn from_iter<I: IntoIterator<Item = (u8, i32)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (cpu, t) in iter {
            snapshot.insert(cpu, t);
        }
        snapshot
    }
}

impl fmt::Display for TemperatureSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (cpu, t) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "CPU-{}: {}°C", cpu, t)?;
            first = false;
        }
        Ok(())
    }
}

/// Anything that can produce a temperature snapshot for one control cycle
pub trait TemperatureSource {
    fn read_temperatures(&self) -> impl Future<Output = Result<TemperatureSnapshot>> + Send;
}

#[derive(Debug, Deserialize)]
struct Thermal {
    #[serde(rename = "Temperatures")]
    temperatures: Vec<TemperatureEntry>,
}

#[derive(Debug, Deserialize)]
struct TemperatureEntry {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "PhysicalContext", default)]
    physical_context: Option<String>,
    /// Only checked on CPU entries; other sensors may report null
    #[serde(rename = "ReadingCelsius", default)]
    reading_celsius: Option<serde_json::Value>,
}

impl TemperatureEntry {
    fn celsius(&self) -> Result<i32> {
        self.reading_celsius
            .as_ref()
            .and_then(serde_json::Value::as_f64)
            .map(|t| t as i32)
            .ok_or_else(|| {
                FanControlError::SensorUnavailable(format!(
                    "malformed thermal payload: {} has no numeric ReadingCelsius",
                    self.name
                ))
            })
    }
}

const CPU_CONTEXT: &str = "CPU";

fn single_cpu_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{2}-CPU$").expect("valid regex"))
}

fn indexed_cpu_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{2}-CPU (\d+)$").expect("valid regex"))
}

/// Resolve a sensor label such as `02-CPU 2` to its logical CPU id.
///
/// `NN-CPU` is the single-socket form and maps to CPU 1.
pub fn parse_cpu_label(label: &str) -> Result<u8> {
    let label = label.trim();
    if single_cpu_label().is_match(label) {
        return Ok(1);
    }

    indexed_cpu_label()
        .captures(label)
        .and_then(|caps| caps[1].parse::<u8>().ok())
        .filter(|cpu| *cpu >= 1)
        .ok_or_else(|| FanControlError::SensorParse {
            label: label.to_string(),
        })
}

/// Decode a Redfish `Thermal` document into a snapshot.
///
/// Entries outside the CPU physical context are ignored; CPU entries whose
/// label cannot be resolved are logged and skipped. A CPU entry without a
/// numeric reading makes the payload malformed.
pub fn parse_thermal(body: &str) -> Result<TemperatureSnapshot> {
    let thermal: Thermal = serde_json::from_str(body)
        .map_err(|e| FanControlError::SensorUnavailable(format!("malformed thermal payload: {}", e)))?;

    let mut snapshot = TemperatureSnapshot::new();
    for entry in thermal.temperatures {
        if entry.physical_context.as_deref() != Some(CPU_CONTEXT) {
            continue;
        }

        match parse_cpu_label(&entry.name) {
            Ok(cpu) => {
                let celsius = entry.celsius()?;
                debug!("{} -> CPU-{}: {}°C", entry.name, cpu, celsius);
                snapshot.insert(cpu, celsius);
            }
            Err(e) => warn!("Skipping sensor entry: {}", e),
        }
    }

    Ok(snapshot)
}

/// Reads CPU temperatures over HTTPS with basic auth
pub struct TemperatureReader {
    client: reqwest::Client,
    url: String,
    user: String,
    password: String,
}

impl TemperatureReader {
    pub fn from_config(config: &FanControlConfig) -> Result<Self> {
        if !config.verify_tls {
            warn!(
                "TLS certificate verification is disabled for {} (verify_tls = false)",
                config.host
            );
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(Duration::from_secs(config.sensor.timeout_seconds))
            .build()
            .map_err(|e| FanControlError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.sensor_url(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| FanControlError::SensorUnavailable(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FanControlError::SensorUnavailable(format!(
                "{} returned HTTP {}",
                self.url,
                status.as_u16()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| FanControlError::SensorUnavailable(format!("{}: {}", self.url, e)))
    }
}

impl TemperatureSource for TemperatureReader {
    async fn read_temperatures(&self) -> Result<TemperatureSnapshot> {
        let body = self.fetch().await?;
        parse_thermal(&body)
    }
}
