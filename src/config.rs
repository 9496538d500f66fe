//! Daemon configuration file

use crate::errors::{FanControlError, Result};
use crate::fan::{CommandPlanner, FanGroup, FanGroupAssignment};
use crate::threshold::{Threshold, ThresholdTable};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides `password` from the file
pub const PASSWORD_ENV: &str = "ILO_FAN_PASSWORD";

pub const DEFAULT_THERMAL_PATH: &str = "/redfish/v1/Chassis/1/Thermal";
pub const DEFAULT_PROMPT: &str = "</>hpiLO->";

fn default_run_period() -> u64 {
    30
}

/// Top-level configuration, loaded once at startup and shared read-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanControlConfig {
    /// Seconds to sleep between the end of one cycle and the start of the next
    #[serde(default = "default_run_period")]
    pub run_period_seconds: u64,
    /// iLO host name or address
    pub host: String,
    /// iLO user with both SSH and REST API access
    pub user: String,
    pub password: String,
    /// Validate the iLO HTTPS certificate. iLO4 ships a self-signed
    /// certificate, so this is usually `false`; it has no default on purpose.
    pub verify_tls: bool,
    /// Enforce known_hosts checking on the SSH session. No default.
    pub verify_host_key: bool,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub thresholds: Vec<Threshold>,
    pub fan_groups: Vec<FanGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Path of the Redfish thermal resource
    pub path: String,
    pub timeout_seconds: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_THERMAL_PATH.to_string(),
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Literal prompt printed by the management shell when it is ready
    pub prompt: String,
    pub port: u16,
    pub connect_timeout_seconds: u64,
    pub prompt_timeout_seconds: u64,
    pub exit_timeout_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            port: 22,
            connect_timeout_seconds: 10,
            prompt_timeout_seconds: 15,
            exit_timeout_seconds: 5,
        }
    }
}

impl SessionConfig {
    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_seconds)
    }

    pub fn exit_timeout(&self) -> Duration {
        Duration::from_secs(self.exit_timeout_seconds)
    }
}

impl FanControlConfig {
    /// Sample configuration for a Gen8/Gen9 ProLiant
    pub fn sample(dual: bool) -> Self {
        let cpu2 = FanGroup::new(2, vec![4, 5, 6, 7]);
        Self {
            run_period_seconds: default_run_period(),
            host: "ILO_HOST_NAME_OR_IP_ADDRESS".to_string(),
            user: "USERNAME".to_string(),
            password: "PASSWORD".to_string(),
            verify_tls: false,
            verify_host_key: false,
            sensor: SensorConfig::default(),
            session: SessionConfig::default(),
            thresholds: ThresholdTable::standard().intervals().to_vec(),
            fan_groups: vec![
                FanGroup::new(1, vec![0, 1, 2, 3]),
                if dual { cpu2 } else { cpu2.not_installed() },
            ],
        }
    }

    /// Load, apply the password override, and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let content = fs::read_to_string(path).map_err(|e| {
            FanControlError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: FanControlConfig = toml::from_str(&content)
            .map_err(|e| FanControlError::Config(format!("{}: {}", path.display(), e)))?;

        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            info!("Using password from {}", PASSWORD_ENV);
            config.password = password;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| FanControlError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(FanControlError::Config("host must not be empty".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(FanControlError::Config("user must not be empty".to_string()));
        }
        if self.run_period_seconds == 0 {
            return Err(FanControlError::Config(
                "run_period_seconds must be greater than 0".to_string(),
            ));
        }
        if self.session.prompt.is_empty() {
            return Err(FanControlError::Config(
                "session.prompt must not be empty".to_string(),
            ));
        }
        for (name, value) in [
            ("sensor.timeout_seconds", self.sensor.timeout_seconds),
            ("session.connect_timeout_seconds", self.session.connect_timeout_seconds),
            ("session.prompt_timeout_seconds", self.session.prompt_timeout_seconds),
            ("session.exit_timeout_seconds", self.session.exit_timeout_seconds),
        ] {
            if value == 0 {
                return Err(FanControlError::Config(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        self.threshold_table()?;
        self.fan_group_assignment()?;
        Ok(())
    }

    pub fn threshold_table(&self) -> Result<ThresholdTable> {
        ThresholdTable::new(self.thresholds.clone())
    }

    pub fn fan_group_assignment(&self) -> Result<FanGroupAssignment> {
        FanGroupAssignment::new(&self.fan_groups)
    }

    pub fn planner(&self) -> Result<CommandPlanner> {
        Ok(CommandPlanner::new(
            self.threshold_table()?,
            self.fan_group_assignment()?,
        ))
    }

    pub fn run_period(&self) -> Duration {
        Duration::from_secs(self.run_period_seconds)
    }

    pub fn sensor_url(&self) -> String {
        let path = if self.sensor.path.starts_with('/') {
            self.sensor.path.clone()
        } else {
            format!("/{}", self.sensor.path)
        };
        format!("https://{}{}", self.host, path)
    }
}
