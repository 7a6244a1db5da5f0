use crate::error::{AppError, Result};
use crate::history::HistAttr;
use crate::parser::Units;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub locations: Vec<LocationConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_max_calls_per_hour")]
    pub max_calls_per_hour: usize,
    #[serde(default = "default_max_calls_per_day")]
    pub max_calls_per_day: usize,
}

fn default_max_calls_per_hour() -> usize {
    100
}

fn default_max_calls_per_day() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub interval_minutes: u64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_seconds: u64,
    #[serde(default = "default_max_calls_per_cycle")]
    pub max_calls_per_cycle: usize,
}

fn default_initial_delay() -> u64 {
    10
}

// Cap on backfill fetches in a single cycle, so one invocation never
// blocks for more than this many sequential round-trips.
fn default_max_calls_per_cycle() -> usize {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> String {
    "./state".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocationConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: usize,
    #[serde(default)]
    pub units: Units,
    #[serde(default)]
    pub sensors: Vec<SensorConfig>,
}

fn default_lookback_days() -> usize {
    5
}

/// An arbitrary-window aggregate exposed as a named variable, e.g.
/// total rain over the 24 hours ending at the current top of hour.
/// Offsets are hours relative to the current top of hour.
#[derive(Debug, Deserialize, Clone)]
pub struct SensorConfig {
    pub name: String,
    pub attr: String,
    pub start_hour: i64,
    pub end_hour: i64,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        // Substitute environment variables
        let expanded = expand_env_vars(&content)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - Unexpanded environment variables
    /// - Valid URL and coordinate ranges
    /// - Rate limits that leave room for the live-update reservation
    /// - Well-formed sensor windows
    pub fn validate(&self) -> Result<()> {
        if self.api.api_key.is_empty() {
            return Err(AppError::Config("API key cannot be empty".to_string()));
        }

        if self.api.api_key.contains("${") {
            return Err(AppError::Config(
                "OWM_API_KEY environment variable is not set. \
                 Please set it or create a .env file."
                    .to_string(),
            ));
        }

        let parsed = url::Url::parse(&self.api.base_url).map_err(|e| {
            AppError::Config(format!(
                "Invalid api base_url '{}': {}",
                self.api.base_url, e
            ))
        })?;

        if parsed.scheme() != "https" {
            return Err(AppError::Config(format!(
                "API base_url must use HTTPS, got: {}",
                parsed.scheme()
            )));
        }

        // One call each hour is withheld from backfill for the live
        // update, so a limit of 1 would starve backfill entirely.
        if self.api.max_calls_per_hour < 2 {
            return Err(AppError::Config(
                "max_calls_per_hour must be at least 2 (one call per hour is reserved for live updates)"
                    .to_string(),
            ));
        }

        if self.api.max_calls_per_day < 25 {
            return Err(AppError::Config(
                "max_calls_per_day must be at least 25 (24 calls per day are reserved for live updates)"
                    .to_string(),
            ));
        }

        if self.api.max_calls_per_day <= self.api.max_calls_per_hour {
            tracing::warn!(
                "max_calls_per_day {} does not exceed max_calls_per_hour {}; the daily budget will throttle backfill early",
                self.api.max_calls_per_day,
                self.api.max_calls_per_hour
            );
        }

        if self.scheduler.interval_minutes == 0 {
            return Err(AppError::Config(
                "Scheduler interval_minutes must be greater than 0".to_string(),
            ));
        }

        if self.scheduler.interval_minutes > 60 {
            tracing::warn!(
                "Scheduler interval of {} minutes is longer than an hour; live top-of-hour samples will be missed",
                self.scheduler.interval_minutes
            );
        }

        if self.scheduler.max_calls_per_cycle == 0 {
            return Err(AppError::Config(
                "Scheduler max_calls_per_cycle must be at least 1".to_string(),
            ));
        }

        if self.locations.is_empty() {
            return Err(AppError::Config(
                "At least one location must be configured".to_string(),
            ));
        }

        let mut seen_names = HashSet::new();
        for location in &self.locations {
            location.validate()?;
            if !seen_names.insert(location.name.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate location name '{}'",
                    location.name
                )));
            }
        }

        Ok(())
    }
}

impl LocationConfig {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(AppError::Config("Location name cannot be empty".to_string()));
        }

        // The name doubles as the persistence key (a file name).
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AppError::Config(format!(
                "Location name '{}' may only contain letters, digits, '_' and '-'",
                self.name
            )));
        }

        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AppError::Config(format!(
                "Latitude {} for '{}' out of range (-90 to 90)",
                self.latitude, self.name
            )));
        }

        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AppError::Config(format!(
                "Longitude {} for '{}' out of range (-180 to 180)",
                self.longitude, self.name
            )));
        }

        if self.lookback_days < 1 {
            return Err(AppError::Config(format!(
                "lookback_days for '{}' must be at least 1",
                self.name
            )));
        }

        let mut seen_sensors = HashSet::new();
        for sensor in &self.sensors {
            sensor.validate(&self.name)?;
            if !seen_sensors.insert(sensor.name.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate sensor name '{}' for location '{}'",
                    sensor.name, self.name
                )));
            }
        }

        Ok(())
    }
}

impl SensorConfig {
    fn validate(&self, location: &str) -> Result<()> {
        if self.name.is_empty() {
            return Err(AppError::Config(format!(
                "Sensor name for location '{}' cannot be empty",
                location
            )));
        }

        // Unknown attribute names are a configuration defect; they must
        // never reach query time.
        self.attr.parse::<HistAttr>()?;

        if self.end_hour > 0 {
            return Err(AppError::Config(format!(
                "Sensor '{}': end_hour {} must be 0 or negative (hours before now)",
                self.name, self.end_hour
            )));
        }

        if self.start_hour > self.end_hour {
            return Err(AppError::Config(format!(
                "Sensor '{}': start_hour {} must not be after end_hour {}",
                self.name, self.start_hour, self.end_hour
            )));
        }

        Ok(())
    }
}

fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}").unwrap();

    let mut missing_vars = Vec::new();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                missing_vars.push(var_name.to_string());
            }
        }
    }

    if !missing_vars.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {}\n\n\
             To fix this:\n\
             1. Create a .env file in the project root\n\
             2. Or set the missing variable{}: export {}=<value>",
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars.join(", "),
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars[0],
        )));
    }

    Ok(result)
}
