use crate::config::SensorConfig;
use crate::error::Result;
use crate::history::{top_of_hour, HistAttr, WeatherHistory};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

// Variable names are a wire contract consumed by downstream template
// sensors; the formula language itself lives outside this crate.
const DAY_ATTRS: [HistAttr; 5] = [
    HistAttr::Rain,
    HistAttr::Snow,
    HistAttr::Humidity,
    HistAttr::TempHigh,
    HistAttr::TempLow,
];

/// Named day-bucket variables for every day in the lookback horizon:
/// `day{N}rain`, `day{N}snow`, `day{N}humidity`, `day{N}temp_high`,
/// `day{N}temp_low` for `N` in `[0, lookback_days)`.
pub fn day_variables(history: &WeatherHistory, now: DateTime<Utc>) -> HashMap<String, f64> {
    let anchor = top_of_hour(now);
    let mut variables = HashMap::new();
    for day in 0..history.lookback_days() {
        for attr in DAY_ATTRS {
            variables.insert(
                format!("day{day}{}", attr.as_str()),
                history.day_attr(anchor, day, attr),
            );
        }
    }
    variables
}

/// A configured arbitrary-window aggregate ("total rain in the last N
/// hours ending M hours ago"). Offsets are hours relative to the
/// current top of hour; `start_hour <= end_hour <= 0` is enforced at
/// configuration time.
#[derive(Debug, Clone)]
pub struct WindowSensor {
    pub name: String,
    pub attr: HistAttr,
    pub start_hour: i64,
    pub end_hour: i64,
}

impl WindowSensor {
    pub fn from_config(config: &SensorConfig) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            attr: config.attr.parse()?,
            start_hour: config.start_hour,
            end_hour: config.end_hour,
        })
    }

    pub fn evaluate(&self, history: &WeatherHistory, now: DateTime<Utc>) -> f64 {
        let anchor = top_of_hour(now);
        let start = anchor + Duration::hours(self.start_hour);
        let end = anchor + Duration::hours(self.end_hour);
        history.total_attr(start, end, self.attr)
    }
}

/// All variables for one location: day buckets plus configured window
/// sensors.
pub fn evaluate_all(
    history: &WeatherHistory,
    now: DateTime<Utc>,
    sensors: &[WindowSensor],
) -> HashMap<String, f64> {
    let mut variables = day_variables(history, now);
    for sensor in sensors {
        variables.insert(sensor.name.clone(), sensor.evaluate(history, now));
    }
    variables
}
