use crate::error::AppError;
use crate::parser::{self, Units};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use tracing::{debug, warn};

pub const HOURS_PER_DAY: usize = 24;

// Sentinel bounds for temperature extremes over an empty window.
const TEMP_SENTINEL_LOW: f64 = -999.0;
const TEMP_SENTINEL_HIGH: f64 = 999.0;

/// Aligns an instant down to the top of its hour.
pub fn top_of_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    let aligned = now.timestamp() - now.timestamp().rem_euclid(3600);
    DateTime::from_timestamp(aligned, 0).unwrap_or(now)
}

/// One hourly weather sample at an hour-aligned timestamp.
///
/// Precipitation depths are per hour, already converted to the
/// location's unit system at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub rain: f64,
    pub snow: f64,
    pub temp: f64,
    pub humidity: f64,
}

/// Aggregation attribute over stored observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistAttr {
    Rain,
    Snow,
    Humidity,
    TempHigh,
    TempLow,
}

impl HistAttr {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistAttr::Rain => "rain",
            HistAttr::Snow => "snow",
            HistAttr::Humidity => "humidity",
            HistAttr::TempHigh => "temp_high",
            HistAttr::TempLow => "temp_low",
        }
    }
}

impl FromStr for HistAttr {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rain" => Ok(HistAttr::Rain),
            "snow" => Ok(HistAttr::Snow),
            "humidity" => Ok(HistAttr::Humidity),
            "temp_high" => Ok(HistAttr::TempHigh),
            "temp_low" => Ok(HistAttr::TempLow),
            other => Err(AppError::Config(format!(
                "unknown attribute '{other}' (expected one of: rain, snow, humidity, temp_high, temp_low)"
            ))),
        }
    }
}

/// Fixed-capacity, newest-first collection of hourly samples for one
/// location.
///
/// Capacity is `lookback_days * 24` entries; inserting beyond it
/// silently drops the oldest samples. Timestamps are unique and held
/// in descending order.
#[derive(Debug)]
pub struct WeatherHistory {
    lookback_days: usize,
    units: Units,
    observations: VecDeque<Observation>,
}

impl WeatherHistory {
    pub fn new(lookback_days: usize, units: Units) -> Self {
        Self {
            lookback_days,
            units,
            observations: VecDeque::new(),
        }
    }

    pub fn lookback_days(&self) -> usize {
        self.lookback_days
    }

    pub fn capacity(&self) -> usize {
        self.lookback_days * HOURS_PER_DAY
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn newest(&self) -> Option<&Observation> {
        self.observations.front()
    }

    pub fn oldest(&self) -> Option<&Observation> {
        self.observations.back()
    }

    /// Whether an observation for the given hour is already held.
    pub fn contains_hour(&self, timestamp: DateTime<Utc>) -> bool {
        self.observations
            .binary_search_by(|held| timestamp.cmp(&held.timestamp))
            .is_ok()
    }

    /// Parses one API response body and inserts the observation.
    ///
    /// Returns false with the store unchanged when the payload is
    /// malformed, its timestamp is not hour-aligned, or the hour is
    /// already held. A gap of more than one hour behind the newest held
    /// entry is accepted with a missing-observation warning.
    pub fn add_observation(&mut self, body: &str) -> bool {
        let obs = match parser::parse_observation(body, self.units) {
            Ok(obs) => obs,
            Err(e) => {
                warn!("rejecting observation: {e}");
                return false;
            }
        };
        self.insert(obs)
    }

    /// Inserts an already-parsed observation, preserving descending
    /// timestamp order and the capacity bound.
    pub fn insert(&mut self, obs: Observation) -> bool {
        match self
            .observations
            .binary_search_by(|held| obs.timestamp.cmp(&held.timestamp))
        {
            Ok(_) => {
                debug!(timestamp = %obs.timestamp, "duplicate observation rejected");
                false
            }
            Err(position) => {
                if position == 0 {
                    if let Some(newest) = self.observations.front() {
                        if obs.timestamp - newest.timestamp > Duration::hours(1) {
                            warn!(
                                from = %newest.timestamp,
                                to = %obs.timestamp,
                                "missing observation(s) between held and incoming hour"
                            );
                        }
                    }
                }
                self.observations.insert(position, obs);
                self.observations.truncate(self.capacity());
                true
            }
        }
    }

    /// Aggregate of `attr` over observations with `timestamp` in
    /// `[start, end)`. Rain and snow sum; humidity averages (0 with no
    /// samples); temperature extremes fall back to sentinel bounds over
    /// an empty window.
    pub fn total_attr(&self, start: DateTime<Utc>, end: DateTime<Utc>, attr: HistAttr) -> f64 {
        let samples = self
            .observations
            .iter()
            .filter(|o| o.timestamp >= start && o.timestamp < end);

        match attr {
            HistAttr::Rain => samples.map(|o| o.rain).sum(),
            HistAttr::Snow => samples.map(|o| o.snow).sum(),
            HistAttr::Humidity => {
                let (sum, n) = samples.fold((0.0, 0usize), |(sum, n), o| (sum + o.humidity, n + 1));
                if n == 0 {
                    0.0
                } else {
                    sum / n as f64
                }
            }
            HistAttr::TempHigh => samples.map(|o| o.temp).fold(TEMP_SENTINEL_LOW, f64::max),
            HistAttr::TempLow => samples.map(|o| o.temp).fold(TEMP_SENTINEL_HIGH, f64::min),
        }
    }

    /// Aggregate of `attr` over the 24-hour bucket `day_offset` days
    /// before `now` (the current top of hour).
    pub fn day_attr(&self, now: DateTime<Utc>, day_offset: usize, attr: HistAttr) -> f64 {
        let end = now - Duration::hours((day_offset * HOURS_PER_DAY) as i64);
        let start = end - Duration::hours(HOURS_PER_DAY as i64);
        self.total_attr(start, end, attr)
    }

    /// Full observation list, newest first, for persistence.
    pub fn snapshot(&self) -> Vec<Observation> {
        self.observations.iter().copied().collect()
    }

    /// Rebuilds the history from persisted observations. Order,
    /// uniqueness and the capacity bound are re-established regardless
    /// of what the stored file contains.
    pub fn restore(&mut self, observations: Vec<Observation>) {
        self.observations.clear();
        for obs in observations {
            self.insert(obs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE_TS: i64 = 1_682_265_600; // 2023-04-23 16:00:00 UTC

    fn hour(offset: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(BASE_TS + offset * 3600, 0).unwrap()
    }

    fn obs(offset: i64, rain: f64, temp: f64) -> Observation {
        Observation {
            timestamp: hour(offset),
            rain,
            snow: 0.0,
            temp,
            humidity: 67.0,
        }
    }

    fn body(offset: i64, rain: f64) -> String {
        format!(
            r#"{{"data": [{{"dt": {}, "temp": 83.25, "humidity": 67, "rain": {{"1h": {}}}}}]}}"#,
            BASE_TS + offset * 3600,
            rain
        )
    }

    #[test]
    fn test_add_observation_from_payloads() {
        let mut history = WeatherHistory::new(20, Units::Metric);
        for offset in [0, -1, -2, -3, -4] {
            assert!(history.add_observation(&body(offset, 0.32)));
        }
        assert_eq!(history.len(), 5);
        assert_eq!(history.newest().unwrap().timestamp, hour(0));
        assert_eq!(history.oldest().unwrap().timestamp, hour(-4));
    }

    #[test]
    fn test_duplicate_timestamp_rejected() {
        let mut history = WeatherHistory::new(5, Units::Metric);
        assert!(history.add_observation(&body(0, 0.5)));
        assert!(!history.add_observation(&body(0, 0.7)));
        assert_eq!(history.len(), 1);
        // First value wins.
        assert_eq!(history.newest().unwrap().rain, 0.5);
    }

    #[test]
    fn test_misaligned_timestamp_leaves_store_unchanged() {
        let mut history = WeatherHistory::new(5, Units::Metric);
        let misaligned = format!(
            r#"{{"data": [{{"dt": {}, "temp": 10.0, "humidity": 50}}]}}"#,
            BASE_TS + 61
        );
        assert!(!history.add_observation(&misaligned));
        assert!(history.is_empty());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = WeatherHistory::new(1, Units::Metric);
        assert_eq!(history.capacity(), 24);

        for offset in 0..30 {
            history.insert(obs(-offset, 0.1, 20.0));
        }

        assert_eq!(history.len(), 24);
        assert_eq!(history.newest().unwrap().timestamp, hour(0));
        // The six oldest hours fell off the tail.
        assert_eq!(history.oldest().unwrap().timestamp, hour(-23));
        assert!(!history.contains_hour(hour(-24)));
    }

    #[test]
    fn test_out_of_order_insert_keeps_descending_order() {
        let mut history = WeatherHistory::new(5, Units::Metric);
        history.insert(obs(-3, 0.1, 20.0));
        history.insert(obs(0, 0.2, 21.0));
        history.insert(obs(-1, 0.3, 22.0));

        let timestamps: Vec<_> = history.snapshot().iter().map(|o| o.timestamp).collect();
        assert_eq!(timestamps, vec![hour(0), hour(-1), hour(-3)]);
        assert!(history.contains_hour(hour(-1)));
        assert!(!history.contains_hour(hour(-2)));
    }

    #[test]
    fn test_total_rain_over_window() {
        let mut history = WeatherHistory::new(20, Units::Metric);
        for offset in [0, -1, -2, -3, -4] {
            history.add_observation(&body(offset, 0.32));
        }

        // Query anchored at the top of hour after `now`, a bit under
        // three hours past the newest sample.
        let now = DateTime::from_timestamp(1_682_275_600, 0).unwrap();
        let end = top_of_hour(now);
        let total = history.total_attr(end - Duration::hours(24), end, HistAttr::Rain);
        assert!((total - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_total_attr_window_is_half_open() {
        let mut history = WeatherHistory::new(5, Units::Metric);
        history.insert(obs(0, 1.0, 20.0));
        history.insert(obs(-1, 2.0, 20.0));

        let total = history.total_attr(hour(-1), hour(0), HistAttr::Rain);
        assert_eq!(total, 2.0);
    }

    #[test]
    fn test_humidity_averages_and_defaults_to_zero() {
        let mut history = WeatherHistory::new(5, Units::Metric);
        assert_eq!(
            history.total_attr(hour(-24), hour(1), HistAttr::Humidity),
            0.0
        );

        history.insert(Observation {
            timestamp: hour(0),
            rain: 0.0,
            snow: 0.0,
            temp: 20.0,
            humidity: 60.0,
        });
        history.insert(Observation {
            timestamp: hour(-1),
            rain: 0.0,
            snow: 0.0,
            temp: 20.0,
            humidity: 80.0,
        });

        assert_eq!(
            history.total_attr(hour(-24), hour(1), HistAttr::Humidity),
            70.0
        );
    }

    #[test]
    fn test_temperature_extremes() {
        let mut history = WeatherHistory::new(5, Units::Metric);
        history.insert(obs(0, 0.0, 18.5));
        history.insert(obs(-1, 0.0, 24.0));
        history.insert(obs(-2, 0.0, 12.25));

        assert_eq!(
            history.total_attr(hour(-24), hour(1), HistAttr::TempHigh),
            24.0
        );
        assert_eq!(
            history.total_attr(hour(-24), hour(1), HistAttr::TempLow),
            12.25
        );
    }

    #[test]
    fn test_day_attr_buckets() {
        let mut history = WeatherHistory::new(3, Units::Metric);
        // Two samples yesterday-bucket, one sample two-days-bucket.
        history.insert(obs(-2, 1.0, 20.0));
        history.insert(obs(-20, 2.0, 20.0));
        history.insert(obs(-30, 4.0, 20.0));

        let now = hour(0);
        assert_eq!(history.day_attr(now, 0, HistAttr::Rain), 3.0);
        assert_eq!(history.day_attr(now, 1, HistAttr::Rain), 4.0);
        assert_eq!(history.day_attr(now, 2, HistAttr::Rain), 0.0);
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let mut history = WeatherHistory::new(2, Units::Metric);
        for offset in 0..10 {
            history.insert(obs(-offset, 0.25, 20.0));
        }
        let snapshot = history.snapshot();

        let mut restored = WeatherHistory::new(2, Units::Metric);
        restored.restore(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn test_restore_clamps_to_capacity() {
        let mut oversized = Vec::new();
        for offset in 0..48 {
            oversized.push(obs(-offset, 0.1, 20.0));
        }

        let mut history = WeatherHistory::new(1, Units::Metric);
        history.restore(oversized);
        assert_eq!(history.len(), 24);
        assert_eq!(history.newest().unwrap().timestamp, hour(0));
    }

    #[test]
    fn test_top_of_hour() {
        let now = DateTime::from_timestamp(BASE_TS + 1234, 0).unwrap();
        assert_eq!(top_of_hour(now).timestamp(), BASE_TS);
        assert_eq!(top_of_hour(hour(0)), hour(0));
    }

    #[test]
    fn test_attr_parsing() {
        assert_eq!("rain".parse::<HistAttr>().unwrap(), HistAttr::Rain);
        assert_eq!(
            "temp_high".parse::<HistAttr>().unwrap(),
            HistAttr::TempHigh
        );
        assert!("pressure".parse::<HistAttr>().is_err());
    }
}
