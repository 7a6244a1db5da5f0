use crate::error::{AppError, Result};
use crate::history::Observation;
use chrono::{DateTime, Utc};
use serde::Deserialize;

const MM_PER_INCH: f64 = 25.4;

/// Unit system applied to precipitation depths at ingestion time. The
/// upstream API always reports rain and snow in millimeters; imperial
/// locations convert to inches as the sample is stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

impl Units {
    /// String form substituted into the request URL.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Units::Metric => "metric",
            Units::Imperial => "imperial",
        }
    }
}

/// One hour of the OpenWeatherMap 3.0 timemachine response:
/// `{"data": [{"dt", "temp", "humidity", "rain": {"1h"|"3h"}, ...}]}`.
#[derive(Debug, Deserialize)]
struct TimemachineResponse {
    data: Vec<HourlyPayload>,
}

#[derive(Debug, Deserialize)]
struct HourlyPayload {
    dt: i64,
    #[serde(default)]
    temp: f64,
    #[serde(default)]
    humidity: f64,
    rain: Option<Accumulation>,
    snow: Option<Accumulation>,
}

/// Precipitation volume reported under either the one-hour or the
/// three-hour accumulation key.
#[derive(Debug, Deserialize)]
struct Accumulation {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
    #[serde(rename = "3h")]
    three_hour: Option<f64>,
}

impl Accumulation {
    /// Depth per hour in millimeters. A 3-hour total repeats across
    /// three consecutive hourly reports, so dividing evenly
    /// reconstructs the hourly share. Best-effort: the upstream
    /// semantics of the 3h key are undocumented.
    fn hourly_rate(&self) -> f64 {
        match (self.one_hour, self.three_hour) {
            (Some(volume), _) => volume,
            (None, Some(volume)) => volume / 3.0,
            (None, None) => 0.0,
        }
    }
}

/// Error body the API returns inside a 200 response, e.g. a bad key:
/// `{"cod": 401, "message": "Invalid API key"}`.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    cod: serde_json::Value,
    message: String,
}

/// Parses one timemachine response body into an hourly observation.
///
/// Rejects API-level error bodies, payloads without a data entry, and
/// timestamps that do not land exactly on the top of an hour; the
/// caller treats any rejection as "gap not filled".
pub fn parse_observation(body: &str, units: Units) -> Result<Observation> {
    if let Ok(err) = serde_json::from_str::<ApiErrorBody>(body) {
        return Err(AppError::InvalidData(format!(
            "API error {}: {}",
            err.cod, err.message
        )));
    }

    let response: TimemachineResponse = serde_json::from_str(body)
        .map_err(|e| AppError::Parse(format!("unexpected response shape: {e}")))?;
    let hour = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Parse("response contains no data entries".to_string()))?;

    let timestamp: DateTime<Utc> = DateTime::from_timestamp(hour.dt, 0)
        .ok_or_else(|| AppError::Parse(format!("timestamp {} out of range", hour.dt)))?;
    if hour.dt.rem_euclid(3600) != 0 {
        return Err(AppError::InvalidData(format!(
            "timestamp {timestamp} is not aligned to the top of an hour"
        )));
    }

    let mut rain = hour.rain.map(|a| a.hourly_rate()).unwrap_or(0.0);
    let mut snow = hour.snow.map(|a| a.hourly_rate()).unwrap_or(0.0);
    if units == Units::Imperial {
        rain /= MM_PER_INCH;
        snow /= MM_PER_INCH;
    }

    Ok(Observation {
        timestamp,
        rain,
        snow,
        temp: hour.temp,
        humidity: hour.humidity,
    })
}
