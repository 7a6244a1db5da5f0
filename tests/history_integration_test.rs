use chrono::DateTime;
use owmh_ingest::history::{HistAttr, WeatherHistory};
use owmh_ingest::parser::Units;
use owmh_ingest::sensors::{evaluate_all, WindowSensor};

// Five consecutive hourly reports, newest first, each with 0.32mm of
// rain in the 1h bucket.
const HOURLY_BODIES: [&str; 5] = [
    r#"{"data": [{"dt": 1682265600, "temp": 83.25, "humidity": 67, "rain": {"1h": 0.32}}]}"#,
    r#"{"data": [{"dt": 1682262000, "temp": 83.25, "humidity": 67, "rain": {"1h": 0.32}}]}"#,
    r#"{"data": [{"dt": 1682258400, "temp": 83.25, "humidity": 67, "rain": {"1h": 0.32}}]}"#,
    r#"{"data": [{"dt": 1682254800, "temp": 83.25, "humidity": 67, "rain": {"1h": 0.32}}]}"#,
    r#"{"data": [{"dt": 1682251200, "temp": 83.25, "humidity": 67, "rain": {"1h": 0.32}}]}"#,
];

// A mix of 1h and 3h reports: three hours at 1mm/h, then three reports
// that only carry a 3h total of 1mm each.
const MIXED_BODIES: [&str; 6] = [
    r#"{"data": [{"dt": 1682265600, "temp": 83.25, "humidity": 67, "rain": {"1h": 1}}]}"#,
    r#"{"data": [{"dt": 1682262000, "temp": 83.25, "humidity": 67, "rain": {"1h": 1}}]}"#,
    r#"{"data": [{"dt": 1682258400, "temp": 83.25, "humidity": 67, "rain": {"1h": 1}}]}"#,
    r#"{"data": [{"dt": 1682254800, "temp": 83.25, "humidity": 67, "rain": {"3h": 1}}]}"#,
    r#"{"data": [{"dt": 1682251200, "temp": 83.25, "humidity": 67, "rain": {"3h": 1}}]}"#,
    r#"{"data": [{"dt": 1682247600, "temp": 83.25, "humidity": 67, "rain": {"3h": 1}}]}"#,
];

fn total_rain_sensor() -> WindowSensor {
    WindowSensor {
        name: "total_rain_sensor".to_string(),
        attr: HistAttr::Rain,
        start_hour: -24,
        end_hour: 0,
    }
}

#[test]
fn test_total_rain_over_last_day() {
    let mut history = WeatherHistory::new(20, Units::Metric);
    for body in HOURLY_BODIES {
        assert!(history.add_observation(body));
    }
    assert_eq!(history.len(), 5);

    let now = DateTime::from_timestamp(1_682_275_600, 0).unwrap();
    let total = total_rain_sensor().evaluate(&history, now);
    assert!((total - 1.6).abs() < 1e-9);
}

#[test]
fn test_three_hour_totals_contribute_a_third_per_hour() {
    let mut history = WeatherHistory::new(20, Units::Metric);
    for body in MIXED_BODIES {
        assert!(history.add_observation(body));
    }

    let now = DateTime::from_timestamp(1_682_275_600, 0).unwrap();
    let total = total_rain_sensor().evaluate(&history, now);
    // 3 from the 1h samples plus 3 * (1/3) from the 3h samples.
    assert!((total - 4.0).abs() < 1e-9);
}

#[test]
fn test_imperial_history_stores_inches() {
    let mut history = WeatherHistory::new(20, Units::Imperial);
    let body = r#"{"data": [{"dt": 1682265600, "temp": 83.25, "humidity": 67, "rain": {"1h": 25.4}}]}"#;
    assert!(history.add_observation(body));

    let now = DateTime::from_timestamp(1_682_275_600, 0).unwrap();
    let total = total_rain_sensor().evaluate(&history, now);
    assert!((total - 1.0).abs() < 1e-9);
}

#[test]
fn test_day_variables_cover_full_lookback() {
    let mut history = WeatherHistory::new(3, Units::Metric);
    for body in HOURLY_BODIES {
        history.add_observation(body);
    }

    let now = DateTime::from_timestamp(1_682_275_600, 0).unwrap();
    let variables = evaluate_all(&history, now, &[total_rain_sensor()]);

    // 5 attributes x 3 days + 1 window sensor.
    assert_eq!(variables.len(), 16);
    assert!((variables["day0rain"] - 1.6).abs() < 1e-9);
    assert_eq!(variables["day0humidity"], 67.0);
    assert_eq!(variables["day2rain"], 0.0);
    assert!((variables["total_rain_sensor"] - 1.6).abs() < 1e-9);
}
