//! Latest environment sample and the telemetry payload it is ingested from.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which reading of the sample a stage table is evaluated against.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    Temperature,
    Light,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Temperature => f.write_str("temperature"),
            SensorKind::Light => f.write_str("light"),
        }
    }
}

/// The single `environment_values` row. Only "now" is ever visible.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentSample {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub moisture: Option<f64>,
    pub light: Option<f64>,
    pub updated: Option<NaiveDateTime>,
}

impl EnvironmentSample {
    pub fn reading(&self, kind: SensorKind) -> Option<f64> {
        match kind {
            SensorKind::Temperature => self.temperature,
            SensorKind::Light => self.light,
        }
    }
}

/// Wire shape pushed by the sensor station.
/// Example: `{"mstr_0": 0.96, "temp": 26.3, "hum": 71.9, "lux": 90, "now": "2024-06-27 20:48:30"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub temp: Option<f64>,
    pub hum: Option<f64>,
    #[serde(rename = "mstr_0")]
    pub moisture: Option<f64>,
    pub lux: Option<f64>,
    #[serde(default, with = "station_time")]
    pub now: Option<NaiveDateTime>,
}

impl From<TelemetryPayload> for EnvironmentSample {
    fn from(p: TelemetryPayload) -> Self {
        EnvironmentSample {
            temperature: p.temp,
            humidity: p.hum,
            moisture: p.moisture,
            light: p.lux,
            updated: p.now,
        }
    }
}

mod station_time {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(v) => serializer.serialize_str(&v.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => NaiveDateTime::parse_from_str(s.trim(), FORMAT)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
