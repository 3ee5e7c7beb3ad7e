use crate::models::environment::{EnvironmentSample, TelemetryPayload};
use crate::ports::EnvironmentStore;
use log::info;

/// Parse a sensor-station payload, reporting the JSON path of any bad field.
pub fn parse_payload(raw: &str) -> Result<TelemetryPayload, String> {
    let de = &mut serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize(de)
        .map_err(|e| format!("invalid telemetry payload at '{}': {}", e.path(), e.inner()))
}

/// Replace the single environment row with the payload's readings.
pub async fn ingest<S: EnvironmentStore>(store: &S, raw: &str) -> Result<EnvironmentSample, String> {
    let sample = EnvironmentSample::from(parse_payload(raw)?);
    store
        .replace_sample(sample.clone())
        .await
        .map_err(|e| format!("storing environment sample failed: {}", e))?;
    info!(
        "Ingest: temperature={} humidity={} moisture={} lux={} at {}",
        fmt_reading(sample.temperature),
        fmt_reading(sample.humidity),
        fmt_reading(sample.moisture),
        fmt_reading(sample.light),
        sample
            .updated
            .map(|t| t.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    Ok(sample)
}

fn fmt_reading(value: Option<f64>) -> String {
    value.map(|v| format!("{:.1}", v)).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use chrono::NaiveDate;

    #[test]
    fn station_payload_is_parsed() {
        let payload =
            parse_payload(r#"{"mstr_0": 0.96, "temp": 26.3, "hum": 71.9, "lux": 90, "now": "2024-06-27 20:48:30"}"#)
                .unwrap();
        assert_eq!(payload.temp, Some(26.3));
        assert_eq!(payload.moisture, Some(0.96));
        assert_eq!(payload.lux, Some(90.0));
        let expected = NaiveDate::from_ymd_opt(2024, 6, 27).unwrap().and_hms_opt(20, 48, 30).unwrap();
        assert_eq!(payload.now, Some(expected));
    }

    #[test]
    fn bad_field_is_reported_with_its_path() {
        let err = parse_payload(r#"{"temp": "warm", "hum": 71.9}"#).unwrap_err();
        assert!(err.contains("'temp'"), "{err}");

        let err = parse_payload(r#"{"temp": 20.0, "now": "27/06/2024"}"#).unwrap_err();
        assert!(err.contains("'now'"), "{err}");
    }

    #[test]
    fn missing_readings_stay_empty() {
        let payload = parse_payload(r#"{"temp": 20.5}"#).unwrap();
        assert_eq!(payload.hum, None);
        assert_eq!(payload.now, None);
    }

    #[tokio::test]
    async fn ingest_replaces_the_sample_wholesale() {
        let store = MemoryStore::new();
        ingest(&store, r#"{"temp": 20.0, "lux": 5000}"#).await.unwrap();
        ingest(&store, r#"{"temp": 22.5}"#).await.unwrap();
        let sample = store.sample().unwrap();
        assert_eq!(sample.temperature, Some(22.5));
        assert_eq!(sample.light, None);
    }
}
