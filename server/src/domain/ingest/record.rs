//! Telemetry record validation
//!
//! Accepted shapes:
//! - flat event: `{equip_uuid, sensor_uuid, tipo?, status, timestamp}`
//! - nested snapshot: `{equip_uuid, sensor: {sensor_uuid, sensor_tipo, sensor_unidade,
//!   sensor_telemetria, sensor_datahora_coleta}}`
//! - generic: `{equipment_id, sensor_id, value, timestamp}`

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::data::telemetry::TelemetryRow;

/// Why a single record was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub record_index: usize,
    pub reason: String,
}

impl ErrorDetail {
    pub fn new(record_index: usize, reason: impl Into<String>) -> Self {
        Self {
            record_index,
            reason: reason.into(),
        }
    }
}

/// Sensor states that carry no reading
const NON_READINGS: [&str; 2] = ["unknown", "unavailable"];

const EQUIPMENT_KEYS: [&str; 3] = ["equip_uuid", "equipment_id", "equipment_uuid"];
const SENSOR_KEYS: [&str; 2] = ["sensor_uuid", "sensor_id"];
const TYPE_KEYS: [&str; 2] = ["tipo", "sensor_type"];
const UNIT_KEYS: [&str; 2] = ["unidade", "unit"];
const VALUE_KEYS: [&str; 2] = ["status", "value"];
const TIME_KEYS: [&str; 2] = ["timestamp", "recorded_at"];

/// Validate one record into a row
pub fn validate_record(
    record: &Value,
    record_index: usize,
    source_id: &str,
) -> Result<TelemetryRow, ErrorDetail> {
    let fail = |reason: &str| ErrorDetail::new(record_index, reason);

    let obj = record.as_object().ok_or_else(|| fail("record is not an object"))?;
    let sensor = obj.get("sensor").and_then(Value::as_object);

    let equipment_uuid =
        text_field(obj, &EQUIPMENT_KEYS).ok_or_else(|| fail("missing equipment id"))?;

    let sensor_uuid = sensor
        .and_then(|s| text_field(s, &["sensor_uuid"]))
        .or_else(|| text_field(obj, &SENSOR_KEYS))
        .ok_or_else(|| fail("missing sensor id"))?;

    let sensor_type = sensor
        .and_then(|s| text_field(s, &["sensor_tipo"]))
        .or_else(|| text_field(obj, &TYPE_KEYS));

    let unit = sensor
        .and_then(|s| text_field(s, &["sensor_unidade"]))
        .or_else(|| text_field(obj, &UNIT_KEYS));

    let raw = sensor
        .and_then(|s| s.get("sensor_telemetria"))
        .or_else(|| first_present(obj, &VALUE_KEYS))
        .ok_or_else(|| fail("missing value"))?;
    let (raw_value, value) = reading(raw).ok_or_else(|| fail("missing value"))?;
    if NON_READINGS
        .iter()
        .any(|state| raw_value.eq_ignore_ascii_case(state))
    {
        return Err(fail(&format!("sensor state '{}' has no reading", raw_value)));
    }

    let time = sensor
        .and_then(|s| s.get("sensor_datahora_coleta"))
        .or_else(|| first_present(obj, &TIME_KEYS))
        .ok_or_else(|| fail("missing timestamp"))?;
    let recorded_at =
        parse_timestamp(time).ok_or_else(|| fail(&format!("invalid timestamp {}", time)))?;

    Ok(TelemetryRow {
        equipment_uuid,
        sensor_uuid,
        sensor_type,
        unit,
        value,
        raw_value,
        recorded_at,
        attributes: record.clone(),
        source_id: source_id.to_string(),
        record_index,
    })
}

fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// First non-empty string (or number) under any of `keys`
fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Raw text and numeric value of a reading
fn reading(value: &Value) -> Option<(String, Option<f64>)> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            let numeric = s.parse::<f64>().ok().filter(|v| v.is_finite());
            Some((s.to_string(), numeric))
        }
        Value::Number(n) => Some((n.to_string(), n.as_f64().filter(|v| v.is_finite()))),
        Value::Bool(b) => Some((b.to_string(), Some(if *b { 1.0 } else { 0.0 }))),
        _ => None,
    }
}

/// Parse RFC 3339, naive ISO-8601 (as UTC) or epoch seconds/milliseconds
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        Value::Number(n) => {
            let raw = n.as_f64()?;
            // Values past year 2286 in seconds are treated as milliseconds
            let millis = if raw.abs() >= 1e10 { raw } else { raw * 1000.0 };
            DateTime::from_timestamp_millis(millis as i64)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const SOURCE: &str = "telemetry/x/a.json.gz";

    #[test]
    fn test_flat_event() {
        let record = json!({
            "equip_uuid": "eq-1",
            "sensor_uuid": "s-1",
            "tipo": "temperature",
            "status": "21.5",
            "timestamp": "2025-01-15T10:30:00Z"
        });

        let row = validate_record(&record, 3, SOURCE).unwrap();
        assert_eq!(row.equipment_uuid, "eq-1");
        assert_eq!(row.sensor_uuid, "s-1");
        assert_eq!(row.sensor_type.as_deref(), Some("temperature"));
        assert_eq!(row.value, Some(21.5));
        assert_eq!(row.raw_value, "21.5");
        assert_eq!(
            row.recorded_at,
            Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap()
        );
        assert_eq!(row.record_index, 3);
        assert_eq!(row.source_id, SOURCE);
        assert_eq!(row.attributes, record);
    }

    #[test]
    fn test_nested_snapshot() {
        let record = json!({
            "equip_uuid": "eq-2",
            "equip_nome": "Freezer",
            "sensor": {
                "sensor_uuid": "s-9",
                "sensor_tipo": "door",
                "sensor_unidade": "",
                "sensor_telemetria": "on",
                "sensor_datahora_coleta": "2025-01-15T10:30:00.123456"
            }
        });

        let row = validate_record(&record, 0, SOURCE).unwrap();
        assert_eq!(row.sensor_uuid, "s-9");
        assert_eq!(row.sensor_type.as_deref(), Some("door"));
        assert_eq!(row.unit, None);
        assert_eq!(row.raw_value, "on");
        assert_eq!(row.value, None);
        assert_eq!(row.recorded_at.timestamp(), 1_736_937_000);
    }

    #[test]
    fn test_generic_shape_with_numeric_value() {
        let record = json!({
            "equipment_id": "eq-3",
            "sensor_id": "s-3",
            "value": 4,
            "unit": "kWh",
            "timestamp": 1_736_937_000
        });

        let row = validate_record(&record, 0, SOURCE).unwrap();
        assert_eq!(row.value, Some(4.0));
        assert_eq!(row.unit.as_deref(), Some("kWh"));
        assert_eq!(row.recorded_at.timestamp(), 1_736_937_000);
    }

    #[test]
    fn test_offset_timestamp_converted_to_utc() {
        let record = json!({
            "equip_uuid": "e", "sensor_uuid": "s", "status": "1",
            "timestamp": "2025-01-15T07:30:00-03:00"
        });
        let row = validate_record(&record, 0, SOURCE).unwrap();
        assert_eq!(
            row.recorded_at,
            Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_rejections() {
        let cases = [
            (json!("text"), "record is not an object"),
            (json!({"sensor_uuid": "s", "status": "1", "timestamp": "2025-01-15T10:30:00Z"}), "missing equipment id"),
            (json!({"equip_uuid": "e", "status": "1", "timestamp": "2025-01-15T10:30:00Z"}), "missing sensor id"),
            (json!({"equip_uuid": "e", "sensor_uuid": "s", "timestamp": "2025-01-15T10:30:00Z"}), "missing value"),
            (json!({"equip_uuid": "e", "sensor_uuid": "s", "status": "1"}), "missing timestamp"),
        ];

        for (record, reason) in cases {
            let err = validate_record(&record, 7, SOURCE).unwrap_err();
            assert_eq!(err, ErrorDetail::new(7, reason));
        }
    }

    #[test]
    fn test_unavailable_states_rejected() {
        for state in ["unknown", "unavailable", "Unavailable"] {
            let record = json!({
                "equip_uuid": "e", "sensor_uuid": "s", "status": state,
                "timestamp": "2025-01-15T10:30:00Z"
            });
            let err = validate_record(&record, 0, SOURCE).unwrap_err();
            assert!(err.reason.contains("has no reading"));
        }
    }

    #[test]
    fn test_invalid_timestamp() {
        let record = json!({
            "equip_uuid": "e", "sensor_uuid": "s", "status": "1",
            "timestamp": "yesterday"
        });
        let err = validate_record(&record, 0, SOURCE).unwrap_err();
        assert!(err.reason.starts_with("invalid timestamp"));
    }

    #[test]
    fn test_empty_ids_rejected() {
        let record = json!({
            "equip_uuid": "  ", "sensor_uuid": "s", "status": "1",
            "timestamp": "2025-01-15T10:30:00Z"
        });
        assert_eq!(
            validate_record(&record, 0, SOURCE).unwrap_err().reason,
            "missing equipment id"
        );
    }

    #[test]
    fn test_parse_timestamp_millis() {
        let ts = parse_timestamp(&json!(1_736_937_000_000_i64)).unwrap();
        assert_eq!(ts.timestamp(), 1_736_937_000);
    }
}
