//! Record normalizer: raw table row in, validated [`NormalizedRecord`] out.
//!
//! Only a missing `Oid` rejects a row. Every other defect is absorbed here
//! (unknown value, default topic, dropped vehicles) and logged.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::warn;

use crate::error::{MalformedVehicleData, MissingRequiredField};
use crate::types::{
    AccidentRecord, Location, LocationKey, NormalizedRecord, TopicLabel, UNCLUSTERED_TOPIC_ID,
    UNKNOWN_PLACE,
};
use crate::vehicles::{integral, parse_vehicles, VehicleParse};

/// Validate one raw row. `row` is its 1-based position in the source table.
pub fn normalize(
    row: usize,
    record: AccidentRecord,
) -> Result<NormalizedRecord, MissingRequiredField> {
    let oid = text(record.oid).ok_or(MissingRequiredField { row, field: "Oid" })?;

    let event_date = text(record.event_date).and_then(|raw| {
        let parsed = parse_event_date(&raw);
        if parsed.is_none() {
            warn!(
                oid = oid.as_str(),
                event_date = raw.as_str(),
                "Unparseable EventDate, storing none"
            );
        }
        parsed
    });

    let topic = TopicLabel {
        id: text(record.topic_id)
            .map(|raw| {
                parse_topic_id(&raw).unwrap_or_else(|| {
                    warn!(
                        oid = oid.as_str(),
                        topic_id = raw.as_str(),
                        "Unparseable TopicID, treating as unclustered"
                    );
                    UNCLUSTERED_TOPIC_ID
                })
            })
            .unwrap_or(UNCLUSTERED_TOPIC_ID),
        name: text(record.topic_name),
    };

    let location = Location {
        key: LocationKey {
            city: text(record.city).unwrap_or_else(|| UNKNOWN_PLACE.to_string()),
            state: text(record.state).unwrap_or_else(|| UNKNOWN_PLACE.to_string()),
            country: text(record.country).unwrap_or_else(|| UNKNOWN_PLACE.to_string()),
        },
        latitude: text(record.latitude).and_then(|s| to_float(&s)),
        longitude: text(record.longitude).and_then(|s| to_float(&s)),
    };

    let mut malformed_vehicles = None;
    let parse = match text(record.vehicles) {
        None => VehicleParse::default(),
        Some(raw) => match parse_vehicles(&raw) {
            Ok(parse) => parse,
            Err(e) => {
                warn!(
                    oid = oid.as_str(),
                    error = %e,
                    "Malformed Vehicles data, loading accident without vehicles"
                );
                malformed_vehicles = Some(MalformedVehicleData {
                    oid: oid.clone(),
                    raw,
                    reason: e.to_string(),
                });
                VehicleParse::default()
            }
        },
    };
    for issue in &parse.issues {
        warn!(
            oid = oid.as_str(),
            index = issue.index,
            reason = issue.reason.as_str(),
            "Dropped vehicle entry"
        );
    }

    Ok(NormalizedRecord {
        row,
        ntsb_number: text(record.ntsb_number),
        event_date,
        highest_injury: text(record.highest_injury),
        probable_cause: text(record.probable_cause),
        topic,
        location,
        vehicles: parse.vehicles,
        vehicle_issues: parse.issues,
        malformed_vehicles,
        oid,
    })
}

/// Trimmed, non-blank text.
fn text(value: Option<String>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}

/// Parse an ISO-8601-ish date or date/time. Naive values are taken as UTC.
pub fn parse_event_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Integer topic id. Integral floats (`3.0`) are accepted since pandas writes
/// integer columns with missing values as floats. Out-of-range values are
/// rejected rather than clamped.
fn parse_topic_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().and_then(integral))
}

fn to_float(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|f| f.is_finite())
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    fn record(oid: &str) -> AccidentRecord {
        AccidentRecord {
            oid: Some(oid.to_string()),
            ntsb_number: Some("CEN23LA001".into()),
            event_date: Some("2023-01-15T14:30:00Z".into()),
            highest_injury: Some("None".into()),
            probable_cause: Some("The pilot's failure to ensure adequate fuel.".into()),
            city: Some("Chicago".into()),
            state: Some("IL".into()),
            country: Some("US".into()),
            latitude: Some("41.8781".into()),
            longitude: Some("-87.6298".into()),
            vehicles: Some("[{'SerialNumber': 'S1', 'Make': 'Cessna'}]".into()),
            topic_id: Some("0".into()),
            topic_name: Some("Fuel Exhaustion".into()),
        }
    }

    #[test]
    fn normalizes_complete_row() {
        let n = normalize(1, record("1")).unwrap();

        assert_eq!(n.oid, "1");
        assert_eq!(n.row, 1);
        assert_eq!(n.ntsb_number.as_deref(), Some("CEN23LA001"));
        assert_eq!(n.event_date.unwrap().year(), 2023);
        assert_eq!(n.topic, TopicLabel { id: 0, name: Some("Fuel Exhaustion".into()) });
        assert_eq!(n.location.key.city, "Chicago");
        assert_eq!(n.location.latitude, Some(41.8781));
        assert_eq!(n.vehicles.len(), 1);
        assert!(!n.has_vehicle_problems());
    }

    #[test]
    fn missing_oid_is_rejected() {
        let mut r = record("1");
        r.oid = None;
        assert_eq!(normalize(4, r).unwrap_err(), MissingRequiredField { row: 4, field: "Oid" });

        let mut r = record("1");
        r.oid = Some("   ".into());
        assert!(normalize(5, r).is_err());
    }

    #[test]
    fn oid_is_trimmed() {
        let n = normalize(1, record("  20230115X00001 ")).unwrap();
        assert_eq!(n.oid, "20230115X00001");
    }

    #[test]
    fn malformed_vehicles_are_recovered() {
        let mut r = record("7");
        r.vehicles = Some("not a list".into());
        let n = normalize(1, r).unwrap();

        assert!(n.vehicles.is_empty());
        let malformed = n.malformed_vehicles.as_ref().unwrap();
        assert_eq!(malformed.oid, "7");
        assert_eq!(malformed.raw, "not a list");
        assert!(n.has_vehicle_problems());
        assert_eq!(n.vehicle_problems().len(), 1);
    }

    #[test]
    fn absent_vehicles_are_not_a_problem() {
        let mut r = record("8");
        r.vehicles = None;
        let n = normalize(1, r).unwrap();
        assert!(n.vehicles.is_empty());
        assert!(!n.has_vehicle_problems());
    }

    #[test]
    fn event_date_formats() {
        let dt = parse_event_date("2021-07-04 09:15:00").unwrap();
        assert_eq!((dt.month(), dt.day(), dt.hour(), dt.minute()), (7, 4, 9, 15));

        let dt = parse_event_date("2021-07-04").unwrap();
        assert_eq!((dt.day(), dt.hour()), (4, 0));

        let dt = parse_event_date("2021-07-04T09:15:00.250").unwrap();
        assert_eq!(dt.nanosecond(), 250_000_000);

        let dt = parse_event_date("2021-07-04T09:15:00-05:00").unwrap();
        assert_eq!(dt.hour(), 14);

        assert!(parse_event_date("July 4th").is_none());
    }

    #[test]
    fn unparseable_event_date_becomes_absent() {
        let mut r = record("9");
        r.event_date = Some("sometime".into());
        assert_eq!(normalize(1, r).unwrap().event_date, None);
    }

    #[test]
    fn topic_id_defaults_to_unclustered() {
        let mut r = record("1");
        r.topic_id = None;
        assert!(normalize(1, r).unwrap().topic.is_unclustered());

        let mut r = record("1");
        r.topic_id = Some("n/a".into());
        assert_eq!(normalize(1, r).unwrap().topic.id, UNCLUSTERED_TOPIC_ID);

        let mut r = record("1");
        r.topic_id = Some("12.0".into());
        assert_eq!(normalize(1, r).unwrap().topic.id, 12);

        let mut r = record("1");
        r.topic_id = Some("-1".into());
        assert!(normalize(1, r).unwrap().topic.is_unclustered());
    }

    #[test]
    fn out_of_range_topic_id_is_unclustered_not_clamped() {
        let mut r = record("1");
        r.topic_id = Some("1e30".into());
        assert_eq!(normalize(1, r).unwrap().topic.id, UNCLUSTERED_TOPIC_ID);

        let mut r = record("1");
        r.topic_id = Some("-9.3e18".into());
        assert_eq!(normalize(1, r).unwrap().topic.id, UNCLUSTERED_TOPIC_ID);
    }

    #[test]
    fn coordinates_coerce_like_to_float() {
        let mut r = record("1");
        r.latitude = Some("north".into());
        r.longitude = Some("nan".into());
        let n = normalize(1, r).unwrap();
        assert_eq!(n.location.latitude, None);
        assert_eq!(n.location.longitude, None);
    }

    #[test]
    fn missing_location_parts_become_unknown() {
        let mut r = record("1");
        r.city = None;
        r.state = Some("".into());
        let n = normalize(1, r).unwrap();
        assert_eq!(n.location.key.city, UNKNOWN_PLACE);
        assert_eq!(n.location.key.state, UNKNOWN_PLACE);
        assert_eq!(n.location.key.country, "US");
    }

    #[test]
    fn blank_topic_name_is_absent() {
        let mut r = record("1");
        r.topic_name = Some(" ".into());
        assert_eq!(normalize(1, r).unwrap().topic.name, None);
    }
}
