use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::MalformedVehicleData;
use crate::vehicles::{VehicleEntry, VehicleIssue};

/// Topic id the clustering stage assigns to outliers it could not place.
pub const UNCLUSTERED_TOPIC_ID: i64 = -1;

/// Stand-in for a missing City/State/Country component. Keeps the composite
/// Location key non-null so it can still be merged on.
pub const UNKNOWN_PLACE: &str = "Unknown";

// --- Raw table row ---

/// One row of the enriched accident table, exactly as read from disk.
///
/// Every column is optional text: validation and coercion happen in
/// [`crate::normalize`], not during deserialization, so a single bad cell
/// never makes the whole row unreadable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccidentRecord {
    #[serde(rename = "Oid")]
    pub oid: Option<String>,
    #[serde(rename = "NtsbNumber")]
    pub ntsb_number: Option<String>,
    #[serde(rename = "EventDate")]
    pub event_date: Option<String>,
    #[serde(rename = "HighestInjury")]
    pub highest_injury: Option<String>,
    #[serde(rename = "ProbableCause")]
    pub probable_cause: Option<String>,
    #[serde(rename = "City")]
    pub city: Option<String>,
    #[serde(rename = "State")]
    pub state: Option<String>,
    #[serde(rename = "Country")]
    pub country: Option<String>,
    #[serde(rename = "Latitude")]
    pub latitude: Option<String>,
    #[serde(rename = "Longitude")]
    pub longitude: Option<String>,
    #[serde(rename = "Vehicles")]
    pub vehicles: Option<String>,
    #[serde(rename = "TopicID")]
    pub topic_id: Option<String>,
    #[serde(rename = "TopicName")]
    pub topic_name: Option<String>,
}

// --- Normalized record ---

/// Probable-cause label assigned by the enrichment stage.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicLabel {
    pub id: i64,
    /// `None` leaves any name already stored on the Topic untouched.
    pub name: Option<String>,
}

impl TopicLabel {
    pub fn is_unclustered(&self) -> bool {
        self.id == UNCLUSTERED_TOPIC_ID
    }
}

/// Composite identity of a Location node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationKey {
    pub city: String,
    pub state: String,
    pub country: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub key: LocationKey,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A validated accident row, ready for the upserter.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    /// 1-based position of the row in the source table.
    pub row: usize,
    pub oid: String,
    pub ntsb_number: Option<String>,
    pub event_date: Option<DateTime<Utc>>,
    pub highest_injury: Option<String>,
    pub probable_cause: Option<String>,
    pub topic: TopicLabel,
    pub location: Location,
    pub vehicles: Vec<VehicleEntry>,
    /// Individual vehicle entries that were dropped.
    pub vehicle_issues: Vec<VehicleIssue>,
    /// Set when the whole Vehicles field could not be parsed.
    pub malformed_vehicles: Option<MalformedVehicleData>,
}

impl NormalizedRecord {
    /// True when some of the row's vehicle data could not be loaded.
    pub fn has_vehicle_problems(&self) -> bool {
        self.malformed_vehicles.is_some() || !self.vehicle_issues.is_empty()
    }

    /// Human-readable reasons for any dropped vehicle data.
    pub fn vehicle_problems(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        if let Some(m) = &self.malformed_vehicles {
            reasons.push(m.to_string());
        }
        for issue in &self.vehicle_issues {
            reasons.push(issue.to_string());
        }
        reasons
    }
}
