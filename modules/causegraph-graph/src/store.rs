//! The seam between the upserter and whatever holds the graph.
//!
//! Upserts are expressed as [`UpsertOp`] values. A store applies a batch of
//! them atomically with merge-by-identity semantics; it is never asked to
//! read a node back before attaching an edge to it.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use causegraph_common::{IngestError, Location, TopicLabel};

/// One create-or-update step. Every variant except `Accident` also merges the
/// edge from the accident (looked up by `oid`) to the merged node.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOp {
    Accident(AccidentProps),
    Topic { oid: String, topic: TopicLabel },
    Location { oid: String, location: Location },
    Vehicle { oid: String, vehicle: VehicleProps },
}

impl UpsertOp {
    /// The accident this op belongs to.
    pub fn oid(&self) -> &str {
        match self {
            UpsertOp::Accident(a) => &a.oid,
            UpsertOp::Topic { oid, .. }
            | UpsertOp::Location { oid, .. }
            | UpsertOp::Vehicle { oid, .. } => oid,
        }
    }

    pub fn is_vehicle(&self) -> bool {
        matches!(self, UpsertOp::Vehicle { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccidentProps {
    pub oid: String,
    pub ntsb_number: Option<String>,
    pub event_date: Option<DateTime<Utc>>,
    pub highest_injury: Option<String>,
    pub probable_cause: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleProps {
    /// Identity key the node is merged on.
    pub key: String,
    pub serial_number: Option<String>,
    pub vehicle_number: Option<i64>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub aircraft_category: Option<String>,
    pub operator_name: Option<String>,
}

/// Node and edge totals, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphCounts {
    pub accidents: u64,
    pub topics: u64,
    pub locations: u64,
    pub vehicles: u64,
    pub has_probable_cause: u64,
    pub occurred_at: u64,
    pub involved_vehicle: u64,
}

impl fmt::Display for GraphCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Accident, {} Topic, {} Location, {} Vehicle nodes; \
             {} HAS_PROBABLE_CAUSE, {} OCCURRED_AT, {} INVOLVED_VEHICLE edges",
            self.accidents,
            self.topics,
            self.locations,
            self.vehicles,
            self.has_probable_cause,
            self.occurred_at,
            self.involved_vehicle,
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Transient store failure: {0}")]
    Transient(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// The store refused this particular write (bad data, constraint hit).
    #[error("Write rejected: {0}")]
    Rejected(String),

    /// The store refuses writes for reasons unrelated to the data; every
    /// subsequent row would fail the same way.
    #[error("Schema violation: {0}")]
    Schema(String),
}

impl StoreError {
    /// Worth another attempt after a pause.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Transient(_) | StoreError::Unavailable(_) | StoreError::Timeout(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Schema(_))
    }
}

impl From<StoreError> for IngestError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transient(msg) => IngestError::TransientStoreFailure(msg),
            StoreError::Timeout(after) => {
                IngestError::TransientStoreFailure(format!("store call timed out after {after:?}"))
            }
            StoreError::Unavailable(msg) => IngestError::StoreUnavailable(msg),
            StoreError::Rejected(msg) => IngestError::StoreRejected(msg),
            StoreError::Schema(msg) => IngestError::SchemaViolation(msg),
        }
    }
}

/// A property graph that can hold the accident schema.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Delete every node and relationship.
    async fn wipe(&self) -> Result<(), StoreError>;

    /// Apply `ops` in order as one atomic unit: all of them or none.
    async fn apply(&self, ops: &[UpsertOp]) -> Result<(), StoreError>;

    async fn counts(&self) -> Result<GraphCounts, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infrastructure_failures_are_retried() {
        assert!(StoreError::Transient("deadlock".into()).is_retryable());
        assert!(StoreError::Unavailable("refused".into()).is_retryable());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!StoreError::Rejected("constraint".into()).is_retryable());
        assert!(!StoreError::Schema("auth".into()).is_retryable());
    }

    #[test]
    fn maps_onto_ingest_errors() {
        let e: IngestError = StoreError::Schema("bad credentials".into()).into();
        assert!(e.is_fatal());

        let e: IngestError = StoreError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(e, IngestError::TransientStoreFailure(_)));

        let e: IngestError = StoreError::Unavailable("refused".into()).into();
        assert_eq!(e, IngestError::StoreUnavailable("refused".into()));
    }
}
