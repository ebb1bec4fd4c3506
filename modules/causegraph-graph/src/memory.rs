//! In-process [`GraphStore`] with the same merge semantics as the Cypher
//! writer. Backs `--dry-run` and the pipeline tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use causegraph_common::LocationKey;

use crate::store::{GraphCounts, GraphStore, StoreError, UpsertOp};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccidentNode {
    pub ntsb_number: Option<String>,
    pub event_date: Option<DateTime<Utc>>,
    pub highest_injury: Option<String>,
    pub probable_cause: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicNode {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationNode {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleNode {
    pub serial_number: Option<String>,
    pub vehicle_number: Option<i64>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub aircraft_category: Option<String>,
    pub operator_name: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryGraphInner {
    accidents: BTreeMap<String, AccidentNode>,
    topics: BTreeMap<i64, TopicNode>,
    locations: BTreeMap<LocationKey, LocationNode>,
    vehicles: BTreeMap<String, VehicleNode>,
    /// (Oid, TopicID)
    has_probable_cause: BTreeSet<(String, i64)>,
    /// (Oid, Location key)
    occurred_at: BTreeSet<(String, LocationKey)>,
    /// (Oid, VehicleKey)
    involved_vehicle: BTreeSet<(String, String)>,
    faults: Vec<Fault>,
    applied_batches: usize,
}

#[derive(Debug, Clone)]
struct Fault {
    oid: String,
    error: StoreError,
    /// `None` fails forever.
    remaining: Option<u32>,
    vehicles_only: bool,
}

/// In-memory property graph. Thread-safe via interior Mutex.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    inner: Mutex<MemoryGraphInner>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryGraphInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Fault injection ---

    /// Every batch touching `oid` fails with `error`.
    pub fn fail_row(self, oid: &str, error: StoreError) -> Self {
        self.push_fault(oid, error, None, false)
    }

    /// The next `times` batches touching `oid` fail, later ones succeed.
    pub fn fail_row_times(self, oid: &str, error: StoreError, times: u32) -> Self {
        self.push_fault(oid, error, Some(times), false)
    }

    /// Batches containing a vehicle op for `oid` fail with `error`.
    pub fn fail_vehicles(self, oid: &str, error: StoreError) -> Self {
        self.push_fault(oid, error, None, true)
    }

    fn push_fault(
        self,
        oid: &str,
        error: StoreError,
        remaining: Option<u32>,
        vehicles_only: bool,
    ) -> Self {
        self.lock().faults.push(Fault {
            oid: oid.to_string(),
            error,
            remaining,
            vehicles_only,
        });
        self
    }

    // --- Inspection ---

    pub fn accident(&self, oid: &str) -> Option<AccidentNode> {
        self.lock().accidents.get(oid).cloned()
    }

    pub fn topic(&self, id: i64) -> Option<TopicNode> {
        self.lock().topics.get(&id).cloned()
    }

    pub fn location(&self, key: &LocationKey) -> Option<LocationNode> {
        self.lock().locations.get(key).cloned()
    }

    pub fn vehicle(&self, key: &str) -> Option<VehicleNode> {
        self.lock().vehicles.get(key).cloned()
    }

    /// Topic the accident points at, if any.
    pub fn topic_of(&self, oid: &str) -> Option<i64> {
        self.lock()
            .has_probable_cause
            .iter()
            .find(|(o, _)| o == oid)
            .map(|(_, id)| *id)
    }

    /// Number of OCCURRED_AT edges pointing at a location.
    pub fn accidents_at(&self, key: &LocationKey) -> usize {
        self.lock().occurred_at.iter().filter(|(_, k)| k == key).count()
    }

    /// Vehicle keys linked from an accident.
    pub fn vehicles_of(&self, oid: &str) -> Vec<String> {
        self.lock()
            .involved_vehicle
            .iter()
            .filter(|(o, _)| o == oid)
            .map(|(_, key)| key.clone())
            .collect()
    }

    /// Batches committed since creation.
    pub fn applied_batches(&self) -> usize {
        self.lock().applied_batches
    }

    pub fn snapshot_counts(&self) -> GraphCounts {
        let inner = self.lock();
        GraphCounts {
            accidents: inner.accidents.len() as u64,
            topics: inner.topics.len() as u64,
            locations: inner.locations.len() as u64,
            vehicles: inner.vehicles.len() as u64,
            has_probable_cause: inner.has_probable_cause.len() as u64,
            occurred_at: inner.occurred_at.len() as u64,
            involved_vehicle: inner.involved_vehicle.len() as u64,
        }
    }
}

impl MemoryGraphInner {
    /// First fault matching the batch, consuming one use of it.
    fn take_fault(&mut self, ops: &[UpsertOp]) -> Option<StoreError> {
        let idx = self.faults.iter().position(|f| {
            f.remaining != Some(0)
                && ops
                    .iter()
                    .any(|op| op.oid() == f.oid && (!f.vehicles_only || op.is_vehicle()))
        })?;
        let fault = &mut self.faults[idx];
        if let Some(n) = fault.remaining.as_mut() {
            *n -= 1;
        }
        Some(fault.error.clone())
    }

    fn apply_op(&mut self, op: &UpsertOp) {
        match op {
            UpsertOp::Accident(a) => {
                self.accidents.insert(
                    a.oid.clone(),
                    AccidentNode {
                        ntsb_number: a.ntsb_number.clone(),
                        event_date: a.event_date,
                        highest_injury: a.highest_injury.clone(),
                        probable_cause: a.probable_cause.clone(),
                    },
                );
            }
            // Like MATCH in Cypher: no accident, nothing happens.
            _ if !self.accidents.contains_key(op.oid()) => {}
            UpsertOp::Topic { oid, topic } => {
                let node = self.topics.entry(topic.id).or_default();
                if topic.name.is_some() {
                    node.name = topic.name.clone();
                }
                self.has_probable_cause.insert((oid.clone(), topic.id));
            }
            UpsertOp::Location { oid, location } => {
                self.locations.insert(
                    location.key.clone(),
                    LocationNode {
                        latitude: location.latitude,
                        longitude: location.longitude,
                    },
                );
                self.occurred_at.insert((oid.clone(), location.key.clone()));
            }
            UpsertOp::Vehicle { oid, vehicle } => {
                self.vehicles.insert(
                    vehicle.key.clone(),
                    VehicleNode {
                        serial_number: vehicle.serial_number.clone(),
                        vehicle_number: vehicle.vehicle_number,
                        make: vehicle.make.clone(),
                        model: vehicle.model.clone(),
                        aircraft_category: vehicle.aircraft_category.clone(),
                        operator_name: vehicle.operator_name.clone(),
                    },
                );
                self.involved_vehicle.insert((oid.clone(), vehicle.key.clone()));
            }
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn wipe(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.accidents.clear();
        inner.topics.clear();
        inner.locations.clear();
        inner.vehicles.clear();
        inner.has_probable_cause.clear();
        inner.occurred_at.clear();
        inner.involved_vehicle.clear();
        Ok(())
    }

    async fn apply(&self, ops: &[UpsertOp]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        // Faults are checked up front so a failed batch leaves nothing behind.
        if let Some(err) = inner.take_fault(ops) {
            return Err(err);
        }
        for op in ops {
            inner.apply_op(op);
        }
        inner.applied_batches += 1;
        Ok(())
    }

    async fn counts(&self) -> Result<GraphCounts, StoreError> {
        Ok(self.snapshot_counts())
    }
}

#[cfg(test)]
mod tests {
    use causegraph_common::{Location, TopicLabel};

    use super::*;
    use crate::store::AccidentProps;

    fn accident(oid: &str) -> UpsertOp {
        UpsertOp::Accident(AccidentProps {
            oid: oid.to_string(),
            ntsb_number: None,
            event_date: None,
            highest_injury: None,
            probable_cause: None,
        })
    }

    fn topic(oid: &str, id: i64, name: Option<&str>) -> UpsertOp {
        UpsertOp::Topic {
            oid: oid.to_string(),
            topic: TopicLabel {
                id,
                name: name.map(str::to_string),
            },
        }
    }

    fn chicago() -> LocationKey {
        LocationKey {
            city: "Chicago".into(),
            state: "IL".into(),
            country: "US".into(),
        }
    }

    #[tokio::test]
    async fn merges_on_identity_key() {
        let graph = MemoryGraph::new();
        graph.apply(&[accident("1"), topic("1", 0, Some("Fuel"))]).await.unwrap();
        graph.apply(&[accident("1"), topic("1", 0, Some("Fuel"))]).await.unwrap();

        let counts = graph.snapshot_counts();
        assert_eq!(counts.accidents, 1);
        assert_eq!(counts.topics, 1);
        assert_eq!(counts.has_probable_cause, 1);
    }

    #[tokio::test]
    async fn missing_topic_name_keeps_previous() {
        let graph = MemoryGraph::new();
        graph.apply(&[accident("1"), topic("1", 4, Some("Icing"))]).await.unwrap();
        graph.apply(&[accident("2"), topic("2", 4, None)]).await.unwrap();
        assert_eq!(graph.topic(4).unwrap().name.as_deref(), Some("Icing"));
    }

    #[tokio::test]
    async fn edge_without_accident_is_a_no_op() {
        let graph = MemoryGraph::new();
        let op = UpsertOp::Location {
            oid: "ghost".into(),
            location: Location {
                key: chicago(),
                latitude: Some(41.9),
                longitude: Some(-87.6),
            },
        };
        graph.apply(&[op]).await.unwrap();
        assert_eq!(graph.snapshot_counts(), GraphCounts::default());
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_trace() {
        let graph = MemoryGraph::new().fail_row("1", StoreError::Rejected("nope".into()));
        let err = graph.apply(&[accident("1"), topic("1", 0, None)]).await.unwrap_err();
        assert_eq!(err, StoreError::Rejected("nope".into()));
        assert_eq!(graph.snapshot_counts(), GraphCounts::default());
        assert_eq!(graph.applied_batches(), 0);
    }

    #[tokio::test]
    async fn counted_faults_run_out() {
        let graph = MemoryGraph::new().fail_row_times("1", StoreError::Transient("busy".into()), 1);
        assert!(graph.apply(&[accident("1")]).await.is_err());
        assert!(graph.apply(&[accident("1")]).await.is_ok());
        assert!(graph.accident("1").is_some());
    }

    #[tokio::test]
    async fn wipe_clears_everything() {
        let graph = MemoryGraph::new();
        graph.apply(&[accident("1"), topic("1", 0, None)]).await.unwrap();
        graph.wipe().await.unwrap();
        assert_eq!(graph.counts().await.unwrap(), GraphCounts::default());
    }
}
