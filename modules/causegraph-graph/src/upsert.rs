//! Upserter: turns one normalized accident into merge operations and
//! pushes them to the store.
//!
//! Order within a row is fixed: Accident, Topic, Location, then each Vehicle.
//! With row transactions (the default) the whole row is one atomic batch.
//! Without them every op is its own call, so a failure part-way through
//! leaves the earlier ops committed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use causegraph_common::{IngestConfig, NormalizedRecord, VehicleEntry, VehicleIdentity};

use crate::store::{AccidentProps, GraphStore, StoreError, UpsertOp, VehicleProps};

/// Ordered ops for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowPlan {
    /// Accident, Topic, Location.
    pub core: Vec<UpsertOp>,
    pub vehicles: Vec<UpsertOp>,
}

impl RowPlan {
    pub fn ops(&self) -> impl Iterator<Item = &UpsertOp> {
        self.core.iter().chain(self.vehicles.iter())
    }

    pub fn len(&self) -> usize {
        self.core.len() + self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A row's upsert stopped part-way.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertFailure {
    pub error: StoreError,
    /// Ops that were committed before the failure (always 0 in transactional mode).
    pub committed: usize,
}

pub struct Upserter {
    store: Arc<dyn GraphStore>,
    config: IngestConfig,
}

impl Upserter {
    pub fn new(store: Arc<dyn GraphStore>, config: IngestConfig) -> Self {
        Self { store, config }
    }

    /// Build the merge operations for a row without touching the store.
    pub fn plan(&self, record: &NormalizedRecord) -> RowPlan {
        let oid = &record.oid;
        let core = vec![
            UpsertOp::Accident(AccidentProps {
                oid: oid.clone(),
                ntsb_number: record.ntsb_number.clone(),
                event_date: record.event_date,
                highest_injury: record.highest_injury.clone(),
                probable_cause: record.probable_cause.clone(),
            }),
            UpsertOp::Topic {
                oid: oid.clone(),
                topic: record.topic.clone(),
            },
            UpsertOp::Location {
                oid: oid.clone(),
                location: record.location.clone(),
            },
        ];

        let vehicles = record
            .vehicles
            .iter()
            .enumerate()
            .map(|(i, v)| UpsertOp::Vehicle {
                oid: oid.clone(),
                vehicle: vehicle_props(oid, i + 1, v, self.config.vehicle_identity),
            })
            .collect();

        RowPlan { core, vehicles }
    }

    /// Upsert one row. Returns the number of ops committed.
    pub async fn upsert(&self, record: &NormalizedRecord) -> Result<usize, UpsertFailure> {
        let plan = self.plan(record);
        let oid = record.oid.as_str();

        if self.config.row_transactions {
            let ops: Vec<UpsertOp> = plan.ops().cloned().collect();
            self.apply_with_retry(oid, &ops)
                .await
                .map_err(|error| UpsertFailure { error, committed: 0 })?;
            debug!(oid, ops = ops.len(), "Row upserted");
            return Ok(ops.len());
        }

        let mut committed = 0;
        for op in plan.ops() {
            self.apply_with_retry(oid, std::slice::from_ref(op))
                .await
                .map_err(|error| UpsertFailure { error, committed })?;
            committed += 1;
        }
        debug!(oid, ops = committed, "Row upserted without transaction");
        Ok(committed)
    }

    async fn apply_with_retry(&self, oid: &str, ops: &[UpsertOp]) -> Result<(), StoreError> {
        with_retry(&self.config, oid, || self.store.apply(ops)).await
    }
}

/// One bounded store call, retried on transient failures with exponential
/// backoff plus jitter. `subject` names what the call is for in the logs.
pub(crate) async fn with_retry<F, Fut>(
    config: &IngestConfig,
    subject: &str,
    mut call: F,
) -> Result<(), StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(config.store_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(config.store_timeout)),
        };

        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff(config.retry_base, attempt);
                warn!(
                    subject,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %e,
                    "Store call failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// `base * 2^(attempt-1)` plus up to 25% jitter.
fn backoff(base: Duration, attempt: u32) -> Duration {
    let delay = base * 2u32.pow(attempt.saturating_sub(1).min(10));
    let max_jitter = delay.as_millis() as u64 / 4;
    if max_jitter == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=max_jitter))
}

/// Identity key for a vehicle. Serial and accident-scoped keys live in
/// separate namespaces. Accident-scoped keys use the 1-based list position,
/// which is unique within a row even when `VehicleNumber` repeats or clashes.
fn vehicle_key(
    oid: &str,
    position: usize,
    vehicle: &VehicleEntry,
    identity: VehicleIdentity,
) -> String {
    match (identity, vehicle.serial_number.as_deref()) {
        (VehicleIdentity::SerialNumber, Some(serial)) => format!("serial:{serial}"),
        _ => format!("accident:{oid}#{position}"),
    }
}

fn vehicle_props(
    oid: &str,
    position: usize,
    v: &VehicleEntry,
    identity: VehicleIdentity,
) -> VehicleProps {
    VehicleProps {
        key: vehicle_key(oid, position, v, identity),
        serial_number: v.serial_number.clone(),
        vehicle_number: v.vehicle_number,
        make: v.make.clone(),
        model: v.model.clone(),
        aircraft_category: v.aircraft_category.clone(),
        operator_name: v.operator_name.clone(),
    }
}
