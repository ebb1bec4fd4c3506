use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, Query};
use tracing::{debug, info, warn};

use crate::store::{GraphCounts, GraphStore, StoreError, UpsertOp};
use crate::GraphClient;

/// Neo4j-backed [`GraphStore`]. Each `apply` batch runs in one transaction;
/// every statement is a MERGE on the node's identity key plus a MERGE of the
/// edge from its accident, so replays never duplicate anything.
#[derive(Clone)]
pub struct Neo4jStore {
    client: GraphClient,
}

impl Neo4jStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    async fn count(&self, cypher: &str) -> Result<u64, StoreError> {
        let mut stream = self.client.graph.execute(query(cypher)).await.map_err(classify)?;
        let Some(row) = stream.next().await.map_err(classify)? else {
            return Ok(0);
        };
        let n: i64 = row
            .get("n")
            .map_err(|e| StoreError::Rejected(format!("unreadable count: {e}")))?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn wipe(&self) -> Result<(), StoreError> {
        info!("Clearing existing graph data...");
        self.client
            .graph
            .run(query("MATCH (n) DETACH DELETE n"))
            .await
            .map_err(classify)?;
        info!("Graph data cleared");
        Ok(())
    }

    async fn apply(&self, ops: &[UpsertOp]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut txn = self.client.graph.start_txn().await.map_err(classify)?;
        for op in ops {
            if let Err(e) = txn.run(op_query(op)).await {
                let err = classify(e);
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "Rollback failed after aborted upsert");
                }
                return Err(err);
            }
        }
        txn.commit().await.map_err(classify)?;
        debug!(oid = ops[0].oid(), statements = ops.len(), "Upsert batch committed");
        Ok(())
    }

    async fn counts(&self) -> Result<GraphCounts, StoreError> {
        Ok(GraphCounts {
            accidents: self.count("MATCH (n:Accident) RETURN count(n) AS n").await?,
            topics: self.count("MATCH (n:Topic) RETURN count(n) AS n").await?,
            locations: self.count("MATCH (n:Location) RETURN count(n) AS n").await?,
            vehicles: self.count("MATCH (n:Vehicle) RETURN count(n) AS n").await?,
            has_probable_cause: self
                .count("MATCH ()-[r:HAS_PROBABLE_CAUSE]->() RETURN count(r) AS n")
                .await?,
            occurred_at: self
                .count("MATCH ()-[r:OCCURRED_AT]->() RETURN count(r) AS n")
                .await?,
            involved_vehicle: self
                .count("MATCH ()-[r:INVOLVED_VEHICLE]->() RETURN count(r) AS n")
                .await?,
        })
    }
}

/// Build the Cypher statement for one upsert step.
pub(crate) fn op_query(op: &UpsertOp) -> Query {
    match op {
        UpsertOp::Accident(a) => query(
            "MERGE (a:Accident {Oid: $oid})
             SET a.NtsbNumber = $ntsb_number,
                 a.EventDate = CASE WHEN $event_date IS NULL THEN null ELSE datetime($event_date) END,
                 a.HighestInjury = $highest_injury,
                 a.ProbableCause = $probable_cause",
        )
        .param("oid", a.oid.as_str())
        .param("ntsb_number", a.ntsb_number.clone())
        .param("event_date", a.event_date.as_ref().map(format_datetime))
        .param("highest_injury", a.highest_injury.clone())
        .param("probable_cause", a.probable_cause.clone()),

        // A missing name keeps whatever the topic was last called.
        UpsertOp::Topic { oid, topic } => query(
            "MATCH (a:Accident {Oid: $oid})
             MERGE (t:Topic {TopicID: $topic_id})
             SET t.TopicName = coalesce($topic_name, t.TopicName)
             MERGE (a)-[:HAS_PROBABLE_CAUSE]->(t)",
        )
        .param("oid", oid.as_str())
        .param("topic_id", topic.id)
        .param("topic_name", topic.name.clone()),

        UpsertOp::Location { oid, location } => query(
            "MATCH (a:Accident {Oid: $oid})
             MERGE (l:Location {City: $city, State: $state, Country: $country})
             SET l.Latitude = $latitude,
                 l.Longitude = $longitude
             MERGE (a)-[:OCCURRED_AT]->(l)",
        )
        .param("oid", oid.as_str())
        .param("city", location.key.city.as_str())
        .param("state", location.key.state.as_str())
        .param("country", location.key.country.as_str())
        .param("latitude", location.latitude)
        .param("longitude", location.longitude),

        UpsertOp::Vehicle { oid, vehicle } => query(
            "MATCH (a:Accident {Oid: $oid})
             MERGE (v:Vehicle {VehicleKey: $vehicle_key})
             SET v.SerialNumber = $serial_number,
                 v.VehicleNumber = $vehicle_number,
                 v.Make = $make,
                 v.Model = $model,
                 v.AircraftCategory = $aircraft_category,
                 v.OperatorName = $operator_name
             MERGE (a)-[:INVOLVED_VEHICLE]->(v)",
        )
        .param("oid", oid.as_str())
        .param("vehicle_key", vehicle.key.as_str())
        .param("serial_number", vehicle.serial_number.clone())
        .param("vehicle_number", vehicle.vehicle_number)
        .param("make", vehicle.make.clone())
        .param("model", vehicle.model.clone())
        .param("aircraft_category", vehicle.aircraft_category.clone())
        .param("operator_name", vehicle.operator_name.clone()),
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Sort a driver error into the failure classes the pipeline acts on.
pub(crate) fn classify(e: neo4rs::Error) -> StoreError {
    classify_message(e.to_string())
}

fn classify_message(msg: String) -> StoreError {
    let lower = msg.to_lowercase();

    if msg.contains("Neo.TransientError") || lower.contains("deadlock") {
        return StoreError::Transient(msg);
    }

    // Data-level constraint hits only affect the row that caused them.
    if msg.contains("ConstraintValidationFailed") {
        return StoreError::Rejected(msg);
    }

    let misconfigured = [
        "Neo.ClientError.Security",
        "Neo.ClientError.Schema",
        "Neo.ClientError.Statement.SyntaxError",
        "Neo.ClientError.Database.DatabaseNotFound",
        "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase",
    ];
    if misconfigured.iter().any(|code| msg.contains(code))
        || lower.contains("authentication")
        || lower.contains("unauthorized")
    {
        return StoreError::Schema(msg);
    }

    let unreachable = [
        "connection",
        "broken pipe",
        "reset by peer",
        "refused",
        "io error",
        "timed out",
        "unexpected eof",
        "neo.databaseerror",
    ];
    if unreachable.iter().any(|needle| lower.contains(needle)) {
        return StoreError::Unavailable(msg);
    }

    StoreError::Rejected(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        let e = classify_message(
            "Neo4j error `Neo.TransientError.Transaction.DeadlockDetected`: ForsetiClient can't acquire lock"
                .into(),
        );
        assert!(matches!(e, StoreError::Transient(_)));
    }

    #[test]
    fn classifies_misconfiguration_as_schema() {
        let auth = classify_message(
            "Neo4j error `Neo.ClientError.Security.Unauthorized`: The client is unauthorized".into(),
        );
        assert!(auth.is_fatal());

        let syntax =
            classify_message("Neo.ClientError.Statement.SyntaxError: Invalid input".into());
        assert!(syntax.is_fatal());
    }

    #[test]
    fn constraint_hits_are_row_scoped() {
        let e = classify_message(
            "Neo.ClientError.Schema.ConstraintValidationFailed: Node(12) already exists".into(),
        );
        assert!(matches!(e, StoreError::Rejected(_)));
    }

    #[test]
    fn classifies_network_failures_as_unavailable() {
        let e = classify_message("an IO error occurred: Connection refused (os error 111)".into());
        assert!(matches!(e, StoreError::Unavailable(_)));
    }

    #[test]
    fn unknown_errors_reject_the_row() {
        let e = classify_message("Neo.ClientError.Statement.TypeError: expected Float".into());
        assert!(matches!(e, StoreError::Rejected(_)));
    }

    #[test]
    fn datetime_is_utc_with_micros() {
        let dt = DateTime::parse_from_rfc3339("2023-01-15T14:30:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_datetime(&dt), "2023-01-15T14:30:00.500000Z");
    }
}
