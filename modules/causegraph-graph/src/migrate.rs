use neo4rs::query;
use tracing::{info, warn};

use crate::GraphClient;

/// Run idempotent schema migrations: uniqueness constraints on every identity
/// key, plus lookup indexes for the MERGE patterns the writer issues.
pub async fn migrate(client: &GraphClient) -> Result<(), neo4rs::Error> {
    let g = &client.graph;

    info!("Running schema migrations...");

    let constraints = [
        "CREATE CONSTRAINT accident_oid IF NOT EXISTS FOR (a:Accident) REQUIRE a.Oid IS UNIQUE",
        "CREATE CONSTRAINT topic_id IF NOT EXISTS FOR (t:Topic) REQUIRE t.TopicID IS UNIQUE",
        "CREATE CONSTRAINT vehicle_key IF NOT EXISTS FOR (v:Vehicle) REQUIRE v.VehicleKey IS UNIQUE",
    ];
    for c in &constraints {
        run_ignoring_exists(g, c).await?;
    }
    info!("Identity constraints created");

    let indexes = [
        "CREATE INDEX location_place IF NOT EXISTS FOR (l:Location) ON (l.City, l.State, l.Country)",
        "CREATE INDEX vehicle_serial IF NOT EXISTS FOR (v:Vehicle) ON (v.SerialNumber)",
        "CREATE INDEX accident_event_date IF NOT EXISTS FOR (a:Accident) ON (a.EventDate)",
    ];
    for idx in &indexes {
        run_ignoring_exists(g, idx).await?;
    }
    info!("Property indexes created");

    Ok(())
}

/// Older servers report equivalent schema objects as errors even with IF NOT EXISTS.
async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> Result<(), neo4rs::Error> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!("Already exists (skipped): {}", cypher.chars().take(80).collect::<String>());
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}
