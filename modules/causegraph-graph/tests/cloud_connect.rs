//! Smoke test: connect to Neo4j via bolt://.
//! Run with: cargo test -p causegraph-graph --test cloud_connect -- --ignored

use causegraph_common::Neo4jConfig;
use causegraph_graph::{query, GraphClient};

#[tokio::test]
#[ignore] // requires live Neo4j credentials
async fn cloud_connect() {
    let config = Neo4jConfig::from_env().expect("NEO4J_PASSWORD required");

    let client = GraphClient::from_config(&config)
        .await
        .expect("Failed to connect");

    let mut result = client
        .inner()
        .execute(query("RETURN 1 AS ping"))
        .await
        .unwrap();
    let row = result.next().await.unwrap().expect("No result row");
    let ping: i64 = row.get("ping").unwrap();
    assert_eq!(ping, 1);
}
