use neo4rs::{ConfigBuilder, Graph};

use causegraph_common::Neo4jConfig;

/// Thin wrapper around neo4rs::Graph providing connection setup.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given credentials.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, neo4rs::Error> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(4)
            .build()?;
        let graph = Graph::connect(config).await?;
        Ok(Self { graph })
    }

    pub async fn from_config(config: &Neo4jConfig) -> Result<Self, neo4rs::Error> {
        Self::connect(&config.uri, &config.user, &config.password).await
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}
