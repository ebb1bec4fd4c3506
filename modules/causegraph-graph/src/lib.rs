pub mod client;
pub mod memory;
pub mod migrate;
pub mod pipeline;
pub mod store;
pub mod upsert;
pub mod writer;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use client::GraphClient;
pub use memory::MemoryGraph;
pub use neo4rs::query;
pub use pipeline::{Pipeline, RowOutcome, RowReport, RunHalted, RunSummary, TableRow};
pub use store::{GraphCounts, GraphStore, StoreError, UpsertOp};
pub use upsert::{RowPlan, Upserter};
pub use writer::Neo4jStore;
