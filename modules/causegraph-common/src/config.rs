use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::IngestError;

/// How Vehicle nodes are identified when merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VehicleIdentity {
    /// Merge on serial number: the same serial reported by two accidents is
    /// one Vehicle node. Vehicles with a blank serial fall back to
    /// accident-scoped identity.
    #[default]
    SerialNumber,
    /// Every vehicle is scoped to its accident: `(Oid, VehicleNumber)`.
    AccidentScoped,
}

impl FromStr for VehicleIdentity {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serial" | "serial-number" | "serial_number" => Ok(Self::SerialNumber),
            "accident" | "accident-scoped" | "accident_scoped" => Ok(Self::AccidentScoped),
            other => Err(IngestError::Config(format!(
                "unknown vehicle identity '{other}' (expected 'serial' or 'accident')"
            ))),
        }
    }
}

impl fmt::Display for VehicleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerialNumber => f.write_str("serial"),
            Self::AccidentScoped => f.write_str("accident"),
        }
    }
}

/// Knobs for a single ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Wipe the graph before loading. Off means incremental mode.
    pub reset_before_run: bool,
    /// Wrap each row's upserts in one transaction.
    pub row_transactions: bool,
    pub vehicle_identity: VehicleIdentity,
    /// Upper bound on a single store call.
    pub store_timeout: Duration,
    /// Attempts per store call, including the first. Retries only transient failures.
    pub max_attempts: u32,
    /// First retry delay; doubles each attempt.
    pub retry_base: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            reset_before_run: true,
            row_transactions: true,
            vehicle_identity: VehicleIdentity::SerialNumber,
            store_timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_base: Duration::from_millis(500),
        }
    }
}

/// Neo4j connection settings.
#[derive(Clone)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Neo4jConfig {
    /// Load from `NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD` (a `.env` file is honored).
    /// URI and user fall back to local defaults; the password is required.
    pub fn from_env() -> Result<Self, IngestError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            uri: env::var("NEO4J_URI").unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            user: env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            password: env::var("NEO4J_PASSWORD").map_err(|_| {
                IngestError::Config("NEO4J_PASSWORD environment variable is required".to_string())
            })?,
        })
    }

    /// Log the connection target without leaking the password.
    pub fn log_redacted(&self) {
        info!(
            uri = self.uri.as_str(),
            user = self.user.as_str(),
            password = redact(&self.password).as_str(),
            "Neo4j connection settings"
        );
    }
}

impl fmt::Debug for Neo4jConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Neo4jConfig")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &redact(&self.password))
            .finish()
    }
}

fn redact(secret: &str) -> String {
    if secret.is_empty() {
        "(empty)".to_string()
    } else {
        format!("({} chars)", secret.chars().count())
    }
}
