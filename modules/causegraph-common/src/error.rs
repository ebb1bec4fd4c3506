use thiserror::Error;

/// The Vehicles field of a row could not be parsed at all. The accident is
/// still loaded, just without vehicles, so this is carried on the
/// normalized record rather than raised as an [`IngestError`].
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Malformed Vehicles data for accident {oid}: {reason}")]
pub struct MalformedVehicleData {
    pub oid: String,
    pub raw: String,
    pub reason: String,
}

/// A row has no usable identity key and cannot be upserted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Row {row} is missing required field {field}")]
pub struct MissingRequiredField {
    pub row: usize,
    pub field: &'static str,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error(transparent)]
    MissingRequiredField(#[from] MissingRequiredField),

    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Transient graph store failure: {0}")]
    TransientStoreFailure(String),

    #[error("Graph store rejected write: {0}")]
    StoreRejected(String),

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl IngestError {
    /// Run-scoped failures stop the whole run; everything else is row-scoped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestError::SchemaViolation(_) | IngestError::Config(_))
    }
}
