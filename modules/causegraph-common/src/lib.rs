pub mod config;
pub mod error;
pub mod normalize;
pub mod types;
pub mod vehicles;

pub use config::{IngestConfig, Neo4jConfig, VehicleIdentity};
pub use error::{IngestError, MalformedVehicleData, MissingRequiredField};
pub use normalize::normalize;
pub use types::*;
pub use vehicles::{parse_vehicles, VehicleEntry, VehicleIssue, VehicleParse, VehicleParseError};
