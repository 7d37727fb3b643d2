pub mod config;
pub mod directory;
pub mod metrics_defs;
pub mod types;

pub use config::{EndpointsFile, ValidationError};
pub use directory::{Directory, DirectoryError};
pub use types::{
    AllowedEnvironments, CompositeDefinition, CompositeStep, EndpointDefinition, HttpMethod,
};
