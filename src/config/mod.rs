pub mod builder;
pub mod types;
pub(crate) mod validation;

pub use builder::*;
pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Invalid value for field '{field}': {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Duplicate component name: {name}")]
    DuplicateComponent { name: String },

    #[error("Unknown component kind '{kind}' for component '{name}'")]
    UnknownComponentKind { name: String, kind: String },

    #[error("Failed to create component '{name}': {reason}")]
    ComponentInit { name: String, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
