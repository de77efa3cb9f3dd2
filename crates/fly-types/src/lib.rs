//! Shared types and errors for the fly rule engine.
//!
//! This crate provides the foundational types used across the other fly crates:
//! - `FlyError`: unified error taxonomy
//! - `Value`: dynamic value held by records and rule configuration

mod value;

pub use value::{Value, DATETIME_RENDER_FORMAT, DATE_RENDER_FORMAT, TIME_RENDER_FORMAT};

/// Unified error type for all fly subsystems.
#[derive(Debug, thiserror::Error)]
pub enum FlyError {
    // === Matching Errors ===
    #[error("Unsupported operator {operator}")]
    UnsupportedOperator { operator: String },

    #[error("Invalid conditions: {0}")]
    InvalidConditions(String),

    #[error("Invalid regex pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    // === Alteration Errors ===
    #[error("Unknown alter operator {operator}")]
    UnknownOperator { operator: String },

    #[error("Operator '{operator}' cannot be applied: {message}")]
    IncompatibleOperands { operator: String, message: String },

    #[error("Cannot write attribute '{field}': {message}")]
    Attribute { field: String, message: String },

    // === Conversion Errors ===
    #[error("Cannot convert {value} to {target}: {message}")]
    Conversion {
        value: String,
        target: String,
        message: String,
    },

    // === Configuration Errors ===
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Rule validation failed: {0}")]
    Validation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlyError {
    /// Returns `true` if the error comes from the rule configuration rather
    /// than from the record being processed.
    ///
    /// A configuration error fails every record the same way, so a batch
    /// runner should abort; record errors can be skipped individually.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            FlyError::UnsupportedOperator { .. }
                | FlyError::InvalidConditions(_)
                | FlyError::InvalidPattern { .. }
                | FlyError::UnknownOperator { .. }
                | FlyError::InvalidRule(_)
                | FlyError::Validation(_)
                | FlyError::Json(_)
        )
    }
}

/// A convenience alias for `Result<T, FlyError>`.
pub type Result<T> = std::result::Result<T, FlyError>;
