//! Error types for the payroll run core.
//!
//! Request-time precondition failures surface synchronously as [`PayrollError`].
//! Pipeline-time failures are written into the run log instead and are only
//! observable by polling run status.

use crate::config::ConfigurationError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayrollError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by boundary layers (HTTP status mapping, audit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Infrastructure,
}

impl PayrollError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn collaborator(collaborator: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Collaborator {
            collaborator,
            message: error.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) | Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Database(_)
            | Self::Collaborator { .. }
            | Self::Configuration(_)
            | Self::Serialization(_)
            | Self::Internal(_) => ErrorKind::Infrastructure,
        }
    }

    /// Short machine-readable label stored in run error details
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Validation(_) => "validation",
            Self::Database(_) => "database",
            Self::Collaborator { .. } => "collaborator",
            Self::Configuration(_) => "configuration",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for PayrollError {
    fn from(error: serde_json::Error) -> Self {
        PayrollError::Serialization(error.to_string())
    }
}

impl From<sqlx::Error> for PayrollError {
    fn from(err: sqlx::Error) -> Self {
        PayrollError::Database(err.to_string())
    }
}

impl From<ConfigurationError> for PayrollError {
    fn from(err: ConfigurationError) -> Self {
        PayrollError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PayrollError>;
