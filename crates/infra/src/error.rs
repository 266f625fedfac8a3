//! Service-level error model.
//!
//! Every engine operation fails with one of five kinds. Domain and storage
//! errors are mapped here so services can use `?` throughout.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgebill_core::DomainError;

use crate::store::StoreError;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    InvalidStateTransition,
    AlreadyExists,
    DependencyFailure,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BillingError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A collaborator (storage, directory, registry) failed.
    #[error("dependency failure: {0}")]
    DependencyFailure(String),
}

impl BillingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BillingError::NotFound(_) => ErrorKind::NotFound,
            BillingError::InvalidInput(_) => ErrorKind::InvalidInput,
            BillingError::InvalidStateTransition(_) => ErrorKind::InvalidStateTransition,
            BillingError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            BillingError::DependencyFailure(_) => ErrorKind::DependencyFailure,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

impl From<DomainError> for BillingError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => BillingError::InvalidInput(msg),
            DomainError::InvalidId(msg) => BillingError::InvalidInput(msg),
            DomainError::InvalidTransition(msg) => BillingError::InvalidStateTransition(msg),
            DomainError::InvariantViolation(msg) => BillingError::InvalidStateTransition(msg),
            DomainError::NotFound(msg) => BillingError::NotFound(msg),
            DomainError::AlreadyExists(msg) => BillingError::AlreadyExists(msg),
        }
    }
}

impl From<StoreError> for BillingError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => BillingError::NotFound(msg),
            StoreError::Duplicate(msg) => BillingError::AlreadyExists(msg),
            StoreError::Conflict(msg) => BillingError::DependencyFailure(format!("conflict: {msg}")),
            StoreError::Storage(msg) => BillingError::DependencyFailure(msg),
        }
    }
}
