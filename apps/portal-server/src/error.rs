//! Service-level errors returned by every handler.

use portal_authz::Denial;
use portal_storage::StoreError;
use serde::Serialize;
use thiserror::Error;

use crate::blobs::BlobError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("invalid input: {0}")]
    Validation(String),

    /// Backend failure; details are logged, never returned.
    #[error("internal storage error")]
    Storage,
}

/// Transport-facing classification of a [`ServiceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidState,
    Validation,
    Storage,
}

impl ServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ServiceError::NotFound(what.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ServiceError::Forbidden(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        ServiceError::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ServiceError::Validation(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Forbidden(_) => ErrorKind::Forbidden,
            ServiceError::InvalidState(_) => ErrorKind::InvalidState,
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::Storage => ErrorKind::Storage,
        }
    }
}

impl From<Denial> for ServiceError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::Forbidden(msg) => ServiceError::Forbidden(msg),
            Denial::OutOfScope => {
                ServiceError::Forbidden("target is outside your organization".to_string())
            }
            Denial::InvalidState(msg) => ServiceError::InvalidState(msg),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServiceError::NotFound("record".to_string()),
            StoreError::AlreadyExists => ServiceError::InvalidState("already exists".to_string()),
            StoreError::Conflict => ServiceError::InvalidState("conflicting update".to_string()),
            StoreError::Backend(msg) => {
                tracing::error!(error = %msg, "storage backend failure");
                ServiceError::Storage
            }
        }
    }
}

impl From<BlobError> for ServiceError {
    fn from(e: BlobError) -> Self {
        tracing::error!(error = %e, "blob store failure");
        ServiceError::Storage
    }
}

/// Attach the entity name to lookup and uniqueness failures.
pub trait StoreResultExt<T> {
    fn entity(self, name: &str) -> Result<T, ServiceError>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
    fn entity(self, name: &str) -> Result<T, ServiceError> {
        self.map_err(|e| match e {
            StoreError::NotFound => ServiceError::NotFound(name.to_string()),
            StoreError::AlreadyExists => {
                ServiceError::InvalidState(format!("{name} already exists"))
            }
            other => other.into(),
        })
    }
}
