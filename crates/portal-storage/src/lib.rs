//! Storage abstraction for the portal.
//!
//! Backend crates (portal-store-sqlite, portal-store-postgres) implement
//! [`Store`] and [`StoreTx`] so the service layer doesn't depend on any
//! specific database engine or schema details.

use thiserror::Error;

mod store;
pub mod types;

pub use store::*;
pub use types::*;

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("conflict")]
    Conflict,
    #[error("backend error: {0}")]
    Backend(String),
}
