//! Service layer of the corporate portal.
//!
//! [`PortalServer`] bundles the store and the credential, token and blob
//! services; the [`handlers`] take it plus the authenticated actor and
//! return typed responses or a [`ServiceError`]. Transport (HTTP routing,
//! multipart parsing) lives outside this crate.

pub mod auth;
pub mod backend;
pub mod blobs;
pub mod config;
pub mod error;
pub mod handlers;
pub mod leadership;
pub mod server;

#[cfg(test)]
mod tests;

pub use config::{ConfigError, ServerConfig};
pub use error::{ErrorKind, ServiceError};
pub use server::PortalServer;
