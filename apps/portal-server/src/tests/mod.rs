//! Service tests against in-memory SQLite.
//!
//! Tests are organized into modules by feature area:
//! - `common` - Shared test helpers
//! - `auth` - Registration, login and bearer tokens
//! - `users` - Profiles, role management, leave/kick/delete
//! - `teams` - Team CRUD, membership and leadership transitions
//! - `invites` - Invite lifecycle and concurrent redemption
//! - `content` - News, documents, tags and visibility
//! - `tasks` - Team task board
//! - `scenario` - End-to-end onboarding walkthrough
//! - `failures` - Backend failure mapping with a mocked store

pub mod common;

mod auth;
mod invites;
mod users;
