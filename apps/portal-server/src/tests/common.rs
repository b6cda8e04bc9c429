//! Common test helpers.
//!
//! Users are inserted straight into the store with a placeholder password
//! hash so tests don't pay for argon2; `auth` tests go through `register`.

use std::sync::Arc;

use portal_storage::*;
use portal_store_sqlite::SqliteStore;
use tempfile::TempDir;

use crate::config::ServerConfig;
use crate::handlers::invites::{self, CreateInviteRequest};
use crate::handlers::organizations::{self, CreateOrganizationRequest};
use crate::handlers::teams::{self, CreateTeamRequest};
use crate::handlers::users;
use crate::server::PortalServer;

pub const TEST_SECRET: &str = "test-secret";

/// 1x1 transparent PNG.
pub const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

/// A server over in-memory SQLite whose blobs land in a temp dir.
///
/// Keep the `TempDir` alive for the duration of the test.
pub async fn create_test_server() -> (PortalServer, TempDir) {
    let uploads = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let mut config = ServerConfig::with_secret(TEST_SECRET);
    config.upload_dir = uploads.path().to_path_buf();
    (PortalServer::new(store, config), uploads)
}

pub async fn create_test_user(server: &PortalServer, email: &str) -> UserId {
    let full_name = email.split('@').next().unwrap_or(email).to_string();
    server
        .store
        .create_user(&CreateUserParams {
            email: email.to_string(),
            password_hash: "unused".to_string(),
            full_name,
        })
        .await
        .unwrap()
        .id
}

pub async fn fetch_user(server: &PortalServer, user_id: &UserId) -> User {
    server.store.get_user(user_id).await.unwrap()
}

/// Create an organization owned by `owner` (who becomes SuperAdmin).
pub async fn create_test_org(server: &PortalServer, owner: &UserId, name: &str) -> OrganizationId {
    organizations::create_organization(
        server,
        owner,
        CreateOrganizationRequest {
            name: name.to_string(),
            description: String::new(),
        },
    )
    .await
    .unwrap()
    .id
}

/// Bring `user` into the organization of `admin` through a single-use invite.
pub async fn join_org(server: &PortalServer, admin: &UserId, user: &UserId) {
    let invite = invites::create_invite(
        server,
        admin,
        CreateInviteRequest {
            expires_in_hours: 1,
            max_uses: 1,
        },
    )
    .await
    .unwrap();
    invites::join_by_invite(server, user, &invite.token)
        .await
        .unwrap();
}

/// A fresh user who joined the organization of `owner` with `role`.
pub async fn create_member(
    server: &PortalServer,
    owner: &UserId,
    email: &str,
    role: Role,
) -> UserId {
    let user = create_test_user(server, email).await;
    join_org(server, owner, &user).await;
    if role != Role::User {
        users::update_user_role(server, owner, &user, role)
            .await
            .unwrap();
    }
    user
}

pub async fn create_test_team(
    server: &PortalServer,
    admin: &UserId,
    name: &str,
    leader: Option<UserId>,
) -> Team {
    teams::create_team(
        server,
        admin,
        CreateTeamRequest {
            name: name.to_string(),
            description: String::new(),
            leader_id: leader,
        },
    )
    .await
    .unwrap()
}

/// An owner with an organization, as `(owner, org)`.
pub async fn setup_org(server: &PortalServer) -> (UserId, OrganizationId) {
    let owner = create_test_user(server, "owner@example.com").await;
    let org = create_test_org(server, &owner, "Acme").await;
    (owner, org)
}
