//! Invite lifecycle and redemption tests.

use chrono::{Duration, Utc};
use futures::future::join_all;

use super::common::*;
use crate::error::ServiceError;
use crate::handlers::invites::{self, CreateInviteRequest};
use crate::server::PortalServer;
use portal_storage::*;

async fn open_invite(server: &PortalServer, admin: &UserId, max_uses: i64) -> Invite {
    invites::create_invite(
        server,
        admin,
        CreateInviteRequest {
            expires_in_hours: 24,
            max_uses,
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_redemption_moves_user_and_counts_use() {
    let (server, _uploads) = create_test_server().await;
    let (owner, org) = setup_org(&server).await;
    let invite = open_invite(&server, &owner, 2).await;
    assert_eq!(invite.token.len(), 36);

    let newcomer = create_test_user(&server, "new@example.com").await;
    let joined = invites::join_by_invite(&server, &newcomer, &invite.token)
        .await
        .unwrap();

    assert_eq!(joined.organization, Affiliation::Affiliated(org));
    assert_eq!(joined.team, Affiliation::Unaffiliated);
    assert_eq!(joined.role, Role::User);
    assert_eq!(fetch_user(&server, &newcomer).await.organization, joined.organization);

    let stored = server.store.get_invite_by_token(&invite.token).await.unwrap();
    assert_eq!(stored.uses, 1);
}

#[tokio::test]
async fn test_concurrent_redemption_of_last_use() {
    let (server, _uploads) = create_test_server().await;
    let (owner, _) = setup_org(&server).await;
    let invite = open_invite(&server, &owner, 2).await;

    let first = create_test_user(&server, "first@example.com").await;
    invites::join_by_invite(&server, &first, &invite.token)
        .await
        .unwrap();

    let mut contenders = Vec::new();
    for i in 0..4 {
        contenders.push(create_test_user(&server, &format!("c{i}@example.com")).await);
    }
    let results = join_all(
        contenders
            .iter()
            .map(|user| invites::join_by_invite(&server, user, &invite.token)),
    )
    .await;

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one redemption may win");
    for result in &results {
        if let Err(e) = result {
            assert!(
                matches!(e, ServiceError::InvalidState(msg) if msg == "invite exhausted"),
                "unexpected error: {e}"
            );
        }
    }

    let stored = server.store.get_invite_by_token(&invite.token).await.unwrap();
    assert_eq!(stored.uses, stored.max_uses);
}

#[tokio::test]
async fn test_expired_and_exhausted_invites_rejected() {
    let (server, _uploads) = create_test_server().await;
    let (owner, org) = setup_org(&server).await;

    let expired = server
        .store
        .create_invite(&CreateInviteParams {
            token: "expired-token".to_string(),
            organization_id: org,
            created_by: owner,
            expires_at: Utc::now() - Duration::hours(1),
            max_uses: 5,
        })
        .await
        .unwrap();
    let user = create_test_user(&server, "late@example.com").await;
    let err = invites::join_by_invite(&server, &user, &expired.token)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(msg) if msg == "invite expired"));

    let single = open_invite(&server, &owner, 1).await;
    let winner = create_test_user(&server, "winner@example.com").await;
    invites::join_by_invite(&server, &winner, &single.token)
        .await
        .unwrap();
    let err = invites::join_by_invite(&server, &user, &single.token)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(msg) if msg == "invite exhausted"));

    // A failed redemption leaves the user untouched.
    assert_eq!(
        fetch_user(&server, &user).await.organization,
        Affiliation::Unaffiliated
    );

    let missing = invites::join_by_invite(&server, &user, "no-such-token")
        .await
        .unwrap_err();
    assert!(matches!(missing, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_owner_cannot_join_another_organization() {
    let (server, _uploads) = create_test_server().await;
    let (owner_a, _) = setup_org(&server).await;
    let owner_b = create_test_user(&server, "owner-b@example.com").await;
    let org_b = create_test_org(&server, &owner_b, "Globex").await;
    let invite = open_invite(&server, &owner_b, 1).await;

    let err = invites::join_by_invite(&server, &owner_a, &invite.token)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let stored = server.store.get_invite_by_token(&invite.token).await.unwrap();
    assert_eq!(stored.uses, 0);
    assert_ne!(
        fetch_user(&server, &owner_a).await.organization,
        Affiliation::Affiliated(org_b)
    );
}

#[tokio::test]
async fn test_redemption_resets_team_role_and_leadership() {
    let (server, _uploads) = create_test_server().await;
    let (owner_a, _) = setup_org(&server).await;
    let leader = create_member(&server, &owner_a, "lead@example.com", Role::Employee).await;
    let team = create_test_team(&server, &owner_a, "Eng", Some(leader)).await;
    assert_eq!(fetch_user(&server, &leader).await.role, Role::Manager);

    let owner_b = create_test_user(&server, "owner-b@example.com").await;
    let org_b = create_test_org(&server, &owner_b, "Globex").await;
    let invite = open_invite(&server, &owner_b, 1).await;

    let moved = invites::join_by_invite(&server, &leader, &invite.token)
        .await
        .unwrap();
    assert_eq!(moved.organization, Affiliation::Affiliated(org_b));
    assert_eq!(moved.team, Affiliation::Unaffiliated);
    assert_eq!(moved.role, Role::User);

    let team = server.store.get_team(&team.id).await.unwrap();
    assert_eq!(team.leader_id, None);
}

#[tokio::test]
async fn test_preview_list_and_revoke() {
    let (server, _uploads) = create_test_server().await;
    let (owner, org) = setup_org(&server).await;
    let invite = open_invite(&server, &owner, 3).await;

    let preview = invites::get_invite(&server, &invite.token).await.unwrap();
    assert_eq!(preview.organization_id, org);
    assert_eq!(preview.organization_name, "Acme");
    assert_eq!(preview.state, InviteState::Active);
    assert_eq!(preview.remaining_uses, 3);

    let listed = invites::list_invites(&server, &owner).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].state, InviteState::Active);

    // Plain members may not manage invites.
    let member = create_member(&server, &owner, "m@example.com", Role::Employee).await;
    assert!(matches!(
        invites::list_invites(&server, &member).await,
        Err(ServiceError::Forbidden(_))
    ));

    // Another organization's admin sees it as missing.
    let other = create_test_user(&server, "other@example.com").await;
    create_test_org(&server, &other, "Globex").await;
    assert!(matches!(
        invites::delete_invite(&server, &other, &invite.token).await,
        Err(ServiceError::NotFound(_))
    ));

    invites::delete_invite(&server, &owner, &invite.token)
        .await
        .unwrap();
    assert!(matches!(
        invites::get_invite(&server, &invite.token).await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_create_invite_validation() {
    let (server, _uploads) = create_test_server().await;
    let (owner, _) = setup_org(&server).await;

    for (hours, uses) in [(0, 1), (1, 0)] {
        let err = invites::create_invite(
            &server,
            &owner,
            CreateInviteRequest {
                expires_in_hours: hours,
                max_uses: uses,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    let loner = create_test_user(&server, "loner@example.com").await;
    assert!(matches!(
        invites::create_invite(
            &server,
            &loner,
            CreateInviteRequest {
                expires_in_hours: 1,
                max_uses: 1,
            },
        )
        .await,
        Err(ServiceError::Forbidden(_))
    ));
}
