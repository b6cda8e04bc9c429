//! User profile, role management and membership exit tests.

use super::common::*;
use crate::error::ServiceError;
use crate::handlers::users::{self, UserUpdate};
use portal_storage::*;

#[tokio::test]
async fn test_profile_includes_organization_team_and_leader() {
    let (server, _uploads) = create_test_server().await;
    let (owner, org) = setup_org(&server).await;
    let leader = create_member(&server, &owner, "lead@example.com", Role::User).await;
    let member = create_member(&server, &owner, "member@example.com", Role::User).await;
    let team = create_test_team(&server, &owner, "Eng", Some(leader)).await;
    crate::handlers::teams::add_team_member(&server, &owner, &team.id, &member)
        .await
        .unwrap();

    let profile = users::get_profile(&server, &member).await.unwrap();
    assert_eq!(profile.organization.map(|o| o.id), Some(org));
    assert_eq!(profile.team.map(|t| t.id), Some(team.id));
    assert_eq!(profile.team_leader.map(|l| l.id), Some(leader));

    let loner = create_test_user(&server, "loner@example.com").await;
    let profile = users::get_profile(&server, &loner).await.unwrap();
    assert!(profile.organization.is_none());
    assert!(profile.team.is_none());

    // Outside the organization, other users are out of reach.
    assert!(matches!(
        users::get_user(&server, &loner, &member).await,
        Err(ServiceError::Forbidden(_))
    ));
    assert_eq!(users::list_members(&server, &member).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_profile_edits() {
    let (server, _uploads) = create_test_server().await;
    let (owner, _) = setup_org(&server).await;
    let admin = create_member(&server, &owner, "admin@example.com", Role::Admin).await;
    let alice = create_member(&server, &owner, "alice@example.com", Role::Employee).await;
    let bob = create_member(&server, &owner, "bob@example.com", Role::Employee).await;

    let updated = users::update_user(
        &server,
        &alice,
        &alice,
        UserUpdate {
            bio: Some("Backend".to_string()),
            phone: Some("+1 555 0100".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(updated.bio, "Backend");

    let err = users::update_user(
        &server,
        &bob,
        &alice,
        UserUpdate {
            full_name: Some("Mallory".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let updated = users::update_user(
        &server,
        &admin,
        &alice,
        UserUpdate {
            full_name: Some("Alice A.".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(updated.full_name, "Alice A.");

    let err = users::update_user(
        &server,
        &alice,
        &alice,
        UserUpdate {
            full_name: Some("   ".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn test_assignment_through_user_management() {
    let (server, _uploads) = create_test_server().await;
    let (owner, _) = setup_org(&server).await;
    let admin = create_member(&server, &owner, "admin@example.com", Role::Admin).await;
    let leader = create_member(&server, &owner, "lead@example.com", Role::User).await;
    let member = create_member(&server, &owner, "member@example.com", Role::User).await;
    let eng = create_test_team(&server, &owner, "Eng", Some(leader)).await;
    let ops = create_test_team(&server, &owner, "Ops", None).await;

    let moved = users::update_user(
        &server,
        &admin,
        &member,
        UserUpdate {
            full_name: Some("Mia Member".to_string()),
            team: Some(Some(eng.id)),
            role: Some(Role::Employee),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(moved.team, Affiliation::Affiliated(eng.id));
    assert_eq!(moved.role, Role::Employee);
    assert_eq!(moved.full_name, "Mia Member");
    assert_eq!(fetch_user(&server, &member).await.full_name, "Mia Member");

    // Leaders are moved or demoted only after being replaced.
    let err = users::update_user(
        &server,
        &admin,
        &leader,
        UserUpdate {
            team: Some(Some(ops.id)),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let err = users::update_user(
        &server,
        &admin,
        &leader,
        UserUpdate {
            role: Some(Role::Employee),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    // Admins cannot hand out Admin.
    let err = users::update_user(
        &server,
        &admin,
        &member,
        UserUpdate {
            role: Some(Role::Admin),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    // Explicit null takes the member off their team.
    let freed = users::update_user(
        &server,
        &admin,
        &member,
        UserUpdate {
            team: Some(None),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(freed.team, Affiliation::Unaffiliated);
}

#[tokio::test]
async fn test_role_management_is_owner_only() {
    let (server, _uploads) = create_test_server().await;
    let (owner, _) = setup_org(&server).await;
    let admin = create_member(&server, &owner, "admin@example.com", Role::Admin).await;
    let member = create_member(&server, &owner, "member@example.com", Role::User).await;

    let err = users::update_user_role(&server, &admin, &member, Role::Employee)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let err = users::update_user_role(&server, &owner, &member, Role::SuperAdmin)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let err = users::update_user_role(&server, &owner, &owner, Role::Admin)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let promoted = users::update_user_role(&server, &owner, &member, Role::Manager)
        .await
        .unwrap();
    assert_eq!(promoted.role, Role::Manager);
    assert_eq!(fetch_user(&server, &member).await.role, Role::Manager);
}

#[tokio::test]
async fn test_leave_releases_leadership() {
    let (server, _uploads) = create_test_server().await;
    let (owner, _) = setup_org(&server).await;
    let leader = create_member(&server, &owner, "lead@example.com", Role::User).await;
    let team = create_test_team(&server, &owner, "Eng", Some(leader)).await;

    let left = users::leave_organization(&server, &leader).await.unwrap();
    assert_eq!(left.organization, Affiliation::Unaffiliated);
    assert_eq!(left.team, Affiliation::Unaffiliated);
    assert_eq!(left.role, Role::User);
    assert_eq!(
        server.store.get_team(&team.id).await.unwrap().leader_id,
        None
    );

    let err = users::leave_organization(&server, &owner).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let err = users::leave_organization(&server, &leader).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
}

#[tokio::test]
async fn test_kick_rules() {
    let (server, _uploads) = create_test_server().await;
    let (owner, _) = setup_org(&server).await;
    let admin = create_member(&server, &owner, "admin@example.com", Role::Admin).await;
    let member = create_member(&server, &owner, "member@example.com", Role::Employee).await;

    assert!(matches!(
        users::kick_from_organization(&server, &member, &admin).await,
        Err(ServiceError::Forbidden(_))
    ));
    assert!(matches!(
        users::kick_from_organization(&server, &admin, &owner).await,
        Err(ServiceError::Forbidden(_))
    ));
    assert!(matches!(
        users::kick_from_organization(&server, &admin, &admin).await,
        Err(ServiceError::InvalidState(_))
    ));

    let kicked = users::kick_from_organization(&server, &admin, &member)
        .await
        .unwrap();
    assert_eq!(kicked.organization, Affiliation::Unaffiliated);
    assert_eq!(kicked.role, Role::User);
}

#[tokio::test]
async fn test_delete_account() {
    let (server, uploads) = create_test_server().await;
    let (owner, _) = setup_org(&server).await;
    let member = create_member(&server, &owner, "member@example.com", Role::User).await;
    let with_avatar = users::upload_avatar(&server, &member, &member, PNG)
        .await
        .unwrap();
    let avatar = with_avatar.avatar.unwrap();
    assert!(uploads.path().join(&avatar).exists());

    users::delete_account(&server, &member).await.unwrap();
    assert!(matches!(
        server.store.get_user(&member).await,
        Err(StoreError::NotFound)
    ));
    assert!(!uploads.path().join(&avatar).exists());

    let err = users::delete_account(&server, &owner).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
}

#[tokio::test]
async fn test_avatar_replacement_discards_old_blob() {
    let (server, uploads) = create_test_server().await;
    let user = create_test_user(&server, "ann@example.com").await;

    let first = users::upload_avatar(&server, &user, &user, PNG)
        .await
        .unwrap()
        .avatar
        .unwrap();
    assert!(first.ends_with(".png"));
    let second = users::upload_avatar(&server, &user, &user, PNG)
        .await
        .unwrap()
        .avatar
        .unwrap();
    assert_ne!(first, second);
    assert!(!uploads.path().join(&first).exists());
    assert!(uploads.path().join(&second).exists());

    let err = users::upload_avatar(&server, &user, &user, b"plain text")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let cleared = users::remove_avatar(&server, &user, &user).await.unwrap();
    assert_eq!(cleared.avatar, None);
    assert!(!uploads.path().join(&second).exists());
}
