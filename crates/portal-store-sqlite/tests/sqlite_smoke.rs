use chrono::{Duration, Utc};
use portal_storage::{
    Affiliation, ContentQuery, CreateDocumentParams, CreateInviteParams, CreateNewsParams,
    CreateOrganizationParams, CreateTaskParams, CreateTeamParams, CreateUserParams,
    DocumentChanges, NewsChanges, Organization, ProfileChanges, Role, Store, StoreError,
    TaskChanges, TaskPriority, TaskStatus, Team, TeamChanges, TeamId, TeamVisibility, User,
};
use portal_store_sqlite::SqliteStore;

async fn user(s: &SqliteStore, email: &str) -> User {
    s.create_user(&CreateUserParams {
        email: email.to_string(),
        password_hash: "hash".to_string(),
        full_name: email.split('@').next().unwrap_or(email).to_string(),
    })
    .await
    .unwrap()
}

async fn organization(s: &SqliteStore, owner: &User, name: &str) -> Organization {
    let mut tx = s.begin().await.unwrap();
    let org = tx
        .insert_organization(&CreateOrganizationParams {
            name: name.to_string(),
            description: String::new(),
            owner_id: owner.id,
        })
        .await
        .unwrap();
    tx.set_user_membership(
        &owner.id,
        Affiliation::Affiliated(org.id),
        Affiliation::Unaffiliated,
    )
    .await
    .unwrap();
    tx.set_user_role(&owner.id, Role::SuperAdmin).await.unwrap();
    tx.commit().await.unwrap();
    org
}

async fn join(s: &SqliteStore, user: &User, org: &Organization, team: Option<TeamId>) {
    let mut tx = s.begin().await.unwrap();
    tx.set_user_membership(&user.id, Affiliation::Affiliated(org.id), team.into())
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

async fn team(s: &SqliteStore, org: &Organization, name: &str) -> Result<Team, StoreError> {
    let mut tx = s.begin().await.unwrap();
    let team = tx
        .insert_team(&CreateTeamParams {
            organization_id: org.id,
            name: name.to_string(),
            description: String::new(),
            leader_id: None,
        })
        .await?;
    tx.commit().await.unwrap();
    Ok(team)
}

#[tokio::test]
async fn users_are_unique_by_lowercased_email() {
    let s = SqliteStore::open_in_memory().await.unwrap();

    let alice = user(&s, "Alice@Example.com").await;
    assert_eq!(alice.email, "alice@example.com");
    assert_eq!(alice.role, Role::User);
    assert_eq!(alice.organization, Affiliation::Unaffiliated);

    let err = s
        .create_user(&CreateUserParams {
            email: "ALICE@example.com".to_string(),
            password_hash: "x".to_string(),
            full_name: "Other".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists));

    let found = s.get_user_by_email("alice@EXAMPLE.com").await.unwrap();
    assert_eq!(found.id, alice.id);

    let updated = s
        .update_user_profile(
            &alice.id,
            &ProfileChanges {
                bio: Some("hello".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.bio, "hello");
    assert_eq!(updated.full_name, alice.full_name);

    let previous = s
        .set_user_avatar(&alice.id, Some("a.png".to_string()))
        .await
        .unwrap();
    assert_eq!(previous, None);
    let previous = s.set_user_avatar(&alice.id, None).await.unwrap();
    assert_eq!(previous.as_deref(), Some("a.png"));
}

#[tokio::test]
async fn organization_creation_binds_owner() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let owner = user(&s, "owner@example.com").await;
    let org = organization(&s, &owner, "Acme").await;

    let owner = s.get_user(&owner.id).await.unwrap();
    assert_eq!(owner.role, Role::SuperAdmin);
    assert!(owner.organization.is(&org.id));

    let other = user(&s, "other@example.com").await;
    let mut tx = s.begin().await.unwrap();
    let err = tx
        .insert_organization(&CreateOrganizationParams {
            name: "Acme".to_string(),
            description: String::new(),
            owner_id: other.id,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists));
}

#[tokio::test]
async fn dropped_transaction_rolls_back() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let owner = user(&s, "owner@example.com").await;

    let org_id = {
        let mut tx = s.begin().await.unwrap();
        let org = tx
            .insert_organization(&CreateOrganizationParams {
                name: "Ghost".to_string(),
                description: String::new(),
                owner_id: owner.id,
            })
            .await
            .unwrap();
        tx.set_user_role(&owner.id, Role::SuperAdmin).await.unwrap();
        org.id
    };

    assert!(matches!(
        s.get_organization(&org_id).await,
        Err(StoreError::NotFound)
    ));
    assert_eq!(s.get_user(&owner.id).await.unwrap().role, Role::User);
}

#[tokio::test]
async fn team_names_are_unique_per_organization_ignoring_case() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let a_owner = user(&s, "a@example.com").await;
    let b_owner = user(&s, "b@example.com").await;
    let org_a = organization(&s, &a_owner, "A").await;
    let org_b = organization(&s, &b_owner, "B").await;

    let sales = team(&s, &org_a, "Sales").await.unwrap();
    assert!(matches!(
        team(&s, &org_a, "sales").await,
        Err(StoreError::AlreadyExists)
    ));
    team(&s, &org_b, "Sales").await.unwrap();

    let support = team(&s, &org_a, "Support").await.unwrap();
    let err = s
        .update_team(
            &support.id,
            &TeamChanges {
                name: Some("SALES".to_string()),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists));

    let teams = s.list_teams(&org_a.id).await.unwrap();
    assert_eq!(teams.len(), 2);
    assert_eq!(teams[0].id, sales.id);
}

#[tokio::test]
async fn leadership_bookkeeping() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let owner = user(&s, "owner@example.com").await;
    let org = organization(&s, &owner, "Acme").await;
    let eng = team(&s, &org, "Eng").await.unwrap();
    let ops = team(&s, &org, "Ops").await.unwrap();

    let lead = user(&s, "lead@example.com").await;
    let free = user(&s, "free@example.com").await;
    join(&s, &lead, &org, Some(eng.id)).await;
    join(&s, &free, &org, None).await;

    let mut tx = s.begin().await.unwrap();
    tx.set_team_leader(&eng.id, Some(lead.id)).await.unwrap();
    tx.set_team_leader(&ops.id, Some(lead.id)).await.unwrap();
    assert_eq!(tx.count_teams_led_by(&lead.id).await.unwrap(), 2);
    assert_eq!(tx.count_teams_led_by(&free.id).await.unwrap(), 0);
    tx.commit().await.unwrap();

    let candidates = s.list_potential_leaders(&org.id, None).await.unwrap();
    assert!(candidates.iter().all(|u| u.id != lead.id));
    let candidates = s
        .list_potential_leaders(&org.id, Some(eng.id))
        .await
        .unwrap();
    assert!(candidates.iter().any(|u| u.id == lead.id));

    let free_users = s.list_free_users(&org.id).await.unwrap();
    let free_ids: Vec<_> = free_users.iter().map(|u| u.id).collect();
    assert!(free_ids.contains(&free.id));
    assert!(free_ids.contains(&owner.id));
    assert!(!free_ids.contains(&lead.id));

    let mut tx = s.begin().await.unwrap();
    let released = tx.release_leadership(&lead.id).await.unwrap();
    assert_eq!(released.len(), 2);
    assert_eq!(tx.clear_team_members(&eng.id).await.unwrap(), 1);
    tx.delete_team(&eng.id).await.unwrap();
    tx.commit().await.unwrap();

    assert!(s.get_user(&lead.id).await.unwrap().team == Affiliation::Unaffiliated);
    assert_eq!(s.get_team(&ops.id).await.unwrap().leader_id, None);
    assert!(matches!(s.get_team(&eng.id).await, Err(StoreError::NotFound)));
}

#[tokio::test]
async fn invite_uses_never_exceed_max() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let owner = user(&s, "owner@example.com").await;
    let org = organization(&s, &owner, "Acme").await;

    let invite = s
        .create_invite(&CreateInviteParams {
            token: "tok-1".to_string(),
            organization_id: org.id,
            created_by: owner.id,
            expires_at: Utc::now() + Duration::hours(1),
            max_uses: 1,
        })
        .await
        .unwrap();

    let mut tx = s.begin().await.unwrap();
    let locked = tx.lock_invite("tok-1").await.unwrap();
    assert_eq!(locked.id, invite.id);
    tx.increment_invite_uses(&invite.id).await.unwrap();
    assert!(matches!(
        tx.increment_invite_uses(&invite.id).await,
        Err(StoreError::Conflict)
    ));
    tx.commit().await.unwrap();

    let stored = s.get_invite_by_token("tok-1").await.unwrap();
    assert_eq!(stored.uses, 1);

    let listed = s.list_invites(&org.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    s.delete_invite(&invite.id).await.unwrap();
    assert!(matches!(
        s.get_invite_by_token("tok-1").await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn news_listing_applies_visibility_and_filters() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let owner = user(&s, "owner@example.com").await;
    let org = organization(&s, &owner, "Acme").await;
    let eng = team(&s, &org, "Eng").await.unwrap();
    let ops = team(&s, &org, "Ops").await.unwrap();
    let rust = s.create_tag("Rust").await.unwrap();
    assert!(matches!(
        s.create_tag("rust").await,
        Err(StoreError::AlreadyExists)
    ));

    let post = |title: &str, team_id: Option<TeamId>, tags| CreateNewsParams {
        title: title.to_string(),
        content: "body".to_string(),
        image: None,
        tag_ids: tags,
        organization_id: org.id,
        team_id,
        author_id: owner.id,
    };
    let general = s.create_news(&post("General", None, vec![])).await.unwrap();
    let eng_post = s
        .create_news(&post("Eng update", Some(eng.id), vec![rust.id]))
        .await
        .unwrap();
    let ops_post = s
        .create_news(&post("Ops update", Some(ops.id), vec![]))
        .await
        .unwrap();
    assert_eq!(eng_post.tags.len(), 1);

    let all = s
        .list_news(&ContentQuery::new(org.id, TeamVisibility::Everything))
        .await
        .unwrap();
    let ids: Vec<_> = all.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![ops_post.id, eng_post.id, general.id]);

    let member = s
        .list_news(&ContentQuery::new(
            org.id,
            TeamVisibility::OrganizationWideAnd(Some(eng.id)),
        ))
        .await
        .unwrap();
    let ids: Vec<_> = member.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![eng_post.id, general.id]);

    let teamless = s
        .list_news(&ContentQuery::new(
            org.id,
            TeamVisibility::OrganizationWideAnd(None),
        ))
        .await
        .unwrap();
    assert_eq!(teamless.len(), 1);

    let mut by_tag = ContentQuery::new(org.id, TeamVisibility::Everything);
    by_tag.tag_ids = vec![rust.id];
    assert_eq!(s.list_news(&by_tag).await.unwrap().len(), 1);

    let mut by_search = ContentQuery::new(org.id, TeamVisibility::Everything);
    by_search.search = Some("RUST".to_string());
    let found = s.list_news(&by_search).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, eng_post.id);

    by_search.search = Some("update".to_string());
    by_search.team_ids = vec![ops.id];
    let found = s.list_news(&by_search).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, ops_post.id);

    let updated = s
        .update_news(
            &general.id,
            &NewsChanges {
                title: Some("Renamed".to_string()),
                tag_ids: Some(vec![rust.id]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.tags, vec![rust.clone()]);

    s.delete_news(&general.id).await.unwrap();
    assert!(matches!(
        s.get_news(&general.id).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn documents_share_the_content_filters() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let owner = user(&s, "owner@example.com").await;
    let org = organization(&s, &owner, "Acme").await;
    let handbook = s.create_tag("Handbook").await.unwrap();

    let doc = s
        .create_document(&CreateDocumentParams {
            title: "Onboarding".to_string(),
            description: "First week checklist".to_string(),
            file: "f.pdf".to_string(),
            original_name: "onboarding.pdf".to_string(),
            tag_ids: vec![handbook.id],
            organization_id: org.id,
            team_id: None,
            author_id: owner.id,
        })
        .await
        .unwrap();

    let mut q = ContentQuery::new(org.id, TeamVisibility::OrganizationWideAnd(None));
    q.search = Some("checklist".to_string());
    q.author_ids = vec![owner.id];
    assert_eq!(s.list_documents(&q).await.unwrap().len(), 1);

    let updated = s
        .update_document(
            &doc.id,
            &DocumentChanges {
                tag_ids: Some(vec![]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.tags.is_empty());
    assert_eq!(updated.title, "Onboarding");
}

#[tokio::test]
async fn tasks_update_and_clear_assignee() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let owner = user(&s, "owner@example.com").await;
    let org = organization(&s, &owner, "Acme").await;
    let eng = team(&s, &org, "Eng").await.unwrap();

    let task = s
        .create_task(&CreateTaskParams {
            title: "Ship it".to_string(),
            description: String::new(),
            priority: TaskPriority::High,
            due_date: None,
            assignee_id: Some(owner.id),
            team_id: eng.id,
            organization_id: org.id,
            creator_id: owner.id,
        })
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Todo);

    let updated = s
        .update_task(
            &task.id,
            &TaskChanges {
                status: Some(TaskStatus::Done),
                assignee_id: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, TaskStatus::Done);
    assert_eq!(updated.assignee_id, None);
    assert_eq!(updated.priority, TaskPriority::High);

    assert_eq!(s.list_tasks(&eng.id).await.unwrap().len(), 1);
    s.delete_task(&task.id).await.unwrap();
    assert!(s.list_tasks(&eng.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn names_and_search_fold_non_ascii_case() {
    let s = SqliteStore::open_in_memory().await.unwrap();
    let owner = user(&s, "owner@example.com").await;
    let org = organization(&s, &owner, "Acme").await;

    team(&s, &org, "Продажи").await.unwrap();
    assert!(matches!(
        team(&s, &org, "продажи").await,
        Err(StoreError::AlreadyExists)
    ));
    let support = team(&s, &org, "Поддержка").await.unwrap();
    let err = s
        .update_team(
            &support.id,
            &TeamChanges {
                name: Some("ПРОДАЖИ".to_string()),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists));

    let events = s.create_tag("События").await.unwrap();
    assert!(matches!(
        s.create_tag("события").await,
        Err(StoreError::AlreadyExists)
    ));

    let post = s
        .create_news(&CreateNewsParams {
            title: "Новости компании".to_string(),
            content: "Итоги квартала".to_string(),
            image: None,
            tag_ids: vec![events.id],
            organization_id: org.id,
            team_id: None,
            author_id: owner.id,
        })
        .await
        .unwrap();

    let mut q = ContentQuery::new(org.id, TeamVisibility::Everything);
    for term in ["Новости", "НОВОСТИ", "итоги КВАРТАЛА", "событ"] {
        q.search = Some(term.to_string());
        let found = s.list_news(&q).await.unwrap();
        assert_eq!(found.len(), 1, "search {term:?}");
        assert_eq!(found[0].id, post.id);
    }

    s.update_news(
        &post.id,
        &NewsChanges {
            title: Some("Объявление".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    q.search = Some("объявление".to_string());
    assert_eq!(s.list_news(&q).await.unwrap().len(), 1);
    q.search = Some("новости".to_string());
    assert!(s.list_news(&q).await.unwrap().is_empty());
}
