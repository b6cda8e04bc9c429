//! Invite handlers: create, preview, list, delete, join

use chrono::{DateTime, Duration, Utc};
use portal_authz::{authorize, Action, ActorContext};
use portal_storage::{
    Affiliation, CreateInviteParams, Invite, InviteState, OrganizationId, Role, StoreError,
    StoreTx, User, UserId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ServiceError, StoreResultExt};
use crate::leadership;
use crate::server::{finish, PortalServer};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInviteRequest {
    pub expires_in_hours: i64,
    pub max_uses: i64,
}

/// An invite as listed to the organization's admins.
#[derive(Debug, Clone, Serialize)]
pub struct InviteView {
    #[serde(flatten)]
    pub invite: Invite,
    pub state: InviteState,
}

impl InviteView {
    fn at(invite: Invite, now: DateTime<Utc>) -> Self {
        let state = invite.state(now);
        Self { invite, state }
    }
}

/// Public preview shown before redeeming a token.
#[derive(Debug, Clone, Serialize)]
pub struct InvitePreview {
    pub organization_id: OrganizationId,
    pub organization_name: String,
    pub state: InviteState,
    pub expires_at: DateTime<Utc>,
    pub remaining_uses: i64,
}

pub async fn create_invite(
    server: &PortalServer,
    actor_id: &UserId,
    req: CreateInviteRequest,
) -> Result<Invite, ServiceError> {
    if req.expires_in_hours < 1 {
        return Err(ServiceError::validation("expiry must be at least one hour"));
    }
    if req.max_uses < 1 {
        return Err(ServiceError::validation("max uses must be at least 1"));
    }

    let (_, ctx) = server.actor(actor_id).await?;
    let org_id = ctx.organization()?;
    authorize(&ctx, &Action::ManageInvites(&org_id))?;

    let invite = server
        .store
        .create_invite(&CreateInviteParams {
            token: Uuid::new_v4().to_string(),
            organization_id: org_id,
            created_by: *actor_id,
            expires_at: Utc::now() + Duration::hours(req.expires_in_hours),
            max_uses: req.max_uses,
        })
        .await?;

    tracing::info!(
        invite_id = %invite.id,
        organization_id = %org_id,
        max_uses = invite.max_uses,
        "invite created"
    );
    Ok(invite)
}

/// Anyone holding the token may preview it.
pub async fn get_invite(
    server: &PortalServer,
    token: &str,
) -> Result<InvitePreview, ServiceError> {
    let invite = server
        .store
        .get_invite_by_token(token.trim())
        .await
        .entity("invite")?;
    let organization = server
        .store
        .get_organization(&invite.organization_id)
        .await
        .entity("organization")?;

    Ok(InvitePreview {
        organization_id: organization.id,
        organization_name: organization.name,
        state: invite.state(Utc::now()),
        expires_at: invite.expires_at,
        remaining_uses: invite.remaining_uses(),
    })
}

pub async fn list_invites(
    server: &PortalServer,
    actor_id: &UserId,
) -> Result<Vec<InviteView>, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let org_id = ctx.organization()?;
    authorize(&ctx, &Action::ManageInvites(&org_id))?;

    let now = Utc::now();
    let invites = server.store.list_invites(&org_id).await?;
    Ok(invites
        .into_iter()
        .map(|invite| InviteView::at(invite, now))
        .collect())
}

/// Revoke an invite of the actor's organization. Invites of other
/// organizations are reported as missing.
pub async fn delete_invite(
    server: &PortalServer,
    actor_id: &UserId,
    token: &str,
) -> Result<(), ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let invite = server
        .store
        .get_invite_by_token(token.trim())
        .await
        .entity("invite")?;
    if !ctx.organization.is(&invite.organization_id) {
        return Err(ServiceError::not_found("invite"));
    }
    authorize(&ctx, &Action::ManageInvites(&invite.organization_id))?;

    server
        .store
        .delete_invite(&invite.id)
        .await
        .entity("invite")?;
    tracing::info!(invite_id = %invite.id, "invite revoked");
    Ok(())
}

/// Consume one use of the invite and move the actor into its organization.
///
/// The invite row is locked for the whole transaction, so concurrent
/// redemptions of the last use see each other's increment: exactly one
/// wins and the rest fail with "invite exhausted".
async fn redeem(
    tx: &mut dyn StoreTx,
    actor_id: &UserId,
    token: &str,
    now: DateTime<Utc>,
) -> Result<User, ServiceError> {
    let invite = tx.lock_invite(token).await.entity("invite")?;
    match invite.state(now) {
        InviteState::Expired => return Err(ServiceError::invalid("invite expired")),
        InviteState::Exhausted => return Err(ServiceError::invalid("invite exhausted")),
        InviteState::Active => {}
    }

    leadership::release_all(tx, actor_id).await?;
    let actor = tx.lock_user(actor_id).await.entity("user")?;
    authorize(&ActorContext::from(&actor), &Action::JoinOrganization)?;

    tx.set_user_membership(
        actor_id,
        Affiliation::Affiliated(invite.organization_id),
        Affiliation::Unaffiliated,
    )
    .await?;
    tx.set_user_role(actor_id, Role::User).await?;
    tx.increment_invite_uses(&invite.id)
        .await
        .map_err(|e| match e {
            StoreError::Conflict => ServiceError::invalid("invite exhausted"),
            other => other.into(),
        })?;

    Ok(User {
        organization: Affiliation::Affiliated(invite.organization_id),
        team: Affiliation::Unaffiliated,
        role: Role::User,
        ..actor
    })
}

pub async fn join_by_invite(
    server: &PortalServer,
    actor_id: &UserId,
    token: &str,
) -> Result<User, ServiceError> {
    let mut tx = server.store.begin().await?;
    let result = redeem(tx.as_mut(), actor_id, token.trim(), Utc::now()).await;
    let user = finish(tx, result).await?;

    tracing::info!(
        user_id = %actor_id,
        organization_id = ?user.organization.get(),
        "joined organization by invite"
    );
    Ok(user)
}
