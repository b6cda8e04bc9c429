//! User handlers: profiles, role management, avatars, leave, kick, delete

use portal_authz::{authorize, Action, ActorContext};
use portal_storage::{
    Affiliation, ProfileChanges, Role, StoreError, StoreTx, TeamId, User, UserId,
};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, StoreResultExt};
use crate::handlers::{present, required_opt, OrganizationSummary, TeamSummary, UserSummary};
use crate::leadership;
use crate::server::{finish, PortalServer};

/// A user together with their organization, team and team leader.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub user: User,
    pub organization: Option<OrganizationSummary>,
    pub team: Option<TeamSummary>,
    pub team_leader: Option<UserSummary>,
}

/// Changes through user management. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
    /// `Some(None)` takes the user off their team.
    #[serde(deserialize_with = "present")]
    pub team: Option<Option<TeamId>>,
    pub role: Option<Role>,
}

impl UserUpdate {
    fn profile(&self) -> Result<ProfileChanges, ServiceError> {
        Ok(ProfileChanges {
            full_name: required_opt("full name", self.full_name.as_deref())?,
            bio: self.bio.clone(),
            phone: self.phone.clone(),
        })
    }

    fn touches_membership(&self) -> bool {
        self.team.is_some() || self.role.is_some()
    }
}

fn missing_to_none<T>(result: Result<T, StoreError>) -> Result<Option<T>, ServiceError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn profile_of(server: &PortalServer, user: User) -> Result<UserProfile, ServiceError> {
    let organization = match user.organization.get() {
        Some(org_id) => missing_to_none(server.store.get_organization(&org_id).await)?,
        None => None,
    };
    let team = match user.team.get() {
        Some(team_id) => missing_to_none(server.store.get_team(&team_id).await)?,
        None => None,
    };
    let team_leader = match team.as_ref().and_then(|t| t.leader_id) {
        Some(leader_id) => missing_to_none(server.store.get_user(&leader_id).await)?,
        None => None,
    };

    Ok(UserProfile {
        organization: organization.as_ref().map(OrganizationSummary::from),
        team: team.as_ref().map(TeamSummary::from),
        team_leader: team_leader.as_ref().map(UserSummary::from),
        user,
    })
}

pub async fn get_profile(
    server: &PortalServer,
    actor_id: &UserId,
) -> Result<UserProfile, ServiceError> {
    let (actor, _) = server.actor(actor_id).await?;
    profile_of(server, actor).await
}

pub async fn get_user(
    server: &PortalServer,
    actor_id: &UserId,
    target_id: &UserId,
) -> Result<UserProfile, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let target = server.store.get_user(target_id).await.entity("user")?;
    authorize(&ctx, &Action::ViewUser(&target))?;
    profile_of(server, target).await
}

/// Everyone in the actor's organization.
pub async fn list_members(
    server: &PortalServer,
    actor_id: &UserId,
) -> Result<Vec<UserSummary>, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let org_id = ctx.organization()?;
    authorize(&ctx, &Action::ListMembers(&org_id))?;
    let users = server.store.list_organization_users(&org_id).await?;
    Ok(users.iter().map(UserSummary::from).collect())
}

/// Team, role and profile changes in one transaction.
async fn apply_update(
    tx: &mut dyn StoreTx,
    ctx: &ActorContext,
    target_id: &UserId,
    update: &UserUpdate,
    profile: &ProfileChanges,
) -> Result<User, ServiceError> {
    // Teams before users.
    let new_team = match update.team {
        Some(Some(team_id)) => Some(tx.lock_team(&team_id).await.entity("team")?),
        _ => None,
    };
    let target = tx.lock_user(target_id).await.entity("user")?;

    if !profile.is_empty() {
        authorize(ctx, &Action::UpdateProfile(&target))?;
    }

    if let Some(team_id) = update.team {
        authorize(ctx, &Action::AssignTeam(&target))?;
        if let Some(team) = &new_team {
            if !target.organization.is(&team.organization_id) {
                return Err(ServiceError::invalid(
                    "the team belongs to another organization",
                ));
            }
        }
        if target.team.get() != team_id {
            if leadership::is_leader(tx, target_id).await? {
                return Err(ServiceError::invalid(
                    "replace the team leader before moving them",
                ));
            }
            tx.set_user_team(target_id, team_id.into()).await?;
        }
    }

    if let Some(role) = update.role {
        authorize(ctx, &Action::ChangeRole { target: &target, role })?;
        if !role.at_least(Role::Manager) && leadership::is_leader(tx, target_id).await? {
            return Err(ServiceError::invalid(
                "a team leader must stay at least Manager",
            ));
        }
        tx.set_user_role(target_id, role).await?;
    }

    if profile.is_empty() {
        tx.lock_user(target_id).await.entity("user")
    } else {
        tx.update_user_profile(target_id, profile).await.entity("user")
    }
}

/// Profile fields for self or an Admin; team and role need Admin and follow
/// the protected-role and leadership rules.
pub async fn update_user(
    server: &PortalServer,
    actor_id: &UserId,
    target_id: &UserId,
    update: UserUpdate,
) -> Result<User, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let profile = update.profile()?;

    if update.touches_membership() {
        let mut tx = server.store.begin().await?;
        let result = apply_update(tx.as_mut(), &ctx, target_id, &update, &profile).await;
        let user = finish(tx, result).await?;
        tracing::info!(user_id = %target_id, actor_id = %actor_id, "user membership updated");
        return Ok(user);
    }

    let target = server.store.get_user(target_id).await.entity("user")?;
    authorize(&ctx, &Action::UpdateProfile(&target))?;
    if profile.is_empty() {
        return Ok(target);
    }
    server
        .store
        .update_user_profile(target_id, &profile)
        .await
        .entity("user")
}

/// Dedicated role management: the organization owner only.
pub async fn update_user_role(
    server: &PortalServer,
    actor_id: &UserId,
    target_id: &UserId,
    role: Role,
) -> Result<User, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;

    let mut tx = server.store.begin().await?;
    let result = async {
        let mut target = tx.lock_user(target_id).await.entity("user")?;
        authorize(&ctx, &Action::ManageRoles { target: &target, role })?;
        let leads = leadership::is_leader(tx.as_mut(), target_id).await?;
        if !role.at_least(Role::Manager) && leads {
            return Err(ServiceError::invalid(
                "a team leader must stay at least Manager",
            ));
        }
        tx.set_user_role(target_id, role).await?;
        target.role = role;
        Ok(target)
    }
    .await;
    let user = finish(tx, result).await?;

    tracing::info!(user_id = %target_id, role = %role, "role changed");
    Ok(user)
}

/// Replace a user's avatar (self or Admin of the same organization).
pub async fn upload_avatar(
    server: &PortalServer,
    actor_id: &UserId,
    target_id: &UserId,
    bytes: &[u8],
) -> Result<User, ServiceError> {
    set_avatar(server, actor_id, target_id, Some(bytes)).await
}

pub async fn remove_avatar(
    server: &PortalServer,
    actor_id: &UserId,
    target_id: &UserId,
) -> Result<User, ServiceError> {
    set_avatar(server, actor_id, target_id, None).await
}

async fn set_avatar(
    server: &PortalServer,
    actor_id: &UserId,
    target_id: &UserId,
    bytes: Option<&[u8]>,
) -> Result<User, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let target = server.store.get_user(target_id).await.entity("user")?;
    authorize(&ctx, &Action::UpdateProfile(&target))?;

    server
        .replace_avatar(bytes, "user", |name| {
            server.store.set_user_avatar(target_id, name)
        })
        .await?;
    server.store.get_user(target_id).await.entity("user")
}

/// Clear organization, team, leadership and role in one go.
async fn detach(tx: &mut dyn StoreTx, user_id: &UserId) -> Result<User, ServiceError> {
    tx.set_user_membership(user_id, Affiliation::Unaffiliated, Affiliation::Unaffiliated)
        .await?;
    tx.set_user_role(user_id, Role::User).await?;
    tx.lock_user(user_id).await.entity("user")
}

pub async fn leave_organization(
    server: &PortalServer,
    actor_id: &UserId,
) -> Result<User, ServiceError> {
    let mut tx = server.store.begin().await?;
    let result = async {
        // Team rows first, then the user.
        leadership::release_all(tx.as_mut(), actor_id).await?;
        let actor = tx.lock_user(actor_id).await.entity("user")?;
        authorize(&ActorContext::from(&actor), &Action::Leave)?;
        detach(tx.as_mut(), actor_id).await
    }
    .await;
    let user = finish(tx, result).await?;

    tracing::info!(user_id = %actor_id, "left organization");
    Ok(user)
}

pub async fn kick_from_organization(
    server: &PortalServer,
    actor_id: &UserId,
    target_id: &UserId,
) -> Result<User, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;

    let mut tx = server.store.begin().await?;
    let result = async {
        leadership::release_all(tx.as_mut(), target_id).await?;
        let target = tx.lock_user(target_id).await.entity("user")?;
        authorize(&ctx, &Action::Kick(&target))?;
        detach(tx.as_mut(), target_id).await
    }
    .await;
    let user = finish(tx, result).await?;

    tracing::info!(user_id = %target_id, actor_id = %actor_id, "removed from organization");
    Ok(user)
}

/// Delete the actor's account. Their authored content goes with it.
pub async fn delete_account(server: &PortalServer, actor_id: &UserId) -> Result<(), ServiceError> {
    let mut tx = server.store.begin().await?;
    let result = async {
        leadership::release_all(tx.as_mut(), actor_id).await?;
        let actor = tx.lock_user(actor_id).await.entity("user")?;
        authorize(&ActorContext::from(&actor), &Action::DeleteAccount)?;
        tx.delete_user(actor_id).await?;
        Ok::<_, ServiceError>(actor.avatar)
    }
    .await;
    let avatar = finish(tx, result).await?;

    server.discard_blob(avatar).await;
    tracing::info!(user_id = %actor_id, "account deleted");
    Ok(())
}
