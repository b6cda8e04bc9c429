//! Organization handlers: create, view, update, avatars, member pickers

use portal_authz::{authorize, Action, ActorContext};
use portal_storage::{
    Affiliation, CreateOrganizationParams, Organization, OrganizationChanges, OrganizationId, Role,
    StoreError, StoreTx, TeamId, UserId,
};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, StoreResultExt};
use crate::handlers::{required, required_opt, TeamSummary, UserSummary};
use crate::leadership;
use crate::server::{finish, PortalServer};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateOrganizationRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// An organization with its owner, teams and headcount.
#[derive(Debug, Clone, Serialize)]
pub struct OrganizationProfile {
    pub organization: Organization,
    pub owner: Option<UserSummary>,
    pub teams: Vec<TeamSummary>,
    pub member_count: usize,
}

fn duplicate_name(e: StoreError) -> ServiceError {
    match e {
        StoreError::AlreadyExists => {
            ServiceError::invalid("an organization with this name already exists")
        }
        StoreError::NotFound => ServiceError::not_found("organization"),
        other => other.into(),
    }
}

async fn found_organization(
    tx: &mut dyn StoreTx,
    actor_id: &UserId,
    params: &CreateOrganizationParams,
) -> Result<Organization, ServiceError> {
    // A member of another organization leaves it, leadership included.
    leadership::release_all(tx, actor_id).await?;
    let actor = tx.lock_user(actor_id).await.entity("user")?;
    authorize(&ActorContext::from(&actor), &Action::CreateOrganization)?;

    let org = tx.insert_organization(params).await.map_err(duplicate_name)?;
    tx.set_user_membership(
        actor_id,
        Affiliation::Affiliated(org.id),
        Affiliation::Unaffiliated,
    )
    .await?;
    tx.set_user_role(actor_id, Role::SuperAdmin).await?;
    Ok(org)
}

/// Create an organization owned by the actor, who becomes its `SuperAdmin`.
pub async fn create_organization(
    server: &PortalServer,
    actor_id: &UserId,
    req: CreateOrganizationRequest,
) -> Result<Organization, ServiceError> {
    let params = CreateOrganizationParams {
        name: required("name", &req.name)?,
        description: req.description.trim().to_string(),
        owner_id: *actor_id,
    };

    let mut tx = server.store.begin().await?;
    let result = found_organization(tx.as_mut(), actor_id, &params).await;
    let org = finish(tx, result).await?;

    tracing::info!(organization_id = %org.id, owner_id = %actor_id, "organization created");
    Ok(org)
}

async fn profile_of(
    server: &PortalServer,
    org_id: &OrganizationId,
) -> Result<OrganizationProfile, ServiceError> {
    let organization = server
        .store
        .get_organization(org_id)
        .await
        .entity("organization")?;
    let owner = match server.store.get_user(&organization.owner_id).await {
        Ok(owner) => Some(UserSummary::from(&owner)),
        Err(StoreError::NotFound) => None,
        Err(e) => return Err(e.into()),
    };
    let teams = server.store.list_teams(org_id).await?;
    let member_count = server.store.list_organization_users(org_id).await?.len();

    Ok(OrganizationProfile {
        organization,
        owner,
        teams: teams.iter().map(TeamSummary::from).collect(),
        member_count,
    })
}

pub async fn get_my_organization(
    server: &PortalServer,
    actor_id: &UserId,
) -> Result<OrganizationProfile, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let org_id = ctx
        .organization
        .get()
        .ok_or_else(|| ServiceError::not_found("organization"))?;
    profile_of(server, &org_id).await
}

pub async fn get_organization(
    server: &PortalServer,
    actor_id: &UserId,
    org_id: &OrganizationId,
) -> Result<OrganizationProfile, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    authorize(&ctx, &Action::ViewOrganization(org_id))?;
    profile_of(server, org_id).await
}

pub async fn update_organization(
    server: &PortalServer,
    actor_id: &UserId,
    org_id: &OrganizationId,
    req: UpdateOrganizationRequest,
) -> Result<Organization, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    authorize(&ctx, &Action::UpdateOrganization(org_id))?;

    let changes = OrganizationChanges {
        name: required_opt("name", req.name.as_deref())?,
        description: req.description.map(|d| d.trim().to_string()),
    };
    server
        .store
        .update_organization(org_id, &changes)
        .await
        .map_err(duplicate_name)
}

pub async fn upload_avatar(
    server: &PortalServer,
    actor_id: &UserId,
    org_id: &OrganizationId,
    bytes: &[u8],
) -> Result<Organization, ServiceError> {
    set_avatar(server, actor_id, org_id, Some(bytes)).await
}

pub async fn remove_avatar(
    server: &PortalServer,
    actor_id: &UserId,
    org_id: &OrganizationId,
) -> Result<Organization, ServiceError> {
    set_avatar(server, actor_id, org_id, None).await
}

// The owner is the organization's SuperAdmin, so Admin+ covers both.
async fn set_avatar(
    server: &PortalServer,
    actor_id: &UserId,
    org_id: &OrganizationId,
    bytes: Option<&[u8]>,
) -> Result<Organization, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    authorize(&ctx, &Action::UpdateOrganization(org_id))?;

    server
        .replace_avatar(bytes, "organization", |name| {
            server.store.set_organization_avatar(org_id, name)
        })
        .await?;
    server
        .store
        .get_organization(org_id)
        .await
        .entity("organization")
}

/// Members of the actor's organization without a team.
pub async fn list_free_users(
    server: &PortalServer,
    actor_id: &UserId,
) -> Result<Vec<UserSummary>, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let org_id = ctx.organization()?;
    authorize(&ctx, &Action::ListMembers(&org_id))?;
    let users = server.store.list_free_users(&org_id).await?;
    Ok(users.iter().map(UserSummary::from).collect())
}

/// Candidates for leading `team_id` (or a new team when `None`): members
/// not leading any team, plus that team's current leader.
pub async fn list_potential_leaders(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: Option<TeamId>,
) -> Result<Vec<UserSummary>, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let org_id = ctx.organization()?;
    match team_id {
        Some(team_id) => {
            let team = server.store.get_team(&team_id).await.entity("team")?;
            authorize(&ctx, &Action::ChangeTeamLeader(&team))?;
        }
        None => authorize(&ctx, &Action::CreateTeam)?,
    }

    let users = server
        .store
        .list_potential_leaders(&org_id, team_id)
        .await?;
    Ok(users
        .iter()
        .filter(|u| !u.role.is_super_admin())
        .map(UserSummary::from)
        .collect())
}
