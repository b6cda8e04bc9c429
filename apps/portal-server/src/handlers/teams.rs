//! Team handlers: create, view, update, avatars, membership, leadership, delete

use portal_authz::{authorize, Action};
use portal_storage::{CreateTeamParams, StoreError, Team, TeamChanges, TeamId, User, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, StoreResultExt};
use crate::handlers::{required, required_opt, UserSummary};
use crate::leadership;
use crate::server::{finish, PortalServer};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub leader_id: Option<UserId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateTeamRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// A team with its leader and members.
#[derive(Debug, Clone, Serialize)]
pub struct TeamProfile {
    pub team: Team,
    pub leader: Option<UserSummary>,
    pub members: Vec<UserSummary>,
}

pub async fn create_team(
    server: &PortalServer,
    actor_id: &UserId,
    req: CreateTeamRequest,
) -> Result<Team, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    authorize(&ctx, &Action::CreateTeam)?;
    let organization_id = ctx.organization()?;

    let params = CreateTeamParams {
        organization_id,
        name: required("name", &req.name)?,
        description: req.description.trim().to_string(),
        leader_id: req.leader_id,
    };

    let mut tx = server.store.begin().await?;
    let result = leadership::create_team(tx.as_mut(), &params).await;
    finish(tx, result).await
}

pub async fn get_team(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: &TeamId,
) -> Result<TeamProfile, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let team = server.store.get_team(team_id).await.entity("team")?;
    authorize(&ctx, &Action::ViewTeam(&team))?;

    let members = server.store.list_team_members(team_id).await?;
    let leader = match team.leader_id {
        Some(leader_id) => match members.iter().find(|m| m.id == leader_id) {
            Some(member) => Some(UserSummary::from(member)),
            None => match server.store.get_user(&leader_id).await {
                Ok(user) => Some(UserSummary::from(&user)),
                Err(StoreError::NotFound) => None,
                Err(e) => return Err(e.into()),
            },
        },
        None => None,
    };

    Ok(TeamProfile {
        leader,
        members: members.iter().map(UserSummary::from).collect(),
        team,
    })
}

/// Teams of the actor's organization.
pub async fn list_teams(
    server: &PortalServer,
    actor_id: &UserId,
) -> Result<Vec<Team>, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let org_id = ctx.organization()?;
    Ok(server.store.list_teams(&org_id).await?)
}

pub async fn update_team(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: &TeamId,
    req: UpdateTeamRequest,
) -> Result<Team, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let team = server.store.get_team(team_id).await.entity("team")?;
    authorize(&ctx, &Action::EditTeam(&team))?;

    let changes = TeamChanges {
        name: required_opt("name", req.name.as_deref())?,
        description: req.description.map(|d| d.trim().to_string()),
    };
    server
        .store
        .update_team(team_id, &changes)
        .await
        .map_err(|e| match e {
            StoreError::AlreadyExists => {
                ServiceError::invalid("a team with this name already exists")
            }
            StoreError::NotFound => ServiceError::not_found("team"),
            other => other.into(),
        })
}

pub async fn upload_avatar(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: &TeamId,
    bytes: &[u8],
) -> Result<Team, ServiceError> {
    set_avatar(server, actor_id, team_id, Some(bytes)).await
}

pub async fn remove_avatar(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: &TeamId,
) -> Result<Team, ServiceError> {
    set_avatar(server, actor_id, team_id, None).await
}

async fn set_avatar(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: &TeamId,
    bytes: Option<&[u8]>,
) -> Result<Team, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;
    let team = server.store.get_team(team_id).await.entity("team")?;
    authorize(&ctx, &Action::EditTeam(&team))?;

    server
        .replace_avatar(bytes, "team", |name| {
            server.store.set_team_avatar(team_id, name)
        })
        .await?;
    server.store.get_team(team_id).await.entity("team")
}

/// Put a team-less member of the organization on the team (leader or Admin).
pub async fn add_team_member(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: &TeamId,
    user_id: &UserId,
) -> Result<User, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;

    let mut tx = server.store.begin().await?;
    let result = async {
        let team = tx.lock_team(team_id).await.entity("team")?;
        authorize(&ctx, &Action::EditTeam(&team))?;
        leadership::add_member(tx.as_mut(), &team, user_id).await
    }
    .await;
    let user = finish(tx, result).await?;

    tracing::info!(team_id = %team_id, user_id = %user_id, "team member added");
    Ok(user)
}

pub async fn remove_team_member(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: &TeamId,
    user_id: &UserId,
) -> Result<User, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;

    let mut tx = server.store.begin().await?;
    let result = async {
        let team = tx.lock_team(team_id).await.entity("team")?;
        authorize(&ctx, &Action::EditTeam(&team))?;
        leadership::remove_member(tx.as_mut(), &team, user_id).await
    }
    .await;
    let user = finish(tx, result).await?;

    tracing::info!(team_id = %team_id, user_id = %user_id, "team member removed");
    Ok(user)
}

/// Set or clear the team's leader (Admin).
pub async fn update_team_leader(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: &TeamId,
    leader_id: Option<UserId>,
) -> Result<Team, ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;

    let mut tx = server.store.begin().await?;
    let result = async {
        let team = tx.lock_team(team_id).await.entity("team")?;
        authorize(&ctx, &Action::ChangeTeamLeader(&team))?;
        leadership::update_team_leader(tx.as_mut(), &team, leader_id).await
    }
    .await;
    finish(tx, result).await
}

pub async fn delete_team(
    server: &PortalServer,
    actor_id: &UserId,
    team_id: &TeamId,
) -> Result<(), ServiceError> {
    let (_, ctx) = server.actor(actor_id).await?;

    let mut tx = server.store.begin().await?;
    let result = async {
        let team = tx.lock_team(team_id).await.entity("team")?;
        authorize(&ctx, &Action::DeleteTeam(&team))?;
        leadership::delete_team(tx.as_mut(), &team).await?;
        Ok::<_, ServiceError>(team.avatar)
    }
    .await;
    let avatar = finish(tx, result).await?;

    server.discard_blob(avatar).await;
    Ok(())
}
