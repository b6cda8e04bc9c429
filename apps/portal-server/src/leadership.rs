//! Team leadership coordinator.
//!
//! Every function here runs inside a caller-owned transaction and assumes
//! the caller already authorized the change. Locks are taken team first,
//! then users, so concurrent leadership changes cannot deadlock.
//!
//! A `Manager` is demoted to `User` as soon as they lead no team at all.
//! Roles above `Manager` are never touched.

use portal_storage::{
    Affiliation, CreateTeamParams, OrganizationId, Role, StoreError, StoreTx, Team, TeamId, User,
    UserId,
};

use crate::error::{ServiceError, StoreResultExt};

/// Demote `user_id` from `Manager` to `User` if they lead no team.
///
/// Call after the leadership change has been written. Returns whether the
/// role changed.
pub async fn demote_if_idle(
    tx: &mut dyn StoreTx,
    user_id: &UserId,
) -> Result<bool, ServiceError> {
    let user = tx.lock_user(user_id).await.entity("user")?;
    if user.role != Role::Manager {
        return Ok(false);
    }
    if tx.count_teams_led_by(user_id).await? > 0 {
        return Ok(false);
    }
    tx.set_user_role(user_id, Role::User).await?;
    tracing::info!(user_id = %user_id, "demoted former team leader");
    Ok(true)
}

/// Move a vetted leader onto `team` and raise them to `Manager` if below.
async fn install_leader(
    tx: &mut dyn StoreTx,
    user: &User,
    team: &Team,
) -> Result<(), ServiceError> {
    if !user.team.is(&team.id) {
        tx.set_user_team(&user.id, Affiliation::Affiliated(team.id))
            .await?;
    }
    if !user.role.at_least(Role::Manager) {
        tx.set_user_role(&user.id, Role::Manager).await?;
    }
    Ok(())
}

/// Lock and vet a prospective leader of a team in the given organization.
async fn lock_candidate(
    tx: &mut dyn StoreTx,
    user_id: &UserId,
    team: Option<&Team>,
    organization_id: &OrganizationId,
) -> Result<User, ServiceError> {
    let user = tx.lock_user(user_id).await.entity("user")?;
    if !user.organization.is(organization_id) {
        return Err(ServiceError::invalid(
            "the leader must belong to the team's organization",
        ));
    }
    let needs_move = team.map_or(true, |t| !user.team.is(&t.id));
    if needs_move && user.role.is_super_admin() {
        return Err(ServiceError::forbidden(
            "the organization owner cannot be moved onto a team",
        ));
    }
    Ok(user)
}

/// Replace (or clear) the leader of a locked team.
///
/// The new leader is moved onto the team and promoted to `Manager` if below
/// it; the previous leader is demoted if this was their last team.
/// Re-assigning the current leader changes nothing.
pub async fn update_team_leader(
    tx: &mut dyn StoreTx,
    team: &Team,
    new_leader: Option<UserId>,
) -> Result<Team, ServiceError> {
    if team.leader_id == new_leader {
        return Ok(team.clone());
    }

    if let Some(leader_id) = new_leader {
        let user = lock_candidate(tx, &leader_id, Some(team), &team.organization_id).await?;
        install_leader(tx, &user, team).await?;
    }

    tx.set_team_leader(&team.id, new_leader).await?;

    if let Some(previous) = team.leader_id {
        demote_if_idle(tx, &previous).await?;
    }

    tracing::info!(
        team_id = %team.id,
        leader_id = ?new_leader,
        previous = ?team.leader_id,
        "team leader changed"
    );
    Ok(Team {
        leader_id: new_leader,
        ..team.clone()
    })
}

/// Insert a team, installing its initial leader in the same transaction.
///
/// A case-insensitive duplicate name within the organization is `InvalidState`.
pub async fn create_team(
    tx: &mut dyn StoreTx,
    params: &CreateTeamParams,
) -> Result<Team, ServiceError> {
    let leader = match params.leader_id {
        Some(leader_id) => {
            Some(lock_candidate(tx, &leader_id, None, &params.organization_id).await?)
        }
        None => None,
    };

    let team = tx.insert_team(params).await.map_err(|e| match e {
        StoreError::AlreadyExists => {
            ServiceError::invalid("a team with this name already exists")
        }
        other => other.into(),
    })?;

    if let Some(leader) = leader {
        // Their previous team, if they led one, keeps them as leader.
        install_leader(tx, &leader, &team).await?;
    }

    tracing::info!(team_id = %team.id, name = %team.name, "team created");
    Ok(team)
}

/// Detach every member, delete the team and demote its leader if idle.
/// Returns how many members were released.
pub async fn delete_team(tx: &mut dyn StoreTx, team: &Team) -> Result<u64, ServiceError> {
    let released = tx.clear_team_members(&team.id).await?;
    tx.delete_team(&team.id).await?;
    if let Some(leader) = team.leader_id {
        demote_if_idle(tx, &leader).await?;
    }
    tracing::info!(team_id = %team.id, released, "team deleted");
    Ok(released)
}

/// Put a team-less member of the team's organization on the team.
pub async fn add_member(
    tx: &mut dyn StoreTx,
    team: &Team,
    user_id: &UserId,
) -> Result<User, ServiceError> {
    let mut user = tx.lock_user(user_id).await.entity("user")?;
    if !user.organization.is(&team.organization_id) {
        return Err(ServiceError::invalid(
            "the user is not a member of the team's organization",
        ));
    }
    if user.role.is_super_admin() {
        return Err(ServiceError::forbidden(
            "the organization owner cannot be moved onto a team",
        ));
    }
    if user.team.is_affiliated() {
        return Err(ServiceError::invalid("the user already belongs to a team"));
    }
    tx.set_user_team(user_id, Affiliation::Affiliated(team.id))
        .await?;
    user.team = Affiliation::Affiliated(team.id);
    Ok(user)
}

/// Take a member off the team. The current leader must be replaced first.
pub async fn remove_member(
    tx: &mut dyn StoreTx,
    team: &Team,
    user_id: &UserId,
) -> Result<User, ServiceError> {
    if team.leader_id.as_ref() == Some(user_id) {
        return Err(ServiceError::invalid(
            "replace the team leader before removing them",
        ));
    }
    let mut user = tx.lock_user(user_id).await.entity("user")?;
    if !user.team.is(&team.id) {
        return Err(ServiceError::invalid("the user is not a member of this team"));
    }
    tx.set_user_team(user_id, Affiliation::Unaffiliated).await?;
    user.team = Affiliation::Unaffiliated;
    Ok(user)
}

/// Clear every leadership the user holds, for a user leaving their organization.
pub async fn release_all(
    tx: &mut dyn StoreTx,
    user_id: &UserId,
) -> Result<Vec<TeamId>, ServiceError> {
    let teams = tx.release_leadership(user_id).await?;
    if !teams.is_empty() {
        tracing::info!(user_id = %user_id, teams = teams.len(), "leadership released");
    }
    Ok(teams)
}

/// Whether `user_id` currently leads any team.
pub async fn is_leader(tx: &mut dyn StoreTx, user_id: &UserId) -> Result<bool, ServiceError> {
    Ok(tx.count_teams_led_by(user_id).await? > 0)
}
