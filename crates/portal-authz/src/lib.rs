//! Authorization engine for the portal.
//!
//! Every decision is a pure function of the acting user's context and the
//! target records, so callers load (and lock, where it matters) the rows
//! first and then ask here. The rules, in order:
//!
//! 1. Self-action carve-outs: a user may always read and edit their own
//!    profile fields, never change their own role, and leaves rather than
//!    being kicked.
//! 2. Organization scoping: anything touching another user or an
//!    organization-owned record needs both sides affiliated with the same
//!    organization, otherwise [`Denial::OutOfScope`].
//! 3. Role thresholds: see [`authorize`].
//! 4. Protected role: nothing grants `SuperAdmin`, and nobody changes a
//!    SuperAdmin's role, team or membership.

use portal_storage::{Affiliation, OrganizationId, Role, Team, TeamId, User, UserId};
use thiserror::Error;

pub mod content;

/// Why an action was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("target is outside your organization")]
    OutOfScope,
    #[error("{0}")]
    InvalidState(String),
}

impl Denial {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Denial::Forbidden(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Denial::InvalidState(msg.into())
    }
}

/// The authenticated user as seen by the rules, freshly loaded from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorContext {
    pub id: UserId,
    pub role: Role,
    pub organization: Affiliation<OrganizationId>,
    pub team: Affiliation<TeamId>,
}

impl From<&User> for ActorContext {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            role: user.role,
            organization: user.organization,
            team: user.team,
        }
    }
}

impl ActorContext {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn leads(&self, team: &Team) -> bool {
        team.leader_id == Some(self.id)
    }

    /// The actor's organization, or `OutOfScope` when unaffiliated.
    pub fn organization(&self) -> Result<OrganizationId, Denial> {
        self.organization.get().ok_or(Denial::OutOfScope)
    }

    /// Both sides affiliated with the same organization.
    pub fn in_organization(&self, org_id: &OrganizationId) -> Result<(), Denial> {
        if self.organization.is(org_id) {
            Ok(())
        } else {
            Err(Denial::OutOfScope)
        }
    }

    fn shares_organization(&self, target: &User) -> Result<(), Denial> {
        if self.organization.shares(&target.organization) {
            Ok(())
        } else {
            Err(Denial::OutOfScope)
        }
    }

    fn require(&self, role: Role, what: &str) -> Result<(), Denial> {
        if self.role.at_least(role) {
            Ok(())
        } else {
            Err(Denial::forbidden(format!("{what} requires {role}")))
        }
    }
}

/// An operation checked by [`authorize`], carrying the records it targets.
#[derive(Debug, Clone, Copy)]
pub enum Action<'a> {
    ViewUser(&'a User),
    /// Name, bio, phone and avatar.
    UpdateProfile(&'a User),
    /// Move a user onto or off a team through user management.
    AssignTeam(&'a User),
    /// Role change through user management (Admins may adjust roles below their own).
    ChangeRole { target: &'a User, role: Role },
    /// The dedicated role management operation (SuperAdmin only).
    ManageRoles { target: &'a User, role: Role },
    Kick(&'a User),
    Leave,
    DeleteAccount,
    CreateOrganization,
    JoinOrganization,
    ViewOrganization(&'a OrganizationId),
    UpdateOrganization(&'a OrganizationId),
    ManageInvites(&'a OrganizationId),
    ListMembers(&'a OrganizationId),
    CreateTeam,
    ViewTeam(&'a Team),
    /// Name, description, avatar and membership of a team.
    EditTeam(&'a Team),
    DeleteTeam(&'a Team),
    ChangeTeamLeader(&'a Team),
    CreateTag,
    ViewTasks(&'a Team),
    ManageTasks(&'a Team),
}

/// Decide whether `actor` may perform `action`.
///
/// Thresholds: team creation, invites, organization edits, team deletion,
/// leadership changes, team assignment, kicks and tag creation need
/// `Admin`; role management needs `SuperAdmin`; team-scoped edits and task
/// management need `Admin` or the team's leader.
pub fn authorize(actor: &ActorContext, action: &Action<'_>) -> Result<(), Denial> {
    match *action {
        Action::ViewUser(target) => {
            if target.id == actor.id {
                return Ok(());
            }
            actor.shares_organization(target)
        }

        Action::UpdateProfile(target) => {
            if target.id == actor.id {
                return Ok(());
            }
            actor.shares_organization(target)?;
            actor.require(Role::Admin, "editing another user's profile")
        }

        Action::AssignTeam(target) => {
            actor.shares_organization(target)?;
            actor.require(Role::Admin, "assigning teams")?;
            protect_super_admin(target)
        }

        Action::ChangeRole { target, role } => authorize_role_change(actor, target, role),

        Action::ManageRoles { target, role } => {
            actor.require(Role::SuperAdmin, "role management")?;
            authorize_role_change(actor, target, role)
        }

        Action::Kick(target) => {
            if target.id == actor.id {
                return Err(Denial::invalid("use leave to exit your organization"));
            }
            actor.shares_organization(target)?;
            actor.require(Role::Admin, "removing members")?;
            protect_super_admin(target)
        }

        Action::Leave => {
            actor.organization()?;
            if actor.role.is_super_admin() {
                return Err(Denial::invalid("the organization owner cannot leave"));
            }
            Ok(())
        }

        Action::DeleteAccount => {
            if actor.role.is_super_admin() {
                return Err(Denial::invalid(
                    "the organization owner cannot delete their account",
                ));
            }
            Ok(())
        }

        Action::CreateOrganization => {
            if actor.role.is_super_admin() && actor.organization.is_affiliated() {
                return Err(Denial::invalid("you already own an organization"));
            }
            Ok(())
        }

        Action::JoinOrganization => {
            if actor.role.is_super_admin() && actor.organization.is_affiliated() {
                return Err(Denial::invalid(
                    "the organization owner cannot join another organization",
                ));
            }
            Ok(())
        }

        Action::ViewOrganization(org_id) | Action::ListMembers(org_id) => {
            actor.in_organization(org_id)
        }

        Action::UpdateOrganization(org_id) => {
            actor.in_organization(org_id)?;
            actor.require(Role::Admin, "editing the organization")
        }

        Action::ManageInvites(org_id) => {
            actor.in_organization(org_id)?;
            actor.require(Role::Admin, "managing invites")
        }

        Action::CreateTeam => {
            actor.organization()?;
            actor.require(Role::Admin, "creating teams")
        }

        Action::ViewTeam(team) => actor.in_organization(&team.organization_id),

        Action::EditTeam(team) | Action::ManageTasks(team) => {
            actor.in_organization(&team.organization_id)?;
            if actor.is_admin() || actor.leads(team) {
                Ok(())
            } else {
                Err(Denial::forbidden("only the team leader or an admin may do this"))
            }
        }

        Action::DeleteTeam(team) => {
            actor.in_organization(&team.organization_id)?;
            actor.require(Role::Admin, "deleting teams")
        }

        Action::ChangeTeamLeader(team) => {
            actor.in_organization(&team.organization_id)?;
            actor.require(Role::Admin, "changing team leaders")
        }

        Action::CreateTag => actor.require(Role::Admin, "creating tags"),

        Action::ViewTasks(team) => {
            actor.in_organization(&team.organization_id)?;
            if actor.is_admin() || actor.leads(team) || actor.team.is(&team.id) {
                Ok(())
            } else {
                Err(Denial::forbidden("only team members may view its tasks"))
            }
        }
    }
}

fn protect_super_admin(target: &User) -> Result<(), Denial> {
    if target.role.is_super_admin() {
        Err(Denial::forbidden("the organization owner cannot be modified"))
    } else {
        Ok(())
    }
}

/// Shared by both role-change paths. A SuperAdmin may set any role up to
/// `Admin`; an Admin may only move users below `Admin` to roles below `Admin`.
fn authorize_role_change(actor: &ActorContext, target: &User, role: Role) -> Result<(), Denial> {
    if target.id == actor.id {
        return Err(Denial::forbidden("you cannot change your own role"));
    }
    actor.shares_organization(target)?;
    actor.require(Role::Admin, "changing roles")?;
    protect_super_admin(target)?;
    if role.is_super_admin() {
        return Err(Denial::forbidden("the owner role cannot be granted"));
    }
    if !actor.role.is_super_admin() && (target.role.is_admin() || role.is_admin()) {
        return Err(Denial::forbidden("only the owner may grant or revoke admin"));
    }
    Ok(())
}
