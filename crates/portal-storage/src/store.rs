//! The Store and StoreTx traits that backends implement.

use crate::types::*;
use crate::StoreError;

/// The storage trait the portal service depends on.
///
/// Single-statement reads and writes live here. Multi-step membership
/// changes go through a [`StoreTx`] obtained from [`Store::begin`].
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction. Dropping it without commit rolls it back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    // ───────────────────────────────────── Users ──────────────────────────────────────────

    /// Create a user with role `User` and no memberships. Duplicate email is `AlreadyExists`.
    async fn create_user(&self, params: &CreateUserParams) -> Result<User, StoreError>;

    async fn get_user(&self, user_id: &UserId) -> Result<User, StoreError>;

    /// Lookup is case-insensitive.
    async fn get_user_by_email(&self, email: &str) -> Result<User, StoreError>;

    async fn update_user_profile(
        &self,
        user_id: &UserId,
        changes: &ProfileChanges,
    ) -> Result<User, StoreError>;

    /// Replace the avatar, returning the previous blob name.
    async fn set_user_avatar(
        &self,
        user_id: &UserId,
        avatar: Option<String>,
    ) -> Result<Option<String>, StoreError>;

    async fn list_organization_users(
        &self,
        org_id: &OrganizationId,
    ) -> Result<Vec<User>, StoreError>;

    /// Members of the organization without a team.
    async fn list_free_users(&self, org_id: &OrganizationId) -> Result<Vec<User>, StoreError>;

    /// Members not leading any team, plus the current leader of `team_id`.
    async fn list_potential_leaders(
        &self,
        org_id: &OrganizationId,
        team_id: Option<TeamId>,
    ) -> Result<Vec<User>, StoreError>;

    // ───────────────────────────────────── Organizations ──────────────────────────────────

    async fn get_organization(&self, org_id: &OrganizationId) -> Result<Organization, StoreError>;

    /// Duplicate name is `AlreadyExists`.
    async fn update_organization(
        &self,
        org_id: &OrganizationId,
        changes: &OrganizationChanges,
    ) -> Result<Organization, StoreError>;

    async fn set_organization_avatar(
        &self,
        org_id: &OrganizationId,
        avatar: Option<String>,
    ) -> Result<Option<String>, StoreError>;

    // ───────────────────────────────────── Teams ──────────────────────────────────────────

    async fn get_team(&self, team_id: &TeamId) -> Result<Team, StoreError>;

    async fn list_teams(&self, org_id: &OrganizationId) -> Result<Vec<Team>, StoreError>;

    async fn list_team_members(&self, team_id: &TeamId) -> Result<Vec<User>, StoreError>;

    /// Case-insensitive name clash within the organization is `AlreadyExists`.
    async fn update_team(&self, team_id: &TeamId, changes: &TeamChanges)
        -> Result<Team, StoreError>;

    async fn set_team_avatar(
        &self,
        team_id: &TeamId,
        avatar: Option<String>,
    ) -> Result<Option<String>, StoreError>;

    // ───────────────────────────────────── Invites ────────────────────────────────────────

    async fn create_invite(&self, params: &CreateInviteParams) -> Result<Invite, StoreError>;

    async fn get_invite_by_token(&self, token: &str) -> Result<Invite, StoreError>;

    /// Newest first.
    async fn list_invites(&self, org_id: &OrganizationId) -> Result<Vec<Invite>, StoreError>;

    async fn delete_invite(&self, invite_id: &InviteId) -> Result<(), StoreError>;

    // ───────────────────────────────────── Tags ───────────────────────────────────────────

    async fn list_tags(&self) -> Result<Vec<Tag>, StoreError>;

    /// Case-insensitive duplicate is `AlreadyExists`.
    async fn create_tag(&self, name: &str) -> Result<Tag, StoreError>;

    // ───────────────────────────────────── News ───────────────────────────────────────────

    async fn create_news(&self, params: &CreateNewsParams) -> Result<News, StoreError>;

    async fn get_news(&self, news_id: &NewsId) -> Result<News, StoreError>;

    async fn update_news(&self, news_id: &NewsId, changes: &NewsChanges)
        -> Result<News, StoreError>;

    async fn delete_news(&self, news_id: &NewsId) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_news(&self, query: &ContentQuery) -> Result<Vec<News>, StoreError>;

    // ───────────────────────────────────── Documents ──────────────────────────────────────

    async fn create_document(&self, params: &CreateDocumentParams)
        -> Result<Document, StoreError>;

    async fn get_document(&self, document_id: &DocumentId) -> Result<Document, StoreError>;

    async fn update_document(
        &self,
        document_id: &DocumentId,
        changes: &DocumentChanges,
    ) -> Result<Document, StoreError>;

    async fn delete_document(&self, document_id: &DocumentId) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_documents(&self, query: &ContentQuery) -> Result<Vec<Document>, StoreError>;

    // ───────────────────────────────────── Tasks ──────────────────────────────────────────

    async fn create_task(&self, params: &CreateTaskParams) -> Result<Task, StoreError>;

    async fn get_task(&self, task_id: &TaskId) -> Result<Task, StoreError>;

    async fn update_task(&self, task_id: &TaskId, changes: &TaskChanges)
        -> Result<Task, StoreError>;

    async fn delete_task(&self, task_id: &TaskId) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_tasks(&self, team_id: &TeamId) -> Result<Vec<Task>, StoreError>;
}

/// An open transaction.
///
/// `lock_*` take a row lock held until commit or rollback; callers lock
/// teams before users to keep a stable order.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait StoreTx: Send {
    // ───────────────────────────────────── Locks ──────────────────────────────────────────

    async fn lock_user(&mut self, user_id: &UserId) -> Result<User, StoreError>;

    async fn lock_team(&mut self, team_id: &TeamId) -> Result<Team, StoreError>;

    async fn lock_invite(&mut self, token: &str) -> Result<Invite, StoreError>;

    // ───────────────────────────────────── Writes ─────────────────────────────────────────

    /// Duplicate name is `AlreadyExists`.
    async fn insert_organization(
        &mut self,
        params: &CreateOrganizationParams,
    ) -> Result<Organization, StoreError>;

    /// Case-insensitive name clash within the organization is `AlreadyExists`.
    async fn insert_team(&mut self, params: &CreateTeamParams) -> Result<Team, StoreError>;

    /// Number of teams led by `user_id`.
    async fn count_teams_led_by(&mut self, user_id: &UserId) -> Result<i64, StoreError>;

    async fn update_user_profile(
        &mut self,
        user_id: &UserId,
        changes: &ProfileChanges,
    ) -> Result<User, StoreError>;

    async fn set_user_role(&mut self, user_id: &UserId, role: Role) -> Result<(), StoreError>;

    async fn set_user_team(
        &mut self,
        user_id: &UserId,
        team: Affiliation<TeamId>,
    ) -> Result<(), StoreError>;

    async fn set_user_membership(
        &mut self,
        user_id: &UserId,
        organization: Affiliation<OrganizationId>,
        team: Affiliation<TeamId>,
    ) -> Result<(), StoreError>;

    async fn set_team_leader(
        &mut self,
        team_id: &TeamId,
        leader_id: Option<UserId>,
    ) -> Result<(), StoreError>;

    /// Detach every member from the team, returning how many were moved.
    async fn clear_team_members(&mut self, team_id: &TeamId) -> Result<u64, StoreError>;

    /// Clear `leader_id` on every team led by the user, returning those teams.
    async fn release_leadership(&mut self, user_id: &UserId) -> Result<Vec<TeamId>, StoreError>;

    async fn delete_team(&mut self, team_id: &TeamId) -> Result<(), StoreError>;

    async fn delete_user(&mut self, user_id: &UserId) -> Result<(), StoreError>;

    /// Fails with `Conflict` if the invite is already at `max_uses`.
    async fn increment_invite_uses(&mut self, invite_id: &InviteId) -> Result<(), StoreError>;

    // ───────────────────────────────────── Completion ─────────────────────────────────────

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
