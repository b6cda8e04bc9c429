//! Handler modules for the portal service.
//!
//! Each handler is a free function taking the [`PortalServer`] and the id of
//! the authenticated actor. Organized by domain:
//! - auth: register, login
//! - users: profiles, role management, avatars, leave/kick/delete
//! - organizations: create, view, update, avatars, free users, potential leaders
//! - teams: CRUD, membership, leadership
//! - invites: create, preview, list, delete, join
//! - news, documents: scoped content
//! - tags, tasks

pub mod auth;
pub mod documents;
pub mod invites;
pub mod news;
pub mod organizations;
pub mod tags;
pub mod tasks;
pub mod teams;
pub mod users;

use std::collections::HashSet;

use portal_authz::{content, ActorContext};
use portal_storage::{
    ContentQuery, Organization, OrganizationId, Role, TagId, Team, TeamId, TeamVisibility, User,
    UserId,
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ServiceError, StoreResultExt};
use crate::server::PortalServer;

/// Compact user view embedded in other responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub avatar: Option<String>,
    pub role: Role,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            avatar: user.avatar.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganizationSummary {
    pub id: OrganizationId,
    pub name: String,
    pub avatar: Option<String>,
}

impl From<&Organization> for OrganizationSummary {
    fn from(org: &Organization) -> Self {
        Self {
            id: org.id,
            name: org.name.clone(),
            avatar: org.avatar.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamSummary {
    pub id: TeamId,
    pub name: String,
    pub avatar: Option<String>,
    pub leader_id: Option<UserId>,
}

impl From<&Team> for TeamSummary {
    fn from(team: &Team) -> Self {
        Self {
            id: team.id,
            name: team.name.clone(),
            avatar: team.avatar.clone(),
            leader_id: team.leader_id,
        }
    }
}

/// Optional listing filters shared by news and documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContentFilter {
    /// Items carrying any of these tags.
    pub tag_ids: Vec<TagId>,
    pub author_ids: Vec<UserId>,
    pub team_ids: Vec<TeamId>,
    /// Case-insensitive substring of title, body or a tag name.
    pub search: Option<String>,
}

impl ContentFilter {
    pub(crate) fn into_query(
        self,
        organization_id: OrganizationId,
        visibility: TeamVisibility,
    ) -> ContentQuery {
        ContentQuery {
            organization_id,
            visibility,
            tag_ids: self.tag_ids,
            author_ids: self.author_ids,
            team_ids: self.team_ids,
            search: self.search,
        }
    }
}

/// Check that the actor may publish to `team_id` (organization-wide when
/// `None`) and return the organization the item belongs to.
pub(crate) async fn publishing_scope(
    server: &PortalServer,
    ctx: &ActorContext,
    team_id: Option<TeamId>,
) -> Result<OrganizationId, ServiceError> {
    let team = match team_id {
        Some(team_id) => Some(server.store.get_team(&team_id).await.entity("team")?),
        None => None,
    };
    content::authorize_publish(ctx, team.as_ref())?;
    Ok(ctx.organization()?)
}

/// Every id in `tag_ids` names an existing tag.
pub(crate) async fn require_tags(
    server: &PortalServer,
    tag_ids: &[TagId],
) -> Result<(), ServiceError> {
    if tag_ids.is_empty() {
        return Ok(());
    }
    let known: HashSet<TagId> = server.store.list_tags().await?.into_iter().map(|t| t.id).collect();
    if tag_ids.iter().all(|id| known.contains(id)) {
        Ok(())
    } else {
        Err(ServiceError::NotFound("tag".to_string()))
    }
}

/// `deserialize_with` for `Option<Option<T>>` fields: an explicit `null`
/// becomes `Some(None)`, an absent field (with `#[serde(default)]`) `None`.
pub(crate) fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trimmed, non-empty text field.
pub(crate) fn required(field: &str, value: &str) -> Result<String, ServiceError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ServiceError::validation(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

/// Like [`required`] for optional updates.
pub(crate) fn required_opt(
    field: &str,
    value: Option<&str>,
) -> Result<Option<String>, ServiceError> {
    value.map(|v| required(field, v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_trims() {
        assert_eq!(required("name", "  Eng ").unwrap(), "Eng");
        assert!(matches!(
            required("name", "   "),
            Err(ServiceError::Validation(_))
        ));
        assert_eq!(required_opt("name", None).unwrap(), None);
    }

    #[test]
    fn test_filter_deserializes_with_defaults() {
        let filter: ContentFilter = serde_json::from_str(r#"{"search":"q3"}"#).unwrap();
        assert_eq!(filter.search.as_deref(), Some("q3"));
        assert!(filter.tag_ids.is_empty());
    }
}
