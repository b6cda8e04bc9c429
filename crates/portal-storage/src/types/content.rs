//! News, documents and the tags they share.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{DocumentId, NewsId, OrganizationId, TagId, TeamId, UserId};

/// Tag record
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String, // unique, case-insensitive
}

/// News post record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct News {
    pub id: NewsId,
    pub title: String,
    pub content: String,
    pub image: Option<String>,
    pub tags: Vec<Tag>,
    pub organization_id: OrganizationId,
    pub team_id: Option<TeamId>, // None = organization-wide
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a news post
#[derive(Clone, Debug)]
pub struct CreateNewsParams {
    pub title: String,
    pub content: String,
    pub image: Option<String>,
    pub tag_ids: Vec<TagId>,
    pub organization_id: OrganizationId,
    pub team_id: Option<TeamId>,
    pub author_id: UserId,
}

/// Editable news fields; `None` leaves the value untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NewsChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub image: Option<String>,
    pub tag_ids: Option<Vec<TagId>>,
}

/// Document record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Document {
    pub id: DocumentId,
    pub title: String,
    pub description: String,
    pub file: String, // blob name
    pub original_name: String,
    pub tags: Vec<Tag>,
    pub organization_id: OrganizationId,
    pub team_id: Option<TeamId>,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a document
#[derive(Clone, Debug)]
pub struct CreateDocumentParams {
    pub title: String,
    pub description: String,
    pub file: String,
    pub original_name: String,
    pub tag_ids: Vec<TagId>,
    pub organization_id: OrganizationId,
    pub team_id: Option<TeamId>,
    pub author_id: UserId,
}

/// Editable document fields; `None` leaves the value untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tag_ids: Option<Vec<TagId>>,
}

/// Which team-scoped items a viewer may see inside their organization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeamVisibility {
    /// Every item in the organization.
    Everything,
    /// Organization-wide items plus those of the given team, if any.
    OrganizationWideAnd(Option<TeamId>),
}

impl TeamVisibility {
    /// Apply the rule to a single item's team.
    pub fn admits(&self, item_team: Option<TeamId>) -> bool {
        match (self, item_team) {
            (TeamVisibility::Everything, _) => true,
            (TeamVisibility::OrganizationWideAnd(_), None) => true,
            (TeamVisibility::OrganizationWideAnd(own), Some(team)) => *own == Some(team),
        }
    }
}

/// Listing query for news and documents. Filters compose conjunctively;
/// empty filter lists are ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentQuery {
    pub organization_id: OrganizationId,
    pub visibility: TeamVisibility,
    pub tag_ids: Vec<TagId>,
    pub author_ids: Vec<UserId>,
    pub team_ids: Vec<TeamId>,
    /// Case-insensitive substring of title, body or any tag name.
    pub search: Option<String>,
}

impl ContentQuery {
    pub fn new(organization_id: OrganizationId, visibility: TeamVisibility) -> Self {
        Self {
            organization_id,
            visibility,
            tag_ids: Vec::new(),
            author_ids: Vec::new(),
            team_ids: Vec::new(),
            search: None,
        }
    }

    /// Trimmed, non-empty search term.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Lower-cased `LIKE` pattern for the search term, with `\` escaping
    /// the wildcard characters.
    pub fn search_pattern(&self) -> Option<String> {
        self.search_term().map(|term| {
            let mut pattern = String::with_capacity(term.len() + 2);
            pattern.push('%');
            for c in term.to_lowercase().chars() {
                if matches!(c, '%' | '_' | '\\') {
                    pattern.push('\\');
                }
                pattern.push(c);
            }
            pattern.push('%');
            pattern
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_everything_admits_all_teams() {
        let vis = TeamVisibility::Everything;
        assert!(vis.admits(None));
        assert!(vis.admits(Some(TeamId::new())));
    }

    #[test]
    fn test_team_member_visibility() {
        let own = TeamId::new();
        let vis = TeamVisibility::OrganizationWideAnd(Some(own));
        assert!(vis.admits(None));
        assert!(vis.admits(Some(own)));
        assert!(!vis.admits(Some(TeamId::new())));
    }

    #[test]
    fn test_teamless_viewer_sees_org_wide_only() {
        let vis = TeamVisibility::OrganizationWideAnd(None);
        assert!(vis.admits(None));
        assert!(!vis.admits(Some(TeamId::new())));
    }

    #[test]
    fn test_blank_search_is_ignored() {
        let mut q = ContentQuery::new(OrganizationId::new(), TeamVisibility::Everything);
        q.search = Some("   ".to_string());
        assert_eq!(q.search_term(), None);
        q.search = Some(" Rust ".to_string());
        assert_eq!(q.search_term(), Some("Rust"));
    }

    #[test]
    fn test_search_pattern_escapes_wildcards() {
        let mut q = ContentQuery::new(OrganizationId::new(), TeamVisibility::Everything);
        assert_eq!(q.search_pattern(), None);
        q.search = Some("Q3_100%".to_string());
        assert_eq!(q.search_pattern().as_deref(), Some("%q3\\_100\\%%"));
    }
}
