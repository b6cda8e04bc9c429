//! Team types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{OrganizationId, TeamId, UserId};

/// Team record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String, // unique per organization, case-insensitive
    pub description: String,
    pub avatar: Option<String>,
    pub organization_id: OrganizationId,
    pub leader_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a team
#[derive(Clone, Debug)]
pub struct CreateTeamParams {
    pub organization_id: OrganizationId,
    pub name: String,
    pub description: String,
    pub leader_id: Option<UserId>,
}

/// Editable team fields; `None` leaves the column untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TeamChanges {
    pub name: Option<String>,
    pub description: Option<String>,
}
