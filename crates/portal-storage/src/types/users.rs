//! User types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Affiliation, OrganizationId, Role, TeamId, UserId};

/// User record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub email: String, // stored lower-cased
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub full_name: String,
    pub avatar: Option<String>, // blob name
    pub bio: String,
    pub phone: String,
    pub role: Role,
    pub organization: Affiliation<OrganizationId>,
    pub team: Affiliation<TeamId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// True when this user and `other` belong to the same organization.
    pub fn same_organization(&self, other: &User) -> bool {
        self.organization.shares(&other.organization)
    }
}

/// Parameters for creating a user
#[derive(Clone, Debug)]
pub struct CreateUserParams {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
}

/// Self-service profile fields; `None` leaves the column untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileChanges {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
}

impl ProfileChanges {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.bio.is_none() && self.phone.is_none()
    }
}
