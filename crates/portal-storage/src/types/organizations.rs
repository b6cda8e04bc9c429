//! Organization types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{OrganizationId, UserId};

/// Organization record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub description: String,
    pub avatar: Option<String>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating an organization
#[derive(Clone, Debug)]
pub struct CreateOrganizationParams {
    pub name: String,
    pub description: String,
    pub owner_id: UserId,
}

/// Editable organization fields; `None` leaves the column untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrganizationChanges {
    pub name: Option<String>,
    pub description: Option<String>,
}
