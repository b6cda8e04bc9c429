//! Invite types.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{InviteId, OrganizationId, UserId};

/// Invite record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Invite {
    pub id: InviteId,
    pub token: String, // UUID v4 text, unique
    pub organization_id: OrganizationId,
    pub created_by: UserId,
    pub expires_at: DateTime<Utc>,
    pub max_uses: i64, // >= 1
    pub uses: i64,     // never exceeds max_uses
    pub created_at: DateTime<Utc>,
}

/// Redeemability of an invite at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteState {
    Active,
    Exhausted,
    Expired,
}

impl InviteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteState::Active => "active",
            InviteState::Exhausted => "exhausted",
            InviteState::Expired => "expired",
        }
    }
}

impl Invite {
    /// Classify the invite at `now`. Expiry wins over exhaustion.
    pub fn state(&self, now: DateTime<Utc>) -> InviteState {
        if now >= self.expires_at {
            InviteState::Expired
        } else if self.uses >= self.max_uses {
            InviteState::Exhausted
        } else {
            InviteState::Active
        }
    }

    pub fn remaining_uses(&self) -> i64 {
        (self.max_uses - self.uses).max(0)
    }
}

/// Parameters for creating an invite
#[derive(Clone, Debug)]
pub struct CreateInviteParams {
    pub token: String,
    pub organization_id: OrganizationId,
    pub created_by: UserId,
    pub expires_at: DateTime<Utc>,
    pub max_uses: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn invite(max_uses: i64, uses: i64, expires_in: Duration) -> Invite {
        let now = Utc::now();
        Invite {
            id: InviteId::new(),
            token: "t".to_string(),
            organization_id: OrganizationId::new(),
            created_by: UserId::new(),
            expires_at: now + expires_in,
            max_uses,
            uses,
            created_at: now,
        }
    }

    #[test]
    fn test_active_invite() {
        let inv = invite(2, 1, Duration::hours(1));
        assert_eq!(inv.state(Utc::now()), InviteState::Active);
        assert_eq!(inv.remaining_uses(), 1);
    }

    #[test]
    fn test_exhausted_invite() {
        let inv = invite(1, 1, Duration::hours(1));
        assert_eq!(inv.state(Utc::now()), InviteState::Exhausted);
        assert_eq!(inv.remaining_uses(), 0);
    }

    #[test]
    fn test_expiry_reported_before_exhaustion() {
        let inv = invite(1, 1, Duration::hours(-1));
        assert_eq!(inv.state(Utc::now()), InviteState::Expired);
    }

    #[test]
    fn test_expires_exactly_at_deadline() {
        let inv = invite(3, 0, Duration::hours(1));
        assert_eq!(inv.state(inv.expires_at), InviteState::Expired);
        assert_eq!(
            inv.state(inv.expires_at - Duration::seconds(1)),
            InviteState::Active
        );
    }
}
