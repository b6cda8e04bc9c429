//! Organization role ladder.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role of a user within their organization.
///
/// Roles are totally ordered: `User < Employee < Manager < Admin < SuperAdmin`.
/// Compare with [`Role::at_least`] rather than raw discriminants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum Role {
    User = 0,
    Employee = 1,
    Manager = 2,
    Admin = 3,
    SuperAdmin = 4,
}

/// Error type for parsing Role from string or integer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRoleError(pub String);

impl std::fmt::Display for ParseRoleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid role: {}", self.0)
    }
}

impl std::error::Error for ParseRoleError {}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::User,
        Role::Employee,
        Role::Manager,
        Role::Admin,
        Role::SuperAdmin,
    ];

    /// Check if this role is the same as or above `other` on the ladder.
    pub fn at_least(self, other: Role) -> bool {
        self >= other
    }

    pub fn is_admin(self) -> bool {
        self.at_least(Role::Admin)
    }

    pub fn is_super_admin(self) -> bool {
        self == Role::SuperAdmin
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Employee => "employee",
            Role::Manager => "manager",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }
}

impl From<Role> for i64 {
    fn from(role: Role) -> Self {
        role.as_i64()
    }
}

impl TryFrom<i64> for Role {
    type Error = ParseRoleError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Role::User),
            1 => Ok(Role::Employee),
            2 => Ok(Role::Manager),
            3 => Ok(Role::Admin),
            4 => Ok(Role::SuperAdmin),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "employee" => Ok(Role::Employee),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            "super_admin" => Ok(Role::SuperAdmin),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
