//! Strongly-typed identifiers (avoid mixing UUIDs of different entities).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new time-ordered (UUID v7) identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

typed_id!(
    /// User identifier.
    UserId
);
typed_id!(
    /// Organization identifier.
    OrganizationId
);
typed_id!(
    /// Team identifier.
    TeamId
);
typed_id!(
    /// Invite identifier.
    InviteId
);
typed_id!(
    /// News post identifier.
    NewsId
);
typed_id!(
    /// Document identifier.
    DocumentId
);
typed_id!(
    /// Tag identifier.
    TagId
);
typed_id!(
    /// Task identifier.
    TaskId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_debug() {
        let uuid = Uuid::new_v4();
        let user_id = UserId(uuid);
        assert!(format!("{:?}", user_id).contains(&uuid.to_string()));
    }

    #[test]
    fn test_typed_ids_equality() {
        let uuid = Uuid::new_v4();
        assert_eq!(TeamId(uuid), TeamId(uuid));
        assert_ne!(TeamId(uuid), TeamId(Uuid::new_v4()));
    }

    #[test]
    fn test_new_ids_are_time_ordered() {
        let first = OrganizationId::new();
        let second = OrganizationId::new();
        assert!(first <= second);
        assert_eq!(first.0.get_version_num(), 7);
    }

    #[test]
    fn test_display_and_parse() {
        let id = InviteId::new();
        let parsed: InviteId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<InviteId>().is_err());
    }

    #[test]
    fn test_typed_ids_hash() {
        use std::collections::HashSet;

        let uuid = Uuid::new_v4();
        let mut set = HashSet::new();
        set.insert(TagId(uuid));
        assert!(set.contains(&TagId(uuid)));
    }

    #[test]
    fn test_serializes_as_plain_uuid() {
        let uuid = Uuid::new_v4();
        let json = serde_json::to_string(&NewsId(uuid)).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }
}
