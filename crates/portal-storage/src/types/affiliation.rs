//! Explicit membership links.

use serde::{Deserialize, Serialize};

/// Whether a user belongs to an organization or team.
///
/// Serialized as the bare id or `null`, which is how the links appear in
/// responses and in the nullable foreign-key columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<T>", into = "Option<T>")]
#[serde(bound(
    serialize = "T: Clone + Serialize",
    deserialize = "T: Deserialize<'de>"
))]
pub enum Affiliation<T> {
    Affiliated(T),
    #[default]
    Unaffiliated,
}

impl<T> Affiliation<T> {
    pub fn id(&self) -> Option<&T> {
        match self {
            Affiliation::Affiliated(id) => Some(id),
            Affiliation::Unaffiliated => None,
        }
    }

    pub fn is_affiliated(&self) -> bool {
        matches!(self, Affiliation::Affiliated(_))
    }
}

impl<T: PartialEq> Affiliation<T> {
    /// True only when both sides are affiliated with the same id.
    pub fn shares(&self, other: &Affiliation<T>) -> bool {
        match (self, other) {
            (Affiliation::Affiliated(a), Affiliation::Affiliated(b)) => a == b,
            _ => false,
        }
    }

    pub fn is(&self, id: &T) -> bool {
        matches!(self, Affiliation::Affiliated(own) if own == id)
    }
}

impl<T: Copy> Affiliation<T> {
    pub fn get(&self) -> Option<T> {
        self.id().copied()
    }
}

impl<T> From<Option<T>> for Affiliation<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(id) => Affiliation::Affiliated(id),
            None => Affiliation::Unaffiliated,
        }
    }
}

impl<T> From<Affiliation<T>> for Option<T> {
    fn from(value: Affiliation<T>) -> Self {
        match value {
            Affiliation::Affiliated(id) => Some(id),
            Affiliation::Unaffiliated => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shares_requires_both_affiliated() {
        let a: Affiliation<u32> = Affiliation::Affiliated(1);
        let b: Affiliation<u32> = Affiliation::Affiliated(1);
        let c: Affiliation<u32> = Affiliation::Affiliated(2);
        let none: Affiliation<u32> = Affiliation::Unaffiliated;

        assert!(a.shares(&b));
        assert!(!a.shares(&c));
        assert!(!a.shares(&none));
        assert!(!none.shares(&none));
    }

    #[test]
    fn test_option_conversions() {
        assert_eq!(Affiliation::from(Some(7u32)), Affiliation::Affiliated(7));
        assert_eq!(Affiliation::<u32>::from(None), Affiliation::Unaffiliated);
        assert_eq!(Option::from(Affiliation::Affiliated(3u32)), Some(3));
    }

    #[test]
    fn test_serde_as_nullable() {
        let json = serde_json::to_string(&Affiliation::Affiliated(5u32)).unwrap();
        assert_eq!(json, "5");
        let json = serde_json::to_string(&Affiliation::<u32>::Unaffiliated).unwrap();
        assert_eq!(json, "null");
        let parsed: Affiliation<u32> = serde_json::from_str("null").unwrap();
        assert_eq!(parsed, Affiliation::Unaffiliated);
    }
}
