use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Organization role held by a membership.
///
/// Variants are declared in ascending privilege so the derived `Ord` reads
/// `Member < Maintainer < Admin`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgRole {
    Member,
    Maintainer,
    Admin,
}

impl OrgRole {
    pub const ALL: [OrgRole; 3] = [OrgRole::Member, OrgRole::Maintainer, OrgRole::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Member => "MEMBER",
            OrgRole::Maintainer => "MAINTAINER",
            OrgRole::Admin => "ADMIN",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            OrgRole::Member => 0b001,
            OrgRole::Maintainer => 0b010,
            OrgRole::Admin => 0b100,
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit allow-list of roles for one operation.
///
/// Membership in the set is the only check. Nothing here promotes `Admin`
/// into a set that does not list it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoleSet(u8);

impl RoleSet {
    pub const ANY_MEMBER: RoleSet = RoleSet::of(&[OrgRole::Admin, OrgRole::Maintainer, OrgRole::Member]);
    pub const ELEVATED: RoleSet = RoleSet::of(&[OrgRole::Admin, OrgRole::Maintainer]);
    pub const ADMIN_ONLY: RoleSet = RoleSet::of(&[OrgRole::Admin]);

    pub const fn of(roles: &[OrgRole]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < roles.len() {
            bits |= roles[i].bit();
            i += 1;
        }
        RoleSet(bits)
    }

    pub const fn contains(self, role: OrgRole) -> bool {
        self.0 & role.bit() != 0
    }

    fn iter(self) -> impl Iterator<Item = OrgRole> {
        OrgRole::ALL.into_iter().rev().filter(move |r| self.contains(*r))
    }
}

#[cfg(test)]
impl RoleSet {
    pub(crate) const fn empty() -> Self {
        RoleSet(0)
    }

    /// Every role ranked at or above `min`, as an explicit set.
    fn at_least(min: OrgRole) -> Self {
        let roles: Vec<OrgRole> = OrgRole::ALL.into_iter().filter(|r| *r >= min).collect();
        RoleSet::of(&roles)
    }

    pub(crate) const fn with(self, role: OrgRole) -> Self {
        RoleSet(self.0 | role.bit())
    }

    fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|r| r.as_str()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_order() {
        assert!(OrgRole::Admin > OrgRole::Maintainer);
        assert!(OrgRole::Maintainer > OrgRole::Member);
    }

    #[test]
    fn named_sets() {
        assert!(RoleSet::ELEVATED.contains(OrgRole::Admin));
        assert!(RoleSet::ELEVATED.contains(OrgRole::Maintainer));
        assert!(!RoleSet::ELEVATED.contains(OrgRole::Member));
        assert!(RoleSet::ADMIN_ONLY.contains(OrgRole::Admin));
        assert!(!RoleSet::ADMIN_ONLY.contains(OrgRole::Maintainer));
        for role in OrgRole::ALL {
            assert!(RoleSet::ANY_MEMBER.contains(role));
        }
    }

    #[test]
    fn maintainer_only_set_excludes_admin() {
        let set = RoleSet::of(&[OrgRole::Maintainer]);
        assert!(!set.contains(OrgRole::Admin));
        assert!(set.with(OrgRole::Admin).contains(OrgRole::Admin));
    }

    #[test]
    fn at_least_builds_explicit_set() {
        assert_eq!(RoleSet::at_least(OrgRole::Maintainer), RoleSet::ELEVATED);
        assert_eq!(RoleSet::at_least(OrgRole::Member), RoleSet::ANY_MEMBER);
        assert_eq!(RoleSet::at_least(OrgRole::Admin), RoleSet::ADMIN_ONLY);
    }

    #[test]
    fn serde_uses_uppercase_names() {
        let json = serde_json::to_string(&OrgRole::Maintainer).unwrap();
        assert_eq!(json, "\"MAINTAINER\"");
        let role: OrgRole = serde_json::from_str("\"ADMIN\"").unwrap();
        assert_eq!(role, OrgRole::Admin);
    }

    #[test]
    fn display_lists_highest_first() {
        assert_eq!(RoleSet::ELEVATED.to_string(), "{ADMIN, MAINTAINER}");
        assert!(RoleSet::empty().is_empty());
    }
}
