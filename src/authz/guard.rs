use uuid::Uuid;

use super::evaluator::{require_role, resolve_membership};
use super::principal::{Identity, Membership, MembershipStore};
use super::role::{OrgRole, RoleSet};
use crate::errors::AppResult;

/// What a handler holds once the caller has been admitted to an organization.
#[derive(Debug, Clone)]
pub struct OrgContext {
    pub identity: Identity,
    pub membership: Membership,
}

impl OrgContext {
    pub fn org_id(&self) -> Uuid {
        self.membership.org_id
    }

    pub fn user_id(&self) -> Uuid {
        self.identity.user_id
    }

    pub fn role(&self) -> OrgRole {
        self.membership.role
    }
}

/// Admits `identity` to `org_id` under an explicit role set.
///
/// Runs before any entity is fetched, so a non-member never learns whether
/// the target exists.
pub async fn authorize<S: MembershipStore + ?Sized>(
    store: &S,
    identity: &Identity,
    org_id: Uuid,
    allowed: RoleSet,
) -> AppResult<OrgContext> {
    let membership = if allowed == RoleSet::ANY_MEMBER {
        resolve_membership(store, identity, org_id).await?
    } else {
        require_role(store, identity, org_id, allowed).await?
    };

    Ok(OrgContext { identity: *identity, membership })
}
