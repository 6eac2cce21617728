use uuid::Uuid;

use super::principal::{Identity, Membership, MembershipStore};
use super::role::RoleSet;
use crate::errors::{AppError, AppResult};

/// Looks up the caller's membership in `org_id`.
///
/// Denies with `AccessDenied` when no membership exists. The answer is the
/// same whether or not the organization exists.
pub async fn resolve_membership<S: MembershipStore + ?Sized>(
    store: &S,
    identity: &Identity,
    org_id: Uuid,
) -> AppResult<Membership> {
    if org_id.is_nil() || identity.user_id.is_nil() {
        return Err(AppError::AccessDenied);
    }

    match store.find_membership(org_id, identity.user_id).await? {
        Some(membership) => {
            tracing::debug!(
                user_id = %identity.user_id,
                org_id = %org_id,
                role = %membership.role,
                "membership resolved"
            );
            Ok(membership)
        }
        None => {
            tracing::debug!(
                user_id = %identity.user_id,
                org_id = %org_id,
                "access denied: no membership"
            );
            Err(AppError::AccessDenied)
        }
    }
}

/// Resolves the membership, then checks its role against an explicit allow-list.
///
/// A member whose role is not listed gets `InsufficientPermissions`.
pub async fn require_role<S: MembershipStore + ?Sized>(
    store: &S,
    identity: &Identity,
    org_id: Uuid,
    allowed: RoleSet,
) -> AppResult<Membership> {
    let membership = resolve_membership(store, identity, org_id).await?;

    if !allowed.contains(membership.role) {
        tracing::debug!(
            user_id = %identity.user_id,
            org_id = %org_id,
            role = %membership.role,
            allowed = %allowed,
            "insufficient permissions"
        );
        return Err(AppError::InsufficientPermissions);
    }

    Ok(membership)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::principal::InMemoryMemberships;
    use crate::authz::role::OrgRole;

    fn fixture() -> (InMemoryMemberships, Uuid, Uuid, Uuid) {
        let org_a = Uuid::new_v4();
        let org_b = Uuid::new_v4();
        let user = Uuid::new_v4();
        let store = InMemoryMemberships::new().with(org_a, user, OrgRole::Member);
        (store, org_a, org_b, user)
    }

    #[tokio::test]
    async fn resolves_existing_membership() {
        let (store, org_a, _, user) = fixture();
        let m = resolve_membership(&store, &Identity::new(user), org_a).await.unwrap();
        assert_eq!(m.org_id, org_a);
        assert_eq!(m.user_id, user);
        assert_eq!(m.role, OrgRole::Member);
    }

    #[tokio::test]
    async fn other_org_is_access_denied() {
        let (store, _, org_b, user) = fixture();
        let err = resolve_membership(&store, &Identity::new(user), org_b).await.unwrap_err();
        assert!(matches!(err, AppError::AccessDenied));
    }

    #[tokio::test]
    async fn unknown_org_looks_like_foreign_org() {
        let (store, _, org_b, user) = fixture();
        let never_created = Uuid::new_v4();
        let a = resolve_membership(&store, &Identity::new(user), org_b).await.unwrap_err();
        let b = resolve_membership(&store, &Identity::new(user), never_created).await.unwrap_err();
        assert_eq!(a.kind(), b.kind());
        assert_eq!(a.to_string(), b.to_string());
    }

    #[tokio::test]
    async fn nil_ids_are_denied() {
        let (store, org_a, _, user) = fixture();
        assert!(matches!(
            resolve_membership(&store, &Identity::new(user), Uuid::nil()).await,
            Err(AppError::AccessDenied)
        ));
        assert!(matches!(
            resolve_membership(&store, &Identity::new(Uuid::nil()), org_a).await,
            Err(AppError::AccessDenied)
        ));
    }

    #[tokio::test]
    async fn require_role_propagates_access_denied() {
        let (store, _, org_b, user) = fixture();
        let err = require_role(&store, &Identity::new(user), org_b, RoleSet::ADMIN_ONLY)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AccessDenied));
    }

    #[tokio::test]
    async fn require_role_rejects_unlisted_role() {
        let (store, org_a, _, user) = fixture();
        let err = require_role(&store, &Identity::new(user), org_a, RoleSet::ELEVATED)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientPermissions));
    }

    #[tokio::test]
    async fn admin_is_not_implicitly_elevated() {
        let org = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let store = InMemoryMemberships::new().with(org, admin, OrgRole::Admin);
        let maintainers_only = RoleSet::of(&[OrgRole::Maintainer]);

        let err = require_role(&store, &Identity::new(admin), org, maintainers_only)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InsufficientPermissions));

        let ok = require_role(&store, &Identity::new(admin), org, maintainers_only.with(OrgRole::Admin)).await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn require_role_succeeds_iff_role_in_set() {
        let org = Uuid::new_v4();
        let sets = [
            RoleSet::empty(),
            RoleSet::ADMIN_ONLY,
            RoleSet::ELEVATED,
            RoleSet::ANY_MEMBER,
            RoleSet::of(&[OrgRole::Member]),
            RoleSet::of(&[OrgRole::Maintainer]),
            RoleSet::of(&[OrgRole::Admin, OrgRole::Member]),
        ];

        for role in OrgRole::ALL {
            let user = Uuid::new_v4();
            let store = InMemoryMemberships::new().with(org, user, role);
            for set in sets {
                let result = require_role(&store, &Identity::new(user), org, set).await;
                assert_eq!(result.is_ok(), set.contains(role), "role {role} set {set}");
            }
        }
    }
}
