#[cfg(test)]
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use super::role::OrgRole;
use crate::errors::{AppError, AppResult};

/// Authenticated caller, as produced by an [`IdentityResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity {
    pub user_id: Uuid,
}

impl Identity {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }
}

/// The (organization, user, role) record that grants access to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Membership {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub role: OrgRole,
    pub joined_at: DateTime<Utc>,
}

/// Turns an opaque credential into an identity.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, credential: &str) -> AppResult<Identity>;
}

/// Resolves the caller, failing with `Unauthorized` when no credential was presented.
pub fn resolve_identity<R: IdentityResolver + ?Sized>(
    resolver: &R,
    credential: Option<&str>,
) -> AppResult<Identity> {
    let credential = credential
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::unauthorized("credential missing"))?;

    resolver.resolve(credential)
}

/// Lookup of the unique membership for an (organization, user) pair.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn find_membership(&self, org_id: Uuid, user_id: Uuid) -> AppResult<Option<Membership>>;
}

/// Map-backed membership store for unit tests, keyed by (org, user) so the pair stays unique.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct InMemoryMemberships {
    entries: HashMap<(Uuid, Uuid), Membership>,
}

#[cfg(test)]
impl InMemoryMemberships {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, org_id: Uuid, user_id: Uuid, role: OrgRole) -> Self {
        self.insert(org_id, user_id, role);
        self
    }

    /// Inserts or replaces the membership for the pair.
    pub fn insert(&mut self, org_id: Uuid, user_id: Uuid, role: OrgRole) {
        self.entries.insert(
            (org_id, user_id),
            Membership { org_id, user_id, role, joined_at: Utc::now() },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
#[async_trait]
impl MembershipStore for InMemoryMemberships {
    async fn find_membership(&self, org_id: Uuid, user_id: Uuid) -> AppResult<Option<Membership>> {
        Ok(self.entries.get(&(org_id, user_id)).cloned())
    }
}
