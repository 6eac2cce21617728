use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::authz::{Membership, MembershipStore, ScopeResolver};
use crate::errors::AppResult;

#[async_trait]
impl MembershipStore for SqlitePool {
    async fn find_membership(&self, org_id: Uuid, user_id: Uuid) -> AppResult<Option<Membership>> {
        let membership = sqlx::query_as::<_, Membership>(
            "SELECT org_id, user_id, role, joined_at FROM org_members WHERE org_id = ? AND user_id = ?",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(self)
        .await?;

        Ok(membership)
    }
}

#[async_trait]
impl ScopeResolver for SqlitePool {
    async fn project_org(&self, project_id: Uuid) -> AppResult<Option<Uuid>> {
        let org_id = sqlx::query_scalar::<_, Uuid>("SELECT org_id FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(self)
            .await?;

        Ok(org_id)
    }
}
