use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::authz::OrgScoped;
use crate::errors::AppError;
use crate::pagination::SortOrder;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditLog {
    pub id: Uuid,
    pub org_id: Uuid,
    pub project_id: Option<Uuid>,
    pub actor_user_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    /// `{"new": ..., "old": ...}`
    #[schema(value_type = Object)]
    pub diff: Value,
    pub severity: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub seq: i64,
    pub prev_hash: Option<String>,
    pub hash: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbAuditLog {
    pub id: Uuid,
    pub org_id: Uuid,
    pub project_id: Option<Uuid>,
    pub actor_user_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub diff_json: String,
    pub severity: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub seq: i64,
    pub prev_hash: Option<String>,
    pub hash: String,
}

impl TryFrom<DbAuditLog> for AuditLog {
    type Error = AppError;

    fn try_from(value: DbAuditLog) -> Result<Self, Self::Error> {
        let diff = serde_json::from_str(&value.diff_json)
            .map_err(|err| AppError::internal(format!("corrupt audit diff {}: {err}", value.id)))?;

        Ok(AuditLog {
            id: value.id,
            org_id: value.org_id,
            project_id: value.project_id,
            actor_user_id: value.actor_user_id,
            entity_type: value.entity_type,
            entity_id: value.entity_id,
            action: value.action,
            diff,
            severity: value.severity,
            ip: value.ip,
            user_agent: value.user_agent,
            timestamp: value.timestamp,
            seq: value.seq,
            prev_hash: value.prev_hash,
            hash: value.hash,
        })
    }
}

impl OrgScoped for AuditLog {
    fn scope_org_id(&self) -> Uuid {
        self.org_id
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Matches action, entity type or the diff text.
    pub search: Option<String>,
    /// `timestamp` (default), `action` or `entity_type`.
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub actor_user_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}
