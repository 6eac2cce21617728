use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::authz::OrgScoped;
use crate::pagination::SortOrder;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Team {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrgScoped for Team {
    fn scope_org_id(&self) -> Uuid {
        self.org_id
    }
}

impl crate::events::Loggable for Team {
    fn entity_type() -> &'static str { "team" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct TeamWithCounts {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub member_count: i64,
    pub project_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct TeamMember {
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    /// Free-text role inside the team, e.g. "lead".
    pub role: Option<String>,
    pub joined_at: DateTime<Utc>,
}

impl crate::events::Loggable for TeamMember {
    fn entity_type() -> &'static str { "team_member" }
    fn subject_id(&self) -> Uuid { self.user_id }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TeamCreateRequest {
    #[schema(example = "Platform")]
    pub name: String,
    #[schema(example = "Owns CI and the deploy pipeline")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TeamUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TeamMemberAddRequest {
    pub user_id: Uuid,
    #[schema(example = "lead")]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TeamMemberListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    /// `joined_at` (default), `name` or `role`.
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TeamMemberRemoveQuery {
    pub user_id: Uuid,
}
