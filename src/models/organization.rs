use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{OrgRole, OrgScoped};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub legal_name: String,
    pub country: String,
    pub address: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub status: OrgStatus,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrgScoped for Organization {
    fn scope_org_id(&self) -> Uuid {
        self.id
    }
}

impl crate::events::Loggable for Organization {
    fn entity_type() -> &'static str { "organization" }
    fn subject_id(&self) -> Uuid { self.id }
}

/// Row of `GET /orgs`: the organization, the caller's role and headline counts.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct OrgSummary {
    pub id: Uuid,
    pub name: String,
    pub status: OrgStatus,
    pub role: OrgRole,
    pub member_count: i64,
    pub team_count: i64,
    pub project_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrganizationCreateRequest {
    #[schema(example = "Acme")]
    pub name: String,
    #[schema(example = "Acme Holdings Ltd")]
    pub legal_name: String,
    #[schema(example = "NZ")]
    pub country: String,
    #[schema(example = "1 Queen St, Auckland")]
    pub address: String,
    #[schema(example = "ops@acme.test")]
    pub contact_email: String,
    #[schema(example = "+64 9 000 0000")]
    pub contact_phone: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrganizationUpdateRequest {
    pub name: Option<String>,
    pub legal_name: Option<String>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub status: Option<OrgStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrgRoleResponse {
    pub org_id: Uuid,
    pub role: OrgRole,
}
