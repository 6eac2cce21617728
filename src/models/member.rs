use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::authz::{OrgRole, OrgScoped};
use crate::models::user::UserSummary;
use crate::pagination::SortOrder;

/// Membership joined with the member's public profile.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct OrgMember {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub role: OrgRole,
    pub joined_at: DateTime<Utc>,
}

impl OrgScoped for OrgMember {
    fn scope_org_id(&self) -> Uuid {
        self.org_id
    }
}

impl crate::events::Loggable for OrgMember {
    fn entity_type() -> &'static str { "member" }
    fn subject_id(&self) -> Uuid { self.user_id }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Revoked,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct OrgInvite {
    pub id: Uuid,
    pub org_id: Uuid,
    pub email: String,
    pub role: OrgRole,
    #[serde(skip_serializing)]
    pub token: String,
    pub status: InviteStatus,
    pub expires_at: DateTime<Utc>,
    pub invited_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl OrgScoped for OrgInvite {
    fn scope_org_id(&self) -> Uuid {
        self.org_id
    }
}

impl crate::events::Loggable for OrgInvite {
    fn entity_type() -> &'static str { "invite" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MemberListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Matches name or email.
    pub search: Option<String>,
    /// `joined_at` (default), `name`, `email` or `role`.
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub role: Option<OrgRole>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InviteRequest {
    #[schema(example = "grace@example.com")]
    pub email: String,
    /// `MAINTAINER` or `MEMBER`.
    pub role: OrgRole,
}

/// Result of an invite: an existing account is added straight away.
#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InviteOutcome {
    Added { member: OrgMember },
    Invited { invite: OrgInvite, token: String },
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AcceptInviteRequest {
    pub token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MemberSearchRequest {
    #[schema(example = "grace@example.com")]
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MemberSearchResponse {
    pub user: Option<UserSummary>,
    pub exists: bool,
    pub is_member: bool,
    pub member_role: Option<OrgRole>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MemberRoleUpdateRequest {
    pub role: OrgRole,
}
