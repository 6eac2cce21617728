use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::authz::OrgScoped;
use crate::pagination::SortOrder;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct WorkSegment {
    pub id: Uuid,
    pub work_log_id: Uuid,
    pub start_dt: DateTime<Utc>,
    pub end_dt: DateTime<Utc>,
}

impl WorkSegment {
    pub fn minutes(&self) -> i64 {
        segment_minutes(self.start_dt, self.end_dt)
    }
}

/// Whole minutes between two instants, rounded down.
pub fn segment_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_minutes()
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct WorkLog {
    pub id: Uuid,
    pub org_id: Uuid,
    pub project_id: Uuid,
    pub task_id: Option<Uuid>,
    pub user_id: Uuid,
    pub note: Option<String>,
    pub total_duration_min: i64,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub segments: Vec<WorkSegment>,
}

impl OrgScoped for WorkLog {
    fn scope_org_id(&self) -> Uuid {
        self.org_id
    }
}

impl crate::events::Loggable for WorkLog {
    fn entity_type() -> &'static str { "work_log" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SegmentInput {
    #[schema(format = DateTime, example = "2025-10-01T09:00:00Z")]
    pub start_dt: DateTime<Utc>,
    #[schema(format = DateTime, example = "2025-10-01T10:30:00Z")]
    pub end_dt: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WorkLogCreateRequest {
    pub task_id: Option<Uuid>,
    pub note: Option<String>,
    pub segments: Vec<SegmentInput>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WorkLogListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Matches the author's name or email, or the note.
    pub search: Option<String>,
    /// `created_at` (default), `duration` or `user`.
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub user_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    /// Logs created at or after this instant.
    pub from: Option<DateTime<Utc>>,
    /// Logs created at or before this instant.
    pub to: Option<DateTime<Utc>>,
}
