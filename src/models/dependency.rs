use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// `task_id` cannot start until `blocked_by_task_id` is done.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct TaskDependency {
    pub id: Uuid,
    pub task_id: Uuid,
    pub blocked_by_task_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl crate::events::Loggable for TaskDependency {
    fn entity_type() -> &'static str { "dependency" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DependencyCreateRequest {
    pub task_id: Uuid,
    pub blocked_by_task_id: Uuid,
}
