use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::authz::ProjectScoped;
use crate::models::nullable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Bug,
    Feature,
    #[default]
    Task,
    Change,
    Research,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Backlog,
    Todo,
    InProgress,
    Blocked,
    Review,
    Done,
    Archived,
}

/// P0 is the most urgent; listings sort ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type, ToSchema)]
pub enum TaskPriority {
    P0,
    P1,
    P2,
    P3,
    #[default]
    P4,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assignee_user_id: Option<Uuid>,
    pub reviewer_user_id: Option<Uuid>,
    pub assignment_dt: Option<DateTime<Utc>>,
    #[schema(format = DateTime, example = "2025-10-01T09:00:00Z")]
    pub start_dt: Option<DateTime<Utc>>,
    #[schema(format = DateTime, example = "2025-10-15T17:00:00Z")]
    pub end_dt: Option<DateTime<Utc>>,
    pub deadline_dt: Option<DateTime<Utc>>,
    pub budget_amount: Option<f64>,
    pub currency: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectScoped for Task {
    fn scope_project_id(&self) -> Uuid {
        self.project_id
    }
}

impl crate::events::Loggable for Task {
    fn entity_type() -> &'static str { "task" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferKind {
    Assignee,
    Reviewer,
}

/// Hand-over of a task's assignee or reviewer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct TaskTransfer {
    pub id: Uuid,
    pub task_id: Uuid,
    pub kind: TransferKind,
    pub from_user_id: Option<Uuid>,
    pub to_user_id: Option<Uuid>,
    pub changed_by: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub sub_task_count: i64,
    pub transfers: Vec<TaskTransfer>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TaskCreateRequest {
    #[schema(example = "Write onboarding guide")]
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_user_id: Option<Uuid>,
    pub reviewer_user_id: Option<Uuid>,
    pub start_dt: Option<DateTime<Utc>>,
    pub end_dt: Option<DateTime<Utc>>,
    pub deadline_dt: Option<DateTime<Utc>>,
    pub budget_amount: Option<f64>,
    pub currency: Option<String>,
}

/// Org-wide create: the project travels in the body.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OrgTaskCreateRequest {
    pub project_id: Uuid,
    #[serde(flatten)]
    pub task: TaskCreateRequest,
}

/// Absent fields stay unchanged; an explicit `null` clears the nullable ones.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaskUpdateRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    /// `null` turns the task into a root task.
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<Uuid>)]
    pub parent_id: Option<Option<Uuid>>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    /// `null` unassigns the task.
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<Uuid>)]
    pub assignee_user_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<Uuid>)]
    pub reviewer_user_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub start_dt: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub end_dt: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub deadline_dt: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable")]
    #[schema(value_type = Option<f64>)]
    pub budget_amount: Option<Option<f64>>,
    pub currency: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TaskListQuery {
    /// Children of this task.
    pub parent_task_id: Option<Uuid>,
    /// Only tasks without a parent.
    pub root_only: Option<bool>,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrgTaskListQuery {
    pub project_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub assignee_id: Option<Uuid>,
}
