use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, verify_parent_task, verify_scope, verify_transitive_scope, OrgContext, RoleSet};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, AuditScope, RequestContext};
use crate::extract::{JsonBody, PathParams, QueryParams};
use crate::jwt::AuthUser;
use crate::models::project::Project;
use crate::models::task::{
    OrgTaskCreateRequest, OrgTaskListQuery, Task, TaskCreateRequest, TaskDetail, TaskListQuery, TaskStatus,
    TaskTransfer, TaskUpdateRequest, TransferKind,
};
use crate::routes::members::fetch_member;
use crate::routes::projects::fetch_project;
use crate::utils::{required_text, utc_now};

const DEFAULT_CURRENCY: &str = "USD";
const TASK_SELECT: &str = "SELECT t.* FROM tasks t JOIN projects p ON p.id = t.project_id";
const TASK_ORDER: &str = " ORDER BY t.priority ASC, t.deadline_dt IS NULL, t.deadline_dt ASC, t.created_at DESC";

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/projects/{project_id}/tasks",
    tag = "Tasks",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id"),
        TaskListQuery
    ),
    responses(
        (status = 200, description = "Tasks of the project, most urgent first", body = [Task]),
        (status = 403, description = "Not a member"),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn list_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
    QueryParams(query): QueryParams<TaskListQuery>,
) -> AppResult<Json<Vec<Task>>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    let mut select = QueryBuilder::<Sqlite>::new(TASK_SELECT);
    push_scope(&mut select, org_id, Some(project.id));
    match (query.parent_task_id, query.root_only.unwrap_or(false)) {
        (Some(parent), _) => {
            select.push(" AND t.parent_id = ");
            select.push_bind(parent);
        }
        (None, true) => {
            select.push(" AND t.parent_id IS NULL");
        }
        (None, false) => {}
    }
    push_filters(&mut select, query.status, query.assignee_id);
    select.push(TASK_ORDER);

    let tasks = select.build_query_as::<Task>().fetch_all(&state.pool).await?;
    Ok(Json(tasks))
}

#[utoipa::path(
    post,
    path = "/orgs/{org_id}/projects/{project_id}/tasks",
    tag = "Tasks",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id")
    ),
    request_body = TaskCreateRequest,
    responses(
        (status = 201, description = "Task created", body = Task),
        (status = 400, description = "Invalid parent task, non-member assignee or bad input"),
        (status = 403, description = "Not a member"),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
    JsonBody(payload): JsonBody<TaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    let task = insert_task(&state, &ctx, &project, payload, &headers).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/tasks",
    tag = "Tasks",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id"), OrgTaskListQuery),
    responses(
        (status = 200, description = "Tasks across every project of the organization", body = [Task]),
        (status = 403, description = "Not a member"),
        (status = 404, description = "Project filter names a project outside this organization")
    )
)]
pub async fn list_org_tasks(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams(org_id): PathParams<Uuid>,
    QueryParams(query): QueryParams<OrgTaskListQuery>,
) -> AppResult<Json<Vec<Task>>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;

    let project_id = match query.project_id {
        Some(project_id) => Some(verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?.id),
        None => None,
    };

    let mut select = QueryBuilder::<Sqlite>::new(TASK_SELECT);
    push_scope(&mut select, org_id, project_id);
    push_filters(&mut select, query.status, query.assignee_id);
    select.push(TASK_ORDER);

    let tasks = select.build_query_as::<Task>().fetch_all(&state.pool).await?;
    Ok(Json(tasks))
}

#[utoipa::path(
    post,
    path = "/orgs/{org_id}/tasks",
    tag = "Tasks",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = OrgTaskCreateRequest,
    responses(
        (status = 201, description = "Task created", body = Task),
        (status = 400, description = "Invalid parent task, non-member assignee or bad input"),
        (status = 403, description = "Not a member"),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn create_org_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams(org_id): PathParams<Uuid>,
    JsonBody(payload): JsonBody<OrgTaskCreateRequest>,
) -> AppResult<(StatusCode, Json<Task>)> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, payload.project_id).await?, org_id, "project")?;

    let task = insert_task(&state, &ctx, &project, payload.task, &headers).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/projects/{project_id}/tasks/{task_id}",
    tag = "Tasks",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id"),
        ("task_id" = Uuid, Path, description = "Task id")
    ),
    responses(
        (status = 200, description = "Task with its hand-over history", body = TaskDetail),
        (status = 404, description = "No such task in this project")
    )
)]
pub async fn get_task(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams((org_id, project_id, task_id)): PathParams<(Uuid, Uuid, Uuid)>,
) -> AppResult<Json<TaskDetail>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let task = scoped_task(&state.pool, org_id, project_id, task_id).await?;

    let sub_task_count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM tasks WHERE parent_id = ?")
        .bind(task.id)
        .fetch_one(&state.pool)
        .await?;

    let transfers = sqlx::query_as::<_, TaskTransfer>(
        "SELECT id, task_id, kind, from_user_id, to_user_id, changed_by, timestamp FROM task_transfers WHERE task_id = ? ORDER BY timestamp DESC",
    )
    .bind(task.id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(TaskDetail {
        task,
        sub_task_count,
        transfers,
    }))
}

#[utoipa::path(
    patch,
    path = "/orgs/{org_id}/projects/{project_id}/tasks/{task_id}",
    tag = "Tasks",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id"),
        ("task_id" = Uuid, Path, description = "Task id")
    ),
    request_body = TaskUpdateRequest,
    responses(
        (status = 200, description = "Task updated", body = Task),
        (status = 400, description = "Invalid parent task, non-member assignee or bad input"),
        (status = 404, description = "No such task in this project")
    )
)]
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, project_id, task_id)): PathParams<(Uuid, Uuid, Uuid)>,
    JsonBody(payload): JsonBody<TaskUpdateRequest>,
) -> AppResult<Json<Task>> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let old = scoped_task(&state.pool, org_id, project_id, task_id).await?;
    let mut task = old.clone();
    let now = utc_now();

    match payload.parent_id {
        Some(Some(parent_id)) => {
            verify_parent_task(fetch_task(&state.pool, parent_id).await?, task.project_id)?;
            if would_cycle(&state.pool, task.id, parent_id).await? {
                return Err(AppError::validation("invalid parent task"));
            }
            task.parent_id = Some(parent_id);
        }
        Some(None) => task.parent_id = None,
        None => {}
    }
    if let Some(title) = payload.title.as_deref() {
        task.title = required_text(title, "title")?;
    }
    if let Some(description) = payload.description {
        task.description = description;
    }
    if let Some(task_type) = payload.task_type {
        task.task_type = task_type;
    }
    if let Some(status) = payload.status {
        task.status = status;
    }
    if let Some(priority) = payload.priority {
        task.priority = priority;
    }
    match payload.assignee_user_id {
        Some(Some(assignee)) => {
            ensure_org_member(&state.pool, org_id, assignee, "assignee_user_id").await?;
            if task.assignee_user_id != Some(assignee) {
                task.assignee_user_id = Some(assignee);
                task.assignment_dt = Some(now);
            }
        }
        Some(None) => {
            task.assignee_user_id = None;
            task.assignment_dt = None;
        }
        None => {}
    }
    match payload.reviewer_user_id {
        Some(Some(reviewer)) => {
            ensure_org_member(&state.pool, org_id, reviewer, "reviewer_user_id").await?;
            task.reviewer_user_id = Some(reviewer);
        }
        Some(None) => task.reviewer_user_id = None,
        None => {}
    }
    if let Some(start_dt) = payload.start_dt {
        task.start_dt = start_dt;
    }
    if let Some(end_dt) = payload.end_dt {
        task.end_dt = end_dt;
    }
    if let Some(deadline_dt) = payload.deadline_dt {
        task.deadline_dt = deadline_dt;
    }
    if let Some(budget_amount) = payload.budget_amount {
        validate_budget(budget_amount)?;
        task.budget_amount = budget_amount;
    }
    if let Some(currency) = payload.currency.as_deref() {
        task.currency = required_text(currency, "currency")?;
    }
    validate_window(task.start_dt, task.end_dt)?;
    task.updated_at = now;

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "UPDATE tasks SET parent_id = ?, title = ?, description = ?, type = ?, status = ?, priority = ?, assignee_user_id = ?, reviewer_user_id = ?, assignment_dt = ?, start_dt = ?, end_dt = ?, deadline_dt = ?, budget_amount = ?, currency = ?, updated_at = ? WHERE id = ? AND project_id = ?",
    )
    .bind(task.parent_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.task_type)
    .bind(task.status)
    .bind(task.priority)
    .bind(task.assignee_user_id)
    .bind(task.reviewer_user_id)
    .bind(task.assignment_dt)
    .bind(task.start_dt)
    .bind(task.end_dt)
    .bind(task.deadline_dt)
    .bind(task.budget_amount)
    .bind(&task.currency)
    .bind(task.updated_at)
    .bind(task.id)
    .bind(task.project_id)
    .execute(&mut *tx)
    .await?;

    let handovers = [
        (TransferKind::Assignee, old.assignee_user_id, task.assignee_user_id),
        (TransferKind::Reviewer, old.reviewer_user_id, task.reviewer_user_id),
    ];
    for (kind, from, to) in handovers {
        if from == to {
            continue;
        }
        sqlx::query(
            "INSERT INTO task_transfers (id, task_id, kind, from_user_id, to_user_id, changed_by, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(task.id)
        .bind(kind)
        .bind(from)
        .bind(to)
        .bind(ctx.user_id())
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let action = if old.status != task.status && task.status == TaskStatus::Done {
        "completed"
    } else if old.assignee_user_id != task.assignee_user_id {
        "assigned"
    } else {
        "updated"
    };
    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(org_id, task.project_id),
        action,
        ctx.user_id(),
        &task,
        Some(&old),
        RequestContext::from_headers(&headers),
    );

    Ok(Json(task))
}

#[utoipa::path(
    delete,
    path = "/orgs/{org_id}/projects/{project_id}/tasks/{task_id}",
    tag = "Tasks",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id"),
        ("task_id" = Uuid, Path, description = "Task id")
    ),
    responses(
        (status = 204, description = "Task and its sub-tasks deleted"),
        (status = 403, description = "Not ADMIN/MAINTAINER"),
        (status = 404, description = "No such task in this project")
    )
)]
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, project_id, task_id)): PathParams<(Uuid, Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;
    let task = scoped_task(&state.pool, org_id, project_id, task_id).await?;

    sqlx::query("DELETE FROM tasks WHERE id = ? AND project_id = ?")
        .bind(task.id)
        .bind(task.project_id)
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(org_id, task.project_id),
        "deleted",
        ctx.user_id(),
        &task,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok(StatusCode::NO_CONTENT)
}

async fn insert_task(
    state: &AppState,
    ctx: &OrgContext,
    project: &Project,
    payload: TaskCreateRequest,
    headers: &HeaderMap,
) -> AppResult<Task> {
    let title = required_text(&payload.title, "title")?;
    validate_budget(payload.budget_amount)?;
    validate_window(payload.start_dt, payload.end_dt)?;

    if let Some(parent_id) = payload.parent_id {
        verify_parent_task(fetch_task(&state.pool, parent_id).await?, project.id)?;
    }
    if let Some(assignee) = payload.assignee_user_id {
        ensure_org_member(&state.pool, project.org_id, assignee, "assignee_user_id").await?;
    }
    if let Some(reviewer) = payload.reviewer_user_id {
        ensure_org_member(&state.pool, project.org_id, reviewer, "reviewer_user_id").await?;
    }

    let now = utc_now();
    let task = Task {
        id: Uuid::new_v4(),
        project_id: project.id,
        parent_id: payload.parent_id,
        title,
        description: payload.description,
        task_type: payload.task_type.unwrap_or_default(),
        status: payload.status.unwrap_or_default(),
        priority: payload.priority.unwrap_or_default(),
        assignee_user_id: payload.assignee_user_id,
        reviewer_user_id: payload.reviewer_user_id,
        assignment_dt: payload.assignee_user_id.map(|_| now),
        start_dt: payload.start_dt,
        end_dt: payload.end_dt,
        deadline_dt: payload.deadline_dt,
        budget_amount: payload.budget_amount,
        currency: payload.currency.unwrap_or_else(|| project.currency.clone()),
        created_by: ctx.user_id(),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO tasks (id, project_id, parent_id, title, description, type, status, priority, assignee_user_id, reviewer_user_id, assignment_dt, start_dt, end_dt, deadline_dt, budget_amount, currency, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(task.id)
    .bind(task.project_id)
    .bind(task.parent_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.task_type)
    .bind(task.status)
    .bind(task.priority)
    .bind(task.assignee_user_id)
    .bind(task.reviewer_user_id)
    .bind(task.assignment_dt)
    .bind(task.start_dt)
    .bind(task.end_dt)
    .bind(task.deadline_dt)
    .bind(task.budget_amount)
    .bind(&task.currency)
    .bind(task.created_by)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(&state.pool)
    .await?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(project.org_id, project.id),
        "created",
        ctx.user_id(),
        &task,
        None,
        RequestContext::from_headers(headers),
    );

    Ok(task)
}

pub(crate) async fn fetch_task(pool: &SqlitePool, task_id: Uuid) -> AppResult<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(pool)
        .await?;
    Ok(task)
}

/// Task addressed by a nested path: must sit in `project_id`, which must belong to `org_id`.
pub(crate) async fn scoped_task(pool: &SqlitePool, org_id: Uuid, project_id: Uuid, task_id: Uuid) -> AppResult<Task> {
    verify_transitive_scope(pool, fetch_task(pool, task_id).await?, org_id, Some(project_id), "task").await
}

/// Org scope first; caller filters can only narrow it.
fn push_scope(qb: &mut QueryBuilder<'_, Sqlite>, org_id: Uuid, project_id: Option<Uuid>) {
    qb.push(" WHERE p.org_id = ");
    qb.push_bind(org_id);
    if let Some(project_id) = project_id {
        qb.push(" AND t.project_id = ");
        qb.push_bind(project_id);
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, status: Option<TaskStatus>, assignee: Option<Uuid>) {
    if let Some(status) = status {
        qb.push(" AND t.status = ");
        qb.push_bind(status);
    }
    if let Some(assignee) = assignee {
        qb.push(" AND t.assignee_user_id = ");
        qb.push_bind(assignee);
    }
}

async fn ensure_org_member(pool: &SqlitePool, org_id: Uuid, user_id: Uuid, field: &str) -> AppResult<()> {
    match fetch_member(pool, org_id, user_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::validation(format!("{field} must be a member of the organization"))),
    }
}

/// True when `candidate_parent` is `task_id` itself or one of its descendants.
async fn would_cycle(pool: &SqlitePool, task_id: Uuid, candidate_parent: Uuid) -> AppResult<bool> {
    let hits: i64 = sqlx::query_scalar(
        r#"
        WITH RECURSIVE subtree(id) AS (
            SELECT id FROM tasks WHERE id = ?
            UNION
            SELECT t.id FROM tasks t JOIN subtree s ON t.parent_id = s.id
        )
        SELECT COUNT(1) FROM subtree WHERE id = ?
        "#,
    )
    .bind(task_id)
    .bind(candidate_parent)
    .fetch_one(pool)
    .await?;

    Ok(hits > 0)
}

fn validate_budget(budget: Option<f64>) -> AppResult<()> {
    match budget {
        Some(value) if !value.is_finite() || value < 0.0 => Err(AppError::validation("budget_amount must be a non-negative number")),
        _ => Ok(()),
    }
}

fn validate_window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> AppResult<()> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(AppError::validation("end_dt must not precede start_dt")),
        _ => Ok(()),
    }
}
