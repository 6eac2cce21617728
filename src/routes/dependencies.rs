use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, verify_scope, RoleSet};
use crate::errors::{unique_violation_as, AppError, AppResult};
use crate::events::{log_activity_with_context, AuditScope, RequestContext};
use crate::extract::{JsonBody, PathParams};
use crate::jwt::AuthUser;
use crate::models::dependency::{DependencyCreateRequest, TaskDependency};
use crate::routes::projects::fetch_project;
use crate::routes::tasks::fetch_task;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/projects/{project_id}/dependencies",
    tag = "Tasks",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id")
    ),
    responses(
        (status = 200, description = "Dependencies between tasks of the project", body = [TaskDependency]),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn list_dependencies(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
) -> AppResult<Json<Vec<TaskDependency>>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    let deps = sqlx::query_as::<_, TaskDependency>(
        r#"
        SELECT d.id, d.task_id, d.blocked_by_task_id, d.created_at
        FROM task_dependencies d
        JOIN tasks t ON t.id = d.task_id
        WHERE t.project_id = ?
        ORDER BY d.created_at ASC
        "#,
    )
    .bind(project.id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(deps))
}

#[utoipa::path(
    post,
    path = "/orgs/{org_id}/projects/{project_id}/dependencies",
    tag = "Tasks",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id")
    ),
    request_body = DependencyCreateRequest,
    responses(
        (status = 201, description = "Dependency created", body = TaskDependency),
        (status = 400, description = "Task outside the project, self-dependency or cycle"),
        (status = 404, description = "No such project in this organization"),
        (status = 409, description = "Dependency already exists")
    )
)]
pub async fn create_dependency(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
    JsonBody(payload): JsonBody<DependencyCreateRequest>,
) -> AppResult<(StatusCode, Json<TaskDependency>)> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    if payload.task_id == payload.blocked_by_task_id {
        return Err(AppError::validation("a task cannot depend on itself"));
    }
    for task_id in [payload.task_id, payload.blocked_by_task_id] {
        match fetch_task(&state.pool, task_id).await? {
            Some(task) if task.project_id == project.id => {}
            _ => return Err(AppError::validation("both tasks must belong to this project")),
        }
    }

    if dependency_exists(&state.pool, payload.task_id, payload.blocked_by_task_id).await? {
        return Err(AppError::conflict("dependency already exists"));
    }
    if would_cycle(&state.pool, payload.task_id, payload.blocked_by_task_id).await? {
        return Err(AppError::validation("dependency would create a cycle"));
    }

    let dep = TaskDependency {
        id: Uuid::new_v4(),
        task_id: payload.task_id,
        blocked_by_task_id: payload.blocked_by_task_id,
        created_at: utc_now(),
    };

    sqlx::query("INSERT INTO task_dependencies (id, task_id, blocked_by_task_id, created_at) VALUES (?, ?, ?, ?)")
        .bind(dep.id)
        .bind(dep.task_id)
        .bind(dep.blocked_by_task_id)
        .bind(dep.created_at)
        .execute(&state.pool)
        .await
        .map_err(|err| unique_violation_as(err, AppError::conflict("dependency already exists")))?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(org_id, project.id),
        "created",
        ctx.user_id(),
        &dep,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok((StatusCode::CREATED, Json(dep)))
}

#[utoipa::path(
    delete,
    path = "/orgs/{org_id}/projects/{project_id}/dependencies/{dependency_id}",
    tag = "Tasks",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id"),
        ("dependency_id" = Uuid, Path, description = "Dependency id")
    ),
    responses(
        (status = 204, description = "Dependency removed"),
        (status = 404, description = "No such dependency in this project")
    )
)]
pub async fn delete_dependency(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, project_id, dependency_id)): PathParams<(Uuid, Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    let dep = sqlx::query_as::<_, TaskDependency>(
        r#"
        SELECT d.id, d.task_id, d.blocked_by_task_id, d.created_at
        FROM task_dependencies d
        JOIN tasks t ON t.id = d.task_id
        WHERE d.id = ? AND t.project_id = ?
        "#,
    )
    .bind(dependency_id)
    .bind(project.id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("dependency not found"))?;

    sqlx::query("DELETE FROM task_dependencies WHERE id = ?")
        .bind(dep.id)
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(org_id, project.id),
        "deleted",
        ctx.user_id(),
        &dep,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok(StatusCode::NO_CONTENT)
}

async fn dependency_exists(pool: &SqlitePool, task_id: Uuid, blocked_by: Uuid) -> AppResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM task_dependencies WHERE task_id = ? AND blocked_by_task_id = ?")
        .bind(task_id)
        .bind(blocked_by)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

/// True when `blocked_by` already (transitively) waits on `task_id`.
async fn would_cycle(pool: &SqlitePool, task_id: Uuid, blocked_by: Uuid) -> AppResult<bool> {
    let hit: bool = sqlx::query_scalar(
        r#"
        WITH RECURSIVE reach(node) AS (
            SELECT blocked_by_task_id FROM task_dependencies WHERE task_id = ?
            UNION
            SELECT d.blocked_by_task_id FROM task_dependencies d JOIN reach r ON d.task_id = r.node
        )
        SELECT EXISTS(SELECT 1 FROM reach WHERE node = ?)
        "#,
    )
    .bind(blocked_by)
    .bind(task_id)
    .fetch_one(pool)
    .await?;

    Ok(hit)
}
