use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, verify_parent_project, verify_scope, RoleSet};
use crate::errors::{unique_violation_as, AppError, AppResult};
use crate::events::{log_activity_with_context, AuditScope, RequestContext};
use crate::extract::{JsonBody, PathParams, QueryParams};
use crate::jwt::AuthUser;
use crate::models::project::{
    Project, ProjectCreateRequest, ProjectDetail, ProjectListQuery, ProjectStatus, ProjectUpdateRequest,
};
use crate::utils::{required_text, utc_now};

const DEFAULT_CURRENCY: &str = "USD";
const PROJECT_COLUMNS: &str = "id, org_id, parent_id, name, code, description, status, start_date, deadline, budget_total, currency, created_by, created_at, updated_at";

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/projects",
    tag = "Projects",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id"), ProjectListQuery),
    responses(
        (status = 200, description = "Projects at one level of the hierarchy", body = [Project]),
        (status = 403, description = "Not a member")
    )
)]
pub async fn list_projects(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams(org_id): PathParams<Uuid>,
    QueryParams(query): QueryParams<ProjectListQuery>,
) -> AppResult<Json<Vec<Project>>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;

    let sql = match query.parent {
        Some(_) => format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE org_id = ? AND parent_id = ? ORDER BY created_at DESC"),
        None => format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE org_id = ? AND parent_id IS NULL ORDER BY created_at DESC"),
    };

    let mut select = sqlx::query_as::<_, Project>(&sql).bind(org_id);
    if let Some(parent) = query.parent {
        select = select.bind(parent);
    }
    let projects = select.fetch_all(&state.pool).await?;

    Ok(Json(projects))
}

#[utoipa::path(
    post,
    path = "/orgs/{org_id}/projects",
    tag = "Projects",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = ProjectCreateRequest,
    responses(
        (status = 201, description = "Project created", body = Project),
        (status = 400, description = "Invalid parent project, duplicate code or bad input"),
        (status = 403, description = "Not a member")
    )
)]
pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams(org_id): PathParams<Uuid>,
    JsonBody(payload): JsonBody<ProjectCreateRequest>,
) -> AppResult<(StatusCode, Json<Project>)> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;

    let name = required_text(&payload.name, "name")?;
    let code = required_text(&payload.code, "code")?;
    validate_budget(payload.budget_total)?;
    validate_window(payload.start_date, payload.deadline)?;

    if let Some(parent_id) = payload.parent_id {
        verify_parent_project(fetch_project(&state.pool, parent_id).await?, org_id)?;
    }
    ensure_code_free(&state.pool, org_id, &code, None).await?;

    let now = utc_now();
    let project = Project {
        id: Uuid::new_v4(),
        org_id,
        parent_id: payload.parent_id,
        name,
        code,
        description: payload.description,
        status: payload.status.unwrap_or_default(),
        start_date: payload.start_date,
        deadline: payload.deadline,
        budget_total: payload.budget_total,
        currency: payload.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
        created_by: ctx.user_id(),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO projects (id, org_id, parent_id, name, code, description, status, start_date, deadline, budget_total, currency, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(project.id)
    .bind(project.org_id)
    .bind(project.parent_id)
    .bind(&project.name)
    .bind(&project.code)
    .bind(&project.description)
    .bind(project.status)
    .bind(project.start_date)
    .bind(project.deadline)
    .bind(project.budget_total)
    .bind(&project.currency)
    .bind(project.created_by)
    .bind(project.created_at)
    .bind(project.updated_at)
    .execute(&state.pool)
    .await
    .map_err(|err| unique_violation_as(err, duplicate_code()))?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(org_id, project.id),
        "created",
        ctx.user_id(),
        &project,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok((StatusCode::CREATED, Json(project)))
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/projects/{project_id}",
    tag = "Projects",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id")
    ),
    responses(
        (status = 200, description = "Project with cost roll-ups", body = ProjectDetail),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn get_project(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
) -> AppResult<Json<ProjectDetail>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    let (expenses, budget_adds): (f64, f64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(CASE WHEN type = 'EXPENSE' THEN amount END), 0.0),
               COALESCE(SUM(CASE WHEN type = 'BUDGET_ADD' THEN amount END), 0.0)
        FROM transactions
        WHERE org_id = ? AND project_id = ?
        "#,
    )
    .bind(org_id)
    .bind(project.id)
    .fetch_one(&state.pool)
    .await?;

    let sub_project_count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM projects WHERE org_id = ? AND parent_id = ?")
        .bind(org_id)
        .bind(project.id)
        .fetch_one(&state.pool)
        .await?;

    let task_count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM tasks WHERE project_id = ?")
        .bind(project.id)
        .fetch_one(&state.pool)
        .await?;

    let total_budget = project.budget_total.unwrap_or(0.0) + budget_adds;

    Ok(Json(ProjectDetail {
        project,
        sub_project_count,
        task_count,
        total_cost: expenses,
        total_budget,
    }))
}

#[utoipa::path(
    patch,
    path = "/orgs/{org_id}/projects/{project_id}",
    tag = "Projects",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id")
    ),
    request_body = ProjectUpdateRequest,
    responses(
        (status = 200, description = "Project updated", body = Project),
        (status = 400, description = "Invalid parent project, duplicate code or bad input"),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn update_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
    JsonBody(payload): JsonBody<ProjectUpdateRequest>,
) -> AppResult<Json<Project>> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let old = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;
    let mut project = old.clone();

    match payload.parent_id {
        Some(Some(parent_id)) => {
            verify_parent_project(fetch_project(&state.pool, parent_id).await?, org_id)?;
            if would_cycle(&state.pool, project.id, parent_id).await? {
                return Err(AppError::validation("invalid parent project"));
            }
            project.parent_id = Some(parent_id);
        }
        Some(None) => project.parent_id = None,
        None => {}
    }
    if let Some(name) = payload.name.as_deref() {
        project.name = required_text(name, "name")?;
    }
    if let Some(code) = payload.code.as_deref() {
        let code = required_text(code, "code")?;
        ensure_code_free(&state.pool, org_id, &code, Some(project.id)).await?;
        project.code = code;
    }
    if let Some(description) = payload.description {
        project.description = description;
    }
    if let Some(status) = payload.status {
        project.status = status;
    }
    if let Some(start_date) = payload.start_date {
        project.start_date = start_date;
    }
    if let Some(deadline) = payload.deadline {
        project.deadline = deadline;
    }
    if let Some(budget_total) = payload.budget_total {
        validate_budget(budget_total)?;
        project.budget_total = budget_total;
    }
    if let Some(currency) = payload.currency.as_deref() {
        project.currency = required_text(currency, "currency")?;
    }
    validate_window(project.start_date, project.deadline)?;
    project.updated_at = utc_now();

    sqlx::query(
        "UPDATE projects SET parent_id = ?, name = ?, code = ?, description = ?, status = ?, start_date = ?, deadline = ?, budget_total = ?, currency = ?, updated_at = ? WHERE id = ? AND org_id = ?",
    )
    .bind(project.parent_id)
    .bind(&project.name)
    .bind(&project.code)
    .bind(&project.description)
    .bind(project.status)
    .bind(project.start_date)
    .bind(project.deadline)
    .bind(project.budget_total)
    .bind(&project.currency)
    .bind(project.updated_at)
    .bind(project.id)
    .bind(org_id)
    .execute(&state.pool)
    .await
    .map_err(|err| unique_violation_as(err, duplicate_code()))?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(org_id, project.id),
        if old.status != project.status && project.status == ProjectStatus::Completed { "completed" } else { "updated" },
        ctx.user_id(),
        &project,
        Some(&old),
        RequestContext::from_headers(&headers),
    );

    Ok(Json(project))
}

#[utoipa::path(
    delete,
    path = "/orgs/{org_id}/projects/{project_id}",
    tag = "Projects",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id")
    ),
    responses(
        (status = 204, description = "Project and its sub-projects, tasks and logs deleted"),
        (status = 403, description = "Not ADMIN/MAINTAINER"),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn delete_project(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    sqlx::query("DELETE FROM projects WHERE id = ? AND org_id = ?")
        .bind(project.id)
        .bind(org_id)
        .execute(&state.pool)
        .await?;

    // audit rows keep the project id without a foreign key, so the trail survives
    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(org_id, project.id),
        "deleted",
        ctx.user_id(),
        &project,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn fetch_project(pool: &SqlitePool, project_id: Uuid) -> AppResult<Option<Project>> {
    let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?");
    let project = sqlx::query_as::<_, Project>(&sql)
        .bind(project_id)
        .fetch_optional(pool)
        .await?;
    Ok(project)
}

/// True when `candidate_parent` is `project_id` itself or sits below it.
async fn would_cycle(pool: &SqlitePool, project_id: Uuid, candidate_parent: Uuid) -> AppResult<bool> {
    let hits: i64 = sqlx::query_scalar(
        r#"
        WITH RECURSIVE subtree(id) AS (
            SELECT id FROM projects WHERE id = ?
            UNION
            SELECT p.id FROM projects p JOIN subtree s ON p.parent_id = s.id
        )
        SELECT COUNT(1) FROM subtree WHERE id = ?
        "#,
    )
    .bind(project_id)
    .bind(candidate_parent)
    .fetch_one(pool)
    .await?;

    Ok(hits > 0)
}

async fn ensure_code_free(pool: &SqlitePool, org_id: Uuid, code: &str, except: Option<Uuid>) -> AppResult<()> {
    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM projects WHERE org_id = ? AND code = ? AND (? IS NULL OR id != ?)")
        .bind(org_id)
        .bind(code)
        .bind(except)
        .bind(except)
        .fetch_one(pool)
        .await?;

    if taken > 0 {
        return Err(duplicate_code());
    }
    Ok(())
}

fn duplicate_code() -> AppError {
    AppError::validation("a project with this code already exists in the organization")
}

fn validate_budget(budget: Option<f64>) -> AppResult<()> {
    match budget {
        Some(value) if !value.is_finite() || value < 0.0 => Err(AppError::validation("budget_total must be a non-negative number")),
        _ => Ok(()),
    }
}

fn validate_window(start: Option<chrono::DateTime<chrono::Utc>>, deadline: Option<chrono::DateTime<chrono::Utc>>) -> AppResult<()> {
    match (start, deadline) {
        (Some(start), Some(deadline)) if deadline < start => Err(AppError::validation("deadline must not precede start_date")),
        _ => Ok(()),
    }
}
