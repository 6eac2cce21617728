use std::collections::HashMap;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, verify_scope, RoleSet};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, AuditScope, RequestContext};
use crate::extract::{JsonBody, PathParams, QueryParams};
use crate::jwt::AuthUser;
use crate::models::work_log::{segment_minutes, WorkLog, WorkLogCreateRequest, WorkLogListQuery, WorkSegment};
use crate::pagination::{like_pattern, PageParams, Paginated, PaginatedWorkLogs};
use crate::routes::projects::fetch_project;
use crate::routes::tasks::fetch_task;
use crate::utils::utc_now;

const MAX_SEGMENTS: usize = 100;

const WORK_LOG_SELECT: &str = "SELECT w.id, w.org_id, w.project_id, w.task_id, w.user_id, w.note, w.total_duration_min, w.created_at FROM work_logs w JOIN users u ON u.id = w.user_id";

struct WorkLogFilters {
    user_id: Option<Uuid>,
    task_id: Option<Uuid>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    pattern: Option<String>,
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/projects/{project_id}/work-logs",
    tag = "Work logs",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id"),
        WorkLogListQuery
    ),
    responses(
        (status = 200, description = "Page of work logs with their segments", body = PaginatedWorkLogs),
        (status = 400, description = "Invalid paging parameters"),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn list_work_logs(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
    QueryParams(query): QueryParams<WorkLogListQuery>,
) -> AppResult<Json<PaginatedWorkLogs>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;
    let params = PageParams::new(query.page, query.limit)?;

    let filters = WorkLogFilters {
        user_id: query.user_id,
        task_id: query.task_id,
        from: query.from,
        to: query.to,
        pattern: like_pattern(query.search.as_deref()),
    };

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(1) FROM work_logs w JOIN users u ON u.id = w.user_id");
    push_filters(&mut count, org_id, project.id, &filters);
    let total: i64 = count.build_query_scalar().fetch_one(&state.pool).await?;

    let sort_column = match query.sort_by.as_deref() {
        Some("duration") => "w.total_duration_min",
        Some("user") => "u.name",
        _ => "w.created_at",
    };
    let order = query.sort_order.unwrap_or_default().as_sql();

    let mut select = QueryBuilder::<Sqlite>::new(WORK_LOG_SELECT);
    push_filters(&mut select, org_id, project.id, &filters);
    select.push(format!(" ORDER BY {sort_column} {order}, w.id ASC LIMIT "));
    select.push_bind(i64::from(params.limit));
    select.push(" OFFSET ");
    select.push_bind(params.offset());

    let mut logs = select.build_query_as::<WorkLog>().fetch_all(&state.pool).await?;
    attach_segments(&state.pool, &mut logs).await?;

    Ok(Json(Paginated::new(logs, params, total)))
}

#[utoipa::path(
    post,
    path = "/orgs/{org_id}/projects/{project_id}/work-logs",
    tag = "Work logs",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id")
    ),
    request_body = WorkLogCreateRequest,
    responses(
        (status = 201, description = "Work log recorded", body = WorkLog),
        (status = 400, description = "Empty, oversized or inverted segments, or task outside the project"),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn create_work_log(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
    JsonBody(payload): JsonBody<WorkLogCreateRequest>,
) -> AppResult<(StatusCode, Json<WorkLog>)> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    if payload.segments.is_empty() {
        return Err(AppError::validation("at least one segment is required"));
    }
    if payload.segments.len() > MAX_SEGMENTS {
        return Err(AppError::validation(format!("at most {MAX_SEGMENTS} segments per work log")));
    }
    if payload.segments.iter().any(|s| s.end_dt <= s.start_dt) {
        return Err(AppError::validation("segment end_dt must be after start_dt"));
    }
    if let Some(task_id) = payload.task_id {
        match fetch_task(&state.pool, task_id).await? {
            Some(task) if task.project_id == project.id => {}
            _ => return Err(AppError::validation("task does not belong to this project")),
        }
    }

    let log_id = Uuid::new_v4();
    let segments: Vec<WorkSegment> = payload
        .segments
        .iter()
        .map(|s| WorkSegment {
            id: Uuid::new_v4(),
            work_log_id: log_id,
            start_dt: s.start_dt,
            end_dt: s.end_dt,
        })
        .collect();

    let log = WorkLog {
        id: log_id,
        org_id,
        project_id: project.id,
        task_id: payload.task_id,
        user_id: ctx.user_id(),
        note: payload.note,
        total_duration_min: segments.iter().map(|s| segment_minutes(s.start_dt, s.end_dt)).sum(),
        created_at: utc_now(),
        segments,
    };

    let mut tx = state.pool.begin().await?;

    sqlx::query(
        "INSERT INTO work_logs (id, org_id, project_id, task_id, user_id, note, total_duration_min, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(log.id)
    .bind(log.org_id)
    .bind(log.project_id)
    .bind(log.task_id)
    .bind(log.user_id)
    .bind(&log.note)
    .bind(log.total_duration_min)
    .bind(log.created_at)
    .execute(&mut *tx)
    .await?;

    for segment in &log.segments {
        sqlx::query("INSERT INTO work_segments (id, work_log_id, start_dt, end_dt) VALUES (?, ?, ?, ?)")
            .bind(segment.id)
            .bind(segment.work_log_id)
            .bind(segment.start_dt)
            .bind(segment.end_dt)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(org_id, project.id),
        "created",
        ctx.user_id(),
        &log,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok((StatusCode::CREATED, Json(log)))
}

/// Org and project scope first; caller filters can only narrow it.
fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, org_id: Uuid, project_id: Uuid, filters: &WorkLogFilters) {
    qb.push(" WHERE w.org_id = ");
    qb.push_bind(org_id);
    qb.push(" AND w.project_id = ");
    qb.push_bind(project_id);
    if let Some(user_id) = filters.user_id {
        qb.push(" AND w.user_id = ");
        qb.push_bind(user_id);
    }
    if let Some(task_id) = filters.task_id {
        qb.push(" AND w.task_id = ");
        qb.push_bind(task_id);
    }
    if let Some(from) = filters.from {
        qb.push(" AND w.created_at >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filters.to {
        qb.push(" AND w.created_at <= ");
        qb.push_bind(to);
    }
    if let Some(pattern) = filters.pattern.clone() {
        qb.push(" AND (lower(u.name) LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR lower(u.email) LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR lower(COALESCE(w.note, '')) LIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }
}

async fn attach_segments(pool: &SqlitePool, logs: &mut [WorkLog]) -> AppResult<()> {
    if logs.is_empty() {
        return Ok(());
    }

    let mut qb = QueryBuilder::<Sqlite>::new("SELECT id, work_log_id, start_dt, end_dt FROM work_segments WHERE work_log_id IN (");
    let mut ids = qb.separated(", ");
    for log in logs.iter() {
        ids.push_bind(log.id);
    }
    ids.push_unseparated(") ORDER BY start_dt ASC");

    let rows = qb.build_query_as::<WorkSegment>().fetch_all(pool).await?;
    let mut by_log: HashMap<Uuid, Vec<WorkSegment>> = HashMap::new();
    for segment in rows {
        by_log.entry(segment.work_log_id).or_default().push(segment);
    }
    for log in logs.iter_mut() {
        log.segments = by_log.remove(&log.id).unwrap_or_default();
    }
    Ok(())
}
