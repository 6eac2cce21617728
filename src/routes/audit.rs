use axum::extract::State;
use axum::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, verify_scope, RoleSet};
use crate::errors::AppResult;
use crate::events::{verify_chain, ChainStatus};
use crate::extract::{PathParams, QueryParams};
use crate::jwt::AuthUser;
use crate::models::audit::{AuditListQuery, AuditLog, DbAuditLog};
use crate::pagination::{like_pattern, PageParams, Paginated, PaginatedAuditLogs};
use crate::routes::projects::fetch_project;

const AUDIT_SELECT: &str = "SELECT id, org_id, project_id, actor_user_id, entity_type, entity_id, action, diff_json, severity, ip, user_agent, timestamp, seq, prev_hash, hash FROM audit_logs";

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/projects/{project_id}/audit",
    tag = "Audit",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id"),
        AuditListQuery
    ),
    responses(
        (status = 200, description = "Page of the project's audit trail", body = PaginatedAuditLogs),
        (status = 400, description = "Invalid paging parameters"),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn list_project_audit(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
    QueryParams(query): QueryParams<AuditListQuery>,
) -> AppResult<Json<PaginatedAuditLogs>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    let page = audit_page(&state.pool, org_id, Some(project.id), &query).await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/audit",
    tag = "Audit",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id"), AuditListQuery),
    responses(
        (status = 200, description = "Page of the organization's audit trail", body = PaginatedAuditLogs),
        (status = 400, description = "Invalid paging parameters"),
        (status = 403, description = "Not ADMIN/MAINTAINER")
    )
)]
pub async fn list_org_audit(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams(org_id): PathParams<Uuid>,
    QueryParams(query): QueryParams<AuditListQuery>,
) -> AppResult<Json<PaginatedAuditLogs>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;

    let page = audit_page(&state.pool, org_id, None, &query).await?;
    Ok(Json(page))
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/audit/verify",
    tag = "Audit",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Result of recomputing the hash chain", body = ChainStatus),
        (status = 403, description = "Not ADMIN")
    )
)]
pub async fn verify_org_audit(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams(org_id): PathParams<Uuid>,
) -> AppResult<Json<ChainStatus>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ADMIN_ONLY).await?;

    let status = verify_chain(&state.pool, org_id).await?;
    if !status.valid {
        tracing::warn!(org_id = %org_id, broken_at = ?status.broken_at, "audit chain verification failed");
    }
    Ok(Json(status))
}

async fn audit_page(
    pool: &SqlitePool,
    org_id: Uuid,
    project_id: Option<Uuid>,
    query: &AuditListQuery,
) -> AppResult<Paginated<AuditLog>> {
    let params = PageParams::new(query.page, query.limit)?;

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(1) FROM audit_logs");
    push_filters(&mut count, org_id, project_id, query);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let sort_column = match query.sort_by.as_deref() {
        Some("action") => "action",
        Some("entity_type") => "entity_type",
        _ => "timestamp",
    };
    let order = query.sort_order.unwrap_or_default().as_sql();

    let mut select = QueryBuilder::<Sqlite>::new(AUDIT_SELECT);
    push_filters(&mut select, org_id, project_id, query);
    select.push(format!(" ORDER BY {sort_column} {order}, seq {order} LIMIT "));
    select.push_bind(i64::from(params.limit));
    select.push(" OFFSET ");
    select.push_bind(params.offset());

    let rows = select.build_query_as::<DbAuditLog>().fetch_all(pool).await?;
    let items = rows.into_iter().map(AuditLog::try_from).collect::<Result<Vec<_>, _>>()?;

    Ok(Paginated::new(items, params, total))
}

/// Org (and project) scope first; caller filters can only narrow it.
fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, org_id: Uuid, project_id: Option<Uuid>, query: &AuditListQuery) {
    qb.push(" WHERE org_id = ");
    qb.push_bind(org_id);
    if let Some(project_id) = project_id {
        qb.push(" AND project_id = ");
        qb.push_bind(project_id);
    }
    if let Some(action) = query.action.clone() {
        qb.push(" AND action = ");
        qb.push_bind(action);
    }
    if let Some(entity_type) = query.entity_type.clone() {
        qb.push(" AND entity_type = ");
        qb.push_bind(entity_type);
    }
    if let Some(actor) = query.actor_user_id {
        qb.push(" AND actor_user_id = ");
        qb.push_bind(actor);
    }
    if let Some(from) = query.from {
        qb.push(" AND timestamp >= ");
        qb.push_bind(from);
    }
    if let Some(to) = query.to {
        qb.push(" AND timestamp <= ");
        qb.push_bind(to);
    }
    if let Some(pattern) = like_pattern(query.search.as_deref()) {
        qb.push(" AND (lower(action) LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR lower(entity_type) LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR lower(diff_json) LIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }
}
