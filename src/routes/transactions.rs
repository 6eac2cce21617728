use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, verify_scope, RoleSet};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, AuditScope, RequestContext};
use crate::extract::{JsonBody, PathParams, QueryParams};
use crate::jwt::AuthUser;
use crate::models::transaction::{Transaction, TransactionCreateRequest, TransactionListQuery};
use crate::routes::projects::fetch_project;
use crate::utils::{required_text, utc_now};

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/projects/{project_id}/transactions",
    tag = "Projects",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id"),
        TransactionListQuery
    ),
    responses(
        (status = 200, description = "Budget and expense entries, newest first", body = [Transaction]),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
    QueryParams(query): QueryParams<TransactionListQuery>,
) -> AppResult<Json<Vec<Transaction>>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    let items = sqlx::query_as::<_, Transaction>(
        "SELECT id, org_id, project_id, type, amount, currency, note, datetime, created_by FROM transactions WHERE org_id = ? AND project_id = ? AND (? IS NULL OR type = ?) ORDER BY datetime DESC",
    )
    .bind(org_id)
    .bind(project.id)
    .bind(query.tx_type)
    .bind(query.tx_type)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(items))
}

#[utoipa::path(
    post,
    path = "/orgs/{org_id}/projects/{project_id}/transactions",
    tag = "Projects",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id")
    ),
    request_body = TransactionCreateRequest,
    responses(
        (status = 201, description = "Entry recorded", body = Transaction),
        (status = 400, description = "Amount must be positive"),
        (status = 403, description = "Not ADMIN/MAINTAINER"),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn create_transaction(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
    JsonBody(payload): JsonBody<TransactionCreateRequest>,
) -> AppResult<(StatusCode, Json<Transaction>)> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    if !payload.amount.is_finite() || payload.amount <= 0.0 {
        return Err(AppError::validation("amount must be a positive number"));
    }
    let currency = match payload.currency.as_deref() {
        Some(currency) => required_text(currency, "currency")?,
        None => project.currency.clone(),
    };

    let entry = Transaction {
        id: Uuid::new_v4(),
        org_id,
        project_id: project.id,
        tx_type: payload.tx_type,
        amount: payload.amount,
        currency,
        note: payload.note,
        datetime: payload.datetime.unwrap_or_else(utc_now),
        created_by: ctx.user_id(),
    };

    sqlx::query(
        "INSERT INTO transactions (id, org_id, project_id, type, amount, currency, note, datetime, created_by) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.id)
    .bind(entry.org_id)
    .bind(entry.project_id)
    .bind(entry.tx_type)
    .bind(entry.amount)
    .bind(&entry.currency)
    .bind(&entry.note)
    .bind(entry.datetime)
    .bind(entry.created_by)
    .execute(&state.pool)
    .await?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(org_id, project.id),
        "created",
        ctx.user_id(),
        &entry,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok((StatusCode::CREATED, Json(entry)))
}
