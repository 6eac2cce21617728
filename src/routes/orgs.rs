use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, verify_scope, OrgRole, RoleSet};
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, AuditScope, RequestContext};
use crate::extract::{JsonBody, PathParams};
use crate::jwt::AuthUser;
use crate::models::organization::{
    OrgRoleResponse, OrgStatus, OrgSummary, Organization, OrganizationCreateRequest, OrganizationUpdateRequest,
};
use crate::utils::{normalize_email, required_text, utc_now};

const ORG_COLUMNS: &str =
    "id, name, legal_name, country, address, contact_email, contact_phone, status, created_by, created_at, updated_at";

#[utoipa::path(
    get,
    path = "/orgs",
    tag = "Organizations",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Organizations the caller belongs to", body = [OrgSummary]))
)]
pub async fn list_orgs(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<Vec<OrgSummary>>> {
    let orgs = sqlx::query_as::<_, OrgSummary>(
        r#"
        SELECT o.id, o.name, o.status, m.role,
               (SELECT COUNT(1) FROM org_members WHERE org_id = o.id) AS member_count,
               (SELECT COUNT(1) FROM teams WHERE org_id = o.id) AS team_count,
               (SELECT COUNT(1) FROM projects WHERE org_id = o.id) AS project_count,
               o.created_at
        FROM organizations o
        JOIN org_members m ON m.org_id = o.id
        WHERE m.user_id = ?
        ORDER BY o.created_at DESC
        "#,
    )
    .bind(auth.user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(orgs))
}

#[utoipa::path(
    post,
    path = "/orgs",
    tag = "Organizations",
    security(("bearer_auth" = [])),
    request_body = OrganizationCreateRequest,
    responses(
        (status = 201, description = "Organization created with the caller as ADMIN", body = Organization),
        (status = 400, description = "Invalid input")
    )
)]
pub async fn create_org(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    JsonBody(payload): JsonBody<OrganizationCreateRequest>,
) -> AppResult<(StatusCode, Json<Organization>)> {
    let org = create_org_with_admin(&state.pool, auth.user_id, payload).await?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::org(org.id),
        "created",
        auth.user_id,
        &org,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok((StatusCode::CREATED, Json(org)))
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}",
    tag = "Organizations",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Organization detail", body = Organization),
        (status = 403, description = "Not a member")
    )
)]
pub async fn get_org(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams(org_id): PathParams<Uuid>,
) -> AppResult<Json<Organization>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let org = verify_scope(fetch_org(&state.pool, org_id).await?, org_id, "organization")?;
    Ok(Json(org))
}

#[utoipa::path(
    patch,
    path = "/orgs/{org_id}",
    tag = "Organizations",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = OrganizationUpdateRequest,
    responses(
        (status = 200, description = "Organization updated", body = Organization),
        (status = 403, description = "Not an ADMIN of the organization")
    )
)]
pub async fn update_org(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams(org_id): PathParams<Uuid>,
    JsonBody(payload): JsonBody<OrganizationUpdateRequest>,
) -> AppResult<Json<Organization>> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ADMIN_ONLY).await?;
    let old = verify_scope(fetch_org(&state.pool, org_id).await?, org_id, "organization")?;
    let mut org = old.clone();

    if let Some(name) = payload.name.as_deref() {
        org.name = required_text(name, "name")?;
    }
    if let Some(legal_name) = payload.legal_name.as_deref() {
        org.legal_name = required_text(legal_name, "legal_name")?;
    }
    if let Some(country) = payload.country.as_deref() {
        org.country = required_text(country, "country")?;
    }
    if let Some(address) = payload.address.as_deref() {
        org.address = required_text(address, "address")?;
    }
    if let Some(email) = payload.contact_email.as_deref() {
        org.contact_email = contact_email(email)?;
    }
    if let Some(phone) = payload.contact_phone.as_deref() {
        org.contact_phone = required_text(phone, "contact_phone")?;
    }
    if let Some(status) = payload.status {
        org.status = status;
    }
    org.updated_at = utc_now();

    sqlx::query(
        "UPDATE organizations SET name = ?, legal_name = ?, country = ?, address = ?, contact_email = ?, contact_phone = ?, status = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&org.name)
    .bind(&org.legal_name)
    .bind(&org.country)
    .bind(&org.address)
    .bind(&org.contact_email)
    .bind(&org.contact_phone)
    .bind(org.status)
    .bind(org.updated_at)
    .bind(org.id)
    .execute(&state.pool)
    .await?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::org(org.id),
        "updated",
        ctx.user_id(),
        &org,
        Some(&old),
        RequestContext::from_headers(&headers),
    );

    Ok(Json(org))
}

#[utoipa::path(
    delete,
    path = "/orgs/{org_id}",
    tag = "Organizations",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 204, description = "Organization and everything it owns deleted"),
        (status = 403, description = "Not an ADMIN of the organization")
    )
)]
pub async fn delete_org(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams(org_id): PathParams<Uuid>,
) -> AppResult<StatusCode> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ADMIN_ONLY).await?;

    let affected = sqlx::query("DELETE FROM organizations WHERE id = ?")
        .bind(org_id)
        .execute(&state.pool)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("organization not found"));
    }

    // the org's audit chain goes with it
    tracing::info!(org_id = %org_id, actor = %ctx.user_id(), "organization deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/role",
    tag = "Organizations",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Caller's role", body = OrgRoleResponse),
        (status = 403, description = "Not a member")
    )
)]
pub async fn my_role(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams(org_id): PathParams<Uuid>,
) -> AppResult<Json<OrgRoleResponse>> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    Ok(Json(OrgRoleResponse {
        org_id: ctx.org_id(),
        role: ctx.role(),
    }))
}

/// Inserts the organization and its first ADMIN membership in one transaction.
pub async fn create_org_with_admin(
    pool: &SqlitePool,
    creator: Uuid,
    payload: OrganizationCreateRequest,
) -> AppResult<Organization> {
    let now = utc_now();
    let org = Organization {
        id: Uuid::new_v4(),
        name: required_text(&payload.name, "name")?,
        legal_name: required_text(&payload.legal_name, "legal_name")?,
        country: required_text(&payload.country, "country")?,
        address: required_text(&payload.address, "address")?,
        contact_email: contact_email(&payload.contact_email)?,
        contact_phone: required_text(&payload.contact_phone, "contact_phone")?,
        status: OrgStatus::Active,
        created_by: creator,
        created_at: now,
        updated_at: now,
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO organizations (id, name, legal_name, country, address, contact_email, contact_phone, status, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(org.id)
    .bind(&org.name)
    .bind(&org.legal_name)
    .bind(&org.country)
    .bind(&org.address)
    .bind(&org.contact_email)
    .bind(&org.contact_phone)
    .bind(org.status)
    .bind(org.created_by)
    .bind(org.created_at)
    .bind(org.updated_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO org_members (org_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)")
        .bind(org.id)
        .bind(creator)
        .bind(OrgRole::Admin)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(org_id = %org.id, creator = %creator, "organization created");

    Ok(org)
}

pub(crate) async fn fetch_org(pool: &SqlitePool, org_id: Uuid) -> AppResult<Option<Organization>> {
    let sql = format!("SELECT {ORG_COLUMNS} FROM organizations WHERE id = ?");
    let org = sqlx::query_as::<_, Organization>(&sql)
        .bind(org_id)
        .fetch_optional(pool)
        .await?;
    Ok(org)
}

fn contact_email(value: &str) -> AppResult<String> {
    let email = normalize_email(value);
    if !email.contains('@') {
        return Err(AppError::validation("contact_email is invalid"));
    }
    Ok(email)
}
