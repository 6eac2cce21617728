use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, verify_scope, OrgRole, RoleSet};
use crate::errors::{unique_violation_as, AppError, AppResult};
use crate::events::{log_activity_with_context, AuditScope, RequestContext};
use crate::extract::{JsonBody, PathParams, QueryParams};
use crate::jwt::AuthUser;
use crate::models::member::{
    AcceptInviteRequest, InviteOutcome, InviteRequest, InviteStatus, MemberListQuery, MemberRoleUpdateRequest,
    MemberSearchRequest, MemberSearchResponse, OrgInvite, OrgMember,
};
use crate::models::user::UserSummary;
use crate::pagination::{like_pattern, PageParams, Paginated, PaginatedMembers};
use crate::routes::auth::fetch_user_by_id;
use crate::utils::{generate_invite_token, invite_ttl, normalize_email, utc_now};

const MEMBER_SELECT: &str = "SELECT m.org_id, m.user_id, u.name, u.email, u.avatar, m.role, m.joined_at FROM org_members m JOIN users u ON u.id = m.user_id";

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/members",
    tag = "Members",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id"), MemberListQuery),
    responses(
        (status = 200, description = "Page of members, newest first by default", body = PaginatedMembers),
        (status = 400, description = "Invalid paging parameters"),
        (status = 403, description = "Not a member, or not ADMIN/MAINTAINER")
    )
)]
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams(org_id): PathParams<Uuid>,
    QueryParams(query): QueryParams<MemberListQuery>,
) -> AppResult<Json<PaginatedMembers>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;
    let params = PageParams::new(query.page, query.limit)?;
    let pattern = like_pattern(query.search.as_deref());

    let mut count = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(1) FROM org_members m JOIN users u ON u.id = m.user_id",
    );
    push_member_filters(&mut count, org_id, query.role, pattern.clone());
    let total: i64 = count.build_query_scalar().fetch_one(&state.pool).await?;

    let sort_column = match query.sort_by.as_deref() {
        Some("name") => "u.name",
        Some("email") => "u.email",
        Some("role") => "m.role",
        _ => "m.joined_at",
    };
    let order = query.sort_order.unwrap_or_default().as_sql();

    let mut select = QueryBuilder::<Sqlite>::new(MEMBER_SELECT);
    push_member_filters(&mut select, org_id, query.role, pattern);
    select.push(format!(" ORDER BY {sort_column} {order}, m.user_id ASC LIMIT "));
    select.push_bind(i64::from(params.limit));
    select.push(" OFFSET ");
    select.push_bind(params.offset());

    let members = select.build_query_as::<OrgMember>().fetch_all(&state.pool).await?;

    Ok(Json(Paginated::new(members, params, total)))
}

/// Org scope first; caller filters can only narrow it.
fn push_member_filters(qb: &mut QueryBuilder<'_, Sqlite>, org_id: Uuid, role: Option<OrgRole>, pattern: Option<String>) {
    qb.push(" WHERE m.org_id = ");
    qb.push_bind(org_id);
    if let Some(role) = role {
        qb.push(" AND m.role = ");
        qb.push_bind(role);
    }
    if let Some(pattern) = pattern {
        qb.push(" AND (lower(u.name) LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR lower(u.email) LIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }
}

#[utoipa::path(
    post,
    path = "/orgs/{org_id}/members/invite",
    tag = "Members",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = InviteRequest,
    responses(
        (status = 201, description = "Existing user added, or pending invite created", body = InviteOutcome),
        (status = 400, description = "Role must be MAINTAINER or MEMBER"),
        (status = 403, description = "Not an ADMIN of the organization"),
        (status = 409, description = "Already a member, or a live invite exists")
    )
)]
pub async fn invite_member(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams(org_id): PathParams<Uuid>,
    JsonBody(payload): JsonBody<InviteRequest>,
) -> AppResult<(StatusCode, Json<InviteOutcome>)> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ADMIN_ONLY).await?;

    if payload.role == OrgRole::Admin {
        return Err(AppError::validation("role must be MAINTAINER or MEMBER"));
    }
    let email = normalize_email(&payload.email);
    if !email.contains('@') {
        return Err(AppError::validation("email is invalid"));
    }
    let request_ctx = RequestContext::from_headers(&headers);

    if let Some(user) = find_user_by_email(&state.pool, &email).await? {
        if fetch_member(&state.pool, org_id, user.id).await?.is_some() {
            return Err(AppError::conflict("user is already a member of this organization"));
        }

        sqlx::query("INSERT INTO org_members (org_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)")
            .bind(org_id)
            .bind(user.id)
            .bind(payload.role)
            .bind(utc_now())
            .execute(&state.pool)
            .await
            .map_err(|err| unique_violation_as(err, AppError::conflict("user is already a member of this organization")))?;

        let member = verify_scope(fetch_member(&state.pool, org_id, user.id).await?, org_id, "member")?;
        log_activity_with_context(
            &state.event_bus,
            AuditScope::org(org_id),
            "added",
            ctx.user_id(),
            &member,
            None,
            request_ctx,
        );

        return Ok((StatusCode::CREATED, Json(InviteOutcome::Added { member })));
    }

    let now = utc_now();
    let live = sqlx::query_as::<_, OrgInvite>(
        "SELECT id, org_id, email, role, token, status, expires_at, invited_by, created_at FROM org_invites WHERE org_id = ? AND email = ? AND status = ?",
    )
    .bind(org_id)
    .bind(&email)
    .bind(InviteStatus::Pending)
    .fetch_all(&state.pool)
    .await?
    .into_iter()
    .any(|invite| invite.expires_at > now);

    if live {
        return Err(AppError::conflict("an active invite already exists for this email"));
    }

    let invite = OrgInvite {
        id: Uuid::new_v4(),
        org_id,
        email,
        role: payload.role,
        token: generate_invite_token(),
        status: InviteStatus::Pending,
        expires_at: now + invite_ttl()?,
        invited_by: ctx.user_id(),
        created_at: now,
    };

    sqlx::query(
        "INSERT INTO org_invites (id, org_id, email, role, token, status, expires_at, invited_by, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(invite.id)
    .bind(invite.org_id)
    .bind(&invite.email)
    .bind(invite.role)
    .bind(&invite.token)
    .bind(invite.status)
    .bind(invite.expires_at)
    .bind(invite.invited_by)
    .bind(invite.created_at)
    .execute(&state.pool)
    .await?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::org(org_id),
        "created",
        ctx.user_id(),
        &invite,
        None,
        request_ctx,
    );

    let token = invite.token.clone();
    Ok((StatusCode::CREATED, Json(InviteOutcome::Invited { invite, token })))
}

#[utoipa::path(
    post,
    path = "/orgs/{org_id}/invites/accept",
    tag = "Members",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = AcceptInviteRequest,
    responses(
        (status = 200, description = "Invite accepted; caller is now a member", body = OrgMember),
        (status = 400, description = "Invite expired, used, or issued to another email"),
        (status = 404, description = "No such invite for this organization"),
        (status = 409, description = "Caller is already a member")
    )
)]
pub async fn accept_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams(org_id): PathParams<Uuid>,
    JsonBody(payload): JsonBody<AcceptInviteRequest>,
) -> AppResult<Json<OrgMember>> {
    let invite = sqlx::query_as::<_, OrgInvite>(
        "SELECT id, org_id, email, role, token, status, expires_at, invited_by, created_at FROM org_invites WHERE token = ?",
    )
    .bind(payload.token.trim())
    .fetch_optional(&state.pool)
    .await?;
    let invite = verify_scope(invite, org_id, "invite")?;

    if invite.status != InviteStatus::Pending {
        return Err(AppError::validation("invite is no longer pending"));
    }
    let now = utc_now();
    if invite.expires_at <= now {
        return Err(AppError::validation("invite has expired"));
    }

    let user = fetch_user_by_id(&state.pool, auth.user_id).await?;
    if normalize_email(&user.email) != invite.email {
        return Err(AppError::validation("invite was issued to a different email"));
    }

    let mut tx = state.pool.begin().await?;

    sqlx::query("INSERT INTO org_members (org_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)")
        .bind(org_id)
        .bind(auth.user_id)
        .bind(invite.role)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|err| unique_violation_as(err, AppError::conflict("already a member of this organization")))?;

    sqlx::query("UPDATE org_invites SET status = ? WHERE id = ?")
        .bind(InviteStatus::Accepted)
        .bind(invite.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let member = verify_scope(fetch_member(&state.pool, org_id, auth.user_id).await?, org_id, "member")?;
    log_activity_with_context(
        &state.event_bus,
        AuditScope::org(org_id),
        "joined",
        auth.user_id,
        &member,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok(Json(member))
}

#[utoipa::path(
    post,
    path = "/orgs/{org_id}/members/search",
    tag = "Members",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = MemberSearchRequest,
    responses(
        (status = 200, description = "Lookup result", body = MemberSearchResponse),
        (status = 403, description = "Not a member")
    )
)]
pub async fn search_member(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams(org_id): PathParams<Uuid>,
    JsonBody(payload): JsonBody<MemberSearchRequest>,
) -> AppResult<Json<MemberSearchResponse>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;

    let Some(user) = find_user_by_email(&state.pool, &normalize_email(&payload.email)).await? else {
        return Ok(Json(MemberSearchResponse {
            user: None,
            exists: false,
            is_member: false,
            member_role: None,
        }));
    };

    let member = fetch_member(&state.pool, org_id, user.id).await?;

    Ok(Json(MemberSearchResponse {
        user: Some(user),
        exists: true,
        is_member: member.is_some(),
        member_role: member.map(|m| m.role),
    }))
}

#[utoipa::path(
    patch,
    path = "/orgs/{org_id}/members/{user_id}",
    tag = "Members",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("user_id" = Uuid, Path, description = "Member user id")
    ),
    request_body = MemberRoleUpdateRequest,
    responses(
        (status = 200, description = "Role changed", body = OrgMember),
        (status = 400, description = "Would leave the organization without an ADMIN"),
        (status = 403, description = "Not an ADMIN of the organization"),
        (status = 404, description = "No such member")
    )
)]
pub async fn update_member_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, user_id)): PathParams<(Uuid, Uuid)>,
    JsonBody(payload): JsonBody<MemberRoleUpdateRequest>,
) -> AppResult<Json<OrgMember>> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ADMIN_ONLY).await?;
    let old = verify_scope(fetch_member(&state.pool, org_id, user_id).await?, org_id, "member")?;

    // last-ADMIN check and write in one statement
    let sql = if payload.role == OrgRole::Admin {
        "UPDATE org_members SET role = ? WHERE org_id = ? AND user_id = ?".to_string()
    } else {
        format!("UPDATE org_members SET role = ? WHERE org_id = ? AND user_id = ? AND {KEEPS_AN_ADMIN}")
    };
    let mut query = sqlx::query(&sql).bind(payload.role).bind(org_id).bind(user_id);
    if payload.role != OrgRole::Admin {
        query = query.bind(OrgRole::Admin).bind(OrgRole::Admin);
    }
    if query.execute(&state.pool).await?.rows_affected() == 0 {
        return Err(guarded_write_missed(old.role == OrgRole::Admin));
    }

    let mut member = old.clone();
    member.role = payload.role;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::org(org_id),
        "role_changed",
        ctx.user_id(),
        &member,
        Some(&old),
        RequestContext::from_headers(&headers),
    );

    Ok(Json(member))
}

#[utoipa::path(
    delete,
    path = "/orgs/{org_id}/members/{user_id}",
    tag = "Members",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("user_id" = Uuid, Path, description = "Member user id")
    ),
    responses(
        (status = 204, description = "Membership and the user's team seats in this organization removed"),
        (status = 400, description = "Would leave the organization without an ADMIN"),
        (status = 403, description = "Not an ADMIN of the organization"),
        (status = 404, description = "No such member")
    )
)]
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, user_id)): PathParams<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ADMIN_ONLY).await?;
    let member = verify_scope(fetch_member(&state.pool, org_id, user_id).await?, org_id, "member")?;

    let mut tx = state.pool.begin().await?;

    let sql = format!("DELETE FROM org_members WHERE org_id = ? AND user_id = ? AND {KEEPS_AN_ADMIN}");
    let removed = sqlx::query(&sql)
        .bind(org_id)
        .bind(user_id)
        .bind(OrgRole::Admin)
        .bind(OrgRole::Admin)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(guarded_write_missed(member.role == OrgRole::Admin));
    }

    sqlx::query("DELETE FROM team_members WHERE user_id = ? AND team_id IN (SELECT id FROM teams WHERE org_id = ?)")
        .bind(user_id)
        .bind(org_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::org(org_id),
        "removed",
        ctx.user_id(),
        &member,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Row filter for `org_members` that holds unless the row is the organization's only ADMIN.
const KEEPS_AN_ADMIN: &str = "(role != ? OR EXISTS (SELECT 1 FROM org_members o WHERE o.org_id = org_members.org_id AND o.role = ? AND o.user_id != org_members.user_id))";

/// A guarded write touched no row: the member was the last ADMIN, or is gone.
fn guarded_write_missed(was_admin: bool) -> AppError {
    if was_admin {
        AppError::validation("organization must keep at least one ADMIN")
    } else {
        AppError::not_found("member not found")
    }
}

pub(crate) async fn fetch_member(pool: &SqlitePool, org_id: Uuid, user_id: Uuid) -> AppResult<Option<OrgMember>> {
    let sql = format!("{MEMBER_SELECT} WHERE m.org_id = ? AND m.user_id = ?");
    let member = sqlx::query_as::<_, OrgMember>(&sql)
        .bind(org_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(member)
}

async fn find_user_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<UserSummary>> {
    let user = sqlx::query_as::<_, UserSummary>("SELECT id, name, email, avatar FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}
