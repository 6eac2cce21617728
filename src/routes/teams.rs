use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, verify_scope, RoleSet};
use crate::errors::{unique_violation_as, AppError, AppResult};
use crate::events::{log_activity_with_context, AuditScope, RequestContext};
use crate::extract::{JsonBody, PathParams, QueryParams};
use crate::jwt::AuthUser;
use crate::models::team::{
    Team, TeamCreateRequest, TeamMember, TeamMemberAddRequest, TeamMemberListQuery, TeamMemberRemoveQuery,
    TeamUpdateRequest, TeamWithCounts,
};
use crate::pagination::{like_pattern, PageParams, Paginated, PaginatedTeamMembers};
use crate::routes::members::fetch_member;
use crate::utils::{required_text, utc_now};

const TEAM_MEMBER_SELECT: &str = "SELECT tm.team_id, tm.user_id, u.name, u.email, u.avatar, tm.role, tm.joined_at FROM team_members tm JOIN users u ON u.id = tm.user_id";

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/teams",
    tag = "Teams",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    responses(
        (status = 200, description = "Teams of the organization", body = [TeamWithCounts]),
        (status = 403, description = "Not a member")
    )
)]
pub async fn list_teams(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams(org_id): PathParams<Uuid>,
) -> AppResult<Json<Vec<TeamWithCounts>>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;

    let teams = sqlx::query_as::<_, TeamWithCounts>(
        r#"
        SELECT t.id, t.org_id, t.name, t.description,
               (SELECT COUNT(1) FROM team_members WHERE team_id = t.id) AS member_count,
               (SELECT COUNT(1) FROM project_team_links WHERE team_id = t.id) AS project_count,
               t.created_at
        FROM teams t
        WHERE t.org_id = ?
        ORDER BY t.created_at DESC
        "#,
    )
    .bind(org_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(teams))
}

#[utoipa::path(
    post,
    path = "/orgs/{org_id}/teams",
    tag = "Teams",
    security(("bearer_auth" = [])),
    params(("org_id" = Uuid, Path, description = "Organization id")),
    request_body = TeamCreateRequest,
    responses(
        (status = 201, description = "Team created", body = Team),
        (status = 400, description = "Blank or duplicate team name"),
        (status = 403, description = "Not ADMIN/MAINTAINER")
    )
)]
pub async fn create_team(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams(org_id): PathParams<Uuid>,
    JsonBody(payload): JsonBody<TeamCreateRequest>,
) -> AppResult<(StatusCode, Json<Team>)> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;
    let name = required_text(&payload.name, "name")?;
    ensure_team_name_free(&state.pool, org_id, &name, None).await?;

    let now = utc_now();
    let team = Team {
        id: Uuid::new_v4(),
        org_id,
        name,
        description: payload.description,
        created_by: ctx.user_id(),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO teams (id, org_id, name, description, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(team.id)
    .bind(team.org_id)
    .bind(&team.name)
    .bind(&team.description)
    .bind(team.created_by)
    .bind(team.created_at)
    .bind(team.updated_at)
    .execute(&state.pool)
    .await
    .map_err(|err| unique_violation_as(err, duplicate_name()))?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::org(org_id),
        "created",
        ctx.user_id(),
        &team,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok((StatusCode::CREATED, Json(team)))
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/teams/{team_id}",
    tag = "Teams",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("team_id" = Uuid, Path, description = "Team id")
    ),
    responses(
        (status = 200, description = "Team detail", body = Team),
        (status = 404, description = "No such team in this organization")
    )
)]
pub async fn get_team(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams((org_id, team_id)): PathParams<(Uuid, Uuid)>,
) -> AppResult<Json<Team>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let team = verify_scope(fetch_team(&state.pool, team_id).await?, org_id, "team")?;
    Ok(Json(team))
}

#[utoipa::path(
    patch,
    path = "/orgs/{org_id}/teams/{team_id}",
    tag = "Teams",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("team_id" = Uuid, Path, description = "Team id")
    ),
    request_body = TeamUpdateRequest,
    responses(
        (status = 200, description = "Team updated", body = Team),
        (status = 400, description = "Blank or duplicate team name"),
        (status = 404, description = "No such team in this organization")
    )
)]
pub async fn update_team(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, team_id)): PathParams<(Uuid, Uuid)>,
    JsonBody(payload): JsonBody<TeamUpdateRequest>,
) -> AppResult<Json<Team>> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;
    let old = verify_scope(fetch_team(&state.pool, team_id).await?, org_id, "team")?;
    let mut team = old.clone();

    if let Some(name) = payload.name.as_deref() {
        let name = required_text(name, "name")?;
        ensure_team_name_free(&state.pool, org_id, &name, Some(team_id)).await?;
        team.name = name;
    }
    if payload.description.is_some() {
        team.description = payload.description;
    }
    team.updated_at = utc_now();

    sqlx::query("UPDATE teams SET name = ?, description = ?, updated_at = ? WHERE id = ? AND org_id = ?")
        .bind(&team.name)
        .bind(&team.description)
        .bind(team.updated_at)
        .bind(team.id)
        .bind(org_id)
        .execute(&state.pool)
        .await
        .map_err(|err| unique_violation_as(err, duplicate_name()))?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::org(org_id),
        "updated",
        ctx.user_id(),
        &team,
        Some(&old),
        RequestContext::from_headers(&headers),
    );

    Ok(Json(team))
}

#[utoipa::path(
    delete,
    path = "/orgs/{org_id}/teams/{team_id}",
    tag = "Teams",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("team_id" = Uuid, Path, description = "Team id")
    ),
    responses(
        (status = 204, description = "Team, its members and project links deleted"),
        (status = 404, description = "No such team in this organization")
    )
)]
pub async fn delete_team(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, team_id)): PathParams<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;
    let team = verify_scope(fetch_team(&state.pool, team_id).await?, org_id, "team")?;

    sqlx::query("DELETE FROM teams WHERE id = ? AND org_id = ?")
        .bind(team.id)
        .bind(org_id)
        .execute(&state.pool)
        .await?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::org(org_id),
        "deleted",
        ctx.user_id(),
        &team,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/teams/{team_id}/members",
    tag = "Teams",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("team_id" = Uuid, Path, description = "Team id"),
        TeamMemberListQuery
    ),
    responses(
        (status = 200, description = "Page of team members", body = PaginatedTeamMembers),
        (status = 404, description = "No such team in this organization")
    )
)]
pub async fn list_team_members(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams((org_id, team_id)): PathParams<(Uuid, Uuid)>,
    QueryParams(query): QueryParams<TeamMemberListQuery>,
) -> AppResult<Json<PaginatedTeamMembers>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let team = verify_scope(fetch_team(&state.pool, team_id).await?, org_id, "team")?;
    let params = PageParams::new(query.page, query.limit)?;
    let pattern = like_pattern(query.search.as_deref());

    let mut count =
        QueryBuilder::<Sqlite>::new("SELECT COUNT(1) FROM team_members tm JOIN users u ON u.id = tm.user_id");
    push_team_member_filters(&mut count, team.id, pattern.clone());
    let total: i64 = count.build_query_scalar().fetch_one(&state.pool).await?;

    let sort_column = match query.sort_by.as_deref() {
        Some("name") => "u.name",
        Some("role") => "tm.role",
        _ => "tm.joined_at",
    };
    let order = query.sort_order.unwrap_or_default().as_sql();

    let mut select = QueryBuilder::<Sqlite>::new(TEAM_MEMBER_SELECT);
    push_team_member_filters(&mut select, team.id, pattern);
    select.push(format!(" ORDER BY {sort_column} {order}, tm.user_id ASC LIMIT "));
    select.push_bind(i64::from(params.limit));
    select.push(" OFFSET ");
    select.push_bind(params.offset());

    let members = select.build_query_as::<TeamMember>().fetch_all(&state.pool).await?;

    Ok(Json(Paginated::new(members, params, total)))
}

fn push_team_member_filters(qb: &mut QueryBuilder<'_, Sqlite>, team_id: Uuid, pattern: Option<String>) {
    qb.push(" WHERE tm.team_id = ");
    qb.push_bind(team_id);
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
    path = "/orgs/{org_id}/teams/{team_id}/members",
    tag = "Teams",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("team_id" = Uuid, Path, description = "Team id")
    ),
    request_body = TeamMemberAddRequest,
    responses(
        (status = 201, description = "Member added to the team", body = TeamMember),
        (status = 400, description = "User is not a member of the organization"),
        (status = 404, description = "No such team in this organization"),
        (status = 409, description = "User is already on the team")
    )
)]
pub async fn add_team_member(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, team_id)): PathParams<(Uuid, Uuid)>,
    JsonBody(payload): JsonBody<TeamMemberAddRequest>,
) -> AppResult<(StatusCode, Json<TeamMember>)> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;
    let team = verify_scope(fetch_team(&state.pool, team_id).await?, org_id, "team")?;

    if fetch_member(&state.pool, org_id, payload.user_id).await?.is_none() {
        return Err(AppError::validation("user is not a member of this organization"));
    }
    if fetch_team_member(&state.pool, team.id, payload.user_id).await?.is_some() {
        return Err(AppError::conflict("user is already a member of this team"));
    }

    let role = payload.role.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
    sqlx::query("INSERT INTO team_members (team_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)")
        .bind(team.id)
        .bind(payload.user_id)
        .bind(&role)
        .bind(utc_now())
        .execute(&state.pool)
        .await
        .map_err(|err| unique_violation_as(err, AppError::conflict("user is already a member of this team")))?;

    let member = fetch_team_member(&state.pool, team.id, payload.user_id)
        .await?
        .ok_or_else(|| AppError::internal("team member vanished after insert"))?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::org(org_id),
        "added",
        ctx.user_id(),
        &member,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok((StatusCode::CREATED, Json(member)))
}

#[utoipa::path(
    delete,
    path = "/orgs/{org_id}/teams/{team_id}/members",
    tag = "Teams",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("team_id" = Uuid, Path, description = "Team id"),
        TeamMemberRemoveQuery
    ),
    responses(
        (status = 204, description = "Member removed from the team"),
        (status = 404, description = "No such team or team member")
    )
)]
pub async fn remove_team_member(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, team_id)): PathParams<(Uuid, Uuid)>,
    QueryParams(query): QueryParams<TeamMemberRemoveQuery>,
) -> AppResult<StatusCode> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;
    let team = verify_scope(fetch_team(&state.pool, team_id).await?, org_id, "team")?;
    let member = fetch_team_member(&state.pool, team.id, query.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("team member not found"))?;

    sqlx::query("DELETE FROM team_members WHERE team_id = ? AND user_id = ?")
        .bind(team.id)
        .bind(query.user_id)
        .execute(&state.pool)
        .await?;

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

pub(crate) async fn fetch_team(pool: &SqlitePool, team_id: Uuid) -> AppResult<Option<Team>> {
    let team = sqlx::query_as::<_, Team>(
        "SELECT id, org_id, name, description, created_by, created_at, updated_at FROM teams WHERE id = ?",
    )
    .bind(team_id)
    .fetch_optional(pool)
    .await?;
    Ok(team)
}

async fn fetch_team_member(pool: &SqlitePool, team_id: Uuid, user_id: Uuid) -> AppResult<Option<TeamMember>> {
    let sql = format!("{TEAM_MEMBER_SELECT} WHERE tm.team_id = ? AND tm.user_id = ?");
    let member = sqlx::query_as::<_, TeamMember>(&sql)
        .bind(team_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(member)
}

async fn ensure_team_name_free(pool: &SqlitePool, org_id: Uuid, name: &str, except: Option<Uuid>) -> AppResult<()> {
    let taken: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM teams WHERE org_id = ? AND lower(name) = lower(?) AND (? IS NULL OR id != ?)")
        .bind(org_id)
        .bind(name)
        .bind(except)
        .bind(except)
        .fetch_one(pool)
        .await?;

    if taken > 0 {
        return Err(duplicate_name());
    }
    Ok(())
}

fn duplicate_name() -> AppError {
    AppError::validation("a team with this name already exists in the organization")
}
