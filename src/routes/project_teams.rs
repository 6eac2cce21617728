use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{authorize, verify_reference, verify_scope, RoleSet};
use crate::errors::{unique_violation_as, AppError, AppResult};
use crate::events::{log_activity_with_context, AuditScope, RequestContext};
use crate::extract::{JsonBody, PathParams, QueryParams};
use crate::jwt::AuthUser;
use crate::models::project::{ProjectTeamLink, ProjectTeamRemoveQuery, ProjectTeamRequest};
use crate::routes::projects::fetch_project;
use crate::routes::teams::fetch_team;
use crate::utils::utc_now;

#[utoipa::path(
    get,
    path = "/orgs/{org_id}/projects/{project_id}/teams",
    tag = "Projects",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id")
    ),
    responses(
        (status = 200, description = "Teams assigned to the project", body = [ProjectTeamLink]),
        (status = 404, description = "No such project in this organization")
    )
)]
pub async fn list_project_teams(
    State(state): State<AppState>,
    auth: AuthUser,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
) -> AppResult<Json<Vec<ProjectTeamLink>>> {
    authorize(&state.pool, &auth.identity(), org_id, RoleSet::ANY_MEMBER).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;

    let links = sqlx::query_as::<_, ProjectTeamLink>(
        "SELECT l.project_id, l.team_id, t.name AS team_name, l.created_at FROM project_team_links l JOIN teams t ON t.id = l.team_id WHERE l.project_id = ? AND t.org_id = ? ORDER BY t.name ASC",
    )
    .bind(project.id)
    .bind(org_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(links))
}

#[utoipa::path(
    post,
    path = "/orgs/{org_id}/projects/{project_id}/teams",
    tag = "Projects",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id")
    ),
    request_body = ProjectTeamRequest,
    responses(
        (status = 201, description = "Team assigned", body = ProjectTeamLink),
        (status = 400, description = "Team is not in this organization"),
        (status = 404, description = "No such project in this organization"),
        (status = 409, description = "Team already assigned")
    )
)]
pub async fn assign_team(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
    JsonBody(payload): JsonBody<ProjectTeamRequest>,
) -> AppResult<(StatusCode, Json<ProjectTeamLink>)> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;
    let team = verify_reference(
        fetch_team(&state.pool, payload.team_id).await?,
        org_id,
        "team does not belong to this organization",
    )?;

    if link_exists(&state.pool, project.id, team.id).await? {
        return Err(AppError::conflict("team is already assigned to this project"));
    }

    let link = ProjectTeamLink {
        project_id: project.id,
        team_id: team.id,
        team_name: team.name,
        created_at: utc_now(),
    };

    sqlx::query("INSERT INTO project_team_links (project_id, team_id, created_at) VALUES (?, ?, ?)")
        .bind(link.project_id)
        .bind(link.team_id)
        .bind(link.created_at)
        .execute(&state.pool)
        .await
        .map_err(|err| unique_violation_as(err, AppError::conflict("team is already assigned to this project")))?;

    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(org_id, project.id),
        "assigned",
        ctx.user_id(),
        &link,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok((StatusCode::CREATED, Json(link)))
}

#[utoipa::path(
    delete,
    path = "/orgs/{org_id}/projects/{project_id}/teams",
    tag = "Projects",
    security(("bearer_auth" = [])),
    params(
        ("org_id" = Uuid, Path, description = "Organization id"),
        ("project_id" = Uuid, Path, description = "Project id"),
        ProjectTeamRemoveQuery
    ),
    responses(
        (status = 204, description = "Team unassigned"),
        (status = 404, description = "No such project, or team not assigned")
    )
)]
pub async fn unassign_team(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    PathParams((org_id, project_id)): PathParams<(Uuid, Uuid)>,
    QueryParams(query): QueryParams<ProjectTeamRemoveQuery>,
) -> AppResult<StatusCode> {
    let ctx = authorize(&state.pool, &auth.identity(), org_id, RoleSet::ELEVATED).await?;
    let project = verify_scope(fetch_project(&state.pool, project_id).await?, org_id, "project")?;
    let team = verify_scope(fetch_team(&state.pool, query.team_id).await?, org_id, "team")?;

    let affected = sqlx::query("DELETE FROM project_team_links WHERE project_id = ? AND team_id = ?")
        .bind(project.id)
        .bind(team.id)
        .execute(&state.pool)
        .await?;

    if affected.rows_affected() == 0 {
        return Err(AppError::not_found("team is not assigned to this project"));
    }

    let link = ProjectTeamLink {
        project_id: project.id,
        team_id: team.id,
        team_name: team.name,
        created_at: utc_now(),
    };
    log_activity_with_context(
        &state.event_bus,
        AuditScope::project(org_id, project.id),
        "unassigned",
        ctx.user_id(),
        &link,
        None,
        RequestContext::from_headers(&headers),
    );

    Ok(StatusCode::NO_CONTENT)
}

async fn link_exists(pool: &SqlitePool, project_id: Uuid, team_id: Uuid) -> AppResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM project_team_links WHERE project_id = ? AND team_id = ?")
        .bind(project_id)
        .bind(team_id)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}
