use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, patch, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{
    audit, auth, dependencies, health, members, orgs, project_teams, projects, tasks, teams, transactions, work_logs,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(pool: SqlitePool, jwt: JwtConfig, event_bus: EventBus) -> Self {
        Self {
            pool,
            jwt: Arc::new(jwt),
            event_bus,
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let (event_bus, rx) = init_event_bus();
    tokio::spawn(start_activity_listener(rx, pool.clone()));

    let state = AppState::new(pool, jwt_config, event_bus);

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let member_routes = Router::new()
        .route("/", get(members::list_members))
        .route("/invite", post(members::invite_member))
        .route("/search", post(members::search_member))
        .route("/:user_id", patch(members::update_member_role).delete(members::remove_member));

    let team_routes = Router::new()
        .route("/", get(teams::list_teams).post(teams::create_team))
        .route("/:team_id", get(teams::get_team).patch(teams::update_team).delete(teams::delete_team))
        .route(
            "/:team_id/members",
            get(teams::list_team_members)
                .post(teams::add_team_member)
                .delete(teams::remove_team_member),
        );

    // everything below a project is addressed as /projects/:project_id/...
    let project_routes = Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route(
            "/:project_id",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/:project_id/teams",
            get(project_teams::list_project_teams)
                .post(project_teams::assign_team)
                .delete(project_teams::unassign_team),
        )
        .route("/:project_id/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route(
            "/:project_id/tasks/:task_id",
            get(tasks::get_task).patch(tasks::update_task).delete(tasks::delete_task),
        )
        .route(
            "/:project_id/dependencies",
            get(dependencies::list_dependencies).post(dependencies::create_dependency),
        )
        .route(
            "/:project_id/dependencies/:dependency_id",
            axum::routing::delete(dependencies::delete_dependency),
        )
        .route(
            "/:project_id/work-logs",
            get(work_logs::list_work_logs).post(work_logs::create_work_log),
        )
        .route(
            "/:project_id/transactions",
            get(transactions::list_transactions).post(transactions::create_transaction),
        )
        .route("/:project_id/audit", get(audit::list_project_audit));

    let org_routes = Router::new()
        .route("/", get(orgs::list_orgs).post(orgs::create_org))
        .route("/:org_id", get(orgs::get_org).patch(orgs::update_org).delete(orgs::delete_org))
        .route("/:org_id/role", get(orgs::my_role))
        .route("/:org_id/invites/accept", post(members::accept_invite))
        .route("/:org_id/tasks", get(tasks::list_org_tasks).post(tasks::create_org_task))
        .route("/:org_id/audit", get(audit::list_org_audit))
        .route("/:org_id/audit/verify", get(audit::verify_org_audit))
        .nest("/:org_id/members", member_routes)
        .nest("/:org_id/teams", team_routes)
        .nest("/:org_id/projects", project_routes);

    let router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/orgs", org_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
