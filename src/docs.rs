use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{events, models, pagination, routes};

#[derive(OpenApi)]
#[openapi(
	paths(
		routes::health::health,
		routes::auth::register,
		routes::auth::login,
		routes::auth::me,
		routes::auth::logout,
		routes::orgs::list_orgs,
		routes::orgs::create_org,
		routes::orgs::get_org,
		routes::orgs::update_org,
		routes::orgs::delete_org,
		routes::orgs::my_role,
		routes::members::list_members,
		routes::members::invite_member,
		routes::members::accept_invite,
		routes::members::search_member,
		routes::members::update_member_role,
		routes::members::remove_member,
		routes::teams::list_teams,
		routes::teams::create_team,
		routes::teams::get_team,
		routes::teams::update_team,
		routes::teams::delete_team,
		routes::teams::list_team_members,
		routes::teams::add_team_member,
		routes::teams::remove_team_member,
		routes::projects::list_projects,
		routes::projects::create_project,
		routes::projects::get_project,
		routes::projects::update_project,
		routes::projects::delete_project,
		routes::project_teams::list_project_teams,
		routes::project_teams::assign_team,
		routes::project_teams::unassign_team,
		routes::tasks::list_tasks,
		routes::tasks::create_task,
		routes::tasks::list_org_tasks,
		routes::tasks::create_org_task,
		routes::tasks::get_task,
		routes::tasks::update_task,
		routes::tasks::delete_task,
		routes::dependencies::list_dependencies,
		routes::dependencies::create_dependency,
		routes::dependencies::delete_dependency,
		routes::work_logs::list_work_logs,
		routes::work_logs::create_work_log,
		routes::transactions::list_transactions,
		routes::transactions::create_transaction,
		routes::audit::list_project_audit,
		routes::audit::list_org_audit,
		routes::audit::verify_org_audit
	),
	components(
		schemas(
			routes::health::HealthResponse,
			routes::auth::MessageResponse,
			crate::authz::OrgRole,
			crate::authz::Membership,
			models::user::User,
			models::user::UserSummary,
			models::user::AuthResponse,
			models::user::LoginRequest,
			models::user::RegisterRequest,
			models::organization::OrgStatus,
			models::organization::Organization,
			models::organization::OrgSummary,
			models::organization::OrganizationCreateRequest,
			models::organization::OrganizationUpdateRequest,
			models::organization::OrgRoleResponse,
			models::member::OrgMember,
			models::member::InviteStatus,
			models::member::OrgInvite,
			models::member::InviteRequest,
			models::member::InviteOutcome,
			models::member::AcceptInviteRequest,
			models::member::MemberSearchRequest,
			models::member::MemberSearchResponse,
			models::member::MemberRoleUpdateRequest,
			models::team::Team,
			models::team::TeamWithCounts,
			models::team::TeamMember,
			models::team::TeamCreateRequest,
			models::team::TeamUpdateRequest,
			models::team::TeamMemberAddRequest,
			models::project::ProjectStatus,
			models::project::Project,
			models::project::ProjectDetail,
			models::project::ProjectCreateRequest,
			models::project::ProjectUpdateRequest,
			models::project::ProjectTeamLink,
			models::project::ProjectTeamRequest,
			models::task::TaskType,
			models::task::TaskStatus,
			models::task::TaskPriority,
			models::task::Task,
			models::task::TransferKind,
			models::task::TaskTransfer,
			models::task::TaskDetail,
			models::task::TaskCreateRequest,
			models::task::OrgTaskCreateRequest,
			models::task::TaskUpdateRequest,
			models::dependency::TaskDependency,
			models::dependency::DependencyCreateRequest,
			models::work_log::WorkSegment,
			models::work_log::WorkLog,
			models::work_log::SegmentInput,
			models::work_log::WorkLogCreateRequest,
			models::transaction::TransactionType,
			models::transaction::Transaction,
			models::transaction::TransactionCreateRequest,
			models::audit::AuditLog,
			events::ChainStatus,
			events::Severity,
			pagination::SortOrder,
			pagination::Pagination,
			pagination::PaginatedMembers,
			pagination::PaginatedTeamMembers,
			pagination::PaginatedWorkLogs,
			pagination::PaginatedAuditLogs
		)
	),
	tags(
		(name = "Health", description = "Liveness and database reachability"),
		(name = "Auth", description = "Authentication endpoints"),
		(name = "Organizations", description = "Tenants and the caller's role in them"),
		(name = "Members", description = "Memberships and invitations"),
		(name = "Teams", description = "Teams and their members"),
		(name = "Projects", description = "Project hierarchy, team links and budget"),
		(name = "Tasks", description = "Task hierarchy, hand-overs and dependencies"),
		(name = "Work logs", description = "Time tracking"),
		(name = "Audit", description = "Hash-chained audit trail")
	)
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> anyhow::Result<utoipa::openapi::OpenApi> {
	let mut doc = serde_json::to_value(ApiDoc::openapi())?;

	ensure_security_components(&mut doc);
	ensure_servers(&mut doc, port);

	Ok(serde_json::from_value(doc)?)
}

pub fn swagger_routes(doc: utoipa::openapi::OpenApi) -> anyhow::Result<Router> {
	let swagger_config = utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"])
		.try_it_out_enabled(true)
		.with_credentials(true)
		.persist_authorization(true);

	let doc_json = Arc::new(serde_json::to_value(&doc)?);

	let json_route = get(move || {
		let doc_json = Arc::clone(&doc_json);
		async move { Json((*doc_json).clone()) }
	});

	Ok(Router::new()
		.route("/api-docs/openapi.json", json_route)
		.merge(SwaggerUi::new("/docs").config(swagger_config)))
}

fn object_entry<'a>(doc: &'a mut Value, key: &str) -> Option<&'a mut Map<String, Value>> {
	doc.as_object_mut()?
		.entry(key)
		.or_insert_with(|| Value::Object(Map::new()))
		.as_object_mut()
}

fn ensure_security_components(doc: &mut Value) {
	let Some(components) = object_entry(doc, "components") else {
		return;
	};
	let schemes = components
		.entry("securitySchemes")
		.or_insert_with(|| Value::Object(Map::new()));

	if let Some(schemes) = schemes.as_object_mut() {
		schemes.insert(
			"bearer_auth".to_string(),
			json!({
				"type": "http",
				"scheme": "bearer",
				"bearerFormat": "JWT"
			}),
		);
	}
}

fn ensure_servers(doc: &mut Value, port: u16) {
	// Swagger's Try-it-out must call the backend over TLS when it is enabled
	let tls_enabled = std::env::var("CERT_PATH").is_ok() && std::env::var("KEY_PATH").is_ok();
	let scheme = if tls_enabled { "https" } else { "http" };
	let server_url = format!("{scheme}://localhost:{port}");

	match doc.get_mut("servers") {
		Some(Value::Array(servers)) => {
			let has = servers
				.iter()
				.any(|v| v.get("url").and_then(Value::as_str) == Some(server_url.as_str()));
			if !has {
				servers.push(json!({ "url": server_url }));
			}
		}
		_ => {
			doc["servers"] = json!([{ "url": server_url }]);
		}
	}
}
