mod common;

use axum::http::StatusCode;
use serde_json::json;
use sqlx::SqlitePool;

use common::{add_member, create_project, create_task, seed_org, seed_user, wait_for_audit, TestApp};
use orgdesk::authz::OrgRole;

#[sqlx::test]
async fn mutations_land_in_a_verifiable_chain(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;
    let project = create_project(&t, org, admin, "P1").await;
    let task = create_task(&t, org, project, admin, json!({ "title": "draft" })).await;
    wait_for_audit(&pool, org, 2).await;

    let (status, _) = t
        .patch(&format!("/orgs/{org}/projects/{project}/tasks/{task}"), admin, json!({ "status": "DONE" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(wait_for_audit(&pool, org, 3).await, 3);

    let (status, body) = t.get(&format!("/orgs/{org}/audit/verify"), admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"], 3);
    assert_eq!(body["valid"], true);

    let (status, body) = t.get(&format!("/orgs/{org}/projects/{project}/audit?action=completed"), admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["items"][0]["entity_type"], "task");
    assert_eq!(body["items"][0]["actor_user_id"], admin.to_string());

    sqlx::query("UPDATE audit_logs SET action = 'rewritten' WHERE org_id = ? AND seq = 2")
        .bind(org)
        .execute(&pool)
        .await
        .unwrap();

    let (_, body) = t.get(&format!("/orgs/{org}/audit/verify"), admin).await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["broken_at"], 2);
}

#[sqlx::test]
async fn audit_views_follow_role_sets(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let maintainer = seed_user(&pool, "Maintainer", "maint@example.com").await;
    let member = seed_user(&pool, "Member", "member@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;
    add_member(&pool, org, maintainer, OrgRole::Maintainer).await;
    add_member(&pool, org, member, OrgRole::Member).await;
    let project = create_project(&t, org, admin, "P1").await;
    for i in 0..3 {
        create_task(&t, org, project, member, json!({ "title": format!("task {i}") })).await;
    }
    wait_for_audit(&pool, org, 4).await;

    let (status, body) = t
        .get(&format!("/orgs/{org}/projects/{project}/audit?limit=2&sort_order=asc"), member)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 4);
    assert_eq!(body["pagination"]["has_next"], true);
    assert_eq!(body["items"][0]["entity_type"], "project");

    let (_, body) = t
        .get(&format!("/orgs/{org}/projects/{project}/audit?actor_user_id={member}"), member)
        .await;
    assert_eq!(body["pagination"]["total"], 3);

    let (status, _) = t.get(&format!("/orgs/{org}/audit"), member).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = t.get(&format!("/orgs/{org}/audit"), maintainer).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 4);

    let (status, _) = t.get(&format!("/orgs/{org}/audit/verify"), maintainer).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // another org's project is not reachable through this org's audit path
    let other_admin = seed_user(&pool, "Other", "other@example.com").await;
    let other_org = seed_org(&pool, other_admin, "Other").await;
    let (status, _) = t.get(&format!("/orgs/{other_org}/projects/{project}/audit"), other_admin).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
