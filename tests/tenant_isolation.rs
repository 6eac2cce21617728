mod common;

use axum::http::StatusCode;
use serde_json::json;
use sqlx::SqlitePool;

use common::{add_member, create_project, create_task, seed_org, seed_user, TestApp};
use orgdesk::authz::OrgRole;

#[sqlx::test]
async fn member_of_one_org_cannot_list_another_orgs_projects(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let alice = seed_user(&pool, "Alice", "alice@example.com").await;
    let bob = seed_user(&pool, "Bob", "bob@example.com").await;
    let org_a = seed_org(&pool, alice, "A").await;
    let org_b = seed_org(&pool, bob, "B").await;
    let carol = seed_user(&pool, "Carol", "carol@example.com").await;
    add_member(&pool, org_a, carol, OrgRole::Member).await;

    let (status, body) = t.get(&format!("/orgs/{org_b}/projects"), carol).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "access_denied");

    let (status, _) = t.get(&format!("/orgs/{org_a}/projects"), carol).await;
    assert_eq!(status, StatusCode::OK);
}

#[sqlx::test]
async fn admin_of_one_org_gets_not_found_for_foreign_task(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let alice = seed_user(&pool, "Alice", "alice@example.com").await;
    let bob = seed_user(&pool, "Bob", "bob@example.com").await;
    let org_a = seed_org(&pool, alice, "A").await;
    let org_b = seed_org(&pool, bob, "B").await;

    let project_a = create_project(&t, org_a, alice, "PA").await;
    let project_b = create_project(&t, org_b, bob, "PB").await;
    let task_b = create_task(&t, org_b, project_b, bob, json!({ "title": "secret" })).await;

    // foreign project under our org id
    let (status, body) = t.get(&format!("/orgs/{org_a}/projects/{project_b}/tasks/{task_b}"), alice).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    // our project, foreign task
    let (status, _) = t.get(&format!("/orgs/{org_a}/projects/{project_a}/tasks/{task_b}"), alice).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // a missing task looks exactly the same
    let missing = uuid::Uuid::new_v4();
    let (status, missing_body) = t.get(&format!("/orgs/{org_a}/projects/{project_a}/tasks/{missing}"), alice).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing_body["message"], "task not found");

    let (status, _) = t
        .patch(&format!("/orgs/{org_a}/projects/{project_a}/tasks/{task_b}"), alice, json!({ "title": "mine now" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let title: String = sqlx::query_scalar("SELECT title FROM tasks WHERE id = ?")
        .bind(task_b)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(title, "secret");
}

#[sqlx::test]
async fn cross_org_parent_project_is_rejected_without_writing(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let alice = seed_user(&pool, "Alice", "alice@example.com").await;
    let bob = seed_user(&pool, "Bob", "bob@example.com").await;
    let org_a = seed_org(&pool, alice, "A").await;
    let org_b = seed_org(&pool, bob, "B").await;
    let project_b = create_project(&t, org_b, bob, "PB").await;

    let (status, body) = t
        .post(
            &format!("/orgs/{org_a}/projects"),
            alice,
            json!({ "name": "Child", "code": "CH", "parent_id": project_b }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid parent project");

    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM projects WHERE org_id = ?")
        .bind(org_a)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test]
async fn foreign_team_cannot_be_linked_to_project(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let alice = seed_user(&pool, "Alice", "alice@example.com").await;
    let bob = seed_user(&pool, "Bob", "bob@example.com").await;
    let org_a = seed_org(&pool, alice, "A").await;
    let org_b = seed_org(&pool, bob, "B").await;
    let project_a = create_project(&t, org_a, alice, "PA").await;

    let (status, team) = t.post(&format!("/orgs/{org_b}/teams"), bob, json!({ "name": "Ops" })).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = t
        .post(&format!("/orgs/{org_a}/projects/{project_a}/teams"), alice, json!({ "team_id": team["id"] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // and the foreign team itself is invisible from org A
    let team_id = team["id"].as_str().unwrap();
    let (status, _) = t.get(&format!("/orgs/{org_a}/teams/{team_id}"), alice).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test]
async fn org_task_listing_only_sees_own_projects(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let alice = seed_user(&pool, "Alice", "alice@example.com").await;
    let bob = seed_user(&pool, "Bob", "bob@example.com").await;
    let org_a = seed_org(&pool, alice, "A").await;
    let org_b = seed_org(&pool, bob, "B").await;
    let project_a = create_project(&t, org_a, alice, "PA").await;
    let project_b = create_project(&t, org_b, bob, "PB").await;
    create_task(&t, org_a, project_a, alice, json!({ "title": "ours" })).await;
    create_task(&t, org_b, project_b, bob, json!({ "title": "theirs" })).await;

    let (status, body) = t.get(&format!("/orgs/{org_a}/tasks"), alice).await;
    assert_eq!(status, StatusCode::OK);
    let titles: Vec<&str> = body.as_array().unwrap().iter().filter_map(|t| t["title"].as_str()).collect();
    assert_eq!(titles, vec!["ours"]);

    let (status, _) = t.get(&format!("/orgs/{org_a}/tasks?project_id={project_b}"), alice).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = t
        .post(&format!("/orgs/{org_a}/tasks"), alice, json!({ "project_id": project_b, "title": "sneaky" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
