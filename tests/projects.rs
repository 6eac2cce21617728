mod common;

use axum::http::StatusCode;
use serde_json::json;
use sqlx::SqlitePool;

use common::{create_project, id_of, seed_org, seed_user, TestApp};

#[sqlx::test]
async fn project_patch_distinguishes_absent_from_null(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;
    let parent = create_project(&t, org, admin, "ROOT").await;

    let (status, body) = t
        .post(
            &format!("/orgs/{org}/projects"),
            admin,
            json!({
                "name": "Website",
                "code": "WEB",
                "parent_id": parent,
                "description": "marketing site",
                "budget_total": 250.0,
                "deadline": "2025-12-01T00:00:00Z"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let uri = format!("/orgs/{org}/projects/{}", id_of(&body));

    let (status, body) = t.patch(&uri, admin, json!({ "name": "Website v2" })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["parent_id"], parent.to_string());
    assert_eq!(body["description"], "marketing site");

    let (status, body) = t
        .patch(
            &uri,
            admin,
            json!({ "parent_id": null, "description": null, "budget_total": null, "deadline": null }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["parent_id"].is_null());
    assert!(body["description"].is_null());
    assert!(body["budget_total"].is_null());
    assert!(body["deadline"].is_null());
    assert_eq!(body["name"], "Website v2");

    // back at the top level
    let (_, body) = t.get(&format!("/orgs/{org}/projects"), admin).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[sqlx::test]
async fn malformed_ids_and_filters_get_json_errors(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;
    let project = create_project(&t, org, admin, "P1").await;

    let (status, body) = t.get("/orgs/not-a-uuid/projects", admin).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
    assert!(body["message"].is_string());

    let (status, body) = t.get(&format!("/orgs/{org}/projects/{project}/tasks/42"), admin).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let (status, body) = t
        .get(&format!("/orgs/{org}/projects/{project}/tasks?status=SOMEDAY"), admin)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}
