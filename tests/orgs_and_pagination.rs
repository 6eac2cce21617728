mod common;

use axum::http::StatusCode;
use serde_json::json;
use sqlx::SqlitePool;

use common::{add_member, create_project, seed_org, seed_user, TestApp};
use orgdesk::authz::OrgRole;

fn org_body(name: &str) -> serde_json::Value {
    json!({
        "name": name,
        "legal_name": format!("{name} Ltd"),
        "country": "NZ",
        "address": "1 Queen St",
        "contact_email": "ops@example.com",
        "contact_phone": "+64 9 000 0000"
    })
}

#[sqlx::test]
async fn concurrent_org_creation_gives_each_org_an_admin(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let founder = seed_user(&pool, "Founder", "founder@example.com").await;

    let (first, second) = tokio::join!(
        t.post("/orgs", founder, org_body("One")),
        t.post("/orgs", founder, org_body("Two")),
    );
    assert_eq!(first.0, StatusCode::CREATED, "{}", first.1);
    assert_eq!(second.0, StatusCode::CREATED, "{}", second.1);
    assert_ne!(first.1["id"], second.1["id"]);

    let admins: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM org_members WHERE user_id = ? AND role = 'ADMIN'")
        .bind(founder)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(admins, 2);

    let (status, body) = t.get("/orgs", founder).await;
    assert_eq!(status, StatusCode::OK);
    let orgs = body.as_array().unwrap();
    assert_eq!(orgs.len(), 2);
    assert!(orgs.iter().all(|o| o["role"] == "ADMIN" && o["member_count"] == 1));
}

#[sqlx::test]
async fn org_creation_validates_input(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let founder = seed_user(&pool, "Founder", "founder@example.com").await;

    let mut body = org_body("   ");
    let (status, _) = t.post("/orgs", founder, body.clone()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    body["name"] = json!("Acme");
    body["contact_email"] = json!("not-an-email");
    let (status, _) = t.post("/orgs", founder, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // wrong JSON type surfaces as a validation error naming the field
    let (status, body) = t.post("/orgs", founder, json!({ "name": 7 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
    assert!(body["message"].as_str().unwrap().contains("name"));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM organizations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test]
async fn deleting_an_org_cascades(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let member = seed_user(&pool, "Member", "member@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;
    add_member(&pool, org, member, OrgRole::Member).await;
    create_project(&t, org, admin, "P1").await;
    t.post(&format!("/orgs/{org}/teams"), admin, json!({ "name": "Ops" })).await;

    let (status, _) = t.delete(&format!("/orgs/{org}"), member).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = t.delete(&format!("/orgs/{org}"), admin).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    for table in ["org_members", "projects", "teams"] {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(1) FROM {table} WHERE org_id = ?"))
            .bind(org)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0, "{table} rows survived org deletion");
    }
}

#[sqlx::test]
async fn member_listing_paginates(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;
    for i in 0..22 {
        let user = seed_user(&pool, &format!("User {i:02}"), &format!("user{i:02}@example.com")).await;
        add_member(&pool, org, user, OrgRole::Member).await;
    }

    let (status, body) = t.get(&format!("/orgs/{org}/members?page=3&limit=10"), admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 3);
    assert_eq!(body["pagination"]["total"], 23);
    assert_eq!(body["pagination"]["total_pages"], 3);
    assert_eq!(body["pagination"]["has_next"], false);
    assert_eq!(body["pagination"]["has_prev"], true);

    let (_, body) = t.get(&format!("/orgs/{org}/members?search=user%2007"), admin).await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["items"][0]["email"], "user07@example.com");

    let (_, body) = t
        .get(&format!("/orgs/{org}/members?sort_by=name&sort_order=asc&limit=1"), admin)
        .await;
    assert_eq!(body["items"][0]["name"], "Admin");

    let (_, body) = t.get(&format!("/orgs/{org}/members?role=ADMIN"), admin).await;
    assert_eq!(body["pagination"]["total"], 1);

    let (status, _) = t.get(&format!("/orgs/{org}/members?page=0"), admin).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = t.get(&format!("/orgs/{org}/members?limit=101"), admin).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test]
async fn team_membership_requires_org_membership(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let member = seed_user(&pool, "Member", "member@example.com").await;
    let outsider = seed_user(&pool, "Outsider", "outsider@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;
    add_member(&pool, org, member, OrgRole::Member).await;

    let (status, team) = t.post(&format!("/orgs/{org}/teams"), admin, json!({ "name": "Ops" })).await;
    assert_eq!(status, StatusCode::CREATED);
    let team_id = team["id"].as_str().unwrap().to_string();

    let (status, _) = t.post(&format!("/orgs/{org}/teams"), admin, json!({ "name": "Ops" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = t.post(&format!("/orgs/{org}/teams"), member, json!({ "name": "Rogue" })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let members_uri = format!("/orgs/{org}/teams/{team_id}/members");
    let (status, _) = t.post(&members_uri, admin, json!({ "user_id": outsider })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = t.post(&members_uri, admin, json!({ "user_id": member, "role": "lead" })).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, _) = t.post(&members_uri, admin, json!({ "user_id": member })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = t.get(&members_uri, member).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["items"][0]["role"], "lead");

    // leaving the org also vacates the team seat
    let (status, _) = t.delete(&format!("/orgs/{org}/members/{member}"), admin).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = t.get(&members_uri, admin).await;
    assert_eq!(body["pagination"]["total"], 0);
}
