mod common;

use axum::http::StatusCode;
use serde_json::json;
use sqlx::SqlitePool;

use common::{add_member, create_project, seed_org, seed_user, TestApp};
use orgdesk::authz::OrgRole;

#[sqlx::test]
async fn role_sets_are_explicit_allow_lists(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let maintainer = seed_user(&pool, "Maintainer", "maint@example.com").await;
    let member = seed_user(&pool, "Member", "member@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;
    add_member(&pool, org, maintainer, OrgRole::Maintainer).await;
    add_member(&pool, org, member, OrgRole::Member).await;

    // members listing is ELEVATED
    let (status, body) = t.get(&format!("/orgs/{org}/members"), member).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "insufficient_permissions");
    let (status, _) = t.get(&format!("/orgs/{org}/members"), maintainer).await;
    assert_eq!(status, StatusCode::OK);

    // invites are ADMIN_ONLY
    let (status, _) = t
        .post(&format!("/orgs/{org}/members/invite"), maintainer, json!({ "email": "x@example.com", "role": "MEMBER" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // project deletion is ELEVATED
    let project = create_project(&t, org, member, "P1").await;
    let (status, _) = t.delete(&format!("/orgs/{org}/projects/{project}"), member).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = t.delete(&format!("/orgs/{org}/projects/{project}"), maintainer).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = t.get(&format!("/orgs/{org}/role"), maintainer).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "MAINTAINER");
}

#[sqlx::test]
async fn unauthenticated_requests_are_rejected(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;

    let (status, body) = t
        .send(axum::http::Method::GET, &format!("/orgs/{org}/projects"), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[sqlx::test]
async fn invite_adds_existing_users_and_tokens_for_new_ones(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let grace = seed_user(&pool, "Grace", "grace@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;

    let (status, body) = t
        .post(&format!("/orgs/{org}/members/invite"), admin, json!({ "email": "Grace@Example.com", "role": "MEMBER" }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["outcome"], "added");
    assert_eq!(body["member"]["user_id"], grace.to_string());

    let (status, _) = t
        .post(&format!("/orgs/{org}/members/invite"), admin, json!({ "email": "grace@example.com", "role": "MEMBER" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = t
        .post(&format!("/orgs/{org}/members/invite"), admin, json!({ "email": "root@example.com", "role": "ADMIN" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = t
        .post(&format!("/orgs/{org}/members/invite"), admin, json!({ "email": "heidi@example.com", "role": "MAINTAINER" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["outcome"], "invited");
    let token = body["token"].as_str().unwrap().to_string();
    assert_eq!(token.len(), 64);
    assert!(body["invite"].get("token").is_none());

    let (status, _) = t
        .post(&format!("/orgs/{org}/members/invite"), admin, json!({ "email": "heidi@example.com", "role": "MEMBER" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // someone else cannot redeem it
    let mallory = seed_user(&pool, "Mallory", "mallory@example.com").await;
    let (status, _) = t
        .post(&format!("/orgs/{org}/invites/accept"), mallory, json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let heidi = seed_user(&pool, "Heidi", "heidi@example.com").await;
    let (status, body) = t
        .post(&format!("/orgs/{org}/invites/accept"), heidi, json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["role"], "MAINTAINER");

    let (status, _) = t
        .post(&format!("/orgs/{org}/invites/accept"), heidi, json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[sqlx::test]
async fn invite_token_is_bound_to_its_org(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let org_a = seed_org(&pool, admin, "A").await;
    let org_b = seed_org(&pool, admin, "B").await;

    let (_, body) = t
        .post(&format!("/orgs/{org_a}/members/invite"), admin, json!({ "email": "ivan@example.com", "role": "MEMBER" }))
        .await;
    let token = body["token"].as_str().unwrap().to_string();
    let ivan = seed_user(&pool, "Ivan", "ivan@example.com").await;

    let (status, _) = t
        .post(&format!("/orgs/{org_b}/invites/accept"), ivan, json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test]
async fn last_admin_cannot_be_demoted_or_removed(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let other = seed_user(&pool, "Other", "other@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;
    add_member(&pool, org, other, OrgRole::Member).await;

    let (status, body) = t
        .patch(&format!("/orgs/{org}/members/{admin}"), admin, json!({ "role": "MEMBER" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "organization must keep at least one ADMIN");

    let (status, _) = t.delete(&format!("/orgs/{org}/members/{admin}"), admin).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = t
        .patch(&format!("/orgs/{org}/members/{other}"), admin, json!({ "role": "ADMIN" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = t.delete(&format!("/orgs/{org}/members/{admin}"), other).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // the removed admin has lost access entirely
    let (status, _) = t.get(&format!("/orgs/{org}"), admin).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[sqlx::test]
async fn member_search_reports_membership(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    seed_user(&pool, "Judy", "judy@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;

    let (status, body) = t
        .post(&format!("/orgs/{org}/members/search"), admin, json!({ "email": "judy@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], true);
    assert_eq!(body["is_member"], false);

    let (_, body) = t
        .post(&format!("/orgs/{org}/members/search"), admin, json!({ "email": "admin@example.com" }))
        .await;
    assert_eq!(body["is_member"], true);
    assert_eq!(body["member_role"], "ADMIN");

    let (_, body) = t
        .post(&format!("/orgs/{org}/members/search"), admin, json!({ "email": "nobody@example.com" }))
        .await;
    assert_eq!(body["exists"], false);
}

#[sqlx::test]
async fn admins_demoting_each_other_leave_one_admin(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let alice = seed_user(&pool, "Alice", "alice@example.com").await;
    let bob = seed_user(&pool, "Bob", "bob@example.com").await;
    let org = seed_org(&pool, alice, "Acme").await;
    add_member(&pool, org, bob, OrgRole::Admin).await;

    let demote_bob = format!("/orgs/{org}/members/{bob}");
    let demote_alice = format!("/orgs/{org}/members/{alice}");
    let ((first, _), (second, _)) = tokio::join!(
        t.patch(&demote_bob, alice, json!({ "role": "MEMBER" })),
        t.patch(&demote_alice, bob, json!({ "role": "MEMBER" })),
    );
    assert!(
        !(first == StatusCode::OK && second == StatusCode::OK),
        "both demotions went through"
    );
    assert!(first == StatusCode::OK || second == StatusCode::OK);

    let admins: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM org_members WHERE org_id = ? AND role = 'ADMIN'")
        .bind(org)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(admins, 1);
}

#[sqlx::test]
async fn refused_removal_keeps_team_seats(pool: SqlitePool) {
    let t = TestApp::new(pool.clone()).await;
    let admin = seed_user(&pool, "Admin", "admin@example.com").await;
    let org = seed_org(&pool, admin, "Acme").await;

    let (status, team) = t.post(&format!("/orgs/{org}/teams"), admin, json!({ "name": "Ops" })).await;
    assert_eq!(status, StatusCode::CREATED);
    let members_uri = format!("/orgs/{org}/teams/{}/members", team["id"].as_str().unwrap());
    let (status, _) = t.post(&members_uri, admin, json!({ "user_id": admin })).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = t.delete(&format!("/orgs/{org}/members/{admin}"), admin).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = t.get(&members_uri, admin).await;
    assert_eq!(body["pagination"]["total"], 1);
}
