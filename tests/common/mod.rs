#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

use orgdesk::authz::OrgRole;
use orgdesk::jwt::JwtConfig;
use orgdesk::models::organization::OrganizationCreateRequest;
use orgdesk::routes::orgs::create_org_with_admin;

pub const JWT_SECRET: &str = "test-secret";

pub struct TestApp {
    pub app: Router,
    pub pool: SqlitePool,
    jwt: JwtConfig,
}

impl TestApp {
    pub async fn new(pool: SqlitePool) -> Self {
        std::env::set_var("JWT_SECRET", JWT_SECRET);
        let app = orgdesk::create_app(pool.clone()).await.unwrap();
        let jwt = JwtConfig {
            secret: Arc::new(JWT_SECRET.as_bytes().to_vec()),
            exp_hours: 1,
        };
        Self { app, pool, jwt }
    }

    pub fn token(&self, user_id: Uuid) -> String {
        self.jwt.encode(user_id).unwrap()
    }

    /// Sends one request as `user` (or anonymously) and returns the status with the JSON body.
    pub async fn send(&self, method: Method, uri: &str, user: Option<Uuid>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("authorization", format!("Bearer {}", self.token(user)));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, user: Uuid) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(user), None).await
    }

    pub async fn post(&self, uri: &str, user: Uuid, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(user), Some(body)).await
    }

    pub async fn patch(&self, uri: &str, user: Uuid, body: Value) -> (StatusCode, Value) {
        self.send(Method::PATCH, uri, Some(user), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, user: Uuid) -> (StatusCode, Value) {
        self.send(Method::DELETE, uri, Some(user), None).await
    }
}

pub async fn seed_user(pool: &SqlitePool, name: &str, email: &str) -> Uuid {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now();
    sqlx::query("INSERT INTO users (id, name, email, password_hash, avatar, created_at, updated_at) VALUES (?, ?, ?, 'hash', NULL, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    id
}

pub async fn seed_org(pool: &SqlitePool, admin: Uuid, name: &str) -> Uuid {
    let payload = OrganizationCreateRequest {
        name: name.to_string(),
        legal_name: format!("{name} Ltd"),
        country: "NZ".to_string(),
        address: "1 Queen St".to_string(),
        contact_email: "ops@example.com".to_string(),
        contact_phone: "+64 9 000 0000".to_string(),
    };
    create_org_with_admin(pool, admin, payload).await.unwrap().id
}

pub async fn add_member(pool: &SqlitePool, org_id: Uuid, user_id: Uuid, role: OrgRole) {
    sqlx::query("INSERT INTO org_members (org_id, user_id, role, joined_at) VALUES (?, ?, ?, ?)")
        .bind(org_id)
        .bind(user_id)
        .bind(role)
        .bind(chrono::Utc::now())
        .execute(pool)
        .await
        .unwrap();
}

pub async fn create_project(t: &TestApp, org_id: Uuid, user: Uuid, code: &str) -> Uuid {
    let (status, body) = t
        .post(
            &format!("/orgs/{org_id}/projects"),
            user,
            json!({ "name": format!("Project {code}"), "code": code }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    id_of(&body)
}

pub async fn create_task(t: &TestApp, org_id: Uuid, project_id: Uuid, user: Uuid, body: Value) -> Uuid {
    let (status, body) = t
        .post(&format!("/orgs/{org_id}/projects/{project_id}/tasks"), user, body)
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    id_of(&body)
}

pub fn id_of(body: &Value) -> Uuid {
    body["id"].as_str().and_then(|s| Uuid::parse_str(s).ok()).expect("body carries an id")
}

/// Waits for the audit listener to persist at least `min` entries for the org.
pub async fn wait_for_audit(pool: &SqlitePool, org_id: Uuid, min: i64) -> i64 {
    let mut count = 0;
    for _ in 0..25 {
        count = sqlx::query_scalar("SELECT COUNT(1) FROM audit_logs WHERE org_id = ?")
            .bind(org_id)
            .fetch_one(pool)
            .await
            .unwrap();
        if count >= min {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    count
}
