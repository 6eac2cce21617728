use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

use crate::errors::AppResult;

/// Tenant scope an audit entry is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditScope {
    pub org_id: Uuid,
    pub project_id: Option<Uuid>,
}

impl AuditScope {
    pub fn org(org_id: Uuid) -> Self {
        Self { org_id, project_id: None }
    }

    pub fn project(org_id: Uuid, project_id: Uuid) -> Self {
        Self {
            org_id,
            project_id: Some(project_id),
        }
    }
}

/// One mutation, published after it committed.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub org_id: Uuid,
    pub project_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub entity_type: &'static str,
    pub entity_id: Uuid,
    pub action: String,
    /// `{"new": ..., "old": ...}`
    pub diff: Value,
    pub severity: Severity,
    pub context: RequestContext,
    pub occurred_at: DateTime<Utc>,
}

pub type EventBus = broadcast::Sender<AuditEvent>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<AuditEvent>) {
    broadcast::channel(1024)
}

/// Request context for audit entries (IP, User-Agent).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

/// Publishes an audit event carrying old/new state and the request context.
pub fn log_activity_with_context<T: Loggable>(
    event_bus: &EventBus,
    scope: AuditScope,
    action: &str,
    actor_id: Uuid,
    entity: &T,
    old_entity: Option<&T>,
    context: RequestContext,
) {
    let diff = json!({
        "new": serde_json::to_value(entity).unwrap_or_default(),
        "old": old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
    });

    let event = AuditEvent {
        id: Uuid::new_v4(),
        org_id: scope.org_id,
        project_id: scope.project_id,
        actor_id: Some(actor_id),
        entity_type: T::entity_type(),
        entity_id: entity.subject_id(),
        action: action.to_string(),
        diff,
        severity: entity.severity_for_action(action),
        context,
        occurred_at: Utc::now().trunc_subsecs(3),
    };

    // no receivers only happens during shutdown
    if event_bus.send(event).is_err() {
        tracing::debug!(entity_type = T::entity_type(), action, "audit event dropped");
    }
}

/// SHA-256 over the previous hash and the entry's canonical fields.
pub fn chain_hash(
    prev_hash: Option<&str>,
    id: Uuid,
    entity_type: &str,
    entity_id: Uuid,
    action: &str,
    diff_json: &str,
    timestamp: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(id.as_bytes());
    hasher.update(entity_type.as_bytes());
    hasher.update(entity_id.as_bytes());
    hasher.update(action.as_bytes());
    hasher.update(diff_json.as_bytes());
    hasher.update(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true).as_bytes());
    hex::encode(hasher.finalize())
}

/// Appends one event to its organization's chain.
pub async fn record_audit(pool: &SqlitePool, event: &AuditEvent) -> AppResult<()> {
    let diff_json = serde_json::to_string(&event.diff).unwrap_or_else(|_| "{}".to_string());

    let mut tx = pool.begin().await?;

    let last: Option<(i64, String)> =
        sqlx::query_as("SELECT seq, hash FROM audit_logs WHERE org_id = ? ORDER BY seq DESC LIMIT 1")
            .bind(event.org_id)
            .fetch_optional(&mut *tx)
            .await?;

    let (seq, prev_hash) = match last {
        Some((seq, hash)) => (seq + 1, Some(hash)),
        None => (1, None),
    };

    let hash = chain_hash(
        prev_hash.as_deref(),
        event.id,
        event.entity_type,
        event.entity_id,
        &event.action,
        &diff_json,
        event.occurred_at,
    );

    sqlx::query(
        r#"
        INSERT INTO audit_logs (id, org_id, project_id, actor_user_id, entity_type, entity_id, action, diff_json,
                                severity, ip, user_agent, timestamp, seq, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.id)
    .bind(event.org_id)
    .bind(event.project_id)
    .bind(event.actor_id)
    .bind(event.entity_type)
    .bind(event.entity_id)
    .bind(&event.action)
    .bind(&diff_json)
    .bind(event.severity.as_str())
    .bind(&event.context.ip)
    .bind(&event.context.user_agent)
    .bind(event.occurred_at)
    .bind(seq)
    .bind(&prev_hash)
    .bind(&hash)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ChainStatus {
    pub entries: i64,
    pub valid: bool,
    /// First sequence number whose link or hash does not match.
    pub broken_at: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct ChainRow {
    id: Uuid,
    entity_type: String,
    entity_id: Uuid,
    action: String,
    diff_json: String,
    timestamp: DateTime<Utc>,
    seq: i64,
    prev_hash: Option<String>,
    hash: String,
}

/// Walks an organization's chain in sequence order and recomputes every link.
pub async fn verify_chain(pool: &SqlitePool, org_id: Uuid) -> AppResult<ChainStatus> {
    let rows = sqlx::query_as::<_, ChainRow>(
        "SELECT id, entity_type, entity_id, action, diff_json, timestamp, seq, prev_hash, hash FROM audit_logs WHERE org_id = ? ORDER BY seq ASC",
    )
    .bind(org_id)
    .fetch_all(pool)
    .await?;

    let mut previous: Option<String> = None;
    for row in &rows {
        let expected = chain_hash(
            previous.as_deref(),
            row.id,
            &row.entity_type,
            row.entity_id,
            &row.action,
            &row.diff_json,
            row.timestamp,
        );
        if row.prev_hash != previous || row.hash != expected {
            return Ok(ChainStatus {
                entries: rows.len() as i64,
                valid: false,
                broken_at: Some(row.seq),
            });
        }
        previous = Some(row.hash.clone());
    }

    Ok(ChainStatus {
        entries: rows.len() as i64,
        valid: true,
        broken_at: None,
    })
}

/// Persists audit events one at a time so each org's chain is appended in order.
pub async fn start_activity_listener(mut rx: broadcast::Receiver<AuditEvent>, pool: SqlitePool) {
    tracing::info!("audit listener started");
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Err(err) = record_audit(&pool, &event).await {
                    tracing::error!(
                        error = %err,
                        org_id = %event.org_id,
                        entity_type = event.entity_type,
                        action = %event.action,
                        "failed to persist audit event"
                    );
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit listener lagged behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::info!("audit listener stopped");
}
