use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::authz::OrgScoped;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Expense,
    BudgetAdd,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Transaction {
    pub id: Uuid,
    pub org_id: Uuid,
    pub project_id: Uuid,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub tx_type: TransactionType,
    pub amount: f64,
    pub currency: String,
    pub note: Option<String>,
    pub datetime: DateTime<Utc>,
    pub created_by: Uuid,
}

impl OrgScoped for Transaction {
    fn scope_org_id(&self) -> Uuid {
        self.org_id
    }
}

impl crate::events::Loggable for Transaction {
    fn entity_type() -> &'static str { "transaction" }
    fn subject_id(&self) -> Uuid { self.id }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransactionCreateRequest {
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    #[schema(example = 1200.5)]
    pub amount: f64,
    pub currency: Option<String>,
    pub note: Option<String>,
    /// Defaults to now.
    pub datetime: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TransactionListQuery {
    #[serde(rename = "type")]
    pub tx_type: Option<TransactionType>,
}
