//! Storage seams used by the upload workflow and the HTTP handlers.

use crate::models::{
    CaseIsin, CaseSummary, PlannedCancellation, PlannedInsert, SubscriptionTrade, TradeUpdate,
};
use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait CaseLookup: Send + Sync {
    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseSummary>, AppError>;
    async fn get_case_isins(&self, case_id: Uuid) -> Result<Vec<CaseIsin>, AppError>;
}

#[async_trait]
pub trait TradeLookup: Send + Sync {
    /// Trades not yet cancelled, oldest first.
    async fn get_trades_for_case(&self, case_id: Uuid) -> Result<Vec<SubscriptionTrade>, AppError>;
    async fn get_cancelled_trades_for_case(
        &self,
        case_id: Uuid,
    ) -> Result<Vec<SubscriptionTrade>, AppError>;
}

#[async_trait]
pub trait TradePersistence: Send + Sync {
    /// Apply every insert and cancellation, or none of them.
    async fn apply_reconciliation(
        &self,
        inserts: &[PlannedInsert],
        cancellations: &[PlannedCancellation],
    ) -> Result<(), AppError>;

    /// Apply a manual edit and mark the trade modified unless it is cancelled.
    /// `None` when the trade does not belong to the case.
    async fn update_trade(
        &self,
        case_id: Uuid,
        trade_id: Uuid,
        update: &TradeUpdate,
    ) -> Result<Option<SubscriptionTrade>, AppError>;
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;
}
