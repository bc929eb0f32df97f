use crate::models::{SubscriptionTrade, TradeUpdate};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct CaseTrades {
    pub current: Vec<SubscriptionTrade>,
    pub cancelled: Vec<SubscriptionTrade>,
}

pub async fn list_subscription_trades(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
) -> Result<Json<CaseTrades>, AppError> {
    state
        .collaborators
        .cases
        .get_case(case_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Case {} not found", case_id)))?;

    let trades = &state.collaborators.trades;
    let (current, cancelled) = tokio::try_join!(
        trades.get_trades_for_case(case_id),
        trades.get_cancelled_trades_for_case(case_id),
    )?;

    Ok(Json(CaseTrades { current, cancelled }))
}

/// Edit one trade of the case. Live trades become `modified`.
pub async fn update_subscription_trade(
    State(state): State<AppState>,
    Path((case_id, trade_id)): Path<(Uuid, Uuid)>,
    Json(update): Json<TradeUpdate>,
) -> Result<Json<SubscriptionTrade>, AppError> {
    let update = update
        .normalized()
        .map_err(|message| AppError::BadRequest(anyhow::anyhow!(message)))?;

    let trade = state
        .collaborators
        .persistence
        .update_trade(case_id, trade_id, &update)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Trade {} not found in case {}",
                trade_id,
                case_id
            ))
        })?;

    info!(
        case_id = %case_id,
        trade_id = %trade_id,
        status = trade.status().as_str(),
        "Subscription trade edited"
    );

    Ok(Json(trade))
}
