//! Database service for subscription-service.

use crate::models::{
    CaseIsin, CaseSummary, PlannedCancellation, PlannedInsert, SubscriptionTrade, TradeStatus,
    TradeUpdate,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::repository::{CaseLookup, HealthCheck, TradeLookup, TradePersistence};
use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const TRADE_COLUMNS: &str = r#"
    t.id, t.isin_id, i.isin_number, t.counterparty, t.bank_investor, t.notional,
    t.trade_date, t.value_date, t.reference, t.trans_status
"#;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "subscription-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn trades_for_case(
        &self,
        case_id: Uuid,
        cancelled: bool,
        operation: &str,
    ) -> Result<Vec<SubscriptionTrade>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&[operation])
            .start_timer();

        let status_filter = if cancelled { "=" } else { "<>" };
        let query = format!(
            r#"
            SELECT {}
            FROM subscription_trades t
            INNER JOIN case_isins i ON i.id = t.isin_id
            WHERE i.case_id = $1 AND t.trans_status {} $2
            ORDER BY t.created_utc, t.id
            "#,
            TRADE_COLUMNS, status_filter
        );

        let trades = sqlx::query_as::<_, SubscriptionTrade>(&query)
            .bind(case_id)
            .bind(TradeStatus::Cancelled.as_i16())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list trades: {}", e)))?;

        timer.observe_duration();
        Ok(trades)
    }
}

#[async_trait]
impl HealthCheck for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }
}

// =========================================================================
// Case Operations
// =========================================================================

#[async_trait]
impl CaseLookup for Database {
    #[instrument(skip(self), fields(case_id = %case_id))]
    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseSummary>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_case"])
            .start_timer();

        let case = sqlx::query_as::<_, CaseSummary>("SELECT id, issue_date FROM cases WHERE id = $1")
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get case: {}", e)))?;

        timer.observe_duration();
        Ok(case)
    }

    #[instrument(skip(self), fields(case_id = %case_id))]
    async fn get_case_isins(&self, case_id: Uuid) -> Result<Vec<CaseIsin>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_case_isins"])
            .start_timer();

        let isins = sqlx::query_as::<_, CaseIsin>(
            r#"
            SELECT id, isin_number
            FROM case_isins
            WHERE case_id = $1
            ORDER BY isin_number
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get case ISINs: {}", e)))?;

        timer.observe_duration();
        Ok(isins)
    }
}

// =========================================================================
// Trade Operations
// =========================================================================

#[async_trait]
impl TradeLookup for Database {
    #[instrument(skip(self), fields(case_id = %case_id))]
    async fn get_trades_for_case(&self, case_id: Uuid) -> Result<Vec<SubscriptionTrade>, AppError> {
        self.trades_for_case(case_id, false, "get_trades_for_case")
            .await
    }

    #[instrument(skip(self), fields(case_id = %case_id))]
    async fn get_cancelled_trades_for_case(
        &self,
        case_id: Uuid,
    ) -> Result<Vec<SubscriptionTrade>, AppError> {
        self.trades_for_case(case_id, true, "get_cancelled_trades_for_case")
            .await
    }
}

#[async_trait]
impl TradePersistence for Database {
    #[instrument(skip(self, inserts, cancellations), fields(inserts = inserts.len(), cancellations = cancellations.len()))]
    async fn apply_reconciliation(
        &self,
        inserts: &[PlannedInsert],
        cancellations: &[PlannedCancellation],
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_reconciliation"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        for insert in inserts {
            sqlx::query(
                r#"
                INSERT INTO subscription_trades (id, isin_id, counterparty, bank_investor, notional, price_dirty, reference, tranfee, trade_date, value_date, trade_type, trans_status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(insert.id)
            .bind(insert.isin_id)
            .bind(&insert.counterparty)
            .bind(&insert.bank_investor)
            .bind(insert.notional)
            .bind(insert.price_dirty)
            .bind(&insert.reference)
            .bind(insert.tranfee)
            .bind(insert.trade_date)
            .bind(insert.value_date)
            .bind(insert.trade_type.as_i16())
            .bind(insert.status.as_i16())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to insert trade for ISIN {}: {}",
                    insert.isin_number,
                    e
                ))
            })?;
        }

        for cancellation in cancellations {
            let result = sqlx::query(
                r#"
                UPDATE subscription_trades
                SET trans_status = $2, updated_utc = NOW()
                WHERE id = $1 AND trans_status <> $3
                "#,
            )
            .bind(cancellation.existing_trade_id)
            .bind(cancellation.new_status.as_i16())
            .bind(TradeStatus::Cancelled.as_i16())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to cancel trade {}: {}",
                    cancellation.existing_trade_id,
                    e
                ))
            })?;

            if result.rows_affected() == 0 {
                tx.rollback().await.ok();
                warn!(trade_id = %cancellation.existing_trade_id, "Trade vanished or was cancelled concurrently");
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Trade {} is already cancelled or no longer exists",
                    cancellation.existing_trade_id
                )));
            }
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit reconciliation: {}", e))
        })?;

        timer.observe_duration();
        info!(
            inserted = inserts.len(),
            cancelled = cancellations.len(),
            "Reconciliation applied"
        );

        Ok(())
    }

    #[instrument(skip(self, update), fields(case_id = %case_id, trade_id = %trade_id))]
    async fn update_trade(
        &self,
        case_id: Uuid,
        trade_id: Uuid,
        update: &TradeUpdate,
    ) -> Result<Option<SubscriptionTrade>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_trade"])
            .start_timer();

        let query = format!(
            r#"
            UPDATE subscription_trades t
            SET counterparty = COALESCE($3, t.counterparty),
                bank_investor = COALESCE($4, t.bank_investor),
                notional = COALESCE($5, t.notional),
                reference = COALESCE($6, t.reference),
                trade_date = COALESCE($7, t.trade_date),
                value_date = COALESCE($8, t.value_date),
                trans_status = CASE WHEN t.trans_status = $9 THEN t.trans_status ELSE $10 END,
                updated_utc = NOW()
            FROM case_isins i
            WHERE t.id = $2 AND i.id = t.isin_id AND i.case_id = $1
            RETURNING {}
            "#,
            TRADE_COLUMNS
        );

        let trade = sqlx::query_as::<_, SubscriptionTrade>(&query)
            .bind(case_id)
            .bind(trade_id)
            .bind(&update.counterparty)
            .bind(&update.bank_investor)
            .bind(update.notional)
            .bind(&update.reference)
            .bind(update.trade_date)
            .bind(update.value_date)
            .bind(TradeStatus::Cancelled.as_i16())
            .bind(TradeStatus::Modified.as_i16())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to update trade {}: {}", trade_id, e))
            })?;

        timer.observe_duration();
        if let Some(trade) = &trade {
            info!(trans_status = trade.trans_status, "Trade updated");
        }

        Ok(trade)
    }
}
