//! Common test utilities for subscription-service integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
    Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use subscription_service::models::{
    CaseIsin, CaseSummary, ExtractorResponse, PlannedCancellation, PlannedInsert,
    SubscriptionTrade, TradeStatus, TradeUpdate,
};
use subscription_service::services::{
    CaseLookup, ExtractorError, HealthCheck, SpreadsheetExtractor, SpreadsheetFile, TradeLookup,
    TradePersistence,
};
use subscription_service::startup::AppState;
use subscription_service::workflow::Collaborators;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,subscription_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ============================================================================
// Extractor payloads
// ============================================================================

pub fn record_json(counterparty: &str, notional: f64, trade_date: &str, cancelled: bool) -> Value {
    json!({
        "tradeDate": trade_date,
        "counterParty": counterparty,
        "notional": notional,
        "reference": null,
        "subscriptionCancelled": cancelled,
    })
}

pub fn sheet_json(name: &str, isin: &str, body: Vec<Value>) -> Value {
    json!({
        "sheet": name,
        "header": { "ISINNumber": isin, "compartment": "C1", "payingAgent": "PA" },
        "body": body,
    })
}

pub fn error_sheet_json(name: &str, error: &str) -> Value {
    json!({ "sheet": name, "error": error })
}

pub fn response(sheets: Vec<Value>) -> ExtractorResponse {
    serde_json::from_value(Value::Array(sheets)).expect("valid extractor payload")
}

pub fn workbook(name: &str) -> SpreadsheetFile {
    SpreadsheetFile::new(name, b"PK\x03\x04 fake workbook".to_vec()).expect("excel file name")
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct StoreState {
    cases: HashMap<Uuid, CaseSummary>,
    isins: HashMap<Uuid, Vec<CaseIsin>>,
    trades: Vec<(Uuid, SubscriptionTrade)>,
    persistence_failure: Option<String>,
    apply_calls: usize,
}

/// Case, ISIN and trade storage with the same contract as the database.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    unhealthy: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_case(&self, issue_date: Option<NaiveDate>) -> Uuid {
        let id = Uuid::new_v4();
        self.state
            .lock()
            .unwrap()
            .cases
            .insert(id, CaseSummary { id, issue_date });
        id
    }

    pub fn add_isin(&self, case_id: Uuid, isin_number: &str) -> CaseIsin {
        let isin = CaseIsin {
            id: Uuid::new_v4(),
            isin_number: isin_number.to_string(),
        };
        self.state
            .lock()
            .unwrap()
            .isins
            .entry(case_id)
            .or_default()
            .push(isin.clone());
        isin
    }

    pub fn add_trade(
        &self,
        case_id: Uuid,
        isin: &CaseIsin,
        counterparty: &str,
        notional: Decimal,
        trade_date: NaiveDate,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().trades.push((
            case_id,
            SubscriptionTrade {
                id,
                isin_id: isin.id,
                isin_number: isin.isin_number.clone(),
                counterparty: counterparty.to_string(),
                bank_investor: String::new(),
                notional,
                trade_date,
                value_date: trade_date,
                reference: None,
                trans_status: TradeStatus::Subscription.as_i16(),
            },
        ));
        id
    }

    /// Every trade of the case, cancelled or not, in insertion order.
    pub fn trades(&self, case_id: Uuid) -> Vec<SubscriptionTrade> {
        self.state
            .lock()
            .unwrap()
            .trades
            .iter()
            .filter(|(owner, _)| *owner == case_id)
            .map(|(_, trade)| trade.clone())
            .collect()
    }

    pub fn fail_persistence_with(&self, message: &str) {
        self.state.lock().unwrap().persistence_failure = Some(message.to_string());
    }

    pub fn apply_calls(&self) -> usize {
        self.state.lock().unwrap().apply_calls
    }

    pub fn set_unhealthy(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }

    fn trades_with_status(&self, case_id: Uuid, cancelled: bool) -> Vec<SubscriptionTrade> {
        self.trades(case_id)
            .into_iter()
            .filter(|trade| (trade.status() == TradeStatus::Cancelled) == cancelled)
            .collect()
    }
}

#[async_trait]
impl CaseLookup for InMemoryStore {
    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseSummary>, AppError> {
        Ok(self.state.lock().unwrap().cases.get(&case_id).cloned())
    }

    async fn get_case_isins(&self, case_id: Uuid) -> Result<Vec<CaseIsin>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .isins
            .get(&case_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl TradeLookup for InMemoryStore {
    async fn get_trades_for_case(&self, case_id: Uuid) -> Result<Vec<SubscriptionTrade>, AppError> {
        Ok(self.trades_with_status(case_id, false))
    }

    async fn get_cancelled_trades_for_case(
        &self,
        case_id: Uuid,
    ) -> Result<Vec<SubscriptionTrade>, AppError> {
        Ok(self.trades_with_status(case_id, true))
    }
}

#[async_trait]
impl TradePersistence for InMemoryStore {
    async fn apply_reconciliation(
        &self,
        inserts: &[PlannedInsert],
        cancellations: &[PlannedCancellation],
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.apply_calls += 1;

        if let Some(message) = &state.persistence_failure {
            return Err(AppError::DatabaseError(anyhow::anyhow!(message.clone())));
        }

        for cancellation in cancellations {
            let live = state.trades.iter().any(|(_, trade)| {
                trade.id == cancellation.existing_trade_id
                    && trade.status() != TradeStatus::Cancelled
            });
            if !live {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Trade {} is already cancelled or no longer exists",
                    cancellation.existing_trade_id
                )));
            }
        }

        for insert in inserts {
            let case_id = state
                .isins
                .iter()
                .find(|(_, isins)| isins.iter().any(|isin| isin.id == insert.isin_id))
                .map(|(case_id, _)| *case_id)
                .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Unknown ISIN id")))?;
            state.trades.push((
                case_id,
                SubscriptionTrade {
                    id: insert.id,
                    isin_id: insert.isin_id,
                    isin_number: insert.isin_number.clone(),
                    counterparty: insert.counterparty.clone(),
                    bank_investor: insert.bank_investor.clone(),
                    notional: insert.notional,
                    trade_date: insert.trade_date,
                    value_date: insert.value_date,
                    reference: insert.reference.clone(),
                    trans_status: insert.status.as_i16(),
                },
            ));
        }

        for cancellation in cancellations {
            if let Some((_, trade)) = state
                .trades
                .iter_mut()
                .find(|(_, trade)| trade.id == cancellation.existing_trade_id)
            {
                trade.trans_status = cancellation.new_status.as_i16();
            }
        }

        Ok(())
    }

    async fn update_trade(
        &self,
        case_id: Uuid,
        trade_id: Uuid,
        update: &TradeUpdate,
    ) -> Result<Option<SubscriptionTrade>, AppError> {
        let mut state = self.state.lock().unwrap();
        let Some((_, trade)) = state
            .trades
            .iter_mut()
            .find(|(owner, trade)| *owner == case_id && trade.id == trade_id)
        else {
            return Ok(None);
        };

        if let Some(counterparty) = &update.counterparty {
            trade.counterparty = counterparty.clone();
        }
        if let Some(bank_investor) = &update.bank_investor {
            trade.bank_investor = bank_investor.clone();
        }
        if let Some(notional) = update.notional {
            trade.notional = notional;
        }
        if let Some(reference) = &update.reference {
            trade.reference = Some(reference.clone());
        }
        if let Some(trade_date) = update.trade_date {
            trade.trade_date = trade_date;
        }
        if let Some(value_date) = update.value_date {
            trade.value_date = value_date;
        }
        trade.trans_status = trade.status().after_edit().as_i16();

        Ok(Some(trade.clone()))
    }
}

#[async_trait]
impl HealthCheck for InMemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!("connection refused")));
        }
        Ok(())
    }
}

// ============================================================================
// Extractor fakes
// ============================================================================

/// Answers every extraction with the same response or the same HTTP failure.
pub struct StaticExtractor {
    response: Result<ExtractorResponse, (u16, String)>,
    calls: AtomicUsize,
    gate: Option<Gate>,
}

/// Lets a test hold an extraction open until it chooses to release it.
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

impl StaticExtractor {
    pub fn returning(response: ExtractorResponse) -> Arc<Self> {
        Arc::new(Self {
            response: Ok(response),
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn failing(status: u16, message: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Err((status, message.to_string())),
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn gated(response: ExtractorResponse) -> Arc<Self> {
        Arc::new(Self {
            response: Ok(response),
            calls: AtomicUsize::new(0),
            gate: Some(Gate {
                entered: Notify::new(),
                release: Notify::new(),
            }),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn gate(&self) -> &Gate {
        self.gate.as_ref().expect("extractor was built with a gate")
    }
}

#[async_trait]
impl SpreadsheetExtractor for StaticExtractor {
    async fn extract(
        &self,
        _file: &SpreadsheetFile,
        _request_id: Option<&str>,
    ) -> Result<ExtractorResponse, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        match &self.response {
            Ok(response) => Ok(response.clone()),
            Err((status, message)) => Err(ExtractorError::Status {
                status: *status,
                message: message.clone(),
            }),
        }
    }
}

pub fn collaborators(store: &Arc<InMemoryStore>, extractor: Arc<StaticExtractor>) -> Collaborators {
    Collaborators::new(store.clone(), extractor)
}

pub fn app_state(store: &Arc<InMemoryStore>, extractor: Arc<StaticExtractor>) -> AppState {
    AppState::new(store.clone(), extractor)
}

// ============================================================================
// HTTP mock extractor
// ============================================================================

/// One multipart upload as seen by the mock extractor.
#[derive(Debug, Clone)]
pub struct ReceivedUpload {
    pub field_name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size: usize,
    pub request_id: Option<String>,
}

#[derive(Clone)]
struct MockState {
    status: StatusCode,
    body: String,
    delay: Duration,
    received: Arc<Mutex<Vec<ReceivedUpload>>>,
}

pub struct MockExtractor {
    pub url: String,
    pub received: Arc<Mutex<Vec<ReceivedUpload>>>,
}

async fn mock_extract(
    State(state): State<MockState>,
    headers: axum::http::HeaderMap,
    mut multipart: Multipart,
) -> (StatusCode, String) {
    while let Ok(Some(field)) = multipart.next_field().await {
        let field_name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let size = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        state.received.lock().unwrap().push(ReceivedUpload {
            field_name,
            file_name,
            content_type,
            size,
            request_id: headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
    }

    tokio::time::sleep(state.delay).await;
    (state.status, state.body.clone())
}

/// Serve `body` with `status` for every POST to `/extract` on an ephemeral port.
pub async fn spawn_mock_extractor(status: StatusCode, body: String) -> MockExtractor {
    spawn_slow_mock_extractor(status, body, Duration::ZERO).await
}

pub async fn spawn_slow_mock_extractor(
    status: StatusCode,
    body: String,
    delay: Duration,
) -> MockExtractor {
    let received = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        status,
        body,
        delay,
        received: received.clone(),
    };

    let app = Router::new()
        .route("/extract", post(mock_extract))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock extractor");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    MockExtractor {
        url: format!("http://127.0.0.1:{}/extract", port),
        received,
    }
}

pub fn json_body(value: &Value) -> String {
    serde_json::to_string(value).unwrap()
}

pub fn error_body(message: &str) -> String {
    json_body(&json!({ "error": message }))
}

// ============================================================================
// Multipart requests
// ============================================================================

pub const BOUNDARY: &str = "----subscription-test-boundary";

/// Build a multipart/form-data body holding one file field.
pub fn multipart_body(field_name: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field_name, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={}", BOUNDARY)
}
