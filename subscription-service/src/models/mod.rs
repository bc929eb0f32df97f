//! Domain models for subscription-service.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Extraction Models
// ============================================================================

/// Parsed spreadsheet as returned by the extractor: one entry per worksheet.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ExtractorResponse(pub Vec<SheetResult>);

impl ExtractorResponse {
    pub fn new(results: Vec<SheetResult>) -> Self {
        Self(results)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Worksheets the extractor could not parse.
    pub fn failures(&self) -> impl Iterator<Item = &ExtractionError> {
        self.0.iter().filter_map(|result| match result {
            SheetResult::Failed(failure) => Some(failure),
            SheetResult::Extracted(_) => None,
        })
    }

    /// Worksheets that were parsed into header + body.
    pub fn sheets(&self) -> impl Iterator<Item = &ExtractionSheet> {
        self.0.iter().filter_map(|result| match result {
            SheetResult::Extracted(sheet) => Some(sheet),
            SheetResult::Failed(_) => None,
        })
    }

    pub fn record_count(&self) -> usize {
        self.sheets().map(|sheet| sheet.body.len()).sum()
    }
}

/// One worksheet: either parsed data or the extractor's failure message.
///
/// Anything carrying an `error` field is a failure.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SheetResult {
    Failed(ExtractionError),
    Extracted(ExtractionSheet),
}

impl SheetResult {
    pub fn sheet_name(&self) -> &str {
        match self {
            SheetResult::Failed(failure) => &failure.sheet,
            SheetResult::Extracted(sheet) => &sheet.sheet_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExtractionError {
    #[serde(default)]
    pub sheet: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExtractionSheet {
    #[serde(rename = "sheet", default)]
    pub sheet_name: String,
    #[serde(default)]
    pub header: Option<SheetHeader>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub body: Vec<ExtractedRecord>,
}

impl ExtractionSheet {
    /// Header ISIN, trimmed; `None` when missing or blank.
    pub fn isin_number(&self) -> Option<&str> {
        self.header
            .as_ref()
            .and_then(|header| header.isin_number.as_deref())
            .map(str::trim)
            .filter(|isin| !isin.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SheetHeader {
    #[serde(rename = "ISINNumber", default)]
    pub isin_number: Option<String>,
    #[serde(default)]
    pub compartment: Option<String>,
    #[serde(rename = "payingAgent", default)]
    pub paying_agent: Option<String>,
}

/// One spreadsheet row.
///
/// Positive notional is a subscription; a negative notional together with
/// `is_cancellation` withdraws an existing one.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExtractedRecord {
    #[serde(rename = "counterParty", default, deserialize_with = "string_or_number")]
    pub counterparty: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub notional: Decimal,
    #[serde(rename = "tradeDate", deserialize_with = "flexible_date")]
    pub trade_date: NaiveDate,
    #[serde(rename = "subscriptionCancelled", default)]
    pub is_cancellation: bool,
    #[serde(default, deserialize_with = "string_or_number")]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Subscription,
    Cancellation,
    /// Sign and cancellation flag disagree, or the notional is zero.
    Unactionable,
}

impl ExtractedRecord {
    /// Counterparty as stored on trades; a missing value is the empty string.
    pub fn counterparty(&self) -> &str {
        self.counterparty.as_deref().unwrap_or("")
    }

    pub fn kind(&self) -> RecordKind {
        if self.notional > Decimal::ZERO && !self.is_cancellation {
            RecordKind::Subscription
        } else if self.notional < Decimal::ZERO && self.is_cancellation {
            RecordKind::Cancellation
        } else {
            RecordKind::Unactionable
        }
    }
}

/// Parse the date formats the extractor is known to emit. Time-of-day is dropped.
pub fn parse_trade_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc2822(raw).ok().map(|dt| dt.date_naive()))
        .or_else(|| NaiveDate::parse_from_str(raw, "%d.%m.%Y").ok())
}

fn flexible_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_trade_date(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid trade date: {}", raw)))
}

/// Decimal places kept for stored amounts; matches the `NUMERIC(24, 6)` columns.
pub const NOTIONAL_SCALE: u32 = 6;

fn parse_decimal(raw: &str) -> Decimal {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .unwrap_or(Decimal::ZERO)
}

// Spreadsheet cells are loosely typed; anything non-numeric is a zero notional.
// Rounded the way Postgres rounds on insert, so a stored trade compares equal
// to the cell it came from.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Value::deserialize(deserializer)? {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => Decimal::ZERO,
    };
    Ok(value.round_dp_with_strategy(NOTIONAL_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Case Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CaseSummary {
    pub id: Uuid,
    pub issue_date: Option<NaiveDate>,
}

/// A security issued by the case; `isin_number` is unique within the case.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct CaseIsin {
    pub id: Uuid,
    pub isin_number: String,
}

// ============================================================================
// Trade Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Subscription,
    Modified,
    Cancelled,
}

impl TradeStatus {
    pub fn as_i16(&self) -> i16 {
        match self {
            Self::Subscription => 1,
            Self::Modified => 2,
            Self::Cancelled => 3,
        }
    }

    pub fn from_i16(value: i16) -> Self {
        match value {
            2 => Self::Modified,
            3 => Self::Cancelled,
            _ => Self::Subscription,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Modified => "modified",
            Self::Cancelled => "cancelled",
        }
    }

    /// Status after a manual field edit. Cancelled trades stay cancelled.
    pub fn after_edit(self) -> Self {
        match self {
            Self::Cancelled => Self::Cancelled,
            _ => Self::Modified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    Subscription,
}

impl TradeType {
    pub fn as_i16(&self) -> i16 {
        match self {
            Self::Subscription => 1,
        }
    }
}

/// A persisted, not yet cancelled subscription trade. Notional is always positive.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ExistingTrade {
    pub id: Uuid,
    pub isin_number: String,
    pub notional: Decimal,
    pub trade_date: NaiveDate,
    pub counterparty: String,
}

/// Full trade row for listings.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SubscriptionTrade {
    pub id: Uuid,
    pub isin_id: Uuid,
    pub isin_number: String,
    pub counterparty: String,
    pub bank_investor: String,
    pub notional: Decimal,
    pub trade_date: NaiveDate,
    pub value_date: NaiveDate,
    pub reference: Option<String>,
    pub trans_status: i16,
}

impl SubscriptionTrade {
    pub fn status(&self) -> TradeStatus {
        TradeStatus::from_i16(self.trans_status)
    }
}

/// Manual edit of one trade. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradeUpdate {
    pub counterparty: Option<String>,
    pub bank_investor: Option<String>,
    pub notional: Option<Decimal>,
    pub reference: Option<String>,
    pub trade_date: Option<NaiveDate>,
    pub value_date: Option<NaiveDate>,
}

impl TradeUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Trim text fields and round the notional to storage scale. Blank text,
    /// a non-positive notional and an update with no fields are rejected.
    pub fn normalized(mut self) -> Result<Self, String> {
        if self.is_empty() {
            return Err("No fields to update".to_string());
        }

        for (field, value) in [
            ("counterparty", &mut self.counterparty),
            ("bank_investor", &mut self.bank_investor),
            ("reference", &mut self.reference),
        ] {
            if let Some(text) = value {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(format!("{} cannot be empty", field));
                }
                *text = trimmed.to_string();
            }
        }

        if let Some(notional) = self.notional.as_mut() {
            *notional = notional
                .round_dp_with_strategy(NOTIONAL_SCALE, RoundingStrategy::MidpointAwayFromZero);
            if *notional <= Decimal::ZERO {
                return Err("notional must be positive".to_string());
            }
        }

        Ok(self)
    }
}

impl From<&SubscriptionTrade> for ExistingTrade {
    fn from(trade: &SubscriptionTrade) -> Self {
        Self {
            id: trade.id,
            isin_number: trade.isin_number.clone(),
            notional: trade.notional,
            trade_date: trade.trade_date,
            counterparty: trade.counterparty.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedInsert {
    pub id: Uuid,
    pub isin_id: Uuid,
    pub isin_number: String,
    pub bank_investor: String,
    pub counterparty: String,
    pub notional: Decimal,
    pub price_dirty: Decimal,
    pub reference: Option<String>,
    pub tranfee: Decimal,
    pub trade_date: NaiveDate,
    pub value_date: NaiveDate,
    pub trade_type: TradeType,
    pub status: TradeStatus,
}

impl PlannedInsert {
    /// New subscription for `record`; value date falls back to the trade date.
    pub fn from_record(
        isin: &CaseIsin,
        record: &ExtractedRecord,
        issue_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            isin_id: isin.id,
            isin_number: isin.isin_number.clone(),
            bank_investor: String::new(),
            counterparty: record.counterparty().to_string(),
            notional: record.notional,
            price_dirty: Decimal::ZERO,
            reference: record.reference.clone(),
            tranfee: Decimal::ZERO,
            trade_date: record.trade_date,
            value_date: issue_date.unwrap_or(record.trade_date),
            trade_type: TradeType::Subscription,
            status: TradeStatus::Subscription,
        }
    }
}

/// Status flip on an existing trade. Never creates rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedCancellation {
    pub existing_trade_id: Uuid,
    pub new_status: TradeStatus,
}

impl PlannedCancellation {
    pub fn new(existing_trade_id: Uuid) -> Self {
        Self {
            existing_trade_id,
            new_status: TradeStatus::Cancelled,
        }
    }
}

/// A cancellation row that matched no recorded trade and was not applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedCancellation {
    pub sheet_name: String,
    pub isin_number: String,
    pub counterparty: String,
    pub notional: Decimal,
    pub trade_date: NaiveDate,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationPlan {
    pub inserts: Vec<PlannedInsert>,
    pub cancellations: Vec<PlannedCancellation>,
    /// Subscriptions that matched an existing trade.
    pub already_recorded: usize,
    pub unmatched_cancellations: Vec<UnmatchedCancellation>,
    /// Records that are neither subscriptions nor cancellations.
    pub unclassified: usize,
}

impl ReconciliationPlan {
    /// Nothing to persist.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.cancellations.is_empty()
    }

    /// Every record lands in exactly one bucket, so this equals the input record count.
    pub fn accounted_records(&self) -> usize {
        self.inserts.len()
            + self.cancellations.len()
            + self.already_recorded
            + self.unmatched_cancellations.len()
            + self.unclassified
    }
}
