//! Turns validated extraction sheets into trade inserts and cancellations.

use crate::models::{
    CaseIsin, ExistingTrade, ExtractedRecord, ExtractionSheet, PlannedCancellation, PlannedInsert,
    ReconciliationPlan, RecordKind, UnmatchedCancellation,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Plan the inserts and cancellations needed to bring `existing_trades` in line
/// with `sheets`.
///
/// Expects sheets that passed [`validate`](super::validate). Subscriptions
/// already present (same notional, trade day and counterparty) are skipped, so
/// planning twice over the same data never duplicates a trade. Cancellations
/// must match a recorded trade by absolute notional; each trade is cancelled at
/// most once per plan. When several trades match, the first in
/// `existing_trades` order wins.
pub fn reconcile<'a, I>(
    sheets: I,
    existing_trades: &[ExistingTrade],
    known_isins: &[CaseIsin],
    issue_date: Option<NaiveDate>,
) -> ReconciliationPlan
where
    I: IntoIterator<Item = &'a ExtractionSheet>,
{
    let mut trades_by_isin: HashMap<&str, Vec<&ExistingTrade>> = HashMap::new();
    for trade in existing_trades {
        trades_by_isin
            .entry(trade.isin_number.as_str())
            .or_default()
            .push(trade);
    }

    let isins: HashMap<&str, &CaseIsin> = known_isins
        .iter()
        .map(|isin| (isin.isin_number.as_str(), isin))
        .collect();

    let mut claimed: HashSet<Uuid> = HashSet::new();
    let mut plan = ReconciliationPlan::default();

    for sheet in sheets {
        let Some(isin) = sheet
            .isin_number()
            .and_then(|number| isins.get(number).copied())
        else {
            tracing::warn!(
                sheet = %sheet.sheet_name,
                isin_number = ?sheet.isin_number(),
                records = sheet.body.len(),
                "No case ISIN for sheet, skipping its records"
            );
            plan.unclassified += sheet.body.len();
            continue;
        };

        let bucket = trades_by_isin
            .get(isin.isin_number.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default();

        for record in &sheet.body {
            match record.kind() {
                RecordKind::Subscription => {
                    if find_trade(bucket, record.notional, record, &HashSet::new()).is_some() {
                        plan.already_recorded += 1;
                    } else {
                        plan.inserts
                            .push(PlannedInsert::from_record(isin, record, issue_date));
                    }
                }
                RecordKind::Cancellation => {
                    match find_trade(bucket, record.notional.abs(), record, &claimed) {
                        Some(trade) => {
                            claimed.insert(trade.id);
                            plan.cancellations.push(PlannedCancellation::new(trade.id));
                        }
                        None => {
                            tracing::warn!(
                                sheet = %sheet.sheet_name,
                                isin_number = %isin.isin_number,
                                counterparty = %record.counterparty(),
                                notional = %record.notional,
                                trade_date = %record.trade_date,
                                "Cancellation does not match any recorded trade"
                            );
                            plan.unmatched_cancellations.push(UnmatchedCancellation {
                                sheet_name: sheet.sheet_name.clone(),
                                isin_number: isin.isin_number.clone(),
                                counterparty: record.counterparty().to_string(),
                                notional: record.notional,
                                trade_date: record.trade_date,
                                reference: record.reference.clone(),
                            });
                        }
                    }
                }
                RecordKind::Unactionable => plan.unclassified += 1,
            }
        }
    }

    tracing::debug!(
        inserts = plan.inserts.len(),
        cancellations = plan.cancellations.len(),
        already_recorded = plan.already_recorded,
        unmatched_cancellations = plan.unmatched_cancellations.len(),
        unclassified = plan.unclassified,
        "Reconciliation planned"
    );

    plan
}

fn find_trade<'t>(
    bucket: &[&'t ExistingTrade],
    notional: Decimal,
    record: &ExtractedRecord,
    excluded: &HashSet<Uuid>,
) -> Option<&'t ExistingTrade> {
    bucket.iter().copied().find(|trade| {
        !excluded.contains(&trade.id)
            && trade.notional == notional
            && trade.trade_date == record.trade_date
            && trade.counterparty == record.counterparty()
    })
}
