mod common;

use common::*;
use rust_decimal_macros::dec;
use subscription_service::models::TradeStatus;
use subscription_service::workflow::{UploadStage, UploadWorkflow};

#[tokio::test]
async fn new_subscription_is_inserted() {
    init_tracing();
    let store = InMemoryStore::new();
    let case_id = store.add_case(None);
    store.add_isin(case_id, "CH001");
    let extractor = StaticExtractor::returning(response(vec![sheet_json(
        "Tranche 1",
        "CH001",
        vec![record_json("BankX", 1000.0, "2024-01-10", false)],
    )]));

    let mut workflow = UploadWorkflow::new(case_id, None, collaborators(&store, extractor));
    let progress = workflow.subscribe();
    let outcome = workflow.run(workbook("trades.xlsx")).await;

    assert_eq!(outcome.stage, UploadStage::Done);
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.cancelled, 0);
    assert!(outcome.issues.is_empty());
    assert_eq!(outcome.file_name.as_deref(), Some("trades.xlsx"));
    assert_eq!(*progress.borrow(), UploadStage::Done);

    let trades = store.trades(case_id);
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].notional, dec!(1000));
    assert_eq!(trades[0].counterparty, "BankX");
    assert_eq!(trades[0].trade_date, date(2024, 1, 10));
}

#[tokio::test]
async fn uploading_the_same_file_twice_records_nothing_new() {
    init_tracing();
    let store = InMemoryStore::new();
    let case_id = store.add_case(None);
    store.add_isin(case_id, "CH001");
    store.add_isin(case_id, "CH002");
    let extractor = StaticExtractor::returning(response(vec![
        sheet_json(
            "Tranche 1",
            "CH001",
            vec![
                record_json("BankX", 1000.0, "2024-01-10", false),
                record_json("BankZ", 250.5, "2024-01-11T09:30:00", false),
            ],
        ),
        sheet_json(
            "Tranche 2",
            "CH002",
            vec![record_json("BankX", 75.0, "2024-01-12", false)],
        ),
    ]));

    let first = UploadWorkflow::new(case_id, None, collaborators(&store, extractor.clone()))
        .run(workbook("trades.xlsx"))
        .await;
    assert_eq!(first.stage, UploadStage::Done);
    assert_eq!(first.inserted, 3);

    let second = UploadWorkflow::new(case_id, None, collaborators(&store, extractor))
        .run(workbook("trades.xlsx"))
        .await;
    assert_eq!(second.stage, UploadStage::NoRecords);
    assert_eq!(second.inserted, 0);
    assert_eq!(store.trades(case_id).len(), 3);
    assert_eq!(store.apply_calls(), 1);
}

#[tokio::test]
async fn cancellation_flips_the_recorded_trade() {
    init_tracing();
    let store = InMemoryStore::new();
    let case_id = store.add_case(None);
    let isin = store.add_isin(case_id, "CH001");
    let trade_id = store.add_trade(case_id, &isin, "BankY", dec!(500), date(2024, 2, 1));
    let extractor = StaticExtractor::returning(response(vec![sheet_json(
        "Tranche 1",
        "CH001",
        vec![record_json("BankY", -500.0, "2024-02-01", true)],
    )]));

    let outcome = UploadWorkflow::new(case_id, None, collaborators(&store, extractor))
        .run(workbook("trades.xlsm"))
        .await;

    assert_eq!(outcome.stage, UploadStage::Done);
    assert_eq!(outcome.cancelled, 1);
    assert_eq!(outcome.inserted, 0);

    let trades = store.trades(case_id);
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].id, trade_id);
    assert_eq!(trades[0].status(), TradeStatus::Cancelled);
}

#[tokio::test]
async fn unknown_isin_stops_at_warning() {
    init_tracing();
    let store = InMemoryStore::new();
    let case_id = store.add_case(None);
    store.add_isin(case_id, "CH001");
    let extractor = StaticExtractor::returning(response(vec![sheet_json(
        "Tranche 9",
        "CH999",
        vec![record_json("BankX", 1000.0, "2024-01-10", false)],
    )]));

    let outcome = UploadWorkflow::new(case_id, None, collaborators(&store, extractor))
        .run(workbook("trades.xlsx"))
        .await;

    assert_eq!(outcome.stage, UploadStage::Warning);
    assert_eq!(
        outcome.issues,
        vec!["Sheet [Tranche 9]: ISINNumber does not match with the compartment.".to_string()]
    );
    assert_eq!(store.apply_calls(), 0);
    assert!(store.trades(case_id).is_empty());
}

#[tokio::test]
async fn extractor_sheet_errors_end_in_error() {
    init_tracing();
    let store = InMemoryStore::new();
    let case_id = store.add_case(None);
    store.add_isin(case_id, "CH001");
    let extractor = StaticExtractor::returning(response(vec![
        error_sheet_json("A", "Header format invalid"),
        error_sheet_json("B", "Header format invalid"),
        sheet_json(
            "C",
            "CH001",
            vec![record_json("BankX", 1000.0, "2024-01-10", false)],
        ),
    ]));

    let outcome = UploadWorkflow::new(case_id, None, collaborators(&store, extractor))
        .run(workbook("trades.xlsx"))
        .await;

    assert_eq!(outcome.stage, UploadStage::Error);
    assert_eq!(
        outcome.issues,
        vec!["Sheets [A, B]: Header format invalid".to_string()]
    );
    assert_eq!(store.apply_calls(), 0);
}

#[tokio::test]
async fn extractor_failure_is_reported_as_error() {
    init_tracing();
    let store = InMemoryStore::new();
    let case_id = store.add_case(None);
    store.add_isin(case_id, "CH001");
    let extractor = StaticExtractor::failing(400, "Invalid file type");

    let mut workflow = UploadWorkflow::new(case_id, None, collaborators(&store, extractor));
    let outcome = workflow.run(workbook("trades.xlsx")).await;

    assert_eq!(outcome.stage, UploadStage::Error);
    assert_eq!(
        outcome.issues,
        vec!["Extractor returned 400: Invalid file type".to_string()]
    );
    assert_eq!(workflow.stage(), UploadStage::Error);
}

#[tokio::test]
async fn persistence_failure_is_reported_and_nothing_is_written() {
    init_tracing();
    let store = InMemoryStore::new();
    let case_id = store.add_case(None);
    store.add_isin(case_id, "CH001");
    store.fail_persistence_with("deadlock detected");
    let extractor = StaticExtractor::returning(response(vec![sheet_json(
        "Tranche 1",
        "CH001",
        vec![record_json("BankX", 1000.0, "2024-01-10", false)],
    )]));

    let outcome = UploadWorkflow::new(case_id, None, collaborators(&store, extractor))
        .run(workbook("trades.xlsx"))
        .await;

    assert_eq!(outcome.stage, UploadStage::Error);
    assert_eq!(outcome.inserted, 0);
    assert_eq!(outcome.issues.len(), 1);
    assert!(outcome.issues[0].contains("deadlock detected"));
    assert!(store.trades(case_id).is_empty());
}

#[tokio::test]
async fn unmatched_cancellation_is_surfaced_without_changes() {
    init_tracing();
    let store = InMemoryStore::new();
    let case_id = store.add_case(None);
    store.add_isin(case_id, "CH001");
    let extractor = StaticExtractor::returning(response(vec![sheet_json(
        "Tranche 1",
        "CH001",
        vec![record_json("BankY", -500.0, "2024-02-01", true)],
    )]));

    let outcome = UploadWorkflow::new(case_id, None, collaborators(&store, extractor))
        .run(workbook("trades.xlsx"))
        .await;

    assert_eq!(outcome.stage, UploadStage::NoRecords);
    assert_eq!(outcome.unmatched_cancellations.len(), 1);
    assert_eq!(outcome.unmatched_cancellations[0].counterparty, "BankY");
    assert_eq!(store.apply_calls(), 0);
}

#[tokio::test]
async fn empty_extraction_has_no_records() {
    init_tracing();
    let store = InMemoryStore::new();
    let case_id = store.add_case(None);
    let extractor = StaticExtractor::returning(response(vec![]));

    let outcome = UploadWorkflow::new(case_id, None, collaborators(&store, extractor))
        .run(workbook("empty.xlsx"))
        .await;

    assert_eq!(outcome.stage, UploadStage::NoRecords);
}

#[tokio::test]
async fn case_issue_date_becomes_value_date() {
    init_tracing();
    let store = InMemoryStore::new();
    let case_id = store.add_case(Some(date(2024, 3, 1)));
    store.add_isin(case_id, "CH001");
    let extractor = StaticExtractor::returning(response(vec![sheet_json(
        "Tranche 1",
        "CH001",
        vec![record_json("BankX", 1000.0, "2024-01-10", false)],
    )]));

    UploadWorkflow::new(case_id, Some(date(2024, 3, 1)), collaborators(&store, extractor))
        .run(workbook("trades.xlsx"))
        .await;

    let trades = store.trades(case_id);
    assert_eq!(trades[0].value_date, date(2024, 3, 1));
    assert_eq!(trades[0].trade_date, date(2024, 1, 10));
}

#[tokio::test]
async fn rerunning_a_workflow_starts_from_idle() {
    init_tracing();
    let store = InMemoryStore::new();
    let case_id = store.add_case(None);
    let extractor = StaticExtractor::returning(response(vec![sheet_json(
        "Tranche 1",
        "CH001",
        vec![record_json("BankX", 1000.0, "2024-01-10", false)],
    )]));

    let mut workflow = UploadWorkflow::new(case_id, None, collaborators(&store, extractor));
    let first = workflow.run(workbook("first.xlsx")).await;
    assert_eq!(first.stage, UploadStage::Warning);

    store.add_isin(case_id, "CH001");
    let second = workflow.run(workbook("second.xlsx")).await;

    assert_eq!(second.stage, UploadStage::Done);
    assert!(second.issues.is_empty());
    assert_eq!(second.file_name.as_deref(), Some("second.xlsx"));
    assert!(workflow.issues().is_empty());
}
