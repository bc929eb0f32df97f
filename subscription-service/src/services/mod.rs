//! Services module for subscription-service.

pub mod database;
pub mod extractor;
pub mod metrics;
pub mod repository;

pub use database::Database;
pub use extractor::{ExtractorError, HttpExtractorClient, SpreadsheetExtractor, SpreadsheetFile};
pub use metrics::{
    get_metrics, init_metrics, record_error, record_extractor_call, record_planned_actions,
    record_upload_outcome,
};
pub use repository::{CaseLookup, HealthCheck, TradeLookup, TradePersistence};
