//! Upload workflow: drives one spreadsheet from extraction to persisted trades.
//!
//! A workflow is built per case and upload attempt. It owns the only mutable
//! state of the process (current stage, file name, last issues) and publishes
//! every stage change on a watch channel.

use crate::models::{ExistingTrade, UnmatchedCancellation};
use crate::reconcile::{reconcile, validate, IssueSeverity};
use crate::services::metrics::{record_error, record_planned_actions, record_upload_outcome};
use crate::services::{
    CaseLookup, ExtractorError, SpreadsheetExtractor, SpreadsheetFile, TradeLookup,
    TradePersistence,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

// ============================================================================
// Stages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStage {
    Idle,
    Uploading,
    Validating,
    Preparing,
    Saving,
    Done,
    Error,
    Warning,
    NoRecords,
}

impl UploadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Validating => "validating",
            Self::Preparing => "preparing",
            Self::Saving => "saving",
            Self::Done => "done",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::NoRecords => "norecords",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Error | Self::Warning | Self::NoRecords
        )
    }

    pub fn can_transition_to(&self, next: UploadStage) -> bool {
        use UploadStage::*;

        match (self, next) {
            (Idle, Uploading) => true,
            (Uploading, Validating | Error) => true,
            (Validating, Preparing | Warning | Error) => true,
            (Preparing, Saving | Error) => true,
            (Saving, Done | NoRecords | Error) => true,
            (from, Idle) => from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Errors and outcome
// ============================================================================

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Extractor(#[from] ExtractorError),

    #[error(transparent)]
    Storage(#[from] AppError),

    #[error("Illegal stage transition from {from} to {to}")]
    IllegalTransition { from: UploadStage, to: UploadStage },
}

impl WorkflowError {
    fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Extractor(_) => "extractor",
            WorkflowError::Storage(_) => "storage",
            WorkflowError::IllegalTransition { .. } => "illegal_transition",
        }
    }
}

/// Result of one upload attempt, returned to the caller as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub case_id: Uuid,
    pub file_name: Option<String>,
    pub stage: UploadStage,
    pub issues: Vec<String>,
    pub inserted: usize,
    pub cancelled: usize,
    pub unmatched_cancellations: Vec<UnmatchedCancellation>,
}

#[derive(Default)]
struct Applied {
    inserted: usize,
    cancelled: usize,
    unmatched_cancellations: Vec<UnmatchedCancellation>,
}

// ============================================================================
// Workflow
// ============================================================================

/// The collaborators a workflow calls out to.
#[derive(Clone)]
pub struct Collaborators {
    pub cases: Arc<dyn CaseLookup>,
    pub trades: Arc<dyn TradeLookup>,
    pub persistence: Arc<dyn TradePersistence>,
    pub extractor: Arc<dyn SpreadsheetExtractor>,
}

impl Collaborators {
    /// Use one store for every lookup and for persistence.
    pub fn new<S>(store: Arc<S>, extractor: Arc<dyn SpreadsheetExtractor>) -> Self
    where
        S: CaseLookup + TradeLookup + TradePersistence + 'static,
    {
        Self {
            cases: store.clone(),
            trades: store.clone(),
            persistence: store,
            extractor,
        }
    }
}

pub struct UploadWorkflow {
    case_id: Uuid,
    issue_date: Option<NaiveDate>,
    request_id: Option<String>,
    collaborators: Collaborators,
    stage: UploadStage,
    file_name: Option<String>,
    issues: Vec<String>,
    progress: watch::Sender<UploadStage>,
}

impl UploadWorkflow {
    pub fn new(case_id: Uuid, issue_date: Option<NaiveDate>, collaborators: Collaborators) -> Self {
        let (progress, _) = watch::channel(UploadStage::Idle);
        Self {
            case_id,
            issue_date,
            request_id: None,
            collaborators,
            stage: UploadStage::Idle,
            file_name: None,
            issues: Vec::new(),
            progress,
        }
    }

    /// Correlation ID forwarded to the extractor.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn case_id(&self) -> Uuid {
        self.case_id
    }

    pub fn stage(&self) -> UploadStage {
        self.stage
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    /// Watch stage changes of this workflow.
    pub fn subscribe(&self) -> watch::Receiver<UploadStage> {
        self.progress.subscribe()
    }

    /// Run one upload attempt to a terminal stage. Never fails: collaborator
    /// errors end in [`UploadStage::Error`] with the error message as issue.
    #[instrument(skip(self, file), fields(case_id = %self.case_id, file_name = %file.file_name()))]
    pub async fn run(&mut self, file: SpreadsheetFile) -> UploadOutcome {
        self.reset();
        self.file_name = Some(file.file_name().to_string());

        let applied = match self.execute(&file).await {
            Ok(applied) => applied,
            Err(e) => {
                self.fail(e);
                Applied::default()
            }
        };

        record_upload_outcome(self.stage.as_str());
        info!(
            stage = %self.stage,
            inserted = applied.inserted,
            cancelled = applied.cancelled,
            issues = self.issues.len(),
            "Upload finished"
        );

        UploadOutcome {
            case_id: self.case_id,
            file_name: self.file_name.clone(),
            stage: self.stage,
            issues: self.issues.clone(),
            inserted: applied.inserted,
            cancelled: applied.cancelled,
            unmatched_cancellations: applied.unmatched_cancellations,
        }
    }

    async fn execute(&mut self, file: &SpreadsheetFile) -> Result<Applied, WorkflowError> {
        self.transition(UploadStage::Uploading)?;
        let isins = self
            .collaborators
            .cases
            .get_case_isins(self.case_id)
            .await?;
        let response = self
            .collaborators
            .extractor
            .extract(file, self.request_id.as_deref())
            .await?;

        self.transition(UploadStage::Validating)?;
        if let Some(failure) = validate(&response, &isins) {
            warn!(
                severity = ?failure.severity,
                issues = ?failure.issues,
                "Extracted spreadsheet rejected"
            );
            self.issues = failure.issues;
            self.transition(match failure.severity {
                IssueSeverity::Error => UploadStage::Error,
                IssueSeverity::Warning => UploadStage::Warning,
            })?;
            return Ok(Applied::default());
        }

        // Re-read right before planning so recent edits are not duplicated.
        self.transition(UploadStage::Preparing)?;
        let current: Vec<ExistingTrade> = self
            .collaborators
            .trades
            .get_trades_for_case(self.case_id)
            .await?
            .iter()
            .map(ExistingTrade::from)
            .collect();
        let plan = reconcile(response.sheets(), &current, &isins, self.issue_date);
        record_planned_actions(
            plan.inserts.len(),
            plan.cancellations.len(),
            plan.unmatched_cancellations.len(),
        );

        self.transition(UploadStage::Saving)?;
        if plan.is_empty() {
            self.transition(UploadStage::NoRecords)?;
            return Ok(Applied {
                unmatched_cancellations: plan.unmatched_cancellations,
                ..Applied::default()
            });
        }

        self.collaborators
            .persistence
            .apply_reconciliation(&plan.inserts, &plan.cancellations)
            .await?;
        self.transition(UploadStage::Done)?;

        Ok(Applied {
            inserted: plan.inserts.len(),
            cancelled: plan.cancellations.len(),
            unmatched_cancellations: plan.unmatched_cancellations,
        })
    }

    fn reset(&mut self) {
        if self.stage != UploadStage::Idle {
            self.enter(UploadStage::Idle);
        }
        self.file_name = None;
        self.issues.clear();
    }

    fn transition(&mut self, next: UploadStage) -> Result<(), WorkflowError> {
        if !self.stage.can_transition_to(next) {
            return Err(WorkflowError::IllegalTransition {
                from: self.stage,
                to: next,
            });
        }
        self.enter(next);
        Ok(())
    }

    fn fail(&mut self, e: WorkflowError) {
        error!(stage = %self.stage, error = %e, "Upload failed");
        record_error(e.kind());
        self.issues = vec![e.to_string()];
        self.enter(UploadStage::Error);
    }

    fn enter(&mut self, next: UploadStage) {
        info!(case_id = %self.case_id, from = %self.stage, to = %next, "Upload stage changed");
        self.stage = next;
        self.progress.send_replace(next);
    }
}
