use crate::services::SpreadsheetFile;
use crate::startup::AppState;
use crate::workflow::{UploadStage, UploadWorkflow};
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use dashmap::DashSet;
use service_core::error::AppError;
use service_core::middleware::RequestId;
use std::sync::Arc;
use uuid::Uuid;

const FILE_FIELD: &str = "file";

/// Marks a case as having an upload in flight until dropped.
struct InFlightGuard {
    cases: Arc<DashSet<Uuid>>,
    case_id: Uuid,
}

impl InFlightGuard {
    fn acquire(cases: &Arc<DashSet<Uuid>>, case_id: Uuid) -> Option<Self> {
        cases.insert(case_id).then(|| Self {
            cases: cases.clone(),
            case_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.cases.remove(&self.case_id);
    }
}

pub async fn upload_subscriptions(
    State(state): State<AppState>,
    Path(case_id): Path<Uuid>,
    request_id: Option<Extension<RequestId>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let case = state
        .collaborators
        .cases
        .get_case(case_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Case {} not found", case_id)))?;

    let file = read_spreadsheet(&mut multipart).await?;

    let _guard = InFlightGuard::acquire(&state.in_flight, case_id).ok_or_else(|| {
        AppError::Conflict(anyhow::anyhow!(
            "An upload for case {} is already in progress",
            case_id
        ))
    })?;

    let mut workflow = UploadWorkflow::new(case.id, case.issue_date, state.collaborators.clone());
    if let Some(Extension(RequestId(request_id))) = request_id {
        workflow = workflow.with_request_id(request_id);
    }
    let outcome = workflow.run(file).await;

    let status = match outcome.stage {
        UploadStage::Done | UploadStage::NoRecords => StatusCode::OK,
        UploadStage::Warning => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::BAD_GATEWAY,
    };

    Ok((status, Json(outcome)))
}

async fn read_spreadsheet(multipart: &mut Multipart) -> Result<SpreadsheetFile, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(anyhow::anyhow!("Failed to read multipart field: {}", e))
    })? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Failed to read file bytes: {}", e)))?
            .to_vec();

        if data.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!("Uploaded file is empty")));
        }

        return SpreadsheetFile::new(file_name, data)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)));
    }

    Err(AppError::BadRequest(anyhow::anyhow!("No file uploaded")))
}
