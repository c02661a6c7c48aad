use super::response::{ApiError, download_response};
use crate::{
    engine::{Engine, ScannerDevice},
    error::Result,
    pipeline::Pipeline,
    request::{IngestRequest, ProcessingOptions, RawOptions, Source},
    respond::{FilesBody, Response as Outcome, files_body, patch_body},
};
use axum::{
    Json,
    extract::{Multipart, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
}

pub(super) async fn healthz() -> impl IntoResponse {
    Json(HealthzResponse { status: "ok" })
}

enum Reply {
    Download(crate::respond::Download),
    Files(FilesBody),
}

/// `POST /processFile`: an uploaded `file` part, or `scan=true` with a
/// `profileName`, plus the processing option fields.
pub(super) async fn process_file<E: Engine + 'static>(
    State(pipeline): State<Arc<Pipeline<E>>>,
    mut multipart: Multipart,
) -> std::result::Result<Response, ApiError> {
    let mut scope = pipeline.scope()?;
    let mut raw = RawOptions::new();
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or("document").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("failed to read file data: {e}")))?;
            upload = Some(scope.stage_upload(&file_name, &bytes)?);
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("failed to read field {name}: {e}")))?;
            raw.insert(name, value);
        }
    }

    let source = if raw.get("scan").map(|v| v.trim()) == Some("true") {
        Source::Scan {
            profile: raw.get("profileName").cloned().unwrap_or_default(),
        }
    } else {
        upload.ok_or_else(|| ApiError::BadRequest("no file received".into()))?
    };
    let req = IngestRequest {
        source,
        options: ProcessingOptions::from_raw(&raw, pipeline.config()),
    };
    tracing::info!(request = %scope.id(), origin = req.source.origin(), "processing request");

    let worker = Arc::clone(&pipeline);
    let reply = tokio::task::spawn_blocking(move || -> Result<Reply> {
        let outcome = worker.run(scope, req)?;
        let reply = match &outcome {
            Outcome::Download(d) => Ok(Reply::Download(d.clone())),
            Outcome::Files { message, files } => files_body(message, files).map(Reply::Files),
        };
        if reply.is_err() {
            // the client never sees these files
            outcome.discard();
        }
        reply
    })
    .await
    .map_err(|e| ApiError::Worker(e.to_string()))??;

    match reply {
        Reply::Download(d) => download_response(d).await,
        Reply::Files(body) => Ok(Json(body).into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct PatchRequest {
    #[serde(rename = "patchData", default)]
    patch_data: Option<String>,
}

/// `POST /patch`: generates separator sheets from `patchData`.
pub(super) async fn patch<E: Engine + 'static>(
    State(pipeline): State<Arc<Pipeline<E>>>,
    Json(body): Json<PatchRequest>,
) -> std::result::Result<Response, ApiError> {
    let data = body
        .patch_data
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("patchData is required".into()))?;
    let scope = pipeline.scope()?;

    let worker = Arc::clone(&pipeline);
    let sheets = tokio::task::spawn_blocking(move || worker.generate_patch(scope, &data))
        .await
        .map_err(|e| ApiError::Worker(e.to_string()))??;
    Ok(Json(patch_body(&sheets)).into_response())
}

#[derive(Debug, Serialize)]
struct ScannersResponse {
    success: bool,
    scanners: Vec<ScannerDevice>,
    count: usize,
}

/// `GET /scanners`: devices visible through every configured driver.
pub(super) async fn scanners<E: Engine + 'static>(
    State(pipeline): State<Arc<Pipeline<E>>>,
) -> std::result::Result<Response, ApiError> {
    let worker = Arc::clone(&pipeline);
    let scanners = tokio::task::spawn_blocking(move || worker.engine().list_scanners())
        .await
        .map_err(|e| ApiError::Worker(e.to_string()))??;
    Ok(Json(ScannersResponse {
        count: scanners.len(),
        success: true,
        scanners,
    })
    .into_response())
}
