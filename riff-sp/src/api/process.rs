//! Upload intake, cancellation and job status
//!
//! POST /api/process, POST /api/cancel/{client_id}, GET /api/jobs/{client_id}

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::models::JobSnapshot;
use crate::services::Upload;
use crate::{ApiError, ApiResult, AppState};

/// Declared media types accepted for upload
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/wav",
    "audio/x-wav",
    "audio/wave",
    "audio/mp4",
    "audio/m4a",
    "audio/x-m4a",
    "audio/flac",
];

/// Bytes kept from the start of the upload for magic-byte sniffing
const SNIFF_LEN: usize = 8192;

/// Multipart field carrying the audio file
const FILE_FIELD: &str = "file";

/// Optional multipart field with a client-chosen session id (must precede `file`)
const CLIENT_ID_FIELD: &str = "client_id";

/// POST /api/process response
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub client_id: Uuid,
    pub status: String,
}

/// POST /api/cancel response
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub client_id: Uuid,
    pub status: String,
}

/// POST /api/process
///
/// Spools the `file` field to the upload dir while counting bytes, checks it
/// is really audio, then hands it to the orchestrator. Progress is pushed to
/// `/ws/{client_id}`; a client that sends its own `client_id` field can
/// connect there before uploading.
pub async fn process_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ProcessResponse>> {
    let max_bytes = state.config.max_upload_bytes;
    let mut requested_id: Option<Uuid> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() == Some(CLIENT_ID_FIELD) {
            let text = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Unreadable client_id: {}", e)))?;
            let id = text
                .trim()
                .parse::<Uuid>()
                .map_err(|_| ApiError::BadRequest(format!("Invalid client_id '{}'", text.trim())))?;
            requested_id = Some(id);
            continue;
        }
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_ascii_lowercase();
        if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(ApiError::UnsupportedMediaType(format!(
                "'{}' is not an accepted audio type",
                content_type
            )));
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "upload".to_string());

        tokio::fs::create_dir_all(&state.config.upload_dir).await?;
        let spool = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&upload_suffix(&filename))
            .tempfile_in(&state.config.upload_dir)?;
        // TempPath removes the file on every early return below
        let (file, path) = spool.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut total: u64 = 0;
        let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Upload interrupted: {}", e)))?
        {
            total += chunk.len() as u64;
            if total > max_bytes {
                return Err(ApiError::PayloadTooLarge(format!(
                    "upload exceeds {} MB",
                    max_bytes / (1024 * 1024)
                )));
            }
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        if total == 0 {
            return Err(ApiError::BadRequest("Empty file".to_string()));
        }
        if !looks_like_audio(&head) {
            return Err(ApiError::UnsupportedMediaType(
                "file content is not a recognized audio format".to_string(),
            ));
        }

        tracing::info!(
            filename = %filename,
            content_type = %content_type,
            bytes = total,
            "Upload accepted"
        );

        let upload = Upload { filename, path };
        let client_id = match requested_id {
            Some(id) => state
                .orchestrator
                .submit_as(id, upload)
                .await
                .map_err(|e| ApiError::Conflict(e.to_string()))?,
            None => state.orchestrator.submit(upload).await,
        };

        return Ok(Json(ProcessResponse {
            client_id,
            status: "processing".to_string(),
        }));
    }

    Err(ApiError::BadRequest(format!(
        "multipart field '{}' is required",
        FILE_FIELD
    )))
}

/// POST /api/cancel/{client_id}
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> ApiResult<Json<CancelResponse>> {
    if !state.orchestrator.cancel(client_id).await {
        return Err(ApiError::NotFound(format!("No active job for {}", client_id)));
    }

    Ok(Json(CancelResponse {
        client_id,
        status: "cancelling".to_string(),
    }))
}

/// GET /api/jobs/{client_id}
pub async fn job_status(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> ApiResult<Json<JobSnapshot>> {
    let snapshot = state
        .orchestrator
        .snapshot(client_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No active job for {}", client_id)))?;

    tracing::debug!(client_id = %client_id, state = ?snapshot.state, "Status query");
    Ok(Json(snapshot))
}

/// Magic-byte check: an audio container, or MP4 (M4A is often sniffed as video/mp4)
pub fn looks_like_audio(head: &[u8]) -> bool {
    match infer::get(head) {
        Some(kind) => {
            kind.matcher_type() == infer::MatcherType::Audio || kind.mime_type() == "video/mp4"
        }
        None => false,
    }
}

/// Keep a short alphanumeric extension so tools that sniff by suffix still work
fn upload_suffix(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Build upload and job routes
pub fn process_routes() -> Router<AppState> {
    Router::new()
        // Size is enforced while streaming so oversized uploads get a 413 body
        .route(
            "/api/process",
            post(process_upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/cancel/:client_id", post(cancel_job))
        .route("/api/jobs/:client_id", get(job_status))
}
