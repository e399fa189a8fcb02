//! Admin file upload (images and PDFs) into the uploads directory.

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;
use crate::models::AdminSession;

const FIELD: &str = "file";
const MAX_EXTENSION_CHARS: usize = 10;

#[derive(Serialize)]
pub struct UploadResponse {
    pub ok: bool,
    pub url: String,
    pub filename: String,
    pub mime: String,
    pub size: usize,
}

fn too_large() -> ApiError {
    ApiError::PayloadTooLarge("File troppo grande".into())
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large()
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

pub fn is_allowed_mime(mime: &str) -> bool {
    mime == "application/pdf" || mime.starts_with("image/")
}

/// `.ext` of the client file name, lowercased, kept only when it is short
/// and made of `[a-z0-9.]`.
pub fn safe_extension(original: Option<&str>) -> String {
    let Some(ext) = original
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
    else {
        return String::new();
    };

    let ext: String = format!(".{}", ext.to_ascii_lowercase())
        .chars()
        .take(MAX_EXTENSION_CHARS)
        .collect();
    if ext
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.')
    {
        ext
    } else {
        String::new()
    }
}

/// Random name on disk; the client file name never reaches the filesystem.
pub fn stored_name(original: Option<&str>) -> String {
    format!("{}{}", Uuid::new_v4().simple(), safe_extension(original))
}

pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<AdminSession>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let max = state.config.upload_max_bytes;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FIELD) {
            continue;
        }

        let mime = field
            .content_type()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !is_allowed_mime(&mime) {
            return Err(ApiError::BadRequest(
                "Tipo file non supportato (solo immagini o PDF).".into(),
            ));
        }
        let filename = stored_name(field.file_name());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if bytes.len() + chunk.len() > max {
                return Err(too_large());
            }
            bytes.extend_from_slice(&chunk);
        }

        let path = state.config.uploads_dir.join(&filename);
        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            ApiError::Internal(format!("cannot write {}: {e}", path.display()))
        })?;

        let relative = format!("/uploads/{filename}");
        let url = if state.config.public_base_url.is_empty() {
            relative
        } else {
            format!("{}{relative}", state.config.public_base_url)
        };

        tracing::info!(filename = %filename, mime = %mime, size = bytes.len(), admin = %session.user, "file uploaded");
        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                ok: true,
                url,
                filename,
                mime,
                size: bytes.len(),
            }),
        ));
    }

    Err(ApiError::BadRequest("Nessun file caricato".into()))
}
