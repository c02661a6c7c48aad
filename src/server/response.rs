use crate::{error::Error, respond::Download};
use axum::{
    Json,
    body::{Body, Bytes},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

const CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Errors as the HTTP surface reports them.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] Error),
    #[error("{0}")]
    BadRequest(String),
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Pipeline(err) if err.is_input() => StatusCode::BAD_REQUEST,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(_) | ApiError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let details = match &self {
            ApiError::Pipeline(err) => err.details(),
            _ => None,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, details = details.as_deref().unwrap_or(""), "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

/// Deletes the wrapped file when dropped.
struct RemoveOnDrop(Option<PathBuf>);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        let Some(path) = self.0.take() else {
            return;
        };
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "download removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(path = %path.display(), "failed to remove download: {err}"),
        }
    }
}

/// Streams `download` as an attachment. A file marked `remove_after` is
/// deleted once the body finishes or is dropped mid-transfer.
pub async fn download_response(download: Download) -> Result<Response, ApiError> {
    let guard = RemoveOnDrop(download.remove_after.then(|| download.path.clone()));
    let file = tokio::fs::File::open(&download.path)
        .await
        .map_err(Error::from)?;
    let len = file.metadata().await.map_err(Error::from)?.len();

    let stream = futures_util::stream::unfold((Some(file), guard), |(file, guard)| async move {
        let mut file = file?;
        let mut buf = vec![0u8; CHUNK_BYTES];
        match file.read(&mut buf).await {
            Ok(0) => {
                drop(file);
                drop(guard);
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some((Ok::<_, std::io::Error>(Bytes::from(buf)), (Some(file), guard)))
            }
            Err(err) => Some((Err(err), (None, guard))),
        }
    });

    let mime = mime_guess::from_path(&download.path).first_or_octet_stream();
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(mime.essence_str()) {
        headers.insert(header::CONTENT_TYPE, v);
    }
    if let Ok(v) = HeaderValue::from_str(&content_disposition(&download.file_name)) {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}

fn content_disposition(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("attachment; filename=\"{safe}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn input_error_returns_400_without_details() {
        let response = ApiError::from(Error::input("unsupported file type: a.docx")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "unsupported file type: a.docx");
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn tool_error_returns_500_with_details() {
        let response = ApiError::from(Error::tool("ocr", "ocrmypdf: bad lang")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "ocr failed");
        assert_eq!(json["details"], "ocrmypdf: bad lang");
    }

    #[tokio::test]
    async fn timeout_returns_500() {
        let err = Error::Timeout {
            tool: "splitter".into(),
            seconds: 600,
        };
        assert_eq!(ApiError::from(err).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn download_streams_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        std::fs::write(&path, b"%PDF-1.4 body").unwrap();

        let response = download_response(Download {
            path: path.clone(),
            file_name: "out.pdf".into(),
            remove_after: true,
        })
        .await
        .unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"out.pdf\""
        );
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"%PDF-1.4 body");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn aborted_download_still_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        std::fs::write(&path, b"%PDF-1.4 body").unwrap();

        let response = download_response(Download {
            path: path.clone(),
            file_name: "out.pdf".into(),
            remove_after: true,
        })
        .await
        .unwrap();
        drop(response);
        assert!(!path.exists());
    }

    #[test]
    fn disposition_escapes_quotes() {
        assert_eq!(
            content_disposition("a\"b.pdf"),
            "attachment; filename=\"a_b.pdf\""
        );
    }
}
