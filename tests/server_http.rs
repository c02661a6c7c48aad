mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use common::*;
use http_body_util::BodyExt;
use scanflow::{config::Config, pipeline::Pipeline, server};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "scanflow-test-boundary";

fn app(cfg: &Config, engine: FakeEngine) -> Router {
    server::router(Arc::new(Pipeline::new(cfg, engine)))
}

enum Part<'a> {
    Field(&'a str, &'a str),
    File(&'a str, &'a [u8]),
}

fn multipart(parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Field(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(file_name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/processFile")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(body: Body) -> Vec<u8> {
    body.collect().await.unwrap().to_bytes().to_vec()
}

async fn json(body: Body) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(body).await).unwrap()
}

#[tokio::test]
async fn healthz_reports_ok() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let response = app(&cfg, FakeEngine::new())
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response.into_body()).await["status"], "ok");
}

#[tokio::test]
async fn missing_file_is_a_bad_request() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let response = app(&cfg, FakeEngine::new())
        .oneshot(multipart(&[Part::Field("ocrMode", "false")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response.into_body()).await["error"], "no file received");
    assert_eq!(work_entries(&cfg), 0);
}

#[tokio::test]
async fn unsupported_upload_is_a_bad_request() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let response = app(&cfg, FakeEngine::new())
        .oneshot(multipart(&[Part::File("notes.docx", b"PK")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json(response.into_body()).await["error"],
        "unsupported file type: notes.docx"
    );
}

#[tokio::test]
async fn scan_without_profile_is_a_bad_request() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let response = app(&cfg, FakeEngine::new())
        .oneshot(multipart(&[Part::Field("scan", "true")]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn plain_pdf_is_downloaded_then_removed() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let original = pdf_bytes("plain");
    let response = app(&cfg, FakeEngine::new())
        .oneshot(multipart(&[
            Part::Field("ocrMode", "false"),
            Part::File("plain.pdf", &original),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"plain.pdf\""
    );
    assert_eq!(body_bytes(response.into_body()).await, original);
    assert!(output_entries(&cfg).is_empty());
    assert_eq!(work_entries(&cfg), 0);
}

#[tokio::test]
async fn split_upload_returns_files_json() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let engine = FakeEngine {
        blocks: vec![
            FakeBlock::Described {
                name: "first.pdf",
                pages: vec![1],
                barcode: Some("A1"),
            },
            FakeBlock::Bare("second.pdf"),
        ],
        ..FakeEngine::new()
    };
    let response = app(&cfg, engine)
        .oneshot(multipart(&[
            Part::Field("ocrMode", "false"),
            Part::Field("containsPatch", "true"),
            Part::Field("lang", "fra"),
            Part::File("batch.pdf", &pdf_bytes("batch")),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response.into_body()).await;
    assert_eq!(body["status"], "success");
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["name"], "first.pdf");
    assert_eq!(files[0]["barcode"], "A1");
    assert_eq!(files[1]["pages"], serde_json::json!([]));
    assert!(files[1]["barcode"].is_null());
}

#[tokio::test]
async fn tool_failure_is_a_server_error_with_details() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let engine = FakeEngine {
        blocks: vec![
            FakeBlock::Described {
                name: "doc_a.pdf",
                pages: vec![1],
                barcode: None,
            },
            FakeBlock::Described {
                name: "doc_b.pdf",
                pages: vec![2],
                barcode: None,
            },
        ],
        ocr_fails: BTreeMap::from([("doc_b".to_string(), Failure::Tool)]),
        ..FakeEngine::new()
    };
    let response = app(&cfg, engine)
        .oneshot(multipart(&[
            Part::Field("containsPatch", "true"),
            Part::Field("lang", "eng"),
            Part::File("pair.pdf", &pdf_bytes("pair")),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json(response.into_body()).await;
    assert_eq!(body["error"], "ocr failed");
    assert_eq!(body["details"], "ocr crashed: exit status 2");
    assert!(output_entries(&cfg).is_empty());
    assert_eq!(work_entries(&cfg), 0);
}

#[tokio::test]
async fn patch_requires_data() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let response = app(&cfg, FakeEngine::new())
        .oneshot(
            Request::post("/patch")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response.into_body()).await["error"], "patchData is required");
}

#[tokio::test]
async fn patch_returns_generated_sheets() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let response = app(&cfg, FakeEngine::new())
        .oneshot(
            Request::post("/patch")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"patchData":"INV-7"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response.into_body()).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["results"][0]["name"], "patch_sheet.pdf");
    assert_eq!(body["results"][0]["mimeType"], "application/pdf");
    assert!(body["results"][0]["base64"].as_str().is_some_and(|s| !s.is_empty()));
}

#[tokio::test]
async fn scanners_are_listed() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = test_config(tmp.path());
    let response = app(&cfg, FakeEngine::new())
        .oneshot(Request::get("/scanners").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response.into_body()).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 1);
    assert_eq!(body["scanners"][0]["driver"], "wia");
}
