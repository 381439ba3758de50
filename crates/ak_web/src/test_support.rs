//! Shared helpers for router tests.

use std::sync::Arc;

use ak_config::AkConfig;
use ak_sheets::{Mirror, MirrorError, SheetsSession, WriteOutcome};
use ak_store::AkStore;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use http_body_util::BodyExt;
use mockall::mock;
use serde::de::DeserializeOwned;

use crate::AppState;

mock! {
    pub Sink {}

    #[async_trait]
    impl Mirror for Sink {
        async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<WriteOutcome, MirrorError>;
    }
}

const BOUNDARY: &str = "anketa-test-boundary";

/// State over an in-memory store with `sink` as the mirror and no bundle
pub fn test_state_with(config: &AkConfig, sink: MockSink) -> Arc<AppState> {
    let store = AkStore::open_memory().unwrap();
    let sheets = Arc::new(SheetsSession::google(&config.sheets).unwrap());
    let state = AppState::new(store, config, sheets)
        .with_mirror(Arc::new(sink))
        .with_assets(None);
    Arc::new(state)
}

pub struct FilePart {
    name: &'static str,
    bytes: Vec<u8>,
}

pub fn photo_part(name: &'static str, bytes: &[u8]) -> FilePart {
    FilePart {
        name,
        bytes: bytes.to_vec(),
    }
}

pub fn multipart_body(fields: &[(&str, &str)], files: &[FilePart]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for file in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"upload.bin\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n",
                file.name
            )
            .as_bytes(),
        );
        body.extend_from_slice(&file.bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_request(uri: &str, fields: &[(&str, &str)], files: &[FilePart]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(fields, files)))
        .unwrap()
}

pub async fn read_json<T: DeserializeOwned>(response: Response) -> T {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}
