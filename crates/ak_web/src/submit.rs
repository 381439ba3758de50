//! `POST /submit`: decode the form, store the batch, mirror it.

use std::sync::Arc;

use ak_sheets::{AnswerLabels, answer_row};
use ak_store::{NewAnswer, batch_timestamp};
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::State;
use axum::response::Json;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{AnswerView, AppState, WebError};

/// Ways a submission can fail to decode; nothing is stored for any of them
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing form field '{0}'")]
    MissingField(&'static str),

    #[error("Username must not be empty")]
    EmptyUsername,

    #[error("Malformed answers: {0}")]
    MalformedAnswers(String),

    #[error("Answers must be a JSON array of {{question, answer}} objects")]
    NotAList,

    #[error("Unreadable form body: {0}")]
    MalformedForm(String),
}

/// One decoded question/answer pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPair {
    pub question: String,
    pub answer: String,
}

/// A decoded, valid submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub username: String,
    pub answers: Vec<AnswerPair>,
}

impl Submission {
    /// Validate raw form values.
    ///
    /// # Errors
    /// Returns the first [`ValidationError`] found.
    pub fn decode(username: Option<&str>, answers: Option<&str>) -> Result<Self, ValidationError> {
        let username = username.ok_or(ValidationError::MissingField("username"))?;
        let answers = answers.ok_or(ValidationError::MissingField("answers"))?;

        let username = username.trim();
        if username.is_empty() {
            return Err(ValidationError::EmptyUsername);
        }

        Ok(Self {
            username: username.to_string(),
            answers: decode_answers(answers)?,
        })
    }

    /// Records sharing one `created_at`, in the order received
    #[must_use]
    pub fn records(&self, created_at: &str) -> Vec<NewAnswer> {
        self.answers
            .iter()
            .map(|pair| NewAnswer::new(&self.username, &pair.question, &pair.answer, created_at))
            .collect()
    }
}

/// Decode the `answers` field: a JSON array of `{question, answer}` objects.
///
/// # Errors
/// [`ValidationError::MalformedAnswers`] for bad JSON or bad items,
/// [`ValidationError::NotAList`] for JSON that is not an array.
pub fn decode_answers(raw: &str) -> Result<Vec<AnswerPair>, ValidationError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ValidationError::MalformedAnswers(format!("not valid JSON: {e}")))?;
    let Value::Array(items) = value else {
        return Err(ValidationError::NotAList);
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let Value::Object(fields) = item else {
                return Err(ValidationError::MalformedAnswers(format!(
                    "item {index} is not an object"
                )));
            };
            Ok(AnswerPair {
                question: scalar_text(fields.get("question"), index, "question")?,
                answer: scalar_text(fields.get("answer"), index, "answer")?,
            })
        })
        .collect()
}

/// Text form of a scalar, as JSON writes it: `true`, `7`, `1.0`.
///
/// Absent and `null` become the empty string rather than a `None` spelling,
/// and booleans stay lowercase. Arrays and objects are rejected.
fn scalar_text(value: Option<&Value>, index: usize, key: &str) -> Result<String, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(Value::Number(number)) => Ok(number.to_string()),
        Some(Value::Bool(flag)) => Ok(flag.to_string()),
        Some(_) => Err(ValidationError::MalformedAnswers(format!(
            "item {index}: '{key}' must be a string, number or boolean"
        ))),
    }
}

/// Raw multipart fields
#[derive(Debug, Default)]
struct SubmitForm {
    username: Option<String>,
    answers: Option<String>,
    attachments: usize,
    attachment_bytes: usize,
}

fn form_error(err: MultipartError) -> WebError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        WebError::PayloadTooLarge(err.body_text())
    } else {
        ValidationError::MalformedForm(err.body_text()).into()
    }
}

async fn read_form(mut multipart: Multipart) -> Result<SubmitForm, WebError> {
    let mut form = SubmitForm::default();

    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "username" => form.username = Some(field.text().await.map_err(form_error)?),
            "answers" => form.answers = Some(field.text().await.map_err(form_error)?),
            // Photos are accepted and drained, never stored or mirrored.
            "photo" | "photos" => {
                let bytes = field.bytes().await.map_err(form_error)?;
                form.attachments += 1;
                form.attachment_bytes += bytes.len();
            }
            other => debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    Ok(form)
}

/// Submission response
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    pub saved_count: usize,
    pub sheets_ok: bool,
    pub sheets_error: Option<String>,
    pub saved: Vec<AnswerView>,
}

async fn mirror_batch(
    state: &AppState,
    records: &[NewAnswer],
    labels: &AnswerLabels,
) -> (bool, Option<String>) {
    if records.is_empty() {
        return (true, None);
    }

    let rows = records
        .iter()
        .map(|r| answer_row(&r.username, &r.question, &r.answer, &r.created_at, labels))
        .collect();

    match state.mirror.append_rows(rows).await {
        Ok(outcome) => {
            debug!(
                worksheet = %outcome.worksheet,
                rows = outcome.rows_appended,
                "Submission mirrored"
            );
            (true, None)
        }
        Err(err) => {
            warn!(error = %err, "Sheets mirror failed; answers kept in local store");
            (false, Some(err.to_string()))
        }
    }
}

/// Store the batch, then mirror it best-effort
pub async fn submit_handler(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SubmitResponse>, WebError> {
    let multipart =
        multipart.map_err(|rejection| ValidationError::MalformedForm(rejection.body_text()))?;
    let form = read_form(multipart).await?;
    let submission = Submission::decode(form.username.as_deref(), form.answers.as_deref())?;

    let created_at = batch_timestamp();
    let records = submission.records(&created_at);
    let saved_count = state.store.insert_batch(&records)?;
    info!(
        username = %submission.username,
        saved_count,
        attachments = form.attachments,
        attachment_bytes = form.attachment_bytes,
        "Submission stored"
    );

    let (sheets_ok, sheets_error) = mirror_batch(&state, &records, &state.labels).await;

    Ok(Json(SubmitResponse {
        status: "ok".to_string(),
        saved_count,
        sheets_ok,
        sheets_error,
        saved: records.into_iter().map(AnswerView::from).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_router;
    use crate::test_support::{MockSink, multipart_request, photo_part, read_json, test_state_with};
    use ak_sheets::{MirrorError, WriteOutcome};
    use axum::http::StatusCode;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    #[test]
    fn test_decode_answers_in_order() {
        let pairs =
            decode_answers(r#"[{"question":"q1","answer":"yes"},{"question":"q2","answer":"no"}]"#)
                .unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].question, "q1");
        assert_eq!(pairs[1].answer, "no");
    }

    #[test]
    fn test_decode_answers_coerces_scalars() {
        let pairs = decode_answers(r#"[{"question":7,"answer":true},{"question":"q"}]"#).unwrap();
        assert_eq!(pairs[0].question, "7");
        assert_eq!(pairs[0].answer, "true");
        assert_eq!(pairs[1].answer, "");

        let pairs = decode_answers(r#"[{"question":"q","answer":null}]"#).unwrap();
        assert_eq!(pairs[0].answer, "");

        let pairs = decode_answers(r#"[{"question":"q","answer":1.0},{"question":"q","answer":false}]"#)
            .unwrap();
        assert_eq!(pairs[0].answer, "1.0");
        assert_eq!(pairs[1].answer, "false");
    }

    #[test]
    fn test_decode_answers_rejects_bad_shapes() {
        assert!(matches!(
            decode_answers("not json"),
            Err(ValidationError::MalformedAnswers(_))
        ));
        assert_eq!(
            decode_answers(r#"{"question":"q1"}"#),
            Err(ValidationError::NotAList)
        );
        assert!(matches!(
            decode_answers(r#"["just a string"]"#),
            Err(ValidationError::MalformedAnswers(_))
        ));
        assert!(matches!(
            decode_answers(r#"[{"question":{"nested":1},"answer":"a"}]"#),
            Err(ValidationError::MalformedAnswers(_))
        ));
    }

    #[test]
    fn test_empty_array_is_valid() {
        assert!(decode_answers("[]").unwrap().is_empty());
    }

    #[test]
    fn test_submission_decode_field_errors() {
        assert_eq!(
            Submission::decode(None, Some("[]")),
            Err(ValidationError::MissingField("username"))
        );
        assert_eq!(
            Submission::decode(Some("alice"), None),
            Err(ValidationError::MissingField("answers"))
        );
        assert_eq!(
            Submission::decode(Some("   "), Some("[]")),
            Err(ValidationError::EmptyUsername)
        );
    }

    #[test]
    fn test_records_share_timestamp() {
        let submission = Submission::decode(
            Some(" alice "),
            Some(r#"[{"question":"q1","answer":"a"},{"question":"q2","answer":"b"}]"#),
        )
        .unwrap();
        let records = submission.records("2025-01-01 10:00:00");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.created_at == "2025-01-01 10:00:00"));
        assert!(records.iter().all(|r| r.username == "alice"));
    }

    #[tokio::test]
    async fn test_submit_stores_and_mirrors() {
        let mut sink = MockSink::new();
        sink.expect_append_rows()
            .withf(|rows| rows.len() == 1 && rows[0][..3] == ["alice", "q1", "Да"])
            .times(1)
            .returning(|rows| {
                Ok(WriteOutcome {
                    worksheet: "Ответы".to_string(),
                    rows_appended: rows.len(),
                    updated_range: None,
                })
            });

        let mut config = ak_config::AkConfig::default();
        config.sheets.answer_labels = BTreeMap::from([("yes".to_string(), "Да".to_string())]);
        let state = test_state_with(&config, sink);
        let app = create_router(state.clone());

        let request = multipart_request(
            "/submit",
            &[
                ("username", "alice"),
                ("answers", r#"[{"question":"q1","answer":"yes"}]"#),
            ],
            &[],
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: SubmitResponse = read_json(response).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.saved_count, 1);
        assert!(body.sheets_ok);
        assert!(body.sheets_error.is_none());
        assert_eq!(body.saved[0].answer, "yes");

        let stored = state.store.list_all().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].answer, "yes");
    }

    #[tokio::test]
    async fn test_mirror_failure_does_not_fail_request() {
        let mut sink = MockSink::new();
        sink.expect_append_rows()
            .times(1)
            .returning(|_| Err(MirrorError::Network("connection reset".to_string())));

        let state = test_state_with(&ak_config::AkConfig::default(), sink);
        let app = create_router(state.clone());

        let request = multipart_request(
            "/submit",
            &[
                ("username", "bob"),
                ("answers", r#"[{"question":"q1","answer":"a"},{"question":"q2","answer":"b"}]"#),
            ],
            &[],
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: SubmitResponse = read_json(response).await;
        assert_eq!(body.saved_count, 2);
        assert!(!body.sheets_ok);
        assert!(body.sheets_error.unwrap().contains("connection reset"));
        assert_eq!(state.store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_malformed_answers_store_nothing() {
        let mut sink = MockSink::new();
        sink.expect_append_rows().never();

        let state = test_state_with(&ak_config::AkConfig::default(), sink);
        let app = create_router(state.clone());

        let request = multipart_request(
            "/submit",
            &[("username", "alice"), ("answers", "{broken")],
            &[],
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = read_json(response).await;
        assert_eq!(body["status"], 400);
        assert!(body["error"].as_str().unwrap().contains("Malformed answers"));
        assert_eq!(state.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_skips_mirror() {
        let mut sink = MockSink::new();
        sink.expect_append_rows().never();

        let state = test_state_with(&ak_config::AkConfig::default(), sink);
        let app = create_router(state);

        let request =
            multipart_request("/submit", &[("username", "alice"), ("answers", "[]")], &[]);
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: SubmitResponse = read_json(response).await;
        assert_eq!(body.saved_count, 0);
        assert!(body.sheets_ok);
    }

    #[tokio::test]
    async fn test_photos_are_accepted_and_dropped() {
        let mut sink = MockSink::new();
        sink.expect_append_rows()
            .withf(|rows| rows.iter().all(|row| row.len() == 4))
            .returning(|rows| {
                Ok(WriteOutcome {
                    worksheet: "Ответы".to_string(),
                    rows_appended: rows.len(),
                    updated_range: None,
                })
            });

        let state = test_state_with(&ak_config::AkConfig::default(), sink);
        let app = create_router(state.clone());

        let request = multipart_request(
            "/submit",
            &[
                ("username", "carol"),
                ("answers", r#"[{"question":"q1","answer":"a"}]"#),
                ("comment", "ignored"),
            ],
            &[photo_part("photo", b"\x89PNG"), photo_part("photos", b"\xff\xd8")],
        );
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_username_is_bad_request() {
        let state = test_state_with(&ak_config::AkConfig::default(), MockSink::new());
        let app = create_router(state);

        let request = multipart_request("/submit", &[("answers", "[]")], &[]);
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_non_multipart_body_is_bad_request() {
        let state = test_state_with(&ak_config::AkConfig::default(), MockSink::new());
        let app = create_router(state);

        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/submit")
            .header("content-type", "application/json")
            .body(axum::body::Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
