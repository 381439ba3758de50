//! `ak_sheets` - Google Sheets mirror for anketa
//!
//! This crate provides:
//! - Service-account credential loading (inline JSON or key file)
//! - JWT bearer token exchange behind the [`TokenProvider`] trait
//! - The Sheets v4 calls the mirror needs behind the [`SheetsApi`] trait
//! - [`SheetsSession`], a lazily authorized session that binds one worksheet
//! - The [`Mirror`] seam the submission handler writes through
//!
//! Mirroring is best-effort. Every failure comes back as a [`MirrorError`]; nothing
//! here panics or retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod api;
pub mod auth;
pub mod credentials;
pub mod layout;
pub mod session;

pub use api::{AppendSummary, GoogleSheetsApi, SheetsApi};
pub use auth::{GoogleTokenProvider, TokenProvider};
pub use credentials::{AccessToken, CredentialSource, ServiceAccountKey};
pub use layout::{AnswerLabels, answer_row, probe_row};
pub use session::{SessionState, SheetsSession, Worksheet, WorksheetHandle};

/// Mirror errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    #[error("Mirror not configured: {0}")]
    NotConfigured(String),

    #[error("Credential error: {0}")]
    Credentials(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Sheets API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected Sheets response: {0}")]
    Response(String),
}

/// What a successful mirror write did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub worksheet: String,
    pub rows_appended: usize,
    pub updated_range: Option<String>,
}

/// Destination for best-effort copies of stored answers.
#[async_trait]
pub trait Mirror: Send + Sync {
    /// Append rows to the mirror
    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<WriteOutcome, MirrorError>;
}

/// Append a diagnostic row through `mirror`, used to verify sharing and credentials.
///
/// # Errors
/// Returns the [`MirrorError`] from the mirror.
pub async fn probe(mirror: &dyn Mirror, timestamp: &str) -> Result<WriteOutcome, MirrorError> {
    mirror.append_rows(vec![probe_row(timestamp)]).await
}
