//! Lazily authorized Sheets session.
//!
//! ```text
//!  Unauthenticated ──authorize──▶ Authenticated ──bind tab──▶ Bound
//!        ▲                          │   ▲                       │
//!        └──── key/token failure ───┘   └── refresh if expired ─┘
//! ```
//!
//! The session is built once at startup and shared. Transitions run under a
//! mutex so concurrent requests never authorize twice. The lock is released
//! before rows are appended. The current state is also published through an
//! atomic so health checks never wait behind a slow transition.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use ak_config::SheetsConfig;
use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::{GoogleSheetsApi, SheetsApi};
use crate::auth::{GoogleTokenProvider, TokenProvider};
use crate::credentials::{AccessToken, CredentialSource, ServiceAccountKey};
use crate::layout::header_row;
use crate::{Mirror, MirrorError, WriteOutcome};

/// A resolved worksheet tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worksheet {
    pub spreadsheet_id: String,
    pub title: String,
}

/// Worksheet plus the token to write to it with
#[derive(Debug, Clone)]
pub struct WorksheetHandle {
    pub worksheet: Worksheet,
    token: AccessToken,
}

impl WorksheetHandle {
    #[must_use]
    pub fn access_token(&self) -> &str {
        self.token.value()
    }
}

/// Externally visible session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Unauthenticated = 0,
    Authenticated = 1,
    Bound = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Authenticated,
            2 => SessionState::Bound,
            _ => SessionState::Unauthenticated,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated => "authenticated",
            SessionState::Bound => "bound",
        }
    }
}

struct Authorization {
    key: ServiceAccountKey,
    token: AccessToken,
}

enum State {
    Unauthenticated,
    Authenticated {
        auth: Authorization,
        /// Tab was created but its header row has not been written yet
        header_pending: bool,
    },
    Bound {
        auth: Authorization,
        worksheet: Worksheet,
    },
}

impl State {
    fn public(&self) -> SessionState {
        match self {
            State::Unauthenticated => SessionState::Unauthenticated,
            State::Authenticated { .. } => SessionState::Authenticated,
            State::Bound { .. } => SessionState::Bound,
        }
    }
}

pub struct SheetsSession {
    enabled: bool,
    spreadsheet_id: String,
    tab: String,
    source: CredentialSource,
    tokens: Arc<dyn TokenProvider>,
    api: Arc<dyn SheetsApi>,
    state: Mutex<State>,
    published: AtomicU8,
}

impl SheetsSession {
    pub fn new(
        config: &SheetsConfig,
        tokens: Arc<dyn TokenProvider>,
        api: Arc<dyn SheetsApi>,
    ) -> Self {
        Self {
            enabled: config.enabled,
            spreadsheet_id: config.sheet_id.trim().to_string(),
            tab: config.sheet_tab.clone(),
            source: CredentialSource::from_config(config),
            tokens,
            api,
            state: Mutex::new(State::Unauthenticated),
            published: AtomicU8::new(SessionState::Unauthenticated as u8),
        }
    }

    /// Session talking to the real Google endpoints, timeouts from config.
    ///
    /// # Errors
    /// Returns [`MirrorError::Network`] if the HTTP client cannot be built.
    pub fn google(config: &SheetsConfig) -> Result<Self, MirrorError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| MirrorError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::new(
            config,
            Arc::new(GoogleTokenProvider::with_client(client.clone())),
            Arc::new(GoogleSheetsApi::with_client(client)),
        ))
    }

    #[must_use]
    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    #[must_use]
    pub fn tab(&self) -> &str {
        &self.tab
    }

    /// Identity the spreadsheet must be shared with; read from the key, no network.
    ///
    /// # Errors
    /// Returns [`MirrorError::Credentials`] if the key cannot be loaded.
    pub fn principal(&self) -> Result<String, MirrorError> {
        self.source.load().map(|key| key.client_email)
    }

    /// Last settled state; does not wait for a transition in progress.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.published.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    fn settle(&self, slot: &mut State, next: State) {
        self.published.store(next.public() as u8, Ordering::Release);
        *slot = next;
    }

    fn ensure_configured(&self) -> Result<(), MirrorError> {
        if !self.enabled {
            return Err(MirrorError::NotConfigured(
                "mirroring is disabled".to_string(),
            ));
        }
        if self.spreadsheet_id.is_empty() {
            return Err(MirrorError::NotConfigured("SHEET_ID is not set".to_string()));
        }
        Ok(())
    }

    /// Produce a ready-to-write worksheet, authorizing, refreshing and binding as needed.
    ///
    /// # Errors
    /// Returns the [`MirrorError`] of whichever transition failed.
    pub async fn worksheet(&self) -> Result<WorksheetHandle, MirrorError> {
        self.ensure_configured()?;
        let mut state = self.state.lock().await;

        // Failing before the state is written back leaves it Unauthenticated.
        let (auth, bound, mut header_pending) =
            match std::mem::replace(&mut *state, State::Unauthenticated) {
                State::Unauthenticated => (self.authorize().await?, None, false),
                State::Authenticated {
                    mut auth,
                    header_pending,
                } => {
                    if let Err(err) = self.refresh_if_expired(&mut auth).await {
                        self.settle(
                            &mut state,
                            State::Authenticated {
                                auth,
                                header_pending,
                            },
                        );
                        return Err(err);
                    }
                    (auth, None, header_pending)
                }
                State::Bound {
                    mut auth,
                    worksheet,
                } => {
                    if let Err(err) = self.refresh_if_expired(&mut auth).await {
                        self.settle(&mut state, State::Bound { auth, worksheet });
                        return Err(err);
                    }
                    (auth, Some(worksheet), false)
                }
            };

        let worksheet = match bound {
            Some(worksheet) => worksheet,
            None => match self.bind(&auth, &mut header_pending).await {
                Ok(worksheet) => worksheet,
                Err(err) => {
                    self.settle(
                        &mut state,
                        State::Authenticated {
                            auth,
                            header_pending,
                        },
                    );
                    return Err(err);
                }
            },
        };

        let handle = WorksheetHandle {
            worksheet: worksheet.clone(),
            token: auth.token.clone(),
        };
        self.settle(&mut state, State::Bound { auth, worksheet });
        Ok(handle)
    }

    async fn authorize(&self) -> Result<Authorization, MirrorError> {
        let key = self.source.load().inspect_err(|err| {
            warn!(source = %self.source.describe(), error = %err, "Google Sheets credentials unusable");
        })?;

        let token = self.tokens.fetch_token(&key).await.inspect_err(|err| {
            warn!(client_email = %key.client_email, error = %err, "Google Sheets authorization failed");
        })?;

        info!(client_email = %key.client_email, "Google Sheets authorized");
        Ok(Authorization { key, token })
    }

    async fn refresh_if_expired(&self, auth: &mut Authorization) -> Result<(), MirrorError> {
        if !auth.token.is_expired() {
            return Ok(());
        }

        auth.token = self.tokens.fetch_token(&auth.key).await.inspect_err(|err| {
            warn!(error = %err, "Google token refresh failed");
        })?;
        info!("Google token refreshed");
        Ok(())
    }

    /// Resolve the tab, creating it if missing. `header_pending` survives a
    /// failed header write so the next bind retries it.
    async fn bind(
        &self,
        auth: &Authorization,
        header_pending: &mut bool,
    ) -> Result<Worksheet, MirrorError> {
        let token = auth.token.value();
        let titles = self.api.tab_titles(token, &self.spreadsheet_id).await?;

        if !titles.iter().any(|title| title == &self.tab) {
            info!(tab = %self.tab, "Worksheet tab missing, creating it");
            self.api
                .add_tab(token, &self.spreadsheet_id, &self.tab)
                .await?;
            *header_pending = true;
        }

        if *header_pending {
            self.api
                .append_rows(token, &self.spreadsheet_id, &self.tab, &[header_row()])
                .await
                .inspect_err(|err| {
                    warn!(tab = %self.tab, error = %err, "Header row not written; will retry");
                })?;
            *header_pending = false;
        }

        debug!(spreadsheet_id = %self.spreadsheet_id, tab = %self.tab, "Worksheet bound");
        Ok(Worksheet {
            spreadsheet_id: self.spreadsheet_id.clone(),
            title: self.tab.clone(),
        })
    }
}

#[async_trait]
impl Mirror for SheetsSession {
    async fn append_rows(&self, rows: Vec<Vec<String>>) -> Result<WriteOutcome, MirrorError> {
        let handle = self.worksheet().await?;
        if rows.is_empty() {
            return Ok(WriteOutcome {
                worksheet: handle.worksheet.title,
                rows_appended: 0,
                updated_range: None,
            });
        }

        let summary = self
            .api
            .append_rows(
                handle.access_token(),
                &handle.worksheet.spreadsheet_id,
                &handle.worksheet.title,
                &rows,
            )
            .await?;

        Ok(WriteOutcome {
            worksheet: handle.worksheet.title,
            rows_appended: summary.updated_rows.unwrap_or(rows.len()),
            updated_range: summary.updated_range,
        })
    }
}
