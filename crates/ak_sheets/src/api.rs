//! Google Sheets v4 REST calls used by the mirror.

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde_json::json;

use crate::MirrorError;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/";

/// Result of a values append
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendSummary {
    pub updated_range: Option<String>,
    pub updated_rows: Option<usize>,
}

/// The subset of the Sheets API the mirror relies on.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    /// Titles of every tab in the spreadsheet
    async fn tab_titles(&self, token: &str, spreadsheet_id: &str)
    -> Result<Vec<String>, MirrorError>;

    /// Add a tab named `title`
    async fn add_tab(&self, token: &str, spreadsheet_id: &str, title: &str)
    -> Result<(), MirrorError>;

    /// Append rows after the last non-empty row of `tab`
    async fn append_rows(
        &self,
        token: &str,
        spreadsheet_id: &str,
        tab: &str,
        rows: &[Vec<String>],
    ) -> Result<AppendSummary, MirrorError>;
}

/// A1 range addressing a whole tab, with the title quoted.
#[must_use]
pub fn tab_range(tab: &str) -> String {
    format!("'{}'!A1", tab.replace('\'', "''"))
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: Option<String>,
    updated_rows: Option<usize>,
}

/// Pull `error.message` out of a Google API error body, else return the body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.chars().take(300).collect())
}

async fn ensure_success(response: Response) -> Result<Response, MirrorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MirrorError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn network(e: reqwest::Error) -> MirrorError {
    MirrorError::Network(e.to_string())
}

/// Sheets API over HTTPS
pub struct GoogleSheetsApi {
    client: Client,
    base_url: String,
}

impl GoogleSheetsApi {
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            base_url: SHEETS_API_BASE.to_string(),
        }
    }

    /// Point at a different API root (e.g. a local fake)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `{base}/v4/spreadsheets/{segments...}`, each segment percent-encoded
    fn endpoint(&self, segments: &[&str]) -> Result<Url, MirrorError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| MirrorError::NotConfigured(format!("invalid Sheets API url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| MirrorError::NotConfigured("Sheets API url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets"])
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl SheetsApi for GoogleSheetsApi {
    async fn tab_titles(
        &self,
        token: &str,
        spreadsheet_id: &str,
    ) -> Result<Vec<String>, MirrorError> {
        let mut url = self.endpoint(&[spreadsheet_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(network)?;
        let meta: SpreadsheetMeta = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| MirrorError::Response(e.to_string()))?;

        Ok(meta
            .sheets
            .into_iter()
            .map(|sheet| sheet.properties.title)
            .collect())
    }

    async fn add_tab(
        &self,
        token: &str,
        spreadsheet_id: &str,
        title: &str,
    ) -> Result<(), MirrorError> {
        let url = self.endpoint(&[&format!("{spreadsheet_id}:batchUpdate")])?;
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": title } } }]
        });

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(network)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn append_rows(
        &self,
        token: &str,
        spreadsheet_id: &str,
        tab: &str,
        rows: &[Vec<String>],
    ) -> Result<AppendSummary, MirrorError> {
        let range = format!("{}:append", tab_range(tab));
        let mut url = self.endpoint(&[spreadsheet_id, "values", &range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "values": rows }))
            .send()
            .await
            .map_err(network)?;
        let parsed: AppendResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| MirrorError::Response(e.to_string()))?;

        Ok(parsed
            .updates
            .map(|u| AppendSummary {
                updated_range: u.updated_range,
                updated_rows: u.updated_rows,
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_range_quotes_title() {
        assert_eq!(tab_range("Ответы"), "'Ответы'!A1");
        assert_eq!(tab_range("Bob's"), "'Bob''s'!A1");
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let api = GoogleSheetsApi::with_client(Client::new());
        let url = api
            .endpoint(&["sheet-key", "values", "'My Tab'!A1:append"])
            .unwrap();
        assert!(url.as_str().starts_with("https://sheets.googleapis.com/v4/spreadsheets/sheet-key/values/"));
        assert!(url.as_str().contains("My%20Tab"));
    }

    #[test]
    fn test_endpoint_respects_custom_base() {
        let api = GoogleSheetsApi::with_client(Client::new()).with_base_url("http://127.0.0.1:9999/");
        let url = api.endpoint(&["abc"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9999/v4/spreadsheets/abc");
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"code":403,"message":"The caller does not have permission","status":"PERMISSION_DENIED"}}"#;
        assert_eq!(error_message(body), "The caller does not have permission");
        assert_eq!(error_message("plain failure"), "plain failure");
    }
}
