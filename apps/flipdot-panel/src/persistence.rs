//! Saving the current picture as a named pattern on the pattern server.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// What gets stored for one pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternPayload {
    pub data: Vec<u8>,
    pub backlight: bool,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid pattern server url: {0}")]
    Url(#[from] url::ParseError),
    #[error("no pattern server configured")]
    NotConfigured,
}

#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn save(&self, filename: &str, payload: &PatternPayload) -> Result<(), PersistError>;
}

#[derive(Serialize)]
struct SaveRequest<'a> {
    filename: &'a str,
    data: &'a [u8],
    backlight: bool,
}

/// Posts patterns as JSON to `<base>/save`.
#[derive(Clone)]
pub struct HttpPatternStore {
    http: Client,
    base_url: Url,
}

impl HttpPatternStore {
    pub fn new(base_url: Url) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    fn save_url(&self) -> Result<Url, PersistError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join("save")?)
    }
}

#[async_trait]
impl PatternStore for HttpPatternStore {
    async fn save(&self, filename: &str, payload: &PatternPayload) -> Result<(), PersistError> {
        let url = self.save_url()?;
        debug!(target = "flipdot.persist", %url, filename, "saving pattern");
        let res = self
            .http
            .post(url)
            .json(&SaveRequest {
                filename,
                data: &payload.data,
                backlight: payload.backlight,
            })
            .send()
            .await?;

        if res.status().is_success() {
            info!(target = "flipdot.persist", filename, "pattern saved");
            Ok(())
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(PersistError::UnexpectedStatus { status, body })
        }
    }
}

/// Used when no pattern server is configured. Every save fails, which makes
/// the panel offer the local fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPatternStore;

#[async_trait]
impl PatternStore for DisabledPatternStore {
    async fn save(&self, _filename: &str, _payload: &PatternPayload) -> Result<(), PersistError> {
        Err(PersistError::NotConfigured)
    }
}
