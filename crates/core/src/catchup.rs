use tidemark_client_api_messages::{CatchupResponse, SyncCursor};

use crate::config::{BackoffConfig, SyncConfig};
use crate::error::CatchupError;

/// Where the paged pull currently stands. `Error` is terminal until the
/// controller is restarted; the live stream runs regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchupState {
    NotStarted,
    Syncing { pages: u32 },
    Synced,
    Error(String),
}

/// Fetches catchup pages with exponential backoff.
pub struct CatchupClient {
    http: reqwest::Client,
    url: String,
    backoff: BackoffConfig,
}

impl CatchupClient {
    pub fn new(config: &SyncConfig) -> CatchupClient {
        CatchupClient {
            http: reqwest::Client::new(),
            url: format!("{}{}", config.base_url.trim_end_matches('/'), config.catchup_path),
            backoff: config.backoff.clone(),
        }
    }

    /// One page for `cursor`, retried up to `max_retries` times with
    /// `min(initial × multiplier^attempt, max)` pauses in between.
    pub async fn fetch_page(&self, cursor: &SyncCursor) -> Result<CatchupResponse, CatchupError> {
        let cursor_json =
            serde_json::to_string(cursor).map_err(|e| CatchupError::Decode(format!("cursor does not encode: {e}")))?;
        let url = format!("{}?syncCursor={}", self.url, urlencoding::encode(&cursor_json));

        let mut attempt = 0;
        loop {
            match self.request(&url).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempt >= self.backoff.max_retries {
                        return Err(CatchupError::Exhausted {
                            attempts: attempt + 1,
                            last: e.to_string(),
                        });
                    }
                    let delay = self.backoff.delay_for(attempt);
                    log::warn!("catchup attempt {attempt} failed ({e}); retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn request(&self, url: &str) -> Result<CatchupResponse, CatchupError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CatchupError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatchupError::Transport(format!("server returned {status}")));
        }
        response
            .json::<CatchupResponse>()
            .await
            .map_err(|e| CatchupError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exhausts_retries_against_a_dead_endpoint() {
        let config = SyncConfig {
            base_url: "http://127.0.0.1:1".to_owned(),
            backoff: BackoffConfig {
                initial_delay_ms: 1,
                multiplier: 1.0,
                max_delay_ms: 1,
                max_retries: 2,
            },
            ..SyncConfig::default()
        };
        let client = CatchupClient::new(&config);
        let result = client.fetch_page(&SyncCursor::default()).await;
        match result {
            Err(CatchupError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }
}
