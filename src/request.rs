use std::time::Duration;

use reqwest::{header::USER_AGENT, StatusCode};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::ident::batch_ids;
use crate::identity::Identity;

/// Body of one successful bulk lookup, already checked to be valid JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub(crate) fn from_body(body: Vec<u8>) -> Self {
        Self(body)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Why a batch did not produce a `Payload`. Handled by the worker, never propagated further.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureKind {
    #[error("couldn't reach upstream: {0}")]
    Transport(String),
    #[error("upstream answered with status {0}")]
    HttpStatus(u16),
    #[error("upstream answered with a body that isn't valid JSON")]
    InvalidBody,
}

impl FailureKind {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FailureKind::HttpStatus(code) if *code == StatusCode::TOO_MANY_REQUESTS.as_u16())
    }

    /// Statuses that mean the current identity has been shut out.
    pub fn is_hard_block(&self) -> bool {
        const BLOCKED: [StatusCode; 3] = [
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::PROXY_AUTHENTICATION_REQUIRED,
        ];
        matches!(self, FailureKind::HttpStatus(code) if BLOCKED.iter().any(|s| s.as_u16() == *code))
    }
}

/// Performs one bulk lookup per batch. Never retries, that is the worker's call.
#[derive(Debug, Clone)]
pub(crate) struct Fetcher {
    endpoint: String,
    status_cool_off: Duration,
}

impl Fetcher {
    pub(crate) fn new(endpoint: impl Into<String>, status_cool_off: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            status_cool_off,
        }
    }

    /// The lookup url for the batch starting at `offset`. Ids are joined with raw commas.
    pub(crate) fn batch_url(&self, offset: i64) -> String {
        format!("{}?id={}", self.endpoint, batch_ids(offset).join(","))
    }

    /// Requests the batch starting at `offset` through `identity` and classifies the outcome.
    pub(crate) async fn fetch(
        &self,
        identity: &Identity,
        offset: i64,
    ) -> core::result::Result<Payload, FailureKind> {
        let res = identity
            .client()
            .get(self.batch_url(offset))
            .header(USER_AGENT, identity.signature())
            .send()
            .await
            .map_err(|e| FailureKind::Transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            warn!(offset, %status, "non-success status, cooling off");
            sleep(self.status_cool_off).await;
            return Err(FailureKind::HttpStatus(status.as_u16()));
        }

        let body = res
            .bytes()
            .await
            .map_err(|e| FailureKind::Transport(e.to_string()))?;
        if serde_json::from_slice::<serde_json::Value>(&body).is_err() {
            debug!(offset, len = body.len(), "body is not valid JSON");
            return Err(FailureKind::InvalidBody);
        }

        Ok(Payload::from_body(body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::STEP_SIZE;

    #[test]
    fn classifies_statuses() {
        assert!(FailureKind::HttpStatus(429).is_rate_limited());
        assert!(!FailureKind::HttpStatus(429).is_hard_block());
        assert!(FailureKind::HttpStatus(403).is_hard_block());
        assert!(FailureKind::HttpStatus(401).is_hard_block());
        assert!(!FailureKind::HttpStatus(500).is_hard_block());
        assert!(!FailureKind::HttpStatus(500).is_rate_limited());
        assert!(!FailureKind::InvalidBody.is_rate_limited());
        assert!(!FailureKind::Transport("refused".into()).is_hard_block());
    }

    #[test]
    fn batch_url_lists_every_id_with_raw_commas() {
        let fetcher = Fetcher::new("http://upstream/api/info.json", Duration::ZERO);
        let url = fetcher.batch_url(0);
        assert!(url.starts_with("http://upstream/api/info.json?id=t3_0,t3_1,t3_2,"));
        assert!(url.ends_with(",t3_2r"));
        assert_eq!(url.matches("t3_").count(), STEP_SIZE as usize);
    }
}
