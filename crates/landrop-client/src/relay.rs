//! HTTP relay fallback: idempotent upload with bounded retry, and the
//! authorized download on the receiving side.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::StatusCode;
use tracing::{info, warn};

use landrop_shared::constants::{
    FALLBACK_BACKOFF_CAP, FALLBACK_MAX_ATTEMPTS, FALLBACK_REQUEST_DEADLINE, HEADER_CLIENT_TIMESTAMP,
    HEADER_FILENAME, HEADER_RELATIVE_PATH, HEADER_RETRY_COUNT,
};
use landrop_shared::protocol::TransferOffer;
use landrop_shared::types::TransferId;

use crate::config::ClientConfig;
use crate::error::ClientError;

#[derive(Clone)]
pub struct RelayTransport {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
}

impl RelayTransport {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Upload the payload to the hub, retrying up to
    /// [`FALLBACK_MAX_ATTEMPTS`] times with exponential backoff. The hub
    /// treats repeat uploads for one transfer id as already processed, so
    /// retrying after an ambiguous failure is safe.
    pub async fn upload(
        &self,
        offer: &TransferOffer,
        relative_path: Option<&str>,
        payload: Bytes,
    ) -> Result<(), ClientError> {
        let url = self.config.upload_url(&offer.transfer_id);

        for attempt in 0..FALLBACK_MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = fallback_backoff(attempt);
                warn!(
                    transfer = %offer.transfer_id,
                    attempt,
                    ?delay,
                    "Retrying relay upload"
                );
                tokio::time::sleep(delay).await;
            }

            match self
                .try_upload(&url, offer, relative_path, payload.clone(), attempt)
                .await
            {
                Ok(()) => {
                    info!(transfer = %offer.transfer_id, attempt, "Relay upload succeeded");
                    return Ok(());
                }
                Err(err) => {
                    warn!(transfer = %offer.transfer_id, attempt, error = %err, "Relay upload attempt failed");
                }
            }
        }

        Err(ClientError::RelayExhausted {
            attempts: FALLBACK_MAX_ATTEMPTS,
        })
    }

    async fn try_upload(
        &self,
        url: &str,
        offer: &TransferOffer,
        relative_path: Option<&str>,
        payload: Bytes,
        attempt: u32,
    ) -> Result<(), ClientError> {
        let mut request = self
            .http
            .post(url)
            .timeout(FALLBACK_REQUEST_DEADLINE)
            .header(HEADER_FILENAME, encode_header(&offer.file_name))
            .header(reqwest::header::CONTENT_TYPE, &offer.file_type)
            .header(HEADER_RETRY_COUNT, attempt)
            .header(HEADER_CLIENT_TIMESTAMP, Utc::now().timestamp_millis());
        if let Some(path) = relative_path {
            request = request.header(HEADER_RELATIVE_PATH, encode_header(path));
        }

        let response = request.body(payload).send().await?;
        response.error_for_status()?;
        Ok(())
    }

    /// Pull a relayed payload. The hub answers 403 until the receiver has
    /// accepted, and 404 once the entry aged out.
    pub async fn download(&self, id: &TransferId) -> Result<Bytes, ClientError> {
        let url = self.config.download_url(id);
        let response = self
            .http
            .get(&url)
            .timeout(FALLBACK_REQUEST_DEADLINE)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.bytes().await?),
            status => Err(ClientError::RelayRefused {
                status: status.as_u16(),
            }),
        }
    }
}

fn encode_header(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

/// 1 s, 2 s, 4 s, ... capped. `attempt` is the retry ordinal (1-based).
fn fallback_backoff(attempt: u32) -> Duration {
    let exp = Duration::from_secs(1u64 << (attempt - 1).min(10));
    exp.min(FALLBACK_BACKOFF_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(fallback_backoff(1), Duration::from_secs(1));
        assert_eq!(fallback_backoff(2), Duration::from_secs(2));
        assert_eq!(fallback_backoff(3), Duration::from_secs(4));
        assert_eq!(fallback_backoff(4), Duration::from_secs(8));
        assert_eq!(fallback_backoff(9), Duration::from_secs(8));
    }

    #[test]
    fn test_header_encoding() {
        assert_eq!(encode_header("my file (2).txt"), "my%20file%20%282%29%2Etxt");
    }
}
