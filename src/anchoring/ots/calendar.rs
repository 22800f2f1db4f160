//! Calendar server communication

use crate::anchoring::error::AnchorError;
use async_trait::async_trait;
use std::time::Duration;

/// Media type calendars answer with
pub const OTS_ACCEPT: &str = "application/vnd.opentimestamps.v1";

/// One round trip to a single calendar server
#[async_trait]
pub trait Calendar: Send + Sync {
    /// Submit a digest for aggregation
    ///
    /// Returns the calendar's timestamp continuing from `digest`.
    async fn submit(&self, calendar_url: &str, digest: &[u8]) -> Result<Vec<u8>, AnchorError>;

    /// Fetch the timestamp the calendar holds for `commitment`
    ///
    /// `Ok(None)` means the calendar does not know the commitment yet.
    async fn timestamp(
        &self,
        calendar_url: &str,
        commitment: &[u8],
    ) -> Result<Option<Vec<u8>>, AnchorError>;
}

/// Calendar client for HTTP communication with OTS servers
pub struct HttpCalendar {
    /// HTTP client
    client: reqwest::Client,

    /// Timeout
    timeout: Duration,
}

impl HttpCalendar {
    /// Create a new calendar client
    pub fn new(timeout_secs: u64) -> Result<Self, AnchorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AnchorError::Network(e.to_string()))?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[async_trait]
impl Calendar for HttpCalendar {
    async fn submit(&self, calendar_url: &str, digest: &[u8]) -> Result<Vec<u8>, AnchorError> {
        tracing::debug!(calendar_url = %calendar_url, "Submitting to calendar");

        let url = format!("{}/digest", calendar_url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", OTS_ACCEPT)
            .body(digest.to_vec())
            .send()
            .await
            .map_err(|e| AnchorError::from_reqwest(e, self.timeout.as_secs()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(AnchorError::ServiceError(format!(
                "calendar returned status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AnchorError::Network(e.to_string()))?
            .to_vec();

        tracing::info!(calendar_url = %calendar_url, "Digest submitted successfully");

        Ok(bytes)
    }

    /// Sends GET request to `{calendar_url}/timestamp/{hex_commitment}`
    async fn timestamp(
        &self,
        calendar_url: &str,
        commitment: &[u8],
    ) -> Result<Option<Vec<u8>>, AnchorError> {
        let url = format!("{}/timestamp/{}", calendar_url, hex::encode(commitment));

        tracing::debug!(url = %url, "Fetching timestamp from calendar");

        let response = self
            .client
            .get(&url)
            .header("Accept", OTS_ACCEPT)
            .send()
            .await
            .map_err(|e| AnchorError::from_reqwest(e, self.timeout.as_secs()))?;

        // 404 = commitment not known (yet)
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(calendar_url = %calendar_url, "Timestamp not yet available at calendar");
            return Ok(None);
        }

        if response.status() != reqwest::StatusCode::OK {
            return Err(AnchorError::ServiceError(format!(
                "calendar returned status {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AnchorError::Network(e.to_string()))?
            .to_vec();

        Ok(Some(bytes))
    }
}
