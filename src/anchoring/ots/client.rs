//! OpenTimestamps client
//!
//! Talks to every configured calendar at once. Submissions take the first
//! calendar that answers; upgrades race all calendars and drop the losers as
//! soon as one returns a Bitcoin attestation.

use crate::anchoring::error::AnchorError;
use crate::anchoring::ots::calendar::{Calendar, HttpCalendar};
use crate::anchoring::ots::codec;
use crate::anchoring::ots::commitment;
use crate::anchoring::ots::types::{Hash, ProofPath};
use crate::config::OtsConfig;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Calendar-facing operations used by the orchestrator
#[async_trait]
pub trait OtsClient: Send + Sync {
    /// Submit a hash to all calendars, keeping the first success
    /// Returns (proof_bytes, calendar_url)
    async fn submit(&self, hash: &Hash) -> Result<(Vec<u8>, String), AnchorError>;

    /// Submit a hash to all calendars, keeping every success
    async fn submit_all(&self, hash: &Hash) -> Result<Vec<(Vec<u8>, String)>, AnchorError>;

    /// Ask one calendar for a Bitcoin-attested proof of `hash`
    /// Returns None if the calendar has nothing complete yet
    async fn upgrade(&self, hash: &Hash, calendar_url: &str)
        -> Result<Option<Vec<u8>>, AnchorError>;

    /// Race `upgrade` against every calendar
    async fn upgrade_from_any_calendar(&self, hash: &Hash) -> Result<Option<Vec<u8>>, AnchorError>;

    /// Continue a pending proof from the commitments its calendars hold
    async fn upgrade_from_pending_proof(
        &self,
        pending_proof: &[u8],
        hash: &Hash,
    ) -> Result<Option<Vec<u8>>, AnchorError>;
}

/// Multi-calendar client
pub struct OpenTimestampsClient {
    calendar: Arc<dyn Calendar>,
    calendar_urls: Vec<String>,
    timeout: Duration,
}

impl OpenTimestampsClient {
    /// Create a client speaking HTTP to the configured calendars
    pub fn new(config: &OtsConfig) -> Result<Self, AnchorError> {
        let calendar = HttpCalendar::new(config.timeout_secs)?;
        Ok(Self::with_calendar(config, Arc::new(calendar)))
    }

    /// Create a client over a custom calendar transport
    #[must_use]
    pub fn with_calendar(config: &OtsConfig, calendar: Arc<dyn Calendar>) -> Self {
        Self {
            calendar,
            calendar_urls: config.calendar_urls.clone(),
            timeout: config.timeout(),
        }
    }

    /// Configured calendar URLs
    #[must_use]
    pub fn calendar_urls(&self) -> &[String] {
        &self.calendar_urls
    }

    fn ensure_configured(&self) -> Result<(), AnchorError> {
        if self.calendar_urls.is_empty() {
            return Err(AnchorError::NotConfigured(
                "no calendar URLs configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Run a calendar request under the per-request timeout
    async fn bounded<T, F>(&self, request: F) -> Result<T, AnchorError>
    where
        F: Future<Output = Result<T, AnchorError>>,
    {
        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| AnchorError::Timeout(self.timeout.as_secs()))?
    }

    /// Submit to one calendar and check the answer is a well-formed timestamp
    async fn submit_one(&self, calendar_url: &str, hash: &Hash) -> Result<Vec<u8>, AnchorError> {
        let response = self.bounded(self.calendar.submit(calendar_url, hash)).await?;

        codec::parse_fragment(&response).map_err(|e| {
            AnchorError::InvalidResponse(format!("malformed calendar timestamp: {e}"))
        })?;

        Ok(codec::serialize(hash, &response))
    }

    /// Query one pending path at its calendar, keyed by the path's commitment
    async fn upgrade_path(&self, path: &ProofPath, hash: &Hash) -> Option<Vec<u8>> {
        let calendar_url = path.attestation.pending_uri()?;

        let commitment = match commitment::apply(&path.operations, hash) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(calendar_url = %calendar_url, error = %e, "Cannot replay pending path");
                return None;
            }
        };

        let response = match self
            .bounded(self.calendar.timestamp(calendar_url, &commitment))
            .await
        {
            Ok(Some(response)) => response,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(calendar_url = %calendar_url, error = %e, "Pending upgrade failed");
                return None;
            }
        };

        if !codec::contains_bitcoin_attestation(&response) {
            tracing::debug!(calendar_url = %calendar_url, "Commitment not yet anchored");
            return None;
        }

        if let Err(e) = codec::parse_fragment(&response) {
            tracing::warn!(calendar_url = %calendar_url, error = %e, "Malformed upgrade response");
            return None;
        }

        tracing::info!(calendar_url = %calendar_url, "Pending proof upgraded");

        Some(codec::serialize_with_operations(
            hash,
            &path.operations,
            &response,
        ))
    }
}

#[async_trait]
impl OtsClient for OpenTimestampsClient {
    async fn submit(&self, hash: &Hash) -> Result<(Vec<u8>, String), AnchorError> {
        self.ensure_configured()?;

        let mut requests: FuturesUnordered<_> = self
            .calendar_urls
            .iter()
            .map(|url| async move { (url, self.submit_one(url, hash).await) })
            .collect();

        while let Some((calendar_url, result)) = requests.next().await {
            match result {
                Ok(proof) => {
                    tracing::info!(calendar_url = %calendar_url, "Timestamp submitted");
                    return Ok((proof, calendar_url.clone()));
                }
                Err(e) => {
                    tracing::warn!(
                        calendar_url = %calendar_url,
                        error = %e,
                        "Calendar request failed, trying next"
                    );
                }
            }
        }

        Err(AnchorError::CalendarUnavailable)
    }

    async fn submit_all(&self, hash: &Hash) -> Result<Vec<(Vec<u8>, String)>, AnchorError> {
        self.ensure_configured()?;

        let mut requests: FuturesUnordered<_> = self
            .calendar_urls
            .iter()
            .map(|url| async move { (url, self.submit_one(url, hash).await) })
            .collect();

        let mut proofs = Vec::new();
        while let Some((calendar_url, result)) = requests.next().await {
            match result {
                Ok(proof) => proofs.push((proof, calendar_url.clone())),
                Err(e) => {
                    tracing::warn!(calendar_url = %calendar_url, error = %e, "Calendar request failed");
                }
            }
        }

        if proofs.is_empty() {
            return Err(AnchorError::CalendarUnavailable);
        }

        tracing::info!(
            succeeded = proofs.len(),
            total = self.calendar_urls.len(),
            "Timestamp submitted to calendars"
        );

        Ok(proofs)
    }

    async fn upgrade(
        &self,
        hash: &Hash,
        calendar_url: &str,
    ) -> Result<Option<Vec<u8>>, AnchorError> {
        let response = match self.bounded(self.calendar.timestamp(calendar_url, hash)).await {
            Ok(Some(response)) => response,
            Ok(None) => return Ok(None),
            // Transient failures mean "try again later"
            Err(e @ (AnchorError::Timeout(_) | AnchorError::Network(_))) => {
                tracing::warn!(calendar_url = %calendar_url, error = %e, "Upgrade attempt failed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !codec::contains_bitcoin_attestation(&response) {
            tracing::debug!(calendar_url = %calendar_url, "Timestamp still pending");
            return Ok(None);
        }

        codec::parse_fragment(&response).map_err(|e| {
            AnchorError::InvalidResponse(format!("malformed calendar timestamp: {e}"))
        })?;

        tracing::info!(calendar_url = %calendar_url, "Timestamp upgraded");

        Ok(Some(codec::serialize(hash, &response)))
    }

    async fn upgrade_from_any_calendar(&self, hash: &Hash) -> Result<Option<Vec<u8>>, AnchorError> {
        self.ensure_configured()?;

        let mut requests: FuturesUnordered<_> = self
            .calendar_urls
            .iter()
            .map(|url| async move { (url, self.upgrade(hash, url).await) })
            .collect();

        while let Some((calendar_url, result)) = requests.next().await {
            match result {
                // Returning drops the remaining requests
                Ok(Some(proof)) => return Ok(Some(proof)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(calendar_url = %calendar_url, error = %e, "Upgrade attempt failed");
                }
            }
        }

        Ok(None)
    }

    async fn upgrade_from_pending_proof(
        &self,
        pending_proof: &[u8],
        hash: &Hash,
    ) -> Result<Option<Vec<u8>>, AnchorError> {
        let proof = codec::parse(pending_proof)?;

        let mut requests: FuturesUnordered<_> = proof
            .pending_paths()
            .map(|path| self.upgrade_path(path, hash))
            .collect();

        while let Some(result) = requests.next().await {
            if result.is_some() {
                return Ok(result);
            }
        }

        Ok(None)
    }
}
