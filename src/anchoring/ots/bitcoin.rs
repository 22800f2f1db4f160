//! Bitcoin block lookup via Esplora-compatible explorers
//!
//! Explorers are tried in configured order; the first one that answers wins.
//! Returns an error only if every explorer fails.

use crate::anchoring::error::AnchorError;
use crate::config::OtsConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Block header fields needed to check an attestation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub height: u64,
    /// Block hash, display (big-endian) hex
    pub hash: String,
    /// Merkle root, display (big-endian) hex
    pub merkle_root: String,
    /// Block time (unix seconds)
    pub timestamp: u64,
}

/// Source of Bitcoin block data
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Resolve the block at `height`
    async fn block_at(&self, height: u64) -> Result<BlockInfo, AnchorError>;

    /// Transaction ids of `block`, display hex
    async fn block_txids(&self, block: &BlockInfo) -> Result<Vec<String>, AnchorError>;
}

#[derive(Debug, Deserialize)]
struct EsploraBlock {
    merkle_root: String,
    timestamp: u64,
}

/// Esplora REST client (blockstream.info, mempool.space, self-hosted)
pub struct EsploraExplorer {
    client: reqwest::Client,
    /// Base URLs without the `/api` suffix
    base_urls: Vec<String>,
}

impl EsploraExplorer {
    /// Create an explorer client from configuration
    pub fn new(config: &OtsConfig) -> Result<Self, AnchorError> {
        Self::with_urls(config.explorer_urls.clone(), config.timeout())
    }

    /// Create an explorer client over explicit base URLs
    pub fn with_urls(base_urls: Vec<String>, timeout: Duration) -> Result<Self, AnchorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnchorError::Network(e.to_string()))?;

        Ok(Self { client, base_urls })
    }

    async fn fetch_block(&self, base_url: &str, height: u64) -> Result<BlockInfo, String> {
        // Step 1: Get block hash
        let hash_url = format!("{base_url}/api/block-height/{height}");
        let hash = self
            .client
            .get(&hash_url)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?
            .error_for_status()
            .map_err(|e| format!("HTTP status error: {e}"))?
            .text()
            .await
            .map_err(|e| format!("Read error: {e}"))?
            .trim()
            .to_string();

        if hash.is_empty() {
            return Err("empty block hash".to_string());
        }

        // Step 2: Get block details
        let block_url = format!("{base_url}/api/block/{hash}");
        let block = self
            .client
            .get(&block_url)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?
            .error_for_status()
            .map_err(|e| format!("HTTP status error: {e}"))?
            .json::<EsploraBlock>()
            .await
            .map_err(|e| format!("JSON error: {e}"))?;

        Ok(BlockInfo {
            height,
            hash,
            merkle_root: block.merkle_root,
            timestamp: block.timestamp,
        })
    }

    async fn fetch_txids(&self, base_url: &str, block_hash: &str) -> Result<Vec<String>, String> {
        let url = format!("{base_url}/api/block/{block_hash}/txids");
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?
            .error_for_status()
            .map_err(|e| format!("HTTP status error: {e}"))?
            .json::<Vec<String>>()
            .await
            .map_err(|e| format!("JSON error: {e}"))
    }

    fn ensure_configured(&self) -> Result<(), AnchorError> {
        if self.base_urls.is_empty() {
            return Err(AnchorError::NotConfigured(
                "no block explorer URLs configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockSource for EsploraExplorer {
    async fn block_at(&self, height: u64) -> Result<BlockInfo, AnchorError> {
        self.ensure_configured()?;

        let mut errors = Vec::new();

        for base_url in &self.base_urls {
            match self.fetch_block(base_url, height).await {
                Ok(block) => {
                    tracing::debug!(height = height, explorer = %base_url, hash = %block.hash, "Resolved block");
                    return Ok(block);
                }
                Err(e) => {
                    tracing::warn!(
                        height = height,
                        explorer = %base_url,
                        error = %e,
                        "Failed to fetch block, trying next explorer"
                    );
                    errors.push(format!("{base_url}: {e}"));
                }
            }
        }

        Err(AnchorError::BlockFetchFailed {
            height,
            details: errors.join("; "),
        })
    }

    async fn block_txids(&self, block: &BlockInfo) -> Result<Vec<String>, AnchorError> {
        self.ensure_configured()?;

        let mut errors = Vec::new();

        for base_url in &self.base_urls {
            match self.fetch_txids(base_url, &block.hash).await {
                Ok(txids) => return Ok(txids),
                Err(e) => {
                    tracing::warn!(
                        height = block.height,
                        explorer = %base_url,
                        error = %e,
                        "Failed to fetch block txids, trying next explorer"
                    );
                    errors.push(format!("{base_url}: {e}"));
                }
            }
        }

        Err(AnchorError::BlockFetchFailed {
            height: block.height,
            details: errors.join("; "),
        })
    }
}
