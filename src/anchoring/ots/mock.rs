//! Test doubles for calendars, block explorers and the OTS client
//!
//! Provides configurable mock implementations for unit and integration tests.

use super::bitcoin::{BlockInfo, BlockSource};
use super::calendar::Calendar;
use super::client::OtsClient;
use super::codec;
use super::fixtures::{mock_calendar_response, mock_upgraded_response};
use super::types::Hash;
use crate::anchoring::error::AnchorError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted answer of a mock calendar
#[derive(Debug, Clone)]
pub enum CalendarReply {
    /// HTTP 200 with this body
    Respond(Vec<u8>),
    /// HTTP 404
    NotFound,
    /// Any other HTTP status
    Status(u16),
    /// Connection failure
    Error,
    /// Never answers
    Hang,
}

/// In-memory calendar keyed by calendar URL
///
/// URLs without a scripted reply behave like unreachable servers.
#[derive(Default)]
pub struct MockCalendar {
    submit_replies: HashMap<String, CalendarReply>,
    timestamp_replies: HashMap<String, CalendarReply>,
    delays: HashMap<String, Duration>,
    submit_call_count: AtomicUsize,
    timestamp_call_count: AtomicUsize,
    timestamp_log: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MockCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the answer to `POST {url}/digest`
    pub fn on_submit(mut self, calendar_url: &str, reply: CalendarReply) -> Self {
        self.submit_replies.insert(calendar_url.to_string(), reply);
        self
    }

    /// Script the answer to `GET {url}/timestamp/...`
    pub fn on_timestamp(mut self, calendar_url: &str, reply: CalendarReply) -> Self {
        self.timestamp_replies.insert(calendar_url.to_string(), reply);
        self
    }

    /// Delay every answer from `calendar_url`
    pub fn with_delay(mut self, calendar_url: &str, delay: Duration) -> Self {
        self.delays.insert(calendar_url.to_string(), delay);
        self
    }

    /// Get number of submit calls
    pub fn submit_calls(&self) -> usize {
        self.submit_call_count.load(Ordering::SeqCst)
    }

    /// Get number of timestamp lookups
    pub fn timestamp_calls(&self) -> usize {
        self.timestamp_call_count.load(Ordering::SeqCst)
    }

    /// (calendar_url, commitment) of every timestamp lookup, in call order
    pub fn timestamp_requests(&self) -> Vec<(String, Vec<u8>)> {
        self.timestamp_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    async fn reply(
        &self,
        replies: &HashMap<String, CalendarReply>,
        calendar_url: &str,
    ) -> Result<Option<Vec<u8>>, AnchorError> {
        if let Some(delay) = self.delays.get(calendar_url) {
            tokio::time::sleep(*delay).await;
        }

        match replies.get(calendar_url) {
            Some(CalendarReply::Respond(body)) => Ok(Some(body.clone())),
            Some(CalendarReply::NotFound) => Ok(None),
            Some(CalendarReply::Status(status)) => Err(AnchorError::ServiceError(format!(
                "calendar returned status {status}"
            ))),
            Some(CalendarReply::Hang) => std::future::pending().await,
            Some(CalendarReply::Error) | None => {
                Err(AnchorError::Network("mock calendar unreachable".into()))
            }
        }
    }
}

#[async_trait]
impl Calendar for MockCalendar {
    async fn submit(&self, calendar_url: &str, _digest: &[u8]) -> Result<Vec<u8>, AnchorError> {
        self.submit_call_count.fetch_add(1, Ordering::SeqCst);

        self.reply(&self.submit_replies, calendar_url)
            .await?
            .ok_or_else(|| AnchorError::ServiceError("calendar returned status 404".into()))
    }

    async fn timestamp(
        &self,
        calendar_url: &str,
        commitment: &[u8],
    ) -> Result<Option<Vec<u8>>, AnchorError> {
        self.timestamp_call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.timestamp_log.lock() {
            log.push((calendar_url.to_string(), commitment.to_vec()));
        }

        self.reply(&self.timestamp_replies, calendar_url).await
    }
}

/// In-memory block explorer keyed by height
#[derive(Default)]
pub struct MockBlockSource {
    blocks: HashMap<u64, (BlockInfo, Vec<String>)>,
    fail: bool,
    block_call_count: AtomicUsize,
    txid_call_count: AtomicUsize,
}

impl MockBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock where every lookup fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Serve `block` and its transaction ids
    pub fn with_block(mut self, block: BlockInfo, txids: Vec<String>) -> Self {
        self.blocks.insert(block.height, (block, txids));
        self
    }

    /// Get number of block lookups
    pub fn block_calls(&self) -> usize {
        self.block_call_count.load(Ordering::SeqCst)
    }

    /// Get number of txid lookups
    pub fn txid_calls(&self) -> usize {
        self.txid_call_count.load(Ordering::SeqCst)
    }

    fn lookup(&self, height: u64) -> Result<&(BlockInfo, Vec<String>), AnchorError> {
        if self.fail {
            return Err(AnchorError::BlockFetchFailed {
                height,
                details: "mock explorer failure".into(),
            });
        }
        self.blocks
            .get(&height)
            .ok_or_else(|| AnchorError::BlockFetchFailed {
                height,
                details: "unknown block".into(),
            })
    }
}

#[async_trait]
impl BlockSource for MockBlockSource {
    async fn block_at(&self, height: u64) -> Result<BlockInfo, AnchorError> {
        self.block_call_count.fetch_add(1, Ordering::SeqCst);
        self.lookup(height).map(|(block, _)| block.clone())
    }

    async fn block_txids(&self, block: &BlockInfo) -> Result<Vec<String>, AnchorError> {
        self.txid_call_count.fetch_add(1, Ordering::SeqCst);
        self.lookup(block.height).map(|(_, txids)| txids.clone())
    }
}

/// Upgrade route of [`OtsClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeRoute {
    RecordedCalendar,
    PendingProof,
    AnyCalendar,
}

/// Mock OTS client for testing
///
/// Proofs are built from the calendar fixtures, so they parse.
pub struct MockOtsClient {
    /// Whether submit should fail
    pub submit_should_fail: AtomicBool,

    /// Whether `upgrade` against the recorded calendar succeeds
    pub recorded_calendar_ready: AtomicBool,

    /// Whether `upgrade_from_pending_proof` succeeds
    pub pending_proof_ready: AtomicBool,

    /// Whether `upgrade_from_any_calendar` succeeds
    pub any_calendar_ready: AtomicBool,

    /// Block height of upgraded proofs
    pub confirmed_block_height: u64,

    /// Calendar URLs to answer from; the first is the primary
    pub calendar_urls: Vec<String>,

    /// Count of submit calls
    pub submit_call_count: AtomicUsize,

    /// Calendar answer used for upgrades instead of the Bitcoin-attested default
    pub upgraded_response: Option<Vec<u8>>,

    upgrade_log: Mutex<Vec<UpgradeRoute>>,
}

impl Default for MockOtsClient {
    fn default() -> Self {
        Self {
            submit_should_fail: AtomicBool::new(false),
            recorded_calendar_ready: AtomicBool::new(false),
            pending_proof_ready: AtomicBool::new(false),
            any_calendar_ready: AtomicBool::new(false),
            confirmed_block_height: 800000,
            calendar_urls: vec![
                "https://mock.calendar".to_string(),
                "https://backup.mock.calendar".to_string(),
            ],
            submit_call_count: AtomicUsize::new(0),
            upgraded_response: None,
            upgrade_log: Mutex::new(Vec::new()),
        }
    }
}

impl MockOtsClient {
    /// Create a new mock client with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that always fails on submit
    pub fn failing() -> Self {
        Self {
            submit_should_fail: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Create a mock whose recorded calendar returns a Bitcoin-attested proof
    pub fn with_confirmation(block_height: u64) -> Self {
        Self::upgrading_via(UpgradeRoute::RecordedCalendar, block_height)
    }

    /// Create a mock where only `route` yields a Bitcoin-attested proof
    pub fn upgrading_via(route: UpgradeRoute, block_height: u64) -> Self {
        let mock = Self {
            confirmed_block_height: block_height,
            ..Self::default()
        };
        let flag = match route {
            UpgradeRoute::RecordedCalendar => &mock.recorded_calendar_ready,
            UpgradeRoute::PendingProof => &mock.pending_proof_ready,
            UpgradeRoute::AnyCalendar => &mock.any_calendar_ready,
        };
        flag.store(true, Ordering::SeqCst);
        mock
    }

    /// Create a mock whose recorded calendar answers upgrades with `response`
    pub fn with_upgraded_response(response: Vec<u8>) -> Self {
        Self {
            upgraded_response: Some(response),
            ..Self::with_confirmation(800000)
        }
    }

    /// Get number of submit calls
    pub fn submit_calls(&self) -> usize {
        self.submit_call_count.load(Ordering::SeqCst)
    }

    /// Upgrade routes tried, in call order
    pub fn upgrade_calls(&self) -> Vec<UpgradeRoute> {
        self.upgrade_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    fn pending_proof(&self, hash: &Hash, calendar_url: &str) -> Vec<u8> {
        codec::serialize(hash, &mock_calendar_response(calendar_url))
    }

    fn upgrade_via(&self, route: UpgradeRoute, ready: &AtomicBool, hash: &Hash) -> Option<Vec<u8>> {
        if let Ok(mut log) = self.upgrade_log.lock() {
            log.push(route);
        }

        ready.load(Ordering::SeqCst).then(|| match &self.upgraded_response {
            Some(response) => codec::serialize(hash, response),
            None => codec::serialize(hash, &mock_upgraded_response(self.confirmed_block_height)),
        })
    }
}

#[async_trait]
impl OtsClient for MockOtsClient {
    async fn submit(&self, hash: &Hash) -> Result<(Vec<u8>, String), AnchorError> {
        self.submit_call_count.fetch_add(1, Ordering::SeqCst);

        if self.submit_should_fail.load(Ordering::SeqCst) {
            return Err(AnchorError::CalendarUnavailable);
        }

        let url = self
            .calendar_urls
            .first()
            .ok_or_else(|| AnchorError::NotConfigured("no mock calendars".into()))?;

        Ok((self.pending_proof(hash, url), url.clone()))
    }

    async fn submit_all(&self, hash: &Hash) -> Result<Vec<(Vec<u8>, String)>, AnchorError> {
        self.submit_call_count.fetch_add(1, Ordering::SeqCst);

        if self.submit_should_fail.load(Ordering::SeqCst) || self.calendar_urls.is_empty() {
            return Err(AnchorError::CalendarUnavailable);
        }

        Ok(self
            .calendar_urls
            .iter()
            .map(|url| (self.pending_proof(hash, url), url.clone()))
            .collect())
    }

    async fn upgrade(
        &self,
        hash: &Hash,
        _calendar_url: &str,
    ) -> Result<Option<Vec<u8>>, AnchorError> {
        Ok(self.upgrade_via(
            UpgradeRoute::RecordedCalendar,
            &self.recorded_calendar_ready,
            hash,
        ))
    }

    async fn upgrade_from_any_calendar(&self, hash: &Hash) -> Result<Option<Vec<u8>>, AnchorError> {
        Ok(self.upgrade_via(UpgradeRoute::AnyCalendar, &self.any_calendar_ready, hash))
    }

    async fn upgrade_from_pending_proof(
        &self,
        _pending_proof: &[u8],
        hash: &Hash,
    ) -> Result<Option<Vec<u8>>, AnchorError> {
        Ok(self.upgrade_via(UpgradeRoute::PendingProof, &self.pending_proof_ready, hash))
    }
}
