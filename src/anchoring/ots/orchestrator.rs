//! Timestamp lifecycle
//!
//! Drives a [`TimestampRecord`] from submission to Bitcoin verification.
//! Records are taken by reference and returned updated; the orchestrator
//! itself holds no per-item state.

use crate::anchoring::error::AnchorError;
use crate::anchoring::ots::bitcoin::{BlockSource, EsploraExplorer};
use crate::anchoring::ots::client::{OpenTimestampsClient, OtsClient};
use crate::anchoring::ots::codec;
use crate::anchoring::ots::commitment::{self, hash_content};
use crate::anchoring::ots::types::{
    Hash, TimestampRecord, TimestampState, VerificationReport, VerificationResult,
};
use crate::anchoring::ots::verify::BitcoinVerifier;
use crate::config::OtsConfig;
use std::sync::Arc;

/// Submit, upgrade and verify timestamps
pub struct ProofOrchestrator {
    client: Arc<dyn OtsClient>,
    verifier: BitcoinVerifier,
}

impl ProofOrchestrator {
    pub fn new(client: Arc<dyn OtsClient>, block_source: Arc<dyn BlockSource>) -> Self {
        Self {
            client,
            verifier: BitcoinVerifier::new(block_source),
        }
    }

    /// Create an orchestrator talking HTTP to the configured calendars and explorers
    pub fn from_config(config: &OtsConfig) -> Result<Self, AnchorError> {
        let client = OpenTimestampsClient::new(config)?;
        let explorer = EsploraExplorer::new(config)?;
        Ok(Self::new(Arc::new(client), Arc::new(explorer)))
    }

    /// Hash `content` and submit it
    pub async fn submit(&self, content: &[u8]) -> Result<TimestampRecord, AnchorError> {
        self.submit_hash(hash_content(content)).await
    }

    /// Submit a precomputed hash to the first calendar that accepts it
    pub async fn submit_hash(&self, hash: Hash) -> Result<TimestampRecord, AnchorError> {
        let (proof, calendar_url) = self.client.submit(&hash).await?;

        tracing::info!(hash = %hex::encode(hash), calendar_url = %calendar_url, "Timestamp submitted");

        Ok(TimestampRecord {
            state: TimestampState::Submitted,
            proof: Some(proof),
            calendar_url: Some(calendar_url),
            ..TimestampRecord::new(hash)
        })
    }

    /// Submit a hash to every calendar and keep all answers in one proof
    ///
    /// The first calendar to answer is recorded as the primary.
    pub async fn submit_redundant(&self, hash: Hash) -> Result<TimestampRecord, AnchorError> {
        let answers = self.client.submit_all(&hash).await?;

        let calendar_url = answers
            .first()
            .map(|(_, url)| url.clone())
            .ok_or(AnchorError::CalendarUnavailable)?;
        let proofs: Vec<Vec<u8>> = answers.into_iter().map(|(proof, _)| proof).collect();
        let proof = codec::merge(&hash, &proofs)?;

        tracing::info!(
            hash = %hex::encode(hash),
            calendars = proofs.len(),
            "Timestamp submitted to multiple calendars"
        );

        Ok(TimestampRecord {
            state: TimestampState::Submitted,
            proof: Some(proof),
            calendar_url: Some(calendar_url),
            ..TimestampRecord::new(hash)
        })
    }

    /// Try to upgrade a submitted record to a Bitcoin-attested proof
    ///
    /// Records in any state other than `Submitted` are returned unchanged, as
    /// are records no calendar can upgrade yet.
    pub async fn check_and_upgrade(&self, record: &TimestampRecord) -> TimestampRecord {
        if record.state != TimestampState::Submitted {
            return record.clone();
        }

        let Some(upgraded) = self.find_upgrade(record).await else {
            tracing::debug!(hash = %hex::encode(record.hash), "No upgrade available yet");
            return record.clone();
        };

        let report = self.verify_proof(&upgraded, &record.hash).await;

        let mut next = record.clone();
        next.proof = Some(upgraded);
        next.state = TimestampState::Confirmed;

        if let Some((height, time, tx_ref)) = report.result.block() {
            next.block_height = Some(height);
            next.block_time = Some(time);
            next.tx_ref = Some(tx_ref.to_string());
        }

        match &report.result {
            VerificationResult::Confirmed { .. } => {
                next.state = TimestampState::Verified;
                tracing::info!(hash = %hex::encode(record.hash), "Timestamp verified");
            }
            other => {
                tracing::info!(
                    hash = %hex::encode(record.hash),
                    result = ?other,
                    "Timestamp confirmed, verification incomplete"
                );
            }
        }

        next
    }

    /// Upgrade sources in order: recorded calendar, pending-proof continuation, any calendar
    async fn find_upgrade(&self, record: &TimestampRecord) -> Option<Vec<u8>> {
        if let Some(calendar_url) = &record.calendar_url {
            let attempt = self.client.upgrade(&record.hash, calendar_url).await;
            if let Some(proof) = accept_upgrade(attempt, "recorded calendar", &record.hash) {
                return Some(proof);
            }
        }

        if let Some(pending) = &record.proof {
            let attempt = self
                .client
                .upgrade_from_pending_proof(pending, &record.hash)
                .await;
            if let Some(proof) = accept_upgrade(attempt, "pending proof", &record.hash) {
                return Some(proof);
            }
        }

        let attempt = self.client.upgrade_from_any_calendar(&record.hash).await;
        accept_upgrade(attempt, "any calendar", &record.hash)
    }

    /// Verify the proof held by `record` without changing it
    pub async fn verify(&self, record: &TimestampRecord) -> VerificationReport {
        match &record.proof {
            Some(proof) => self.verify_proof(proof, &record.hash).await,
            None => failed_report(&record.hash, "no proof".to_string()),
        }
    }

    /// Verify a serialized proof for `hash`
    pub async fn verify_proof(&self, proof: &[u8], hash: &Hash) -> VerificationReport {
        match codec::parse(proof) {
            Ok(proof) => self.verifier.verify(&proof, hash).await,
            Err(e) => failed_report(hash, format!("invalid proof: {e}")),
        }
    }
}

/// Keep an upgrade attempt only if it produced a parseable, Bitcoin-attested
/// proof for `hash` whose Bitcoin path can be replayed
fn accept_upgrade(
    attempt: Result<Option<Vec<u8>>, AnchorError>,
    route: &str,
    hash: &Hash,
) -> Option<Vec<u8>> {
    let proof = match attempt {
        Ok(proof) => proof?,
        Err(e) => {
            tracing::warn!(hash = %hex::encode(hash), route = route, error = %e, "Upgrade attempt failed");
            return None;
        }
    };

    let parsed = match codec::parse(&proof) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(hash = %hex::encode(hash), route = route, error = %e, "Discarding malformed upgrade");
            return None;
        }
    };

    if parsed.original_hash != *hash {
        tracing::warn!(
            hash = %hex::encode(hash),
            found = %hex::encode(parsed.original_hash),
            route = route,
            "Discarding upgrade for another hash"
        );
        return None;
    }

    let bitcoin = parsed.bitcoin_path()?;
    if let Err(e) = commitment::apply(&bitcoin.operations, hash) {
        tracing::warn!(hash = %hex::encode(hash), route = route, error = %e, "Discarding unverifiable upgrade");
        return None;
    }

    tracing::info!(hash = %hex::encode(hash), route = route, "Proof upgraded");
    Some(proof)
}

fn failed_report(hash: &Hash, reason: String) -> VerificationReport {
    VerificationReport {
        original_hash: *hash,
        operations: Vec::new(),
        result: VerificationResult::Failed { reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchoring::ots::bitcoin::BlockInfo;
    use crate::anchoring::ots::fixtures::{
        bitcoin_attestation_bytes, mock_upgraded_response, TEST_HASH,
    };
    use crate::anchoring::ots::mock::{MockBlockSource, MockOtsClient, UpgradeRoute};

    const HEIGHT: u64 = 800_000;

    /// Block whose merkle root is the commitment of the mock upgraded proof
    fn matching_block() -> BlockInfo {
        let proof = codec::parse(&codec::serialize(&TEST_HASH, &mock_upgraded_response(HEIGHT))).unwrap();
        let computed = commitment::apply(&proof.operations, &TEST_HASH).unwrap();
        BlockInfo {
            height: HEIGHT,
            hash: "blockhash".to_string(),
            merkle_root: hex::encode(computed),
            timestamp: 1_690_168_629,
        }
    }

    fn orchestrator(
        client: MockOtsClient,
        source: MockBlockSource,
    ) -> (ProofOrchestrator, Arc<MockOtsClient>) {
        let client = Arc::new(client);
        (ProofOrchestrator::new(client.clone(), Arc::new(source)), client)
    }

    async fn submitted(orchestrator: &ProofOrchestrator) -> TimestampRecord {
        orchestrator.submit_hash(TEST_HASH).await.unwrap()
    }

    #[tokio::test]
    async fn test_submit_hashes_content() {
        let (orchestrator, client) = orchestrator(MockOtsClient::new(), MockBlockSource::new());

        let record = orchestrator.submit(b"test fixture data").await.unwrap();

        assert_eq!(record.hash, TEST_HASH);
        assert_eq!(record.state, TimestampState::Submitted);
        assert_eq!(record.calendar_url.as_deref(), Some("https://mock.calendar"));
        assert_eq!(codec::parse(record.proof.as_ref().unwrap()).unwrap().original_hash, TEST_HASH);
        assert_eq!(client.submit_calls(), 1);
    }

    #[tokio::test]
    async fn test_submit_failure_propagates() {
        let (orchestrator, _) = orchestrator(MockOtsClient::failing(), MockBlockSource::new());

        let result = orchestrator.submit_hash(TEST_HASH).await;
        assert!(matches!(result, Err(AnchorError::CalendarUnavailable)));
    }

    #[tokio::test]
    async fn test_submit_redundant_merges_calendars() {
        let (orchestrator, _) = orchestrator(MockOtsClient::new(), MockBlockSource::new());

        let record = orchestrator.submit_redundant(TEST_HASH).await.unwrap();
        let proof = codec::parse(record.proof.as_ref().unwrap()).unwrap();

        assert_eq!(record.calendar_url.as_deref(), Some("https://mock.calendar"));
        assert_eq!(
            proof.pending_calendars(),
            vec!["https://mock.calendar", "https://backup.mock.calendar"]
        );
    }

    #[tokio::test]
    async fn test_check_and_upgrade_verifies() {
        let (orchestrator, client) = orchestrator(
            MockOtsClient::with_confirmation(HEIGHT),
            MockBlockSource::new().with_block(matching_block(), vec![]),
        );
        let record = submitted(&orchestrator).await;

        let upgraded = orchestrator.check_and_upgrade(&record).await;

        assert_eq!(upgraded.state, TimestampState::Verified);
        assert_eq!(upgraded.block_height, Some(HEIGHT));
        assert_eq!(upgraded.block_time, Some(1_690_168_629));
        assert_eq!(upgraded.tx_ref.as_deref(), Some("blockhash"));
        assert!(codec::parse(upgraded.proof.as_ref().unwrap()).unwrap().is_complete());
        assert_eq!(client.upgrade_calls(), vec![UpgradeRoute::RecordedCalendar]);
        // input untouched
        assert_eq!(record.state, TimestampState::Submitted);
    }

    #[tokio::test]
    async fn test_check_and_upgrade_falls_through_in_order() {
        let (orchestrator, client) = orchestrator(
            MockOtsClient::upgrading_via(UpgradeRoute::AnyCalendar, HEIGHT),
            MockBlockSource::new().with_block(matching_block(), vec![]),
        );
        let record = submitted(&orchestrator).await;

        let upgraded = orchestrator.check_and_upgrade(&record).await;

        assert_eq!(upgraded.state, TimestampState::Verified);
        assert_eq!(
            client.upgrade_calls(),
            vec![
                UpgradeRoute::RecordedCalendar,
                UpgradeRoute::PendingProof,
                UpgradeRoute::AnyCalendar
            ]
        );
    }

    #[tokio::test]
    async fn test_check_and_upgrade_uses_pending_proof() {
        let (orchestrator, client) = orchestrator(
            MockOtsClient::upgrading_via(UpgradeRoute::PendingProof, HEIGHT),
            MockBlockSource::new().with_block(matching_block(), vec![]),
        );
        let record = submitted(&orchestrator).await;

        let upgraded = orchestrator.check_and_upgrade(&record).await;

        assert_eq!(upgraded.state, TimestampState::Verified);
        assert_eq!(
            client.upgrade_calls(),
            vec![UpgradeRoute::RecordedCalendar, UpgradeRoute::PendingProof]
        );
    }

    #[tokio::test]
    async fn test_check_and_upgrade_nothing_ready_stays_submitted() {
        let (orchestrator, client) = orchestrator(MockOtsClient::new(), MockBlockSource::new());
        let record = submitted(&orchestrator).await;

        let unchanged = orchestrator.check_and_upgrade(&record).await;

        assert_eq!(unchanged, record);
        assert_eq!(client.upgrade_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_check_and_upgrade_block_lookup_fails_stays_confirmed() {
        let (orchestrator, _) = orchestrator(
            MockOtsClient::with_confirmation(HEIGHT),
            MockBlockSource::failing(),
        );
        let record = submitted(&orchestrator).await;

        let upgraded = orchestrator.check_and_upgrade(&record).await;

        assert_eq!(upgraded.state, TimestampState::Confirmed);
        assert!(upgraded.block_height.is_none());
        assert_ne!(upgraded.proof, record.proof);
    }

    #[tokio::test]
    async fn test_check_and_upgrade_unreplayable_proof_stays_submitted() {
        let mut response = vec![0x03];
        response.extend_from_slice(&bitcoin_attestation_bytes(HEIGHT));
        let (orchestrator, client) = orchestrator(
            MockOtsClient::with_upgraded_response(response),
            MockBlockSource::new().with_block(matching_block(), vec![]),
        );
        let record = submitted(&orchestrator).await;

        let unchanged = orchestrator.check_and_upgrade(&record).await;

        assert_eq!(unchanged, record);
        assert_eq!(
            client.upgrade_calls(),
            vec![
                UpgradeRoute::RecordedCalendar,
                UpgradeRoute::PendingProof,
                UpgradeRoute::AnyCalendar,
            ]
        );
    }

    #[test]
    fn test_accept_upgrade_requires_replayable_bitcoin_path() {
        let mut ripemd = vec![0x03];
        ripemd.extend_from_slice(&bitcoin_attestation_bytes(HEIGHT));
        let blob = codec::serialize(&TEST_HASH, &ripemd);
        assert!(accept_upgrade(Ok(Some(blob)), "test", &TEST_HASH).is_none());

        let good = codec::serialize(&TEST_HASH, &mock_upgraded_response(HEIGHT));
        assert_eq!(
            accept_upgrade(Ok(Some(good.clone())), "test", &TEST_HASH),
            Some(good)
        );
    }

    #[test]
    fn test_accept_upgrade_rejects_other_hash() {
        let blob = codec::serialize(&[9u8; 32], &mock_upgraded_response(HEIGHT));
        assert!(accept_upgrade(Ok(Some(blob)), "test", &TEST_HASH).is_none());
    }

    #[test]
    fn test_accept_upgrade_ignores_pending_and_errors() {
        assert!(accept_upgrade(Ok(None), "test", &TEST_HASH).is_none());
        assert!(accept_upgrade(Err(AnchorError::Timeout(30)), "test", &TEST_HASH).is_none());
        assert!(accept_upgrade(Ok(Some(vec![0x00])), "test", &TEST_HASH).is_none());
    }

    #[tokio::test]
    async fn test_check_and_upgrade_partial_fills_block_fields() {
        let mut block = matching_block();
        block.merkle_root = "00".repeat(32);
        let (orchestrator, _) = orchestrator(
            MockOtsClient::with_confirmation(HEIGHT),
            MockBlockSource::new().with_block(block, vec![]),
        );
        let record = submitted(&orchestrator).await;

        let upgraded = orchestrator.check_and_upgrade(&record).await;

        assert_eq!(upgraded.state, TimestampState::Confirmed);
        assert_eq!(upgraded.block_height, Some(HEIGHT));
    }

    #[tokio::test]
    async fn test_check_and_upgrade_ignores_other_states() {
        let (orchestrator, client) = orchestrator(
            MockOtsClient::with_confirmation(HEIGHT),
            MockBlockSource::new(),
        );

        for state in [
            TimestampState::Pending,
            TimestampState::Confirmed,
            TimestampState::Verified,
            TimestampState::Failed {
                message: "x".to_string(),
            },
        ] {
            let record = TimestampRecord {
                state,
                ..TimestampRecord::new(TEST_HASH)
            };
            assert_eq!(orchestrator.check_and_upgrade(&record).await, record);
        }
        assert!(client.upgrade_calls().is_empty());
    }

    #[tokio::test]
    async fn test_verify_pending_record_is_read_only() {
        let (orchestrator, _) = orchestrator(MockOtsClient::new(), MockBlockSource::new());
        let record = submitted(&orchestrator).await;
        let before = record.clone();

        let report = orchestrator.verify(&record).await;

        assert!(matches!(
            report.result,
            VerificationResult::Pending { ref calendar_urls, .. } if calendar_urls == &vec!["https://mock.calendar".to_string()]
        ));
        assert_eq!(record, before);
    }

    #[tokio::test]
    async fn test_verify_without_proof() {
        let (orchestrator, _) = orchestrator(MockOtsClient::new(), MockBlockSource::new());

        let report = orchestrator.verify(&TimestampRecord::new(TEST_HASH)).await;
        assert_eq!(
            report.result,
            VerificationResult::Failed {
                reason: "no proof".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_verify_invalid_proof_bytes() {
        let (orchestrator, _) = orchestrator(MockOtsClient::new(), MockBlockSource::new());

        let report = orchestrator.verify_proof(&[0u8; 8], &TEST_HASH).await;

        match report.result {
            VerificationResult::Failed { reason } => assert!(reason.starts_with("invalid proof")),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_from_config() {
        assert!(ProofOrchestrator::from_config(&OtsConfig::default()).is_ok());
    }
}
