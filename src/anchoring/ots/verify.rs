//! Bitcoin attestation verification
//!
//! Replays a proof against the original hash and looks the resulting
//! commitment up in the attested block.

use crate::anchoring::ots::bitcoin::{BlockInfo, BlockSource};
use crate::anchoring::ots::commitment;
use crate::anchoring::ots::types::{
    AnchorEvidence, Hash, Op, Proof, VerificationReport, VerificationResult,
};
use std::sync::Arc;

/// Verifies proofs against Bitcoin block data
pub struct BitcoinVerifier {
    source: Arc<dyn BlockSource>,
}

impl BitcoinVerifier {
    #[must_use]
    pub fn new(source: Arc<dyn BlockSource>) -> Self {
        Self { source }
    }

    /// Verify `proof` for `original_hash`
    ///
    /// Never fails: every outcome, including lookup failures, is reported in
    /// the returned [`VerificationResult`].
    pub async fn verify(&self, proof: &Proof, original_hash: &Hash) -> VerificationReport {
        let bitcoin_path = proof.bitcoin_path();
        let operations = bitcoin_path
            .map(|p| p.operations.clone())
            .unwrap_or_else(|| proof.operations.clone());

        let height = bitcoin_path.and_then(|p| p.attestation.bitcoin_height());

        let result = self.check(proof, original_hash, &operations, height).await;

        VerificationReport {
            original_hash: *original_hash,
            operations,
            result,
        }
    }

    async fn check(
        &self,
        proof: &Proof,
        original_hash: &Hash,
        operations: &[Op],
        height: Option<u64>,
    ) -> VerificationResult {
        if proof.original_hash != *original_hash {
            return failed("hash mismatch");
        }

        let computed_hash = match commitment::apply(operations, original_hash) {
            Ok(c) => c,
            Err(e) => return failed(&e.to_string()),
        };

        let Some(height) = height else {
            let calendar_urls = proof.pending_calendars();
            if calendar_urls.is_empty() {
                return failed("no attestation found");
            }
            return VerificationResult::Pending {
                calendar_urls,
                computed_hash,
            };
        };

        let block = match self.source.block_at(height).await {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!(height = height, error = %e, "Could not resolve attested block");
                return failed(&e.to_string());
            }
        };

        match self.find_commitment(&block, &computed_hash).await {
            Some(evidence) => {
                tracing::info!(height = height, evidence = ?evidence, "Attestation confirmed");
                VerificationResult::Confirmed {
                    block_height: height,
                    block_time: block.timestamp,
                    tx_ref: block.hash,
                    computed_hash,
                    evidence,
                }
            }
            None => {
                tracing::info!(height = height, "Block resolved but commitment not found in it");
                VerificationResult::PartiallyVerified {
                    block_height: height,
                    block_time: block.timestamp,
                    tx_ref: block.hash,
                    computed_hash,
                }
            }
        }
    }

    async fn find_commitment(&self, block: &BlockInfo, computed: &[u8]) -> Option<AnchorEvidence> {
        if matches_either_order(computed, &block.merkle_root) {
            return Some(AnchorEvidence::MerkleRoot);
        }

        match self.source.block_txids(block).await {
            Ok(txids) => txids
                .iter()
                .any(|txid| matches_either_order(computed, txid))
                .then_some(AnchorEvidence::Transaction),
            Err(e) => {
                tracing::warn!(height = block.height, error = %e, "Could not fetch block txids");
                None
            }
        }
    }
}

fn failed(reason: &str) -> VerificationResult {
    VerificationResult::Failed {
        reason: reason.to_string(),
    }
}

/// Compare raw bytes with display hex, in either byte order
fn matches_either_order(computed: &[u8], display_hex: &str) -> bool {
    match hex::decode(display_hex.trim()) {
        Ok(bytes) => bytes == computed || bytes.iter().rev().eq(computed.iter()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchoring::ots::codec;
    use crate::anchoring::ots::fixtures::{
        mock_calendar_response, mock_upgraded_response, TEST_HASH,
    };
    use crate::anchoring::ots::mock::MockBlockSource;
    use crate::anchoring::ots::types::{Attestation, ProofPath};

    const HEIGHT: u64 = 800_000;

    fn upgraded_proof() -> Proof {
        codec::parse(&codec::serialize(&TEST_HASH, &mock_upgraded_response(HEIGHT))).unwrap()
    }

    fn commitment_of(proof: &Proof) -> Vec<u8> {
        commitment::apply(&proof.bitcoin_path().unwrap().operations, &TEST_HASH).unwrap()
    }

    fn block(merkle_root: String) -> BlockInfo {
        BlockInfo {
            height: HEIGHT,
            hash: "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054".to_string(),
            merkle_root,
            timestamp: 1_690_168_629,
        }
    }

    fn reversed_hex(bytes: &[u8]) -> String {
        let mut reversed = bytes.to_vec();
        reversed.reverse();
        hex::encode(reversed)
    }

    fn verifier(source: MockBlockSource) -> (BitcoinVerifier, Arc<MockBlockSource>) {
        let source = Arc::new(source);
        (BitcoinVerifier::new(source.clone()), source)
    }

    #[test]
    fn test_matches_either_order() {
        assert!(matches_either_order(&[0x01, 0x02], "0102"));
        assert!(matches_either_order(&[0x01, 0x02], "0201"));
        assert!(matches_either_order(&[0xab], "AB"));
        assert!(!matches_either_order(&[0x01, 0x02], "0103"));
        assert!(!matches_either_order(&[0x01], "zz"));
    }

    #[tokio::test]
    async fn test_pending_only_proof() {
        let url = "https://alice.btc.calendar.opentimestamps.org";
        let proof = codec::parse(&codec::serialize(&TEST_HASH, &mock_calendar_response(url))).unwrap();
        let (verifier, source) = verifier(MockBlockSource::new());

        let report = verifier.verify(&proof, &TEST_HASH).await;

        let expected = commitment::apply(&proof.operations, &TEST_HASH).unwrap();
        assert_eq!(
            report.result,
            VerificationResult::Pending {
                calendar_urls: vec![url.to_string()],
                computed_hash: expected,
            }
        );
        assert_eq!(source.block_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_attestation_found() {
        let proof = Proof::from_paths(
            1,
            TEST_HASH,
            vec![ProofPath {
                operations: vec![Op::Sha256],
                attestation: Attestation::Litecoin { height: 5 },
            }],
        );
        let (verifier, _) = verifier(MockBlockSource::new());

        let report = verifier.verify(&proof, &TEST_HASH).await;

        assert_eq!(
            report.result,
            VerificationResult::Failed {
                reason: "no attestation found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_confirmed_by_merkle_root_display_order() {
        let proof = upgraded_proof();
        let computed = commitment_of(&proof);
        let (verifier, source) =
            verifier(MockBlockSource::new().with_block(block(reversed_hex(&computed)), vec![]));

        let report = verifier.verify(&proof, &TEST_HASH).await;

        match report.result {
            VerificationResult::Confirmed {
                block_height,
                block_time,
                tx_ref,
                computed_hash,
                evidence,
            } => {
                assert_eq!(block_height, HEIGHT);
                assert_eq!(block_time, 1_690_168_629);
                assert!(tx_ref.starts_with("0000"));
                assert_eq!(computed_hash, computed);
                assert_eq!(evidence, AnchorEvidence::MerkleRoot);
            }
            other => panic!("Expected Confirmed, got {:?}", other),
        }
        assert_eq!(report.operations, proof.operations);
        // merkle root matched, txids not needed
        assert_eq!(source.txid_calls(), 0);
    }

    #[tokio::test]
    async fn test_confirmed_by_txid() {
        let proof = upgraded_proof();
        let computed = commitment_of(&proof);
        let txids = vec!["ff".repeat(32), hex::encode(&computed)];
        let (verifier, _) = verifier(MockBlockSource::new().with_block(block("00".repeat(32)), txids));

        let report = verifier.verify(&proof, &TEST_HASH).await;

        assert!(matches!(
            report.result,
            VerificationResult::Confirmed {
                evidence: AnchorEvidence::Transaction,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_partially_verified_when_commitment_not_in_block() {
        let proof = upgraded_proof();
        let (verifier, _) = verifier(
            MockBlockSource::new().with_block(block("00".repeat(32)), vec!["11".repeat(32)]),
        );

        let report = verifier.verify(&proof, &TEST_HASH).await;

        assert!(!report.result.is_confirmed());
        assert!(matches!(
            report.result,
            VerificationResult::PartiallyVerified {
                block_height: HEIGHT,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_block_fetch_failure() {
        let proof = upgraded_proof();
        let (verifier, _) = verifier(MockBlockSource::failing());

        let report = verifier.verify(&proof, &TEST_HASH).await;

        match report.result {
            VerificationResult::Failed { reason } => assert!(reason.contains("800000")),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hash_mismatch() {
        let proof = upgraded_proof();
        let (verifier, source) = verifier(MockBlockSource::new());

        let report = verifier.verify(&proof, &[0u8; 32]).await;

        assert_eq!(
            report.result,
            VerificationResult::Failed {
                reason: "hash mismatch".to_string()
            }
        );
        assert_eq!(source.block_calls(), 0);
    }

    #[tokio::test]
    async fn test_ripemd160_fails_loudly() {
        let proof = Proof::from_paths(
            1,
            TEST_HASH,
            vec![ProofPath {
                operations: vec![Op::Ripemd160],
                attestation: Attestation::Bitcoin { height: HEIGHT },
            }],
        );
        let (verifier, source) = verifier(MockBlockSource::new());

        let report = verifier.verify(&proof, &TEST_HASH).await;

        match report.result {
            VerificationResult::Failed { reason } => assert!(reason.contains("ripemd160")),
            other => panic!("Expected Failed, got {:?}", other),
        }
        assert_eq!(source.block_calls(), 0);
    }

    #[tokio::test]
    async fn test_uses_bitcoin_branch_of_forked_proof() {
        let bitcoin_ops = vec![Op::Append(vec![1]), Op::Sha256];
        let proof = Proof::from_paths(
            1,
            TEST_HASH,
            vec![
                ProofPath {
                    operations: vec![Op::Prepend(vec![2]), Op::Sha256],
                    attestation: Attestation::Pending {
                        uri: "https://a.example".to_string(),
                    },
                },
                ProofPath {
                    operations: bitcoin_ops.clone(),
                    attestation: Attestation::Bitcoin { height: HEIGHT },
                },
            ],
        );
        let computed = commitment::apply(&bitcoin_ops, &TEST_HASH).unwrap();
        let (verifier, _) =
            verifier(MockBlockSource::new().with_block(block(hex::encode(&computed)), vec![]));

        let report = verifier.verify(&proof, &TEST_HASH).await;

        assert!(report.result.is_confirmed());
        assert_eq!(report.operations, bitcoin_ops);
    }
}
