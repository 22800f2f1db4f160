//! ots-engine library exports

pub mod anchoring;
pub mod config;

// Re-exports
pub use anchoring::ots::{
    codec, commitment, Attestation, BitcoinVerifier, EsploraExplorer, Hash, Op,
    OpenTimestampsClient, OtsClient, Proof, ProofOrchestrator, TimestampRecord, TimestampState,
    VerificationReport, VerificationResult,
};
pub use anchoring::{AnchorError, CodecError, CommitmentError};
pub use config::OtsConfig;
