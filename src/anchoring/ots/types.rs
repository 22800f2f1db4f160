//! OpenTimestamps proof, verification and lifecycle types

use serde::{Deserialize, Serialize};
use std::fmt;

/// SHA-256 digest of the timestamped content
pub type Hash = [u8; 32];

/// A commitment operation
///
/// Applied in order to the original hash, operations yield the commitment
/// that an attestation vouches for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Sha256,
    Sha1,
    Ripemd160,
    Append(Vec<u8>),
    Prepend(Vec<u8>),
    Reverse,
    Hexlify,
}

impl Op {
    /// Wire opcode
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            Op::Sha256 => 0x08,
            Op::Sha1 => 0x02,
            Op::Ripemd160 => 0x03,
            Op::Append(_) => 0xf0,
            Op::Prepend(_) => 0xf1,
            Op::Reverse => 0xf2,
            Op::Hexlify => 0xf3,
        }
    }

    /// Short lowercase name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Op::Sha256 => "sha256",
            Op::Sha1 => "sha1",
            Op::Ripemd160 => "ripemd160",
            Op::Append(_) => "append",
            Op::Prepend(_) => "prepend",
            Op::Reverse => "reverse",
            Op::Hexlify => "hexlify",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Append(data) | Op::Prepend(data) => {
                write!(f, "{} {}", self.name(), hex::encode(data))
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// An attestation terminating a proof path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attestation {
    /// Commitment is the merkle root of the Bitcoin block at `height`
    Bitcoin { height: u64 },

    /// Commitment is the merkle root of the Litecoin block at `height`
    Litecoin { height: u64 },

    /// Calendar promised to anchor the commitment later
    Pending { uri: String },

    /// Attestation type this engine does not understand
    Unknown { tag: [u8; 8], payload: Vec<u8> },
}

impl Attestation {
    /// Bitcoin block height, if this is a Bitcoin attestation
    #[must_use]
    pub fn bitcoin_height(&self) -> Option<u64> {
        match self {
            Attestation::Bitcoin { height } => Some(*height),
            _ => None,
        }
    }

    /// Calendar URI, if this is a pending attestation
    #[must_use]
    pub fn pending_uri(&self) -> Option<&str> {
        match self {
            Attestation::Pending { uri } => Some(uri),
            _ => None,
        }
    }
}

impl fmt::Display for Attestation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attestation::Bitcoin { height } => write!(f, "bitcoin block {height}"),
            Attestation::Litecoin { height } => write!(f, "litecoin block {height}"),
            Attestation::Pending { uri } => write!(f, "pending at {uri}"),
            Attestation::Unknown { tag, payload } => write!(
                f,
                "unknown attestation {} ({} bytes)",
                hex::encode(tag),
                payload.len()
            ),
        }
    }
}

/// One root-to-attestation path through a (possibly forked) proof
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPath {
    pub operations: Vec<Op>,
    pub attestation: Attestation,
}

/// Parsed OpenTimestamps proof
///
/// `operations` is the first path through the proof; `attestations` holds
/// every attestation in stream order. Forked proofs keep all their paths in
/// `paths`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub version: u8,
    pub original_hash: Hash,
    pub operations: Vec<Op>,
    pub attestations: Vec<Attestation>,
    pub paths: Vec<ProofPath>,
}

impl Proof {
    /// Build a proof from its paths
    #[must_use]
    pub fn from_paths(version: u8, original_hash: Hash, paths: Vec<ProofPath>) -> Self {
        let operations = paths
            .first()
            .map(|p| p.operations.clone())
            .unwrap_or_default();
        let attestations = paths.iter().map(|p| p.attestation.clone()).collect();

        Self {
            version,
            original_hash,
            operations,
            attestations,
            paths,
        }
    }

    /// First path that ends in a Bitcoin attestation
    #[must_use]
    pub fn bitcoin_path(&self) -> Option<&ProofPath> {
        self.paths
            .iter()
            .find(|p| p.attestation.bitcoin_height().is_some())
    }

    /// Paths that end in a pending attestation
    pub fn pending_paths(&self) -> impl Iterator<Item = &ProofPath> {
        self.paths
            .iter()
            .filter(|p| p.attestation.pending_uri().is_some())
    }

    /// Distinct pending calendar URLs, in stream order
    #[must_use]
    pub fn pending_calendars(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for uri in self.attestations.iter().filter_map(Attestation::pending_uri) {
            if !urls.iter().any(|u| u == uri) {
                urls.push(uri.to_string());
            }
        }
        urls
    }

    /// Whether the proof carries a Bitcoin attestation
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.attestations
            .iter()
            .any(|a| a.bitcoin_height().is_some())
    }
}

impl fmt::Display for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "version {}", self.version)?;
        writeln!(f, "file sha256 {}", hex::encode(self.original_hash))?;
        for (i, path) in self.paths.iter().enumerate() {
            writeln!(f, "path {}:", i)?;
            for op in &path.operations {
                writeln!(f, "  {op}")?;
            }
            writeln!(f, "  -> {}", path.attestation)?;
        }
        Ok(())
    }
}

/// How a Bitcoin attestation was matched against the block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorEvidence {
    /// Commitment equals the block merkle root
    MerkleRoot,
    /// Commitment equals a transaction id in the block
    Transaction,
}

/// Outcome of verifying a proof against the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationResult {
    /// Commitment found in the attested Bitcoin block
    Confirmed {
        block_height: u64,
        block_time: u64,
        tx_ref: String,
        #[serde(with = "hex::serde")]
        computed_hash: Vec<u8>,
        evidence: AnchorEvidence,
    },

    /// Block resolved, but the commitment was not matched inside it
    PartiallyVerified {
        block_height: u64,
        block_time: u64,
        tx_ref: String,
        #[serde(with = "hex::serde")]
        computed_hash: Vec<u8>,
    },

    /// No Bitcoin attestation yet; calendars still hold the commitment
    Pending {
        calendar_urls: Vec<String>,
        #[serde(with = "hex::serde")]
        computed_hash: Vec<u8>,
    },

    Failed {
        reason: String,
    },
}

impl VerificationResult {
    /// Fully confirmed against block data
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, VerificationResult::Confirmed { .. })
    }

    /// Block height and time when a block was resolved
    #[must_use]
    pub fn block(&self) -> Option<(u64, u64, &str)> {
        match self {
            VerificationResult::Confirmed {
                block_height,
                block_time,
                tx_ref,
                ..
            }
            | VerificationResult::PartiallyVerified {
                block_height,
                block_time,
                tx_ref,
                ..
            } => Some((*block_height, *block_time, tx_ref.as_str())),
            _ => None,
        }
    }
}

/// Verification result plus the proof details needed to display it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    #[serde(with = "hex::serde")]
    pub original_hash: Hash,
    pub operations: Vec<Op>,
    pub result: VerificationResult,
}

/// Lifecycle of a timestamped item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TimestampState {
    /// Hash computed, nothing submitted yet
    Pending,
    /// Incomplete proof obtained from a calendar
    Submitted,
    /// Proof carries a Bitcoin attestation
    Confirmed,
    /// Bitcoin attestation checked against block data
    Verified,
    Failed { message: String },
}

/// Externally stored item driven through the lifecycle by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRecord {
    #[serde(with = "hex::serde")]
    pub hash: Hash,
    pub state: TimestampState,
    pub proof: Option<Vec<u8>>,
    pub calendar_url: Option<String>,
    pub block_height: Option<u64>,
    pub block_time: Option<u64>,
    pub tx_ref: Option<String>,
}

impl TimestampRecord {
    /// New record for a freshly computed hash
    #[must_use]
    pub fn new(hash: Hash) -> Self {
        Self {
            hash,
            state: TimestampState::Pending,
            proof: None,
            calendar_url: None,
            block_height: None,
            block_time: None,
            tx_ref: None,
        }
    }
}
