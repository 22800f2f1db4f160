//! OpenTimestamps protocol engine
//!
//! Proof codec, commitment replay, calendar client, Bitcoin verification and
//! the timestamp lifecycle built on top of them.

pub mod bitcoin;
pub mod calendar;
pub mod client;
pub mod codec;
pub mod commitment;
pub mod orchestrator;
pub mod types;
pub mod verify;

// Test doubles, also available to integration tests and downstream crates
// through the `test-util` feature
#[cfg(any(test, feature = "test-util"))]
pub mod fixtures;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use bitcoin::{BlockInfo, BlockSource, EsploraExplorer};
pub use calendar::{Calendar, HttpCalendar};
pub use client::{OpenTimestampsClient, OtsClient};
pub use orchestrator::ProofOrchestrator;
pub use types::{
    AnchorEvidence, Attestation, Hash, Op, Proof, ProofPath, TimestampRecord, TimestampState,
    VerificationReport, VerificationResult,
};
pub use verify::BitcoinVerifier;
