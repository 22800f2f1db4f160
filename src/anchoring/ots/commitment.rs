//! Commitment replay
//!
//! Applies a proof's operations to the original hash to obtain the value an
//! attestation vouches for.

use crate::anchoring::error::CommitmentError;
use crate::anchoring::ots::types::{Hash, Op};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// SHA-256 of raw content
#[must_use]
pub fn hash_content(content: &[u8]) -> Hash {
    Sha256::digest(content).into()
}

/// Apply `operations` in order, starting from `seed`
pub fn apply(operations: &[Op], seed: &[u8]) -> Result<Vec<u8>, CommitmentError> {
    operations
        .iter()
        .try_fold(seed.to_vec(), |msg, op| apply_op(op, msg))
}

/// Apply a single operation
pub fn apply_op(op: &Op, mut msg: Vec<u8>) -> Result<Vec<u8>, CommitmentError> {
    let out = match op {
        Op::Sha256 => Sha256::digest(&msg).to_vec(),
        Op::Sha1 => Sha1::digest(&msg).to_vec(),
        Op::Ripemd160 => return Err(CommitmentError::UnsupportedOperation("ripemd160")),
        Op::Append(data) => {
            msg.extend_from_slice(data);
            msg
        }
        Op::Prepend(data) => {
            let mut out = Vec::with_capacity(data.len() + msg.len());
            out.extend_from_slice(data);
            out.extend_from_slice(&msg);
            out
        }
        Op::Reverse => {
            msg.reverse();
            msg
        }
        Op::Hexlify => hex::encode(&msg).into_bytes(),
    };
    Ok(out)
}
