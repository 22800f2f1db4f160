//! OpenTimestamps binary proof format
//!
//! Layout of a detached proof:
//! - magic (31 bytes)
//! - version (1 byte, always 0x01)
//! - file hash operation (1 byte, 0x08 = SHA-256)
//! - file digest (32 bytes)
//! - timestamp
//!
//! A timestamp is `(0xff step)* step`, where a step is either
//! `0x00 tag(8) varbytes(payload)` (an attestation) or an opcode with its
//! operand followed by another timestamp. Calendar servers answer with a bare
//! timestamp, which is appended verbatim after the header.

use crate::anchoring::error::CodecError;
use crate::anchoring::ots::types::{Attestation, Hash, Op, Proof, ProofPath};

/// Detached proof magic
pub const MAGIC: [u8; 31] = *b"\x00OpenTimestamps\x00\x00Proof\x00\xbf\x89\xe2\xe8\x84\xe8\x92\x94";

/// Only supported format version
pub const VERSION: u8 = 0x01;

/// File hash operation for SHA-256
pub const HASH_SHA256: u8 = 0x08;

/// Marker preceding every branch of a fork except the last
pub const FORK: u8 = 0xff;

/// Marker introducing an attestation
pub const ATTESTATION: u8 = 0x00;

pub const BITCOIN_TAG: [u8; 8] = [0x05, 0x88, 0x96, 0x0d, 0x73, 0xd7, 0x19, 0x01];
pub const LITECOIN_TAG: [u8; 8] = [0x06, 0x86, 0x9a, 0x0d, 0x73, 0xd7, 0x1b, 0x45];
pub const PENDING_TAG: [u8; 8] = [0x83, 0xdf, 0xe3, 0x0d, 0x2e, 0xf9, 0x0c, 0x8e];

/// Deepest op/fork nesting accepted by the parser
pub const MAX_DEPTH: usize = 256;

/// Operation bytes the parser may hold across all paths of one proof
///
/// Every path owns a copy of its operations, so a large operand in front of
/// a wide fork is counted once per branch.
pub const MAX_PATH_BYTES: usize = 4 * 1024 * 1024;

/// Append `value` as an unsigned LEB128 varint
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Decode a varint from the front of `bytes`
///
/// Returns the value and the number of bytes consumed.
pub fn decode_varint(bytes: &[u8]) -> Result<(u64, usize), CodecError> {
    let mut reader = Reader::new(bytes);
    let value = reader.read_varint()?;
    Ok((value, reader.pos))
}

fn encode_varbytes(data: &[u8], out: &mut Vec<u8>) {
    encode_varint(data.len() as u64, out);
    out.extend_from_slice(data);
}

/// Byte cursor over an input slice
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    held: usize,
}

/// Memory a path keeps for one of its operations
fn held_bytes(op: &Op) -> usize {
    let payload = match op {
        Op::Append(data) | Op::Prepend(data) => data.len(),
        _ => 0,
    };
    std::mem::size_of::<Op>() + payload
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            held: 0,
        }
    }

    fn peek_u8(&self) -> Result<u8, CodecError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(CodecError::UnexpectedEndOfData)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(CodecError::UnexpectedEndOfData)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::UnexpectedEndOfData);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_varint(&mut self) -> Result<u64, CodecError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            // the tenth byte has room for the top bit only
            if shift == 63 && byte > 0x01 {
                return Err(CodecError::InvalidVarInt);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn read_varbytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| CodecError::UnexpectedEndOfData)?;
        self.read_bytes(len)
    }

    /// Read a timestamp, pushing one path per attestation reached
    ///
    /// `depth` counts the nested timestamps above this one.
    fn read_timestamp(
        &mut self,
        depth: usize,
        prefix: &mut Vec<Op>,
        paths: &mut Vec<ProofPath>,
    ) -> Result<(), CodecError> {
        if depth >= MAX_DEPTH {
            return Err(CodecError::NestingTooDeep);
        }

        let mut tag = self.read_u8()?;
        while tag == FORK {
            let branch_tag = self.read_u8()?;
            self.read_step(branch_tag, depth, prefix, paths)?;
            tag = self.read_u8()?;
        }
        self.read_step(tag, depth, prefix, paths)
    }

    fn read_step(
        &mut self,
        mut tag: u8,
        depth: usize,
        prefix: &mut Vec<Op>,
        paths: &mut Vec<ProofPath>,
    ) -> Result<(), CodecError> {
        loop {
            if tag == ATTESTATION {
                let attestation = self.read_attestation()?;
                self.hold(prefix)?;
                paths.push(ProofPath {
                    operations: prefix.clone(),
                    attestation,
                });
                return Ok(());
            }

            match self.read_op(tag)? {
                Some(op) => {
                    prefix.push(op);
                    let result = self.read_timestamp(depth + 1, prefix, paths);
                    prefix.pop();
                    return result;
                }
                // Unknown opcodes are skipped in place; only a fork after
                // one opens a nested timestamp.
                None if self.peek_u8()? == FORK => {
                    return self.read_timestamp(depth + 1, prefix, paths);
                }
                None => tag = self.read_u8()?,
            }
        }
    }

    /// Account for one more path owning a copy of `prefix`
    fn hold(&mut self, prefix: &[Op]) -> Result<(), CodecError> {
        let bytes: usize = prefix.iter().map(held_bytes).sum();
        self.held = self.held.saturating_add(bytes);
        if self.held > MAX_PATH_BYTES {
            return Err(CodecError::ProofTooLarge);
        }
        Ok(())
    }

    fn read_op(&mut self, opcode: u8) -> Result<Option<Op>, CodecError> {
        let op = match opcode {
            0x08 => Op::Sha256,
            0x02 => Op::Sha1,
            0x03 => Op::Ripemd160,
            0xf0 => Op::Append(self.read_varbytes()?.to_vec()),
            0xf1 => Op::Prepend(self.read_varbytes()?.to_vec()),
            0xf2 => Op::Reverse,
            0xf3 => Op::Hexlify,
            other => {
                tracing::debug!(opcode = other, offset = self.pos - 1, "Skipping unknown opcode");
                return Ok(None);
            }
        };
        Ok(Some(op))
    }

    fn read_attestation(&mut self) -> Result<Attestation, CodecError> {
        let tag: [u8; 8] = self.read_array()?;
        let payload = self.read_varbytes()?;

        let attestation = match tag {
            BITCOIN_TAG => Attestation::Bitcoin {
                height: decode_varint(payload)?.0,
            },
            LITECOIN_TAG => Attestation::Litecoin {
                height: decode_varint(payload)?.0,
            },
            PENDING_TAG => Attestation::Pending {
                uri: decode_pending_uri(payload)?,
            },
            _ => Attestation::Unknown {
                tag,
                payload: payload.to_vec(),
            },
        };
        Ok(attestation)
    }
}

/// Decode the URI inside a pending attestation payload
///
/// Well-formed payloads hold a varbytes URI. Some calendars frame the URI
/// without the inner length; the fallback keeps everything from the first
/// `http` onward.
fn decode_pending_uri(payload: &[u8]) -> Result<String, CodecError> {
    let mut inner = Reader::new(payload);
    if let Ok(uri) = inner.read_varbytes() {
        if inner.remaining() == 0 {
            if let Ok(uri) = std::str::from_utf8(uri) {
                return Ok(uri.to_owned());
            }
        }
    }

    let start = payload
        .windows(4)
        .position(|w| w == b"http")
        .unwrap_or(0);
    std::str::from_utf8(&payload[start..])
        .map(str::to_owned)
        .map_err(|_| CodecError::InvalidUri)
}

/// Parse a detached proof
pub fn parse(bytes: &[u8]) -> Result<Proof, CodecError> {
    let mut reader = Reader::new(bytes);

    if reader.read_bytes(MAGIC.len())? != MAGIC {
        return Err(CodecError::InvalidHeader);
    }

    let version = reader.read_u8()?;
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let hash_type = reader.read_u8()?;
    if hash_type != HASH_SHA256 {
        return Err(CodecError::UnsupportedHashType(hash_type));
    }

    let original_hash: Hash = reader.read_array()?;

    let mut paths = Vec::new();
    reader.read_timestamp(0, &mut Vec::new(), &mut paths)?;

    if reader.remaining() > 0 {
        tracing::debug!(trailing = reader.remaining(), "Ignoring bytes after timestamp");
    }

    Ok(Proof::from_paths(version, original_hash, paths))
}

/// Parse a bare timestamp, as returned by a calendar server
pub fn parse_fragment(bytes: &[u8]) -> Result<Vec<ProofPath>, CodecError> {
    let mut reader = Reader::new(bytes);
    let mut paths = Vec::new();
    reader.read_timestamp(0, &mut Vec::new(), &mut paths)?;
    Ok(paths)
}

fn write_header(hash: &Hash, out: &mut Vec<u8>) {
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.push(HASH_SHA256);
    out.extend_from_slice(hash);
}

/// Wrap a calendar response into a complete proof for `hash`
#[must_use]
pub fn serialize(hash: &Hash, calendar_response: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAGIC.len() + 34 + calendar_response.len());
    write_header(hash, &mut out);
    out.extend_from_slice(calendar_response);
    out
}

/// Wrap a calendar response that continues from `operations` applied to `hash`
#[must_use]
pub fn serialize_with_operations(hash: &Hash, operations: &[Op], calendar_response: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    write_header(hash, &mut out);
    for op in operations {
        encode_op(op, &mut out);
    }
    out.extend_from_slice(calendar_response);
    out
}

/// Re-encode a parsed proof
#[must_use]
pub fn encode(proof: &Proof) -> Vec<u8> {
    let mut out = Vec::new();
    write_header(&proof.original_hash, &mut out);
    let paths: Vec<(&[Op], &Attestation)> = proof
        .paths
        .iter()
        .map(|p| (p.operations.as_slice(), &p.attestation))
        .collect();
    encode_paths(&paths, &mut out);
    out
}

/// Combine several proofs for `hash` into one forked proof
///
/// Proofs for a different hash are skipped. An empty list yields a
/// header-only blob, which does not parse.
pub fn merge(hash: &Hash, proofs: &[Vec<u8>]) -> Result<Vec<u8>, CodecError> {
    let mut paths = Vec::new();
    for blob in proofs {
        let proof = parse(blob)?;
        if proof.original_hash != *hash {
            tracing::debug!(
                expected = %hex::encode(hash),
                found = %hex::encode(proof.original_hash),
                "Skipping proof for another hash"
            );
            continue;
        }
        paths.extend(proof.paths);
    }
    Ok(encode(&Proof::from_paths(VERSION, *hash, paths)))
}

/// Whether raw bytes carry a Bitcoin attestation marker
#[must_use]
pub fn contains_bitcoin_attestation(bytes: &[u8]) -> bool {
    bytes
        .windows(1 + BITCOIN_TAG.len())
        .any(|w| w[0] == ATTESTATION && w[1..] == BITCOIN_TAG)
}

fn encode_op(op: &Op, out: &mut Vec<u8>) {
    out.push(op.tag());
    if let Op::Append(data) | Op::Prepend(data) = op {
        encode_varbytes(data, out);
    }
}

fn encode_attestation(attestation: &Attestation, out: &mut Vec<u8>) {
    out.push(ATTESTATION);
    let mut payload = Vec::new();
    let tag = match attestation {
        Attestation::Bitcoin { height } => {
            encode_varint(*height, &mut payload);
            BITCOIN_TAG
        }
        Attestation::Litecoin { height } => {
            encode_varint(*height, &mut payload);
            LITECOIN_TAG
        }
        Attestation::Pending { uri } => {
            encode_varbytes(uri.as_bytes(), &mut payload);
            PENDING_TAG
        }
        Attestation::Unknown { tag, payload: raw } => {
            payload.extend_from_slice(raw);
            *tag
        }
    };
    out.extend_from_slice(&tag);
    encode_varbytes(&payload, out);
}

enum Step<'a> {
    Attest(&'a Attestation),
    Op(&'a Op, Vec<(&'a [Op], &'a Attestation)>),
}

/// Encode paths as a timestamp, sharing common operation prefixes
fn encode_paths(paths: &[(&[Op], &Attestation)], out: &mut Vec<u8>) {
    let mut steps: Vec<Step<'_>> = Vec::new();
    for &(ops, attestation) in paths {
        match ops.split_first() {
            None => steps.push(Step::Attest(attestation)),
            Some((first, rest)) => {
                let existing = steps
                    .iter()
                    .position(|s| matches!(s, Step::Op(op, _) if *op == first));
                match existing {
                    Some(i) => {
                        if let Step::Op(_, children) = &mut steps[i] {
                            children.push((rest, attestation));
                        }
                    }
                    None => steps.push(Step::Op(first, vec![(rest, attestation)])),
                }
            }
        }
    }

    let last = steps.len().saturating_sub(1);
    for (i, step) in steps.iter().enumerate() {
        if i < last {
            out.push(FORK);
        }
        match step {
            Step::Attest(attestation) => encode_attestation(attestation, out),
            Step::Op(op, children) => {
                encode_op(op, out);
                encode_paths(children, out);
            }
        }
    }
}
