//! Algorithm identities, pow-section byte layout and the verification /
//! retargeting entry points shared by every algorithm.

use crate::config::PowConfig;
use crate::cuckoo::{Scheme, PROOF_SIZE};
use crate::diff::{self, ShareRule};
use crate::error::VerifyError;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha3::Keccak256;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

type Blake2b256 = Blake2b<U32>;

/// Bytes of proof data at the end of a graph pow section.
pub const PROOF_DATA_LEN: usize = 1 + 4 * PROOF_SIZE;

/// Graph pow section: tag, nonce, proof data.
pub const GRAPH_POW_LEN: usize = 1 + 4 + PROOF_DATA_LEN;

/// Hash pow section: nonce, tag.
pub const HASH_POW_LEN: usize = 4 + 1;

/// The proof-of-work algorithms a header can carry. Discriminants are the
/// wire tags.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PowType {
    Blake2bd = 0,
    Cuckaroo = 1,
    Cuckatoo = 2,
    Cuckaroom = 3,
    Keccak256 = 6,
}

impl PowType {
    pub const ALL: [PowType; 5] = [
        PowType::Blake2bd,
        PowType::Cuckaroo,
        PowType::Cuckatoo,
        PowType::Cuckaroom,
        PowType::Keccak256,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self, VerifyError> {
        Self::ALL
            .into_iter()
            .find(|t| t.tag() == tag)
            .ok_or(VerifyError::Malformed("unknown pow type tag"))
    }

    pub fn name(self) -> &'static str {
        match self {
            PowType::Blake2bd => "blake2bd",
            PowType::Cuckaroo => "cuckaroo",
            PowType::Cuckatoo => "cuckatoo",
            PowType::Cuckaroom => "cuckaroom",
            PowType::Keccak256 => "keccak256",
        }
    }

    pub fn is_graph(self) -> bool {
        self.scheme().is_some()
    }

    /// Graph scheme, `None` for hash algorithms.
    pub fn scheme(self) -> Option<Scheme> {
        match self {
            PowType::Cuckaroo => Some(Scheme::Lean),
            PowType::Cuckatoo => Some(Scheme::Mean),
            PowType::Cuckaroom => Some(Scheme::Directed),
            PowType::Blake2bd | PowType::Keccak256 => None,
        }
    }

    /// Legal edge bits, inclusive.
    pub fn edge_bits_range(self) -> Option<(u8, u8)> {
        match self {
            PowType::Cuckaroo => Some((24, 32)),
            PowType::Cuckatoo => Some((29, 32)),
            PowType::Cuckaroom => Some((29, 29)),
            PowType::Blake2bd | PowType::Keccak256 => None,
        }
    }

    pub fn share_rule(self) -> ShareRule {
        match self {
            PowType::Blake2bd | PowType::Keccak256 => ShareRule::Hash,
            PowType::Cuckaroo | PowType::Cuckatoo => ShareRule::Balanced,
            PowType::Cuckaroom => ShareRule::Proportional,
        }
    }

    pub fn pow_len(self) -> usize {
        if self.is_graph() {
            GRAPH_POW_LEN
        } else {
            HASH_POW_LEN
        }
    }

    /// Header hash compared against the target.
    pub fn block_hash(self, header: &[u8]) -> [u8; 32] {
        match self {
            PowType::Keccak256 => Keccak256::digest(Keccak256::digest(header)).into(),
            _ => Blake2b256::digest(Blake2b256::digest(header)).into(),
        }
    }
}

impl fmt::Display for PowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PowType {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or(VerifyError::Malformed("unknown pow type name"))
    }
}

/// Siphash key of a graph header: BLAKE2b-256 of everything but the proof data.
pub fn sip_key(header: &[u8]) -> Result<[u8; 32], VerifyError> {
    let keyed = header
        .len()
        .checked_sub(PROOF_DATA_LEN)
        .ok_or(VerifyError::Malformed("header shorter than proof data"))?;
    Ok(Blake2b256::digest(&header[..keyed]).into())
}

/// Edge bits and cycle nonces of a graph solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proof {
    pub edge_bits: u8,
    pub nonces: [u32; PROOF_SIZE],
}

impl Proof {
    pub fn to_bytes(&self) -> [u8; PROOF_DATA_LEN] {
        let mut out = [0u8; PROOF_DATA_LEN];
        out[0] = self.edge_bits;
        for (chunk, nonce) in out[1..].chunks_exact_mut(4).zip(self.nonces) {
            chunk.copy_from_slice(&nonce.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, VerifyError> {
        if data.len() != PROOF_DATA_LEN {
            return Err(VerifyError::Malformed("proof data length"));
        }
        let mut nonces = [0u32; PROOF_SIZE];
        for (nonce, chunk) in nonces.iter_mut().zip(data[1..].chunks_exact(4)) {
            *nonce = le_u32(chunk);
        }
        Ok(Self {
            edge_bits: data[0],
            nonces,
        })
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

/// A decoded pow section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pow {
    Hash { pow_type: PowType, nonce: u32 },
    Graph { pow_type: PowType, nonce: u32, proof: Proof },
}

impl Pow {
    pub fn pow_type(&self) -> PowType {
        match self {
            Pow::Hash { pow_type, .. } | Pow::Graph { pow_type, .. } => *pow_type,
        }
    }

    pub fn nonce(&self) -> u32 {
        match self {
            Pow::Hash { nonce, .. } | Pow::Graph { nonce, .. } => *nonce,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Pow::Hash { pow_type, nonce } => {
                let mut out = nonce.to_le_bytes().to_vec();
                out.push(pow_type.tag());
                out
            }
            Pow::Graph {
                pow_type,
                nonce,
                proof,
            } => {
                let mut out = Vec::with_capacity(GRAPH_POW_LEN);
                out.push(pow_type.tag());
                out.extend_from_slice(&nonce.to_le_bytes());
                out.extend_from_slice(&proof.to_bytes());
                out
            }
        }
    }

    /// Decode the pow section at the end of `header`, laid out for `expected`.
    pub fn from_header(expected: PowType, header: &[u8]) -> Result<Self, VerifyError> {
        let start = header
            .len()
            .checked_sub(expected.pow_len())
            .ok_or(VerifyError::Malformed("header shorter than pow section"))?;
        let section = &header[start..];
        let (tag, nonce) = if expected.is_graph() {
            (section[0], le_u32(&section[1..5]))
        } else {
            (section[4], le_u32(&section[..4]))
        };
        let found = PowType::from_tag(tag)?;
        if found != expected {
            return Err(VerifyError::WrongAlgorithm { expected, found });
        }
        if expected.is_graph() {
            Ok(Pow::Graph {
                pow_type: found,
                nonce,
                proof: Proof::from_bytes(&section[5..])?,
            })
        } else {
            Ok(Pow::Hash {
                pow_type: found,
                nonce,
            })
        }
    }

    pub fn result(&self) -> PowResult {
        let pow_type = self.pow_type();
        PowResult {
            pow_name: pow_type.name().to_owned(),
            pow_type: pow_type.tag(),
            nonce: self.nonce(),
            proof_data: match self {
                Pow::Hash { .. } => None,
                Pow::Graph { proof, .. } => Some(ProofData {
                    edge_bits: proof.edge_bits,
                    circle_nonces: hex::encode(&proof.to_bytes()[1..]),
                }),
            },
        }
    }
}

/// JSON summary of a pow section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowResult {
    pub pow_name: String,
    pub pow_type: u8,
    pub nonce: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_data: Option<ProofData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofData {
    pub edge_bits: u8,
    /// Hex of the 42 little-endian cycle nonces.
    pub circle_nonces: String,
}

/// Whether `pow_type` has a non-zero share at `height`.
pub fn check_available(pow_type: PowType, config: &PowConfig, height: u64) -> bool {
    config.percent_at(height, pow_type) > 0
}

/// Verify the pow section of `header` against `target_compact`.
pub fn verify(
    pow_type: PowType,
    header: &[u8],
    target_compact: u32,
    config: &PowConfig,
    height: u64,
) -> Result<(), VerifyError> {
    if !check_available(pow_type, config, height) {
        return Err(VerifyError::AlgorithmUnavailable(pow_type));
    }
    let result = match Pow::from_header(pow_type, header)? {
        Pow::Hash { .. } => verify_hash(pow_type, header, target_compact, config),
        Pow::Graph { proof, .. } => verify_graph(pow_type, header, &proof, target_compact, config),
    };
    if let Err(err) = &result {
        debug!(%pow_type, %err, "pow rejected");
    }
    result
}

fn verify_hash(
    pow_type: PowType,
    header: &[u8],
    target_compact: u32,
    config: &PowConfig,
) -> Result<(), VerifyError> {
    let limit = config
        .hash_limit(pow_type)
        .ok_or(VerifyError::Unsupported(pow_type))?;
    let target = diff::compact_to_big(target_compact)
        .to_biguint()
        .filter(|t| t.bits() > 0)
        .ok_or(VerifyError::TargetTooLow)?;
    if target > limit.pow_limit {
        return Err(VerifyError::TargetAboveLimit);
    }
    if diff::hash_to_big(&pow_type.block_hash(header)) > target {
        return Err(VerifyError::HashAboveTarget);
    }
    Ok(())
}

fn verify_graph(
    pow_type: PowType,
    header: &[u8],
    proof: &Proof,
    target_compact: u32,
    config: &PowConfig,
) -> Result<(), VerifyError> {
    let (scheme, (min, max), min_bits) =
        match (pow_type.scheme(), pow_type.edge_bits_range(), config.min_difficulty(pow_type)) {
            (Some(s), Some(r), Some(m)) => (s, r, m),
            _ => return Err(VerifyError::Unsupported(pow_type)),
        };
    if proof.edge_bits < min || proof.edge_bits > max {
        return Err(VerifyError::EdgeBitsOutOfRange {
            bits: proof.edge_bits,
            min,
            max,
        });
    }
    scheme.verify(&sip_key(header)?, &proof.nonces, proof.edge_bits)?;
    let target = diff::compact_to_big(target_compact);
    if target < diff::compact_to_big(min_bits) {
        return Err(VerifyError::TargetTooLow);
    }
    let achieved = diff::calc_cuckoo_diff(
        diff::graph_weight(proof.edge_bits),
        &pow_type.block_hash(header),
    );
    if num_bigint::BigInt::from(achieved) < target {
        return Err(VerifyError::DifficultyTooLow);
    }
    Ok(())
}

/// Next difficulty for `pow_type`; see [`diff::next_difficulty`].
pub fn next_difficulty(
    pow_type: PowType,
    weighted_ratio: &BigUint,
    old: &BigUint,
    actual_share: &BigUint,
    config: &PowConfig,
    height: u64,
) -> BigUint {
    diff::next_difficulty(
        pow_type.share_rule(),
        weighted_ratio,
        old,
        actual_share,
        &config.target_share(height, pow_type),
    )
}

/// Clamp a retarget result: hash algorithms cap at their limit, graph
/// algorithms floor at their minimum difficulty.
pub fn safe_diff(pow_type: PowType, candidate: u64, config: &PowConfig) -> BigUint {
    match (config.hash_limit(pow_type), config.min_difficulty(pow_type)) {
        (Some(limit), _) => diff::safe_target(candidate, &limit.pow_limit, limit.pow_limit_bits),
        (None, Some(min_bits)) => diff::safe_difficulty(candidate, min_bits),
        (None, None) => BigUint::from(candidate),
    }
}

/// Whether `new` satisfies `target`: a target is a ceiling for hash
/// algorithms and a difficulty floor for graph algorithms.
pub fn compare_diff(pow_type: PowType, new: &BigUint, target: &BigUint) -> bool {
    if pow_type.is_graph() {
        new >= target
    } else {
        new <= target
    }
}

/// Work a block with compact `bits` contributes.
pub fn calc_work(bits: u32, pow_type: PowType) -> BigUint {
    diff::calc_work(bits, pow_type.is_graph())
}
