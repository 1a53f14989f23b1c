use crate::pow::PowType;

/// Which endpoint partition a check failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    U,
    V,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::U => write!(f, "U"),
            Side::V => write!(f, "V"),
        }
    }
}

/// Reasons a candidate proof or pow section is rejected.
///
/// None of these are fatal: the caller rejects the block or share and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("proof holds {0} nonces, expected 42")]
    LengthMismatch(usize),
    #[error("nonce {0} exceeds the graph bound")]
    NonceTooLarge(u32),
    #[error("nonces are not strictly ascending at index {0}")]
    NotAscending(usize),
    #[error("edge bits {bits} outside [{min}, {max}]")]
    EdgeBitsOutOfRange { bits: u8, min: u8, max: u8 },
    #[error("{side} endpoints do not xor to zero")]
    EndpointParityMismatch { side: Side },
    #[error("branch in cycle")]
    BranchInCycle,
    #[error("dead end in cycle")]
    DeadEnd,
    #[error("cycle closed after {0} edges")]
    CycleWrongLength(usize),
    #[error("target is zero or negative")]
    TargetTooLow,
    #[error("target is above the algorithm limit")]
    TargetAboveLimit,
    #[error("difficulty is below the required minimum")]
    DifficultyTooLow,
    #[error("block hash is above the target")]
    HashAboveTarget,
    #[error("{0} has no network share at this height")]
    AlgorithmUnavailable(PowType),
    #[error("pow section tagged {found}, expected {expected}")]
    WrongAlgorithm { expected: PowType, found: PowType },
    #[error("{0} does not support this operation")]
    Unsupported(PowType),
    #[error("malformed pow data: {0}")]
    Malformed(&'static str),
}

/// Engine and configuration failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("solver failed: {0}")]
    SolverFailed(String),
    #[error("solver channel closed")]
    ChannelClosed,
    #[error(transparent)]
    Verify(#[from] VerifyError),
}
