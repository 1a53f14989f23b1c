//! Proof-of-work engine for a multi-algorithm chain.
//!
//! Graph algorithms search a siphash-generated bipartite (or directed) graph
//! for a 42-cycle: edges are bucketed, trimmed of nodes that cannot lie on a
//! cycle, and the survivors are walked by a path-following cycle finder. Hash
//! algorithms compare a double hash of the header to a compact target. All
//! algorithms share one difficulty engine that rescales each algorithm toward
//! its configured share of blocks.
//!
//! ```
//! use cyclepow::{pow, PowConfig, PowType};
//!
//! let config = PowConfig::default();
//! assert!(pow::check_available(PowType::Cuckaroo, &config, 0));
//! assert_eq!(PowType::Cuckaroo.edge_bits_range(), Some((24, 32)));
//! ```

pub mod config;
pub mod cuckoo;
pub mod diff;
mod error;
pub mod miner;
pub mod pow;
pub mod siphash;
pub mod stream;

pub use config::PowConfig;
pub use cuckoo::{GraphSolver, GraphSolverBuilder, Scheme, PROOF_SIZE};
pub use error::{Error, Side, VerifyError};
pub use miner::{mine, Miner, MinerBuilder};
pub use pow::{verify, Pow, PowType, Proof};
pub use stream::CancelToken;
