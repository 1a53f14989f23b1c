//! Cuckoo Cycle graph proof of work.
//!
//! Mining runs build → trim → solve → recover on one siphash key. The lean
//! and mean schemes share the bucket pipeline in [`graph`] and [`trim`]; the
//! directed scheme trims with a port bitmap in [`directed`]. All three share
//! the path-following [`solver`].

mod directed;
mod graph;
mod solver;
mod trim;
pub mod verify;

use crate::error::VerifyError;
use crate::siphash::{key_words, SipState};
use crate::stream::CancelToken;
use derive_builder::Builder;
use tracing::{debug, trace};

use trim::NodeRule;

/// Number of edges in a proof cycle.
pub const PROOF_SIZE: usize = 42;

/// Longest chain the solver follows before abandoning an edge.
pub const MAX_PATH: usize = 8192;

/// Smallest graph the bucket pipeline can lay out.
pub const MIN_MINING_EDGE_BITS: u8 = 12;

/// Largest supported graph.
pub const MAX_EDGE_BITS: u8 = 32;

/// Trimming rounds before the final rename, matching the lean reference schedule.
pub const DEFAULT_TRIM_ROUNDS: u32 = 65;

/// Sizes and masks derived from the edge bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub edge_bits: u32,
    pub edge_mask: u64,
    /// Highest nonce the lean and mean verifiers accept: half the node count.
    pub easiness: u64,
    /// Bits below the two bucket coordinates.
    pub zbits: u32,
}

impl Geometry {
    pub fn new(edge_bits: u8) -> Self {
        let edge_bits = u32::from(edge_bits);
        let nedge = 1u64 << edge_bits;
        Self {
            edge_bits,
            edge_mask: nedge - 1,
            easiness: 2 * nedge * 50 / 100,
            zbits: edge_bits.saturating_sub(2 * graph::XBITS),
        }
    }

    /// Geometry for an untrusted size: anything outside `1..=MAX_EDGE_BITS`
    /// is rejected instead of overflowing the masks.
    pub fn checked(edge_bits: u8) -> Result<Self, VerifyError> {
        if edge_bits == 0 || edge_bits > MAX_EDGE_BITS {
            return Err(VerifyError::EdgeBitsOutOfRange {
                bits: edge_bits,
                min: 1,
                max: MAX_EDGE_BITS,
            });
        }
        Ok(Self::new(edge_bits))
    }

    /// Nonces the miner enumerates.
    pub fn edge_count(&self) -> u64 {
        self.edge_mask + 1
    }
}

/// Endpoint derivation and cycle rule of a graph algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Bipartite graph, nodes matched on equal values.
    Lean,
    /// Bipartite graph, node `x` matched with its partner `x ^ 1`.
    Mean,
    /// Monopartite directed graph from chained siphash blocks.
    Directed,
}

impl Scheme {
    /// Check a claimed cycle for `key`.
    pub fn verify(self, key: &[u8; 32], nonces: &[u32], edge_bits: u8) -> Result<(), VerifyError> {
        match self {
            Scheme::Lean => verify::verify_lean(&SipState::from_key(key), nonces, edge_bits),
            Scheme::Mean => verify::verify_mean(&SipState::from_key(key), nonces, edge_bits),
            Scheme::Directed => verify::verify_directed(key_words(key), nonces, edge_bits),
        }
    }

    fn node_rule(self) -> NodeRule {
        match self {
            Scheme::Lean => NodeRule::Degree,
            Scheme::Mean | Scheme::Directed => NodeRule::Partner,
        }
    }
}

/// One mining attempt per key: builds, trims and searches a graph.
#[derive(Builder, Debug, Clone)]
#[builder(pattern = "owned")]
pub struct GraphSolver {
    pub scheme: Scheme,
    pub edge_bits: u8,
    #[builder(default = "default_threads()")]
    pub threads: usize,
    #[builder(default = "DEFAULT_TRIM_ROUNDS")]
    pub trim_rounds: u32,
    #[builder(default)]
    pub cancel: CancelToken,
}

pub(crate) fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(graph::NX)
}

impl GraphSolver {
    fn validate(&self) -> Result<(), crate::Error> {
        if self.threads == 0 {
            return Err(crate::Error::InvalidConfig("threads must be >= 1".into()));
        }
        let min = match self.scheme {
            Scheme::Directed => 7,
            _ => MIN_MINING_EDGE_BITS,
        };
        if self.edge_bits < min || self.edge_bits > MAX_EDGE_BITS {
            return Err(crate::Error::InvalidConfig(format!(
                "edge_bits must be within [{min}, {MAX_EDGE_BITS}]"
            )));
        }
        Ok(())
    }

    /// Search the graph of `key` for a 42-cycle.
    ///
    /// `Ok(None)` is the common outcome: no cycle, or cancelled.
    pub fn solve(&self, key: &[u8; 32]) -> Result<Option<[u32; PROOF_SIZE]>, crate::Error> {
        self.validate()?;
        let threads = self.threads.min(graph::NX);
        let found = match self.scheme {
            Scheme::Lean | Scheme::Mean => self.solve_bucketed(key, threads),
            Scheme::Directed => directed::solve(
                key_words(key),
                self.edge_bits,
                threads,
                self.trim_rounds,
                &self.cancel,
            ),
        };
        Ok(found)
    }

    fn solve_bucketed(&self, key: &[u8; 32], threads: usize) -> Option<[u32; PROOF_SIZE]> {
        let sip = SipState::from_key(key);
        let geo = Geometry::new(self.edge_bits);
        let rule = self.scheme.node_rule();
        let mut matrix = graph::build_u(&sip, &geo, threads);
        graph::build_v(&mut matrix, &sip, &geo, rule, threads);
        debug!(edges = matrix.len(), "graph built");
        if self.cancel.is_cancelled() {
            return None;
        }
        let trimmed = trim::Trimmer::new(geo, rule, threads, self.trim_rounds)
            .run(matrix, &self.cancel)?;
        let mut finder = solver::CycleFinder::new(trim::SOLVER_NODES);
        for uv in trimmed.matrix.entries() {
            let u = (rule.solver_node(uv >> 32) << 1) as u32;
            let v = ((rule.solver_node(uv & 0xffff_ffff) << 1) | 1) as u32;
            let cycle = match finder.add_edge(u, v) {
                solver::Closure::Cycle(cycle) => cycle,
                solver::Closure::Abandoned => {
                    trace!(u, v, "path too long, edge skipped");
                    continue;
                }
                solver::Closure::OtherLength(len) => {
                    trace!(len, "cycle of other length");
                    continue;
                }
                solver::Closure::Linked => continue,
            };
            debug!("42-cycle found");
            if self.cancel.is_cancelled() {
                return None;
            }
            let Some(edges) = trimmed.original_edges(&cycle) else {
                continue;
            };
            let nonces = solver::recover_nonces(&sip, &geo, rule, &edges, threads, &self.cancel);
            let Ok(proof) = <[u32; PROOF_SIZE]>::try_from(nonces.as_slice()) else {
                debug!(found = nonces.len(), "cycle nonces not recovered");
                continue;
            };
            match self.scheme.verify(key, &proof, self.edge_bits) {
                Ok(()) => return Some(proof),
                Err(err) => debug!(%err, "recovered cycle rejected"),
            }
        }
        None
    }
}
