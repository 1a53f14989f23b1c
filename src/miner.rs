//! Mining front-end: walks header nonces until a proof meets the target.

use crate::config::PowConfig;
use crate::cuckoo::{
    GraphSolverBuilder, DEFAULT_TRIM_ROUNDS, MAX_EDGE_BITS, MIN_MINING_EDGE_BITS, PROOF_SIZE,
};
use crate::diff;
use crate::error::{Error, VerifyError};
use crate::pow::{self, Pow, PowType, Proof};
use crate::stream::{CancelToken, NonceSource, StopFlag};
use derive_builder::Builder;
use flume::{Receiver, Sender, TrySendError};
use num_bigint::{BigInt, BigUint};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info};

/// Nonces a hash worker checks between stop-flag polls.
const HASH_CHUNK: u64 = 1024;

#[derive(Builder, Debug, Clone)]
#[builder(pattern = "owned")]
pub struct Miner {
    pub pow_type: PowType,
    #[builder(default = "crate::cuckoo::default_threads()")]
    pub threads: usize,
    /// Graph size; defaults to the smallest size the algorithm accepts.
    #[builder(default, setter(strip_option))]
    pub edge_bits: Option<u8>,
    #[builder(default)]
    pub start_nonce: u32,
    /// Header nonces to try: graph keys for graph algorithms, hashes otherwise.
    #[builder(default = "1 << 20")]
    pub max_attempts: u64,
    #[builder(default = "DEFAULT_TRIM_ROUNDS")]
    pub trim_rounds: u32,
    #[builder(default)]
    pub cancel: CancelToken,
    /// Attempts made so far.
    #[builder(default)]
    pub progress: Arc<AtomicU64>,
}

impl Miner {
    fn validate(&self) -> Result<(), Error> {
        if self.threads == 0 {
            return Err(Error::InvalidConfig("threads must be >= 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be >= 1".into()));
        }
        if let Some(bits) = self.edge_bits {
            if !self.pow_type.is_graph() {
                return Err(Error::InvalidConfig(format!(
                    "{} does not take edge_bits",
                    self.pow_type
                )));
            }
            if !(MIN_MINING_EDGE_BITS..=MAX_EDGE_BITS).contains(&bits) {
                return Err(Error::InvalidConfig(format!(
                    "edge_bits must be within [{MIN_MINING_EDGE_BITS}, {MAX_EDGE_BITS}]"
                )));
            }
        }
        Ok(())
    }

    fn graph_edge_bits(&self) -> Option<u8> {
        self.edge_bits
            .or_else(|| self.pow_type.edge_bits_range().map(|(min, _)| min))
    }

    /// Search for a pow section completing `header_prefix` at `target_compact`.
    ///
    /// `Ok(None)` when every attempt failed or the search was cancelled.
    pub fn mine(
        &self,
        header_prefix: &[u8],
        target_compact: u32,
        config: &PowConfig,
        height: u64,
    ) -> Result<Option<Pow>, Error> {
        self.validate()?;
        if !pow::check_available(self.pow_type, config, height) {
            return Err(VerifyError::AlgorithmUnavailable(self.pow_type).into());
        }
        self.progress.store(0, Ordering::SeqCst);
        match self.graph_edge_bits() {
            Some(edge_bits) => self.mine_graph(header_prefix, edge_bits, target_compact, config),
            None => self.mine_hash(header_prefix, target_compact, config),
        }
    }

    fn mine_graph(
        &self,
        header_prefix: &[u8],
        edge_bits: u8,
        target_compact: u32,
        config: &PowConfig,
    ) -> Result<Option<Pow>, Error> {
        let min_bits = config
            .min_difficulty(self.pow_type)
            .ok_or(VerifyError::Unsupported(self.pow_type))?;
        let target = diff::compact_to_big(target_compact);
        if target < diff::compact_to_big(min_bits) {
            return Err(VerifyError::TargetTooLow.into());
        }
        let scale = diff::graph_weight(edge_bits);
        let solver = GraphSolverBuilder::default()
            .scheme(self.pow_type.scheme().ok_or(VerifyError::Unsupported(self.pow_type))?)
            .edge_bits(edge_bits)
            .threads(self.threads)
            .trim_rounds(self.trim_rounds)
            .cancel(self.cancel.clone())
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        for attempt in 0..self.max_attempts {
            if self.cancel.is_cancelled() {
                debug!(attempt, "graph mining cancelled");
                return Ok(None);
            }
            self.progress.fetch_add(1, Ordering::Relaxed);
            let mut pow = Pow::Graph {
                pow_type: self.pow_type,
                nonce: self.start_nonce.wrapping_add(attempt as u32),
                proof: Proof {
                    edge_bits,
                    nonces: [0; PROOF_SIZE],
                },
            };
            let key = pow::sip_key(&header_with(header_prefix, &pow))?;
            let Some(nonces) = solver.solve(&key)? else {
                continue;
            };
            if let Pow::Graph { proof, .. } = &mut pow {
                proof.nonces = nonces;
            }
            let hash = self.pow_type.block_hash(&header_with(header_prefix, &pow));
            let achieved = diff::calc_cuckoo_diff(scale, &hash);
            if BigInt::from(achieved) >= target {
                info!(pow_type = %self.pow_type, nonce = pow.nonce(), attempt, "graph proof found");
                return Ok(Some(pow));
            }
            debug!(attempt, "cycle found below target");
        }
        Ok(None)
    }

    fn mine_hash(
        &self,
        header_prefix: &[u8],
        target_compact: u32,
        config: &PowConfig,
    ) -> Result<Option<Pow>, Error> {
        let limit = config
            .hash_limit(self.pow_type)
            .ok_or(VerifyError::Unsupported(self.pow_type))?;
        let target = diff::compact_to_target(target_compact);
        if target.bits() == 0 {
            return Err(VerifyError::TargetTooLow.into());
        }
        if target > limit.pow_limit {
            return Err(VerifyError::TargetAboveLimit.into());
        }

        let start = u64::from(self.start_nonce);
        let end = start.saturating_add(self.max_attempts).min(1 << 32);
        let source = Arc::new(NonceSource::new(start, end));
        let stop = Arc::new(StopFlag::new());
        let prefix: Arc<[u8]> = Arc::from(header_prefix);
        let target = Arc::new(target);
        let (tx, rx): (Sender<u32>, Receiver<u32>) = flume::bounded(self.threads * 2);
        let mut joins = Vec::with_capacity(self.threads);
        for _ in 0..self.threads {
            let job = HashJob {
                pow_type: self.pow_type,
                prefix: prefix.clone(),
                target: target.clone(),
                source: source.clone(),
                stop: stop.clone(),
                cancel: self.cancel.clone(),
                progress: self.progress.clone(),
            };
            let worker_tx = tx.clone();
            joins.push(thread::spawn(move || job.run(worker_tx)));
        }
        drop(tx);

        let found = rx.recv().ok();
        stop.force_stop();
        join_handles(joins);
        Ok(found.map(|nonce| {
            info!(pow_type = %self.pow_type, nonce, "hash proof found");
            Pow::Hash {
                pow_type: self.pow_type,
                nonce,
            }
        }))
    }
}

impl MinerBuilder {
    fn validate(&self) -> Result<(), Error> {
        if self.pow_type.is_none() {
            return Err(Error::InvalidConfig("pow_type must be provided".into()));
        }
        if self.threads == Some(0) {
            return Err(Error::InvalidConfig("threads must be >= 1".into()));
        }
        if self.max_attempts == Some(0) {
            return Err(Error::InvalidConfig("max_attempts must be >= 1".into()));
        }
        Ok(())
    }

    pub fn build_validated(self) -> Result<Miner, Error> {
        self.validate()?;
        let miner = self.build().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        miner.validate()?;
        Ok(miner)
    }
}

struct HashJob {
    pow_type: PowType,
    prefix: Arc<[u8]>,
    target: Arc<BigUint>,
    source: Arc<NonceSource>,
    stop: Arc<StopFlag>,
    cancel: CancelToken,
    progress: Arc<AtomicU64>,
}

impl HashJob {
    fn run(self, tx: Sender<u32>) {
        let mut header = self.prefix.to_vec();
        let base = header.len();
        while !self.stop.should_stop() && !self.cancel.is_cancelled() {
            let Some(range) = self.source.fetch_range(HASH_CHUNK) else {
                break;
            };
            for nonce in range.clone() {
                let nonce = nonce as u32;
                header.truncate(base);
                header.extend_from_slice(&nonce.to_le_bytes());
                header.push(self.pow_type.tag());
                let hash = diff::hash_to_big(&self.pow_type.block_hash(&header));
                if hash > *self.target {
                    continue;
                }
                if self.stop.should_stop() {
                    return;
                }
                match tx.try_send(nonce) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => {
                        self.stop.force_stop();
                        return;
                    }
                }
                self.stop.force_stop();
                return;
            }
            self.progress.fetch_add(range.end - range.start, Ordering::Relaxed);
        }
    }
}

fn header_with(prefix: &[u8], pow: &Pow) -> Vec<u8> {
    let mut header = prefix.to_vec();
    header.extend(pow.to_bytes());
    header
}

fn join_handles(joins: Vec<thread::JoinHandle<()>>) {
    for handle in joins {
        let _ = handle.join();
    }
}

/// Mine with default miner settings for `pow_type`.
pub fn mine(
    pow_type: PowType,
    header_prefix: &[u8],
    target_compact: u32,
    config: &PowConfig,
    height: u64,
    cancel: CancelToken,
) -> Result<Option<Pow>, Error> {
    MinerBuilder::default()
        .pow_type(pow_type)
        .cancel(cancel)
        .build_validated()?
        .mine(header_prefix, target_compact, config, height)
}
