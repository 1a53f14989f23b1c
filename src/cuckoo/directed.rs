//! Directed scheme: port-bitmap trimming and cycle search.
//!
//! Edge `n` runs `from -> to`. A node has an out port `2·node` and an in port
//! `2·node + 1`. An edge can only lie on a directed cycle when its tail has an
//! incoming edge and its head an outgoing one, so each round marks every port
//! used by a live edge and kills edges whose partner ports are unmarked.

use super::verify::verify_directed;
use super::{Geometry, PROOF_SIZE};
use crate::siphash::{sip_block_all, BLOCK_SIZE};
use crate::stream::{CancelToken, NonceSource};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use tracing::debug;

const ROT_E: u32 = 21;

fn endpoints(edge: u64, node_mask: u64) -> (u64, u64) {
    (edge & node_mask, (edge >> 32) & node_mask)
}

fn mark(bits: &[AtomicU64], port: u64) {
    bits[(port >> 6) as usize].fetch_or(1 << (port & 63), Ordering::Relaxed);
}

fn marked(bits: &[AtomicU64], port: u64) -> bool {
    bits[(port >> 6) as usize].load(Ordering::Relaxed) & (1 << (port & 63)) != 0
}

/// Live-edge bitmap after up to `rounds` trimming rounds. `None` when the
/// graph trims away or `cancel` fires.
pub(super) fn trim(
    keys: [u64; 4],
    geo: &Geometry,
    threads: usize,
    rounds: u32,
    cancel: &CancelToken,
) -> Option<Vec<u64>> {
    let node_mask = geo.edge_mask >> 1;
    let words = (geo.edge_count() / BLOCK_SIZE) as usize;
    let per = words.div_ceil(threads.max(1));
    let mut alive = vec![u64::MAX; words];
    let ports: Vec<AtomicU64> = (0..words).map(|_| AtomicU64::new(0)).collect();
    let mut live = geo.edge_count();

    for round in 0..rounds {
        if cancel.is_cancelled() {
            return None;
        }
        ports.iter().for_each(|w| w.store(0, Ordering::Relaxed));
        thread::scope(|s| {
            for (c, chunk) in alive.chunks(per).enumerate() {
                let ports = &ports;
                s.spawn(move || {
                    for (i, &word) in chunk.iter().enumerate() {
                        if word == 0 {
                            continue;
                        }
                        let start = ((c * per + i) as u64) * BLOCK_SIZE;
                        let block = sip_block_all(keys, start, ROT_E, true);
                        for (bit, &edge) in block.iter().enumerate() {
                            if word & (1 << bit) != 0 {
                                let (from, to) = endpoints(edge, node_mask);
                                mark(ports, from << 1);
                                mark(ports, (to << 1) | 1);
                            }
                        }
                    }
                });
            }
        });
        let counts: Vec<u64> = thread::scope(|s| {
            let handles: Vec<_> = alive
                .chunks_mut(per)
                .enumerate()
                .map(|(c, chunk)| {
                    let ports = &ports;
                    s.spawn(move || {
                        let mut count = 0u64;
                        for (i, word) in chunk.iter_mut().enumerate() {
                            if *word == 0 {
                                continue;
                            }
                            let start = ((c * per + i) as u64) * BLOCK_SIZE;
                            let block = sip_block_all(keys, start, ROT_E, true);
                            for (bit, &edge) in block.iter().enumerate() {
                                if *word & (1 << bit) == 0 {
                                    continue;
                                }
                                let (from, to) = endpoints(edge, node_mask);
                                if from == 0
                                    || !marked(ports, (from << 1) | 1)
                                    || !marked(ports, to << 1)
                                {
                                    *word &= !(1 << bit);
                                }
                            }
                            count += u64::from(word.count_ones());
                        }
                        count
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(count) => count,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });
        let now: u64 = counts.iter().sum();
        debug!(round, live = now, "directed trim round");
        if now == 0 {
            return None;
        }
        if now == live {
            break;
        }
        live = now;
    }
    Some(alive)
}

/// Steps of one depth-first search before moving to the next start node.
const SEARCH_BUDGET: u64 = 1 << 20;

/// Start nodes tried per graph.
const MAX_STARTS: u64 = 1024;

const UNREACHED: u32 = u32::MAX;

/// Surviving edges over dense node ids, indexed both by tail and by head.
struct Digraph {
    tails: Vec<u32>,
    heads: Vec<u32>,
    nonces: Vec<u32>,
    out_start: Vec<u32>,
    out_edges: Vec<u32>,
    in_start: Vec<u32>,
    in_edges: Vec<u32>,
}

/// Compressed adjacency: edges grouped by `keys[edge]`, in edge order.
fn adjacency(nodes: usize, keys: &[u32]) -> (Vec<u32>, Vec<u32>) {
    let mut start = vec![0u32; nodes + 1];
    for &k in keys {
        start[k as usize + 1] += 1;
    }
    for i in 0..nodes {
        start[i + 1] += start[i];
    }
    let mut fill = start.clone();
    let mut edges = vec![0u32; keys.len()];
    for (e, &k) in keys.iter().enumerate() {
        let slot = &mut fill[k as usize];
        edges[*slot as usize] = e as u32;
        *slot += 1;
    }
    (start, edges)
}

impl Digraph {
    fn new(tails: Vec<u32>, heads: Vec<u32>, nonces: Vec<u32>) -> Self {
        let nodes = tails.iter().chain(&heads).max().map_or(0, |&n| n as usize + 1);
        let (out_start, out_edges) = adjacency(nodes, &tails);
        let (in_start, in_edges) = adjacency(nodes, &heads);
        Self {
            tails,
            heads,
            nonces,
            out_start,
            out_edges,
            in_start,
            in_edges,
        }
    }

    /// Replay the live edges of `alive`, renaming nodes densely in order of
    /// first appearance.
    fn from_alive(keys: [u64; 4], alive: &[u64], node_mask: u64) -> Self {
        let mut ids: HashMap<u64, u32> = HashMap::new();
        let (mut tails, mut heads, mut nonces) = (Vec::new(), Vec::new(), Vec::new());
        for (w, &word) in alive.iter().enumerate() {
            if word == 0 {
                continue;
            }
            let start = w as u64 * BLOCK_SIZE;
            let block = sip_block_all(keys, start, ROT_E, true);
            for (bit, &edge) in block.iter().enumerate() {
                if word & (1 << bit) == 0 {
                    continue;
                }
                let (from, to) = endpoints(edge, node_mask);
                let next = ids.len() as u32;
                tails.push(*ids.entry(from).or_insert(next));
                let next = ids.len() as u32;
                heads.push(*ids.entry(to).or_insert(next));
                nonces.push((start + bit as u64) as u32);
            }
        }
        Self::new(tails, heads, nonces)
    }

    fn nodes(&self) -> usize {
        self.out_start.len().saturating_sub(1)
    }

    fn outgoing(&self, node: u32) -> &[u32] {
        let n = node as usize;
        &self.out_edges[self.out_start[n] as usize..self.out_start[n + 1] as usize]
    }

    fn incoming(&self, node: u32) -> &[u32] {
        let n = node as usize;
        &self.in_edges[self.in_start[n] as usize..self.in_start[n + 1] as usize]
    }

    /// Fewest steps from every node to `target`, explored up to the proof
    /// length; farther nodes stay `UNREACHED`.
    fn distances_to(&self, target: u32, dist: &mut Vec<u32>) {
        dist.clear();
        dist.resize(self.nodes(), UNREACHED);
        dist[target as usize] = 0;
        let mut queue = VecDeque::from([target]);
        while let Some(node) = queue.pop_front() {
            let d = dist[node as usize] + 1;
            if d as usize >= PROOF_SIZE {
                continue;
            }
            for &e in self.incoming(node) {
                let tail = self.tails[e as usize];
                if dist[tail as usize] == UNREACHED {
                    dist[tail as usize] = d;
                    queue.push_back(tail);
                }
            }
        }
    }

    /// Depth-first search along edge directions for a simple cycle of
    /// exactly `PROOF_SIZE` edges through `start`. Branches that cannot get
    /// back to `start` in the remaining steps are cut using `dist`.
    /// Returns the cycle's edges in walk order.
    fn cycle_through(
        &self,
        start: u32,
        dist: &[u32],
        on_path: &mut [bool],
        budget: u64,
    ) -> Option<Vec<u32>> {
        let mut path: Vec<u32> = Vec::with_capacity(PROOF_SIZE);
        let mut stack: Vec<(u32, usize)> = vec![(start, 0)];
        on_path[start as usize] = true;
        let mut visits = 0u64;
        let mut found = false;
        while let Some(top) = stack.last_mut() {
            let (node, cursor) = *top;
            let outs = self.outgoing(node);
            if cursor == outs.len() {
                stack.pop();
                on_path[node as usize] = false;
                path.pop();
                continue;
            }
            top.1 += 1;
            let edge = outs[cursor];
            let next = self.heads[edge as usize];
            let depth = path.len() + 1;
            if next == start {
                if depth == PROOF_SIZE {
                    path.push(edge);
                    found = true;
                    break;
                }
                continue;
            }
            if depth >= PROOF_SIZE
                || on_path[next as usize]
                || dist[next as usize].saturating_add(depth as u32) > PROOF_SIZE as u32
            {
                continue;
            }
            visits += 1;
            if visits > budget {
                break;
            }
            on_path[next as usize] = true;
            path.push(edge);
            stack.push((next, 0));
        }
        for &(node, _) in &stack {
            on_path[node as usize] = false;
        }
        found.then_some(path)
    }

    /// Try start nodes in id order across `threads` workers. The verified
    /// cycle through the lowest start id wins, so the result does not depend
    /// on the worker count.
    fn search(
        &self,
        keys: [u64; 4],
        edge_bits: u8,
        threads: usize,
        cancel: &CancelToken,
    ) -> Option<[u32; PROOF_SIZE]> {
        let source = NonceSource::new(0, (self.nodes() as u64).min(MAX_STARTS));
        let best: Mutex<Option<(u64, [u32; PROOF_SIZE])>> = Mutex::new(None);
        thread::scope(|s| {
            for _ in 0..threads.max(1) {
                s.spawn(|| {
                    let mut dist = Vec::new();
                    let mut on_path = vec![false; self.nodes()];
                    while let Some(start) = source.fetch() {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let beaten = best
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .as_ref()
                            .is_some_and(|(at, _)| *at < start);
                        if beaten {
                            return;
                        }
                        self.distances_to(start as u32, &mut dist);
                        let Some(edges) =
                            self.cycle_through(start as u32, &dist, &mut on_path, SEARCH_BUDGET)
                        else {
                            continue;
                        };
                        let mut nonces: Vec<u32> =
                            edges.iter().map(|&e| self.nonces[e as usize]).collect();
                        nonces.sort_unstable();
                        let Ok(proof) = <[u32; PROOF_SIZE]>::try_from(nonces.as_slice()) else {
                            continue;
                        };
                        if let Err(err) = verify_directed(keys, &proof, edge_bits) {
                            debug!(%err, start, "directed cycle rejected");
                            continue;
                        }
                        debug!(start, "directed 42-cycle found");
                        let mut slot = best.lock().unwrap_or_else(PoisonError::into_inner);
                        if slot.as_ref().map_or(true, |(at, _)| start < *at) {
                            *slot = Some((start, proof));
                        }
                        return;
                    }
                });
            }
        });
        best.into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|(_, proof)| proof)
    }
}

/// Search the trimmed directed graph for a 42-cycle that follows edge
/// directions.
pub(super) fn solve(
    keys: [u64; 4],
    edge_bits: u8,
    threads: usize,
    rounds: u32,
    cancel: &CancelToken,
) -> Option<[u32; PROOF_SIZE]> {
    let geo = Geometry::new(edge_bits);
    let alive = trim(keys, &geo, threads, rounds, cancel)?;
    let graph = Digraph::from_alive(keys, &alive, geo.edge_mask >> 1);
    debug!(edges = graph.nonces.len(), nodes = graph.nodes(), "directed graph compacted");
    graph.search(keys, edge_bits, threads, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_19: [u64; 4] = [
        0xdb7896f799c76dab,
        0x352e8bf25df7a723,
        0xf0aa29cbb1150ea6,
        0x3206c2759f41cbd5,
    ];

    const SOL_19: [u32; 6] = [0x0413c, 0x05121, 0x0546e, 0x1293a, 0x66540, 0x7d9dc];

    #[test]
    fn trimming_keeps_cycle_edges() {
        let geo = Geometry::new(19);
        let alive = trim(KEY_19, &geo, 4, 12, &CancelToken::default()).expect("core survives");
        for n in SOL_19 {
            assert_ne!(alive[(n / 64) as usize] & (1 << (n % 64)), 0, "edge {n:#x} trimmed");
        }
        let live: u32 = alive.iter().map(|w| w.count_ones()).sum();
        assert!(u64::from(live) < geo.edge_count() / 2);
    }

    #[test]
    fn trimming_is_independent_of_worker_count() {
        let geo = Geometry::new(14);
        let cancel = CancelToken::default();
        assert_eq!(
            trim([1, 2, 3, 4], &geo, 1, 8, &cancel),
            trim([1, 2, 3, 4], &geo, 5, 8, &cancel)
        );
    }

    fn ring(len: u32, extra: &[(u32, u32)]) -> Digraph {
        let mut tails: Vec<u32> = (0..len).collect();
        let mut heads: Vec<u32> = (0..len).map(|i| (i + 1) % len).collect();
        for &(a, b) in extra {
            tails.push(a);
            heads.push(b);
        }
        let nonces = (0..tails.len() as u32).map(|e| e * 3 + 1).collect();
        Digraph::new(tails, heads, nonces)
    }

    fn search_from_zero(graph: &Digraph) -> Option<Vec<u32>> {
        let mut dist = Vec::new();
        let mut on_path = vec![false; graph.nodes()];
        graph.distances_to(0, &mut dist);
        let found = graph.cycle_through(0, &dist, &mut on_path, 1 << 16);
        assert!(on_path.iter().all(|&b| !b));
        found
    }

    #[test]
    fn search_follows_edge_directions() {
        // shortcuts and back edges must not derail the walk
        let graph = ring(PROOF_SIZE as u32, &[(5, 30), (30, 5), (7, 3)]);
        let edges = search_from_zero(&graph).expect("ring closes");
        assert_eq!(edges, (0..PROOF_SIZE as u32).collect::<Vec<_>>());

        assert_eq!(search_from_zero(&ring(41, &[])), None);

        // alternating directions: an undirected 42-cycle with no directed one
        let tails: Vec<u32> = (0..42).map(|i| if i % 2 == 0 { i } else { (i + 1) % 42 }).collect();
        let heads: Vec<u32> = (0..42).map(|i| if i % 2 == 0 { i + 1 } else { i }).collect();
        let zigzag = Digraph::new(tails, heads, (0..42).collect());
        assert_eq!(search_from_zero(&zigzag), None);
    }

    #[test]
    fn distances_stop_at_proof_length() {
        let graph = ring(60, &[]);
        let mut dist = Vec::new();
        graph.distances_to(0, &mut dist);
        assert_eq!(dist[59], 1);
        assert_eq!(dist[60 - 41], 41);
        assert_eq!(dist[60 - 42], UNREACHED);
    }

    #[test]
    fn solves_reference_key() {
        let proof = solve(KEY_19, 19, 4, 20, &CancelToken::default()).expect("directed cycle");
        assert_eq!(verify_directed(KEY_19, &proof, 19), Ok(()));
    }

    #[test]
    fn solution_is_independent_of_worker_count() {
        let cancel = CancelToken::default();
        let one = solve([5, 6, 7, 8], 13, 1, 30, &cancel);
        assert!(one.is_some());
        assert_eq!(one, solve([5, 6, 7, 8], 13, 6, 30, &cancel));
    }
}
