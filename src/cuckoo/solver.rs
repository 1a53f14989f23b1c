//! Cycle search over trimmed edges and recovery of the proof nonces.

use super::graph::XBITS;
use super::trim::{NodeRule, NIL};
use super::{Geometry, MAX_PATH, PROOF_SIZE};
use crate::siphash::{SipState, BATCH};
use crate::stream::{CancelToken, NonceSource, StopFlag};
use std::sync::{Mutex, PoisonError};
use std::thread;

/// Outcome of inserting one edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closure {
    /// The edge joined two trees.
    Linked,
    /// The edge closed a proof-length cycle; its edges as node pairs.
    Cycle(Vec<(u32, u32)>),
    /// The edge closed a cycle of another length.
    OtherLength(usize),
    /// A path ran past [`MAX_PATH`] or the edge is a self loop.
    Abandoned,
}

/// Forest of directed parent links; each tree's root is the node whose link
/// is `NIL`. Adding an edge between two trees reverses the shorter path so
/// the new edge can become a link.
#[derive(Debug)]
pub struct CycleFinder {
    cuckoo: Vec<u32>,
    us: Vec<u32>,
    vs: Vec<u32>,
}

impl CycleFinder {
    pub fn new(nodes: usize) -> Self {
        Self {
            cuckoo: vec![NIL; nodes],
            us: Vec::with_capacity(MAX_PATH),
            vs: Vec::with_capacity(MAX_PATH),
        }
    }

    pub fn add_edge(&mut self, u: u32, v: u32) -> Closure {
        if u == v {
            return Closure::Abandoned;
        }
        let mut us = std::mem::take(&mut self.us);
        let mut vs = std::mem::take(&mut self.vs);
        let closure = self.link(u, v, &mut us, &mut vs);
        self.us = us;
        self.vs = vs;
        closure
    }

    fn path(&self, start: u32, out: &mut Vec<u32>) -> bool {
        out.clear();
        let mut node = start;
        loop {
            if out.len() >= MAX_PATH {
                return false;
            }
            out.push(node);
            match self.cuckoo[node as usize] {
                NIL => return true,
                next => node = next,
            }
        }
    }

    fn link(&mut self, u: u32, v: u32, us: &mut Vec<u32>, vs: &mut Vec<u32>) -> Closure {
        if !self.path(u, us) || !self.path(v, vs) {
            return Closure::Abandoned;
        }
        let (nu, nv) = (us.len() - 1, vs.len() - 1);
        if us[nu] == vs[nv] {
            let common = nu.min(nv);
            let (mut i, mut j) = (nu - common, nv - common);
            while us[i] != vs[j] {
                i += 1;
                j += 1;
            }
            let len = i + j + 1;
            if len != PROOF_SIZE {
                return Closure::OtherLength(len);
            }
            let mut cycle = Vec::with_capacity(PROOF_SIZE);
            cycle.push((u, v));
            cycle.extend(us[..=i].windows(2).map(|w| (w[0], w[1])));
            cycle.extend(vs[..=j].windows(2).map(|w| (w[0], w[1])));
            return Closure::Cycle(cycle);
        }
        if nu < nv {
            for k in (0..nu).rev() {
                self.cuckoo[us[k + 1] as usize] = us[k];
            }
            self.cuckoo[u as usize] = v;
        } else {
            for k in (0..nv).rev() {
                self.cuckoo[vs[k + 1] as usize] = vs[k];
            }
            self.cuckoo[v as usize] = u;
        }
        Closure::Linked
    }
}

/// Find the nonces whose edges match `edges` (full endpoint values, compared
/// by class under `rule`). Workers stop fetching once a proof's worth of
/// matches is in or `cancel` fires. The result is sorted.
pub fn recover_nonces(
    sip: &SipState,
    geo: &Geometry,
    rule: NodeRule,
    edges: &[(u64, u64)],
    threads: usize,
    cancel: &CancelToken,
) -> Vec<u32> {
    let mut wanted: Vec<u64> = edges
        .iter()
        .map(|&(u, v)| (rule.solver_node(u) << 32) | rule.solver_node(v))
        .collect();
    wanted.sort_unstable();
    wanted.dedup();
    let mut groups = vec![false; 1 << (2 * XBITS)];
    for &(u, _) in edges {
        groups[(u >> geo.zbits) as usize] = true;
    }

    let source = NonceSource::new(0, geo.easiness);
    let found = Mutex::new(Vec::with_capacity(PROOF_SIZE));
    let done = StopFlag::new();
    thread::scope(|s| {
        for _ in 0..threads.max(1) {
            s.spawn(|| {
                let mut out = vec![0u64; BATCH];
                while !done.should_stop() && !cancel.is_cancelled() {
                    let Some(range) = source.fetch_range(BATCH as u64) else {
                        break;
                    };
                    let n = (range.end - range.start) as usize;
                    sip.prf_seq(range.start, 0, &mut out[..n]);
                    for (i, &h) in out[..n].iter().enumerate() {
                        let u = h & geo.edge_mask;
                        if u == 0 || !groups[(u >> geo.zbits) as usize] {
                            continue;
                        }
                        let nonce = range.start + i as u64;
                        let v = sip.prf((nonce << 1) | 1) & geo.edge_mask;
                        let key = (rule.solver_node(u) << 32) | rule.solver_node(v);
                        if wanted.binary_search(&key).is_ok() {
                            let mut found = found.lock().unwrap_or_else(PoisonError::into_inner);
                            found.push(nonce as u32);
                            if found.len() >= PROOF_SIZE {
                                done.force_stop();
                            }
                        }
                    }
                }
            });
        }
    });
    let mut nonces = found.into_inner().unwrap_or_else(PoisonError::into_inner);
    nonces.sort_unstable();
    nonces
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 21 U nodes and 21 V nodes joined into a single ring of 42 edges.
    fn ring(len: u32) -> Vec<(u32, u32)> {
        let half = len / 2;
        (0..half)
            .flat_map(|k| {
                let v = (k << 1) | 1;
                [(k << 1, v), (((k + 1) % half) << 1, v)]
            })
            .collect()
    }

    #[test]
    fn finds_proof_length_ring() {
        let edges = ring(PROOF_SIZE as u32);
        let mut finder = CycleFinder::new(128);
        let (last, rest) = edges.split_last().expect("non-empty ring");
        for &(u, v) in rest {
            assert_eq!(finder.add_edge(u, v), Closure::Linked);
        }
        let Closure::Cycle(cycle) = finder.add_edge(last.0, last.1) else {
            panic!("ring did not close");
        };
        assert_eq!(cycle.len(), PROOF_SIZE);
        let mut got: Vec<(u32, u32)> = cycle
            .iter()
            .map(|&(a, b)| if a & 1 == 0 { (a, b) } else { (b, a) })
            .collect();
        let mut want = edges.clone();
        got.sort_unstable();
        want.sort_unstable();
        assert_eq!(got, want);
    }

    #[test]
    fn reports_other_cycle_lengths() {
        let edges = ring(8);
        let mut finder = CycleFinder::new(64);
        let (last, rest) = edges.split_last().expect("non-empty ring");
        for &(u, v) in rest {
            finder.add_edge(u, v);
        }
        assert_eq!(finder.add_edge(last.0, last.1), Closure::OtherLength(8));
        assert_eq!(finder.add_edge(7, 7), Closure::Abandoned);
    }

    #[test]
    fn recovers_nonces_of_known_edges() {
        let sip = SipState::new(99, 100);
        let geo = Geometry::new(14);
        let picked = [17u64, 400, 5000, 9000];
        let edges: Vec<(u64, u64)> = picked
            .iter()
            .map(|&n| {
                (
                    sip.prf(n << 1) & geo.edge_mask,
                    sip.prf((n << 1) | 1) & geo.edge_mask,
                )
            })
            .collect();
        let nonces = recover_nonces(&sip, &geo, NodeRule::Degree, &edges, 3, &CancelToken::new());
        for n in picked {
            assert!(nonces.contains(&(n as u32)));
        }
        assert!(nonces.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn recovery_collects_matches_and_honours_cancel() {
        let sip = SipState::new(3, 4);
        let geo = Geometry::new(16);
        // the first proof's worth of nonces, each matched by its own edge
        let edges: Vec<(u64, u64)> = (1..=PROOF_SIZE as u64)
            .map(|n| {
                (
                    sip.prf(n << 1) & geo.edge_mask,
                    sip.prf((n << 1) | 1) & geo.edge_mask,
                )
            })
            .filter(|&(u, _)| u != 0)
            .collect();
        let nonces = recover_nonces(&sip, &geo, NodeRule::Degree, &edges, 1, &CancelToken::new());
        assert!(nonces.len() >= edges.len());
        assert!(nonces.len() <= BATCH);

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(recover_nonces(&sip, &geo, NodeRule::Degree, &edges, 2, &cancel).is_empty());
    }
}
