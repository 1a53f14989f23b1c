//! Bucketed edge storage and the two build passes of the simple scheme.

use super::trim::{Encoding, NodeRule};
use super::Geometry;
use crate::siphash::{SipState, BATCH};
use std::thread;

pub const XBITS: u32 = 5;
pub const NX: usize = 1 << XBITS;
pub const XMASK: u64 = NX as u64 - 1;

pub type Bucket = Vec<u64>;

/// The `NX` buckets sharing one coordinate on an axis.
pub type Line = Vec<Bucket>;

/// Which endpoint's top bits select the line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Lines are rows: U endpoints.
    U,
    /// Lines are columns: V endpoints.
    V,
}

/// `NX × NX` buckets of packed edges, indexed by (U top bits, V top bits)
/// once both endpoints are known.
///
/// Each entry holds the endpoint being counted next in its low 32 bits and
/// the other endpoint in its high 32 bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketMatrix {
    buckets: Vec<Bucket>,
}

impl Default for BucketMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketMatrix {
    pub fn new() -> Self {
        Self {
            buckets: (0..NX * NX).map(|_| Vec::new()).collect(),
        }
    }

    /// Total number of stored edges.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn entries(&self) -> impl Iterator<Item = u64> + '_ {
        self.buckets.iter().flatten().copied()
    }

    /// Move every bucket out, grouped into lines along `axis`.
    pub(crate) fn take_lines(&mut self, axis: Axis) -> Vec<Line> {
        (0..NX)
            .map(|x| {
                (0..NX)
                    .map(|i| std::mem::take(&mut self.buckets[index(axis, x, i)]))
                    .collect()
            })
            .collect()
    }

    /// Inverse of [`take_lines`](Self::take_lines).
    pub(crate) fn restore_lines(&mut self, axis: Axis, lines: Vec<Line>) {
        for (x, line) in lines.into_iter().enumerate() {
            for (i, bucket) in line.into_iter().enumerate() {
                self.buckets[index(axis, x, i)] = bucket;
            }
        }
    }
}

fn index(axis: Axis, x: usize, i: usize) -> usize {
    match axis {
        Axis::U => x * NX + i,
        Axis::V => i * NX + x,
    }
}

/// One line handed to a worker, with its slice of a rename table when the
/// sweep renames.
pub(crate) struct LineJob<'a> {
    pub x: usize,
    pub line: &'a mut Line,
    pub table: Option<&'a mut [u32]>,
}

/// Per-line outcome of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LineStats {
    pub kept: usize,
    pub max_group: usize,
}

/// Run `op` over every line, splitting lines into contiguous runs across
/// `threads` scoped workers. Results come back in line order.
pub(crate) fn for_each_line<S, M, F>(
    jobs: &mut [LineJob<'_>],
    threads: usize,
    make_scratch: M,
    op: F,
) -> Vec<LineStats>
where
    M: Fn() -> S + Sync,
    F: Fn(&mut LineJob<'_>, &mut S) -> LineStats + Sync,
{
    let per = jobs.len().div_ceil(threads.max(1)).max(1);
    let (make_scratch, op) = (&make_scratch, &op);
    thread::scope(|s| {
        let handles: Vec<_> = jobs
            .chunks_mut(per)
            .map(|chunk| {
                s.spawn(move || {
                    let mut scratch = make_scratch();
                    chunk
                        .iter_mut()
                        .map(|job| op(job, &mut scratch))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(stats) => stats,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

/// Derive every U endpoint and bucket `(nonce << 32) | u` by the top ten bits of `u`.
///
/// Each worker owns one contiguous nonce range and a private matrix; the
/// private matrices are concatenated in worker order, so the result does not
/// depend on the worker count.
pub(crate) fn build_u(sip: &SipState, geo: &Geometry, threads: usize) -> BucketMatrix {
    let total = geo.easiness;
    let threads = threads.max(1) as u64;
    let per = total.div_ceil(threads).div_ceil(BATCH as u64) * BATCH as u64;
    let enc = Encoding::full(geo);
    let locals: Vec<Vec<Bucket>> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|j| {
                let start = (j * per).min(total);
                let end = ((j + 1) * per).min(total);
                s.spawn(move || {
                    let mut local: Vec<Bucket> = (0..NX * NX).map(|_| Vec::new()).collect();
                    let mut out = vec![0u64; BATCH];
                    let mut base = start;
                    while base < end {
                        let n = (end - base).min(BATCH as u64) as usize;
                        sip.prf_seq(base, 0, &mut out[..n]);
                        for (i, &h) in out[..n].iter().enumerate() {
                            let u = h & geo.edge_mask;
                            if u == 0 {
                                continue;
                            }
                            local[enc.x(u) * NX + enc.y(u)].push(((base + i as u64) << 32) | u);
                        }
                        base += n as u64;
                    }
                    local
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(local) => local,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    let mut matrix = BucketMatrix::new();
    for local in locals {
        for (bucket, part) in matrix.buckets.iter_mut().zip(local) {
            if bucket.is_empty() {
                *bucket = part;
            } else {
                bucket.extend_from_slice(&part);
            }
        }
    }
    matrix
}

struct BuildScratch {
    cnt: Vec<u8>,
    nonces: Vec<u64>,
    us: Vec<u64>,
    out: Vec<u64>,
}

/// First U trim fused with V derivation.
///
/// Drops U endpoints that fail `rule` inside their bucket, derives `v` for the
/// survivors in batches, and rebuckets each row by the top bits of `v` as
/// `(u << 32) | v`.
pub(crate) fn build_v(
    matrix: &mut BucketMatrix,
    sip: &SipState,
    geo: &Geometry,
    rule: NodeRule,
    threads: usize,
) {
    let enc = Encoding::full(geo);
    let mut lines = matrix.take_lines(Axis::U);
    let mut jobs: Vec<LineJob<'_>> = lines
        .iter_mut()
        .enumerate()
        .map(|(x, line)| LineJob { x, line, table: None })
        .collect();
    let make = || BuildScratch {
        cnt: vec![0u8; enc.local_size()],
        nonces: Vec::with_capacity(BATCH),
        us: Vec::with_capacity(BATCH),
        out: vec![0u64; BATCH],
    };
    for_each_line(&mut jobs, threads, make, |job, scratch| {
        let mut next: Line = (0..NX).map(|_| Vec::new()).collect();
        let mut stats = LineStats::default();
        for bucket in job.line.iter_mut() {
            for &nu in bucket.iter() {
                let z = enc.local(nu & 0xffff_ffff);
                scratch.cnt[z] = scratch.cnt[z].saturating_add(1);
            }
            let mut kept = 0;
            for &nu in bucket.iter() {
                let u = nu & 0xffff_ffff;
                if !rule.keeps(&scratch.cnt, enc.local(u)) {
                    continue;
                }
                kept += 1;
                scratch.nonces.push(nu >> 32);
                scratch.us.push(u << 32);
                if scratch.nonces.len() == BATCH {
                    flush_v(sip, geo, enc, scratch, &mut next);
                }
            }
            for &nu in bucket.iter() {
                scratch.cnt[enc.local(nu & 0xffff_ffff)] = 0;
            }
            stats.kept += kept;
            stats.max_group = stats.max_group.max(kept);
            bucket.clear();
        }
        flush_v(sip, geo, enc, scratch, &mut next);
        *job.line = next;
        stats
    });
    drop(jobs);
    matrix.restore_lines(Axis::U, lines);
}

fn flush_v(sip: &SipState, geo: &Geometry, enc: Encoding, scratch: &mut BuildScratch, next: &mut Line) {
    let n = scratch.nonces.len();
    sip.prf_batch(&scratch.nonces, 1, &mut scratch.out[..n]);
    for (&us, &h) in scratch.us.iter().zip(&scratch.out[..n]) {
        let v = h & geo.edge_mask;
        next[enc.x(v)].push(us | v);
    }
    scratch.nonces.clear();
    scratch.us.clear();
}
