//! Multi-round edge trimming with two compaction (rename) stages.
//!
//! A sweep counts the low endpoint of every edge within its `(x, y)` group,
//! drops edges whose endpoint fails the [`NodeRule`], and re-emits survivors
//! with their endpoints swapped, bucketed by the other endpoint's `x`. Sweeps
//! alternate V then U. Once groups are small enough the endpoints are renamed
//! into a dense encoding so later rounds use small counters and the solver a
//! small table.

use super::graph::{for_each_line, Axis, Bucket, BucketMatrix, LineJob, LineStats, NX, XBITS, XMASK};
use super::Geometry;
use crate::stream::CancelToken;
use tracing::debug;

/// Local bits after the first rename.
pub const C0: u32 = 8;
/// Local bits after the second rename.
pub const C1: u32 = 6;

/// Table size the cycle solver needs for fully renamed endpoints.
pub const SOLVER_NODES: usize = 2 << (2 * XBITS + C1);

pub const NIL: u32 = u32::MAX;

const MAX_TRIM_ROUNDS: u32 = 255;
const LOW: u64 = 0xffff_ffff;

/// Which endpoints can still lie on a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRule {
    /// An endpoint survives when it occurs at least twice.
    Degree,
    /// An endpoint survives when its partner `x ^ 1` occurs.
    Partner,
}

impl NodeRule {
    #[inline]
    pub fn keeps(self, cnt: &[u8], local: usize) -> bool {
        match self {
            NodeRule::Degree => cnt[local] > 1,
            NodeRule::Partner => cnt[local ^ 1] > 0,
        }
    }

    /// Key under which `local` receives its new id.
    #[inline]
    fn rename_key(self, local: usize) -> usize {
        match self {
            NodeRule::Degree => local,
            NodeRule::Partner => local >> 1,
        }
    }

    #[inline]
    fn renamed(self, id: usize, local: usize) -> usize {
        match self {
            NodeRule::Degree => id,
            NodeRule::Partner => (id << 1) | (local & 1),
        }
    }

    /// Largest group that can be renamed into `bits` local bits.
    fn group_limit(self, bits: u32) -> usize {
        match self {
            NodeRule::Degree => 1 << (bits + 1),
            NodeRule::Partner => 1 << bits,
        }
    }

    /// Node the cycle solver sees for an endpoint value.
    #[inline]
    pub fn solver_node(self, value: u64) -> u64 {
        match self {
            NodeRule::Degree => value,
            NodeRule::Partner => value >> 1,
        }
    }
}

/// Endpoint layout `x:5 | y:5 | local:low_bits`, the same for full values and
/// both renamed forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    low_bits: u32,
}

impl Encoding {
    pub fn full(geo: &Geometry) -> Self {
        Self {
            low_bits: geo.zbits,
        }
    }

    pub const fn renamed(low_bits: u32) -> Self {
        Self { low_bits }
    }

    #[inline]
    pub fn x(self, value: u64) -> usize {
        ((value >> (self.low_bits + XBITS)) & XMASK) as usize
    }

    #[inline]
    pub fn y(self, value: u64) -> usize {
        ((value >> self.low_bits) & XMASK) as usize
    }

    #[inline]
    pub fn local(self, value: u64) -> usize {
        (value & ((1 << self.low_bits) - 1)) as usize
    }

    pub fn local_size(self) -> usize {
        1 << self.low_bits
    }

    fn compose(self, x: usize, y: usize, local: usize) -> u64 {
        ((x as u64) << (self.low_bits + XBITS)) | ((y as u64) << self.low_bits) | local as u64
    }

    fn table_len(self) -> usize {
        (NX * NX) << self.low_bits
    }
}

struct SweepScratch {
    groups: Vec<Bucket>,
    cnt: Vec<u8>,
    ids: Vec<u16>,
}

impl SweepScratch {
    fn new(counted: Encoding, renaming: bool) -> Self {
        Self {
            groups: (0..NX).map(|_| Vec::new()).collect(),
            cnt: vec![0; counted.local_size()],
            ids: if renaming {
                vec![0; counted.local_size()]
            } else {
                Vec::new()
            },
        }
    }
}

/// One sweep over one line. With `rename`, survivors get dense ids per group
/// and `job.table` records the value each new id stands for.
fn sweep_line(
    job: &mut LineJob<'_>,
    counted: Encoding,
    other: Encoding,
    rename: Option<Encoding>,
    rule: NodeRule,
    s: &mut SweepScratch,
) -> LineStats {
    for bucket in job.line.iter_mut() {
        for uv in bucket.drain(..) {
            s.groups[counted.y(uv & LOW)].push(uv);
        }
    }
    let mut stats = LineStats::default();
    for (y, group) in s.groups.iter_mut().enumerate() {
        for &uv in group.iter() {
            let z = counted.local(uv & LOW);
            s.cnt[z] = s.cnt[z].saturating_add(1);
        }
        let mut next_id = 0u16;
        let mut kept = 0;
        for &uv in group.iter() {
            let low = uv & LOW;
            let z = counted.local(low);
            if !rule.keeps(&s.cnt, z) {
                continue;
            }
            kept += 1;
            let new_low = match (rename, job.table.as_deref_mut()) {
                (Some(out), Some(table)) => {
                    let key = rule.rename_key(z);
                    if s.ids[key] == 0 {
                        next_id += 1;
                        s.ids[key] = next_id;
                    }
                    let local = rule.renamed(usize::from(s.ids[key] - 1), z);
                    assert!(
                        local < out.local_size(),
                        "rename overflow in line {} group {y}",
                        job.x
                    );
                    table[(y << out.low_bits) | local] = low as u32;
                    out.compose(job.x, y, local)
                }
                _ => low,
            };
            let far = uv >> 32;
            job.line[other.x(far)].push((new_low << 32) | far);
        }
        for &uv in group.iter() {
            let z = counted.local(uv & LOW);
            s.cnt[z] = 0;
            if rename.is_some() {
                s.ids[rule.rename_key(z)] = 0;
            }
        }
        group.clear();
        stats.kept += kept;
        stats.max_group = stats.max_group.max(kept);
    }
    stats
}

/// Trimmed graph with fully renamed endpoints, `U << 32 | V` per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trimmed {
    pub matrix: BucketMatrix,
    rule: NodeRule,
    u0: Vec<u32>,
    v0: Vec<u32>,
    u1: Vec<u32>,
    v1: Vec<u32>,
}

impl Trimmed {
    /// Map solver edges back to full endpoint values `(u, v)`.
    ///
    /// Under [`NodeRule::Partner`] the value returned is one member of the
    /// endpoint's class; callers compare classes.
    pub fn original_edges(&self, cycle: &[(u32, u32)]) -> Option<Vec<(u64, u64)>> {
        cycle
            .iter()
            .map(|&(a, b)| {
                let (u, v) = if a & 1 == 0 { (a, b) } else { (b, a) };
                Some((
                    self.original(u >> 1, &self.u1, &self.u0)?,
                    self.original(v >> 1, &self.v1, &self.v0)?,
                ))
            })
            .collect()
    }

    fn original(&self, node: u32, t1: &[u32], t0: &[u32]) -> Option<u64> {
        let lookup = |r1: u32| -> Option<u64> {
            let r0 = *t1.get(r1 as usize)?;
            let full = *t0.get(r0 as usize)?;
            (full != NIL).then_some(u64::from(full))
        };
        match self.rule {
            NodeRule::Degree => lookup(node),
            NodeRule::Partner => lookup(node << 1).or_else(|| lookup((node << 1) | 1)),
        }
    }
}

/// Round schedule and worker count for one trimming run.
#[derive(Debug, Clone)]
pub struct Trimmer {
    geo: Geometry,
    rule: NodeRule,
    threads: usize,
    rounds: u32,
}

impl Trimmer {
    pub fn new(geo: Geometry, rule: NodeRule, threads: usize, rounds: u32) -> Self {
        Self {
            geo,
            rule,
            threads,
            rounds,
        }
    }

    /// Trim a freshly built matrix (`u << 32 | v` entries with U already
    /// trimmed once). `None` when the graph trims away, fails to shrink
    /// enough to rename, or `cancel` fires.
    pub fn run(&self, mut matrix: BucketMatrix, cancel: &CancelToken) -> Option<Trimmed> {
        let full = Encoding::full(&self.geo);
        let limit0 = self.rule.group_limit(C0);
        let mut round = 1u32;
        let mut prev = usize::MAX;
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let v = self.sweep(&mut matrix, Axis::V, full, full, None);
            let u = self.sweep(&mut matrix, Axis::U, full, full, None);
            round += 2;
            if u.kept == 0 {
                debug!(round, "graph trimmed away");
                return None;
            }
            if v.max_group.max(u.max_group) <= limit0 {
                break;
            }
            if round >= MAX_TRIM_ROUNDS || u.kept == prev {
                debug!(round, max_group = u.max_group, "groups too large to rename");
                return None;
            }
            prev = u.kept;
        }

        let r0 = Encoding::renamed(C0);
        let mut v0 = vec![NIL; r0.table_len()];
        let mut u0 = vec![NIL; r0.table_len()];
        self.sweep(&mut matrix, Axis::V, full, full, Some((r0, &mut v0)));
        let mut last = self.sweep(&mut matrix, Axis::U, full, r0, Some((r0, &mut u0)));
        round += 2;
        debug!(round, edges = last.kept, "first rename done");

        let limit1 = self.rule.group_limit(C1);
        let mut max_group = usize::MAX;
        prev = usize::MAX;
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let settled = last.kept == prev;
            if max_group <= limit1 && (round >= self.rounds || settled) {
                break;
            }
            if round >= MAX_TRIM_ROUNDS || settled {
                debug!(round, max_group, "groups too large for the solver");
                return None;
            }
            prev = last.kept;
            let v = self.sweep(&mut matrix, Axis::V, r0, r0, None);
            last = self.sweep(&mut matrix, Axis::U, r0, r0, None);
            max_group = v.max_group.max(last.max_group);
            round += 2;
            if last.kept == 0 {
                debug!(round, "graph trimmed away");
                return None;
            }
        }

        let r1 = Encoding::renamed(C1);
        let mut v1 = vec![NIL; r1.table_len()];
        let mut u1 = vec![NIL; r1.table_len()];
        self.sweep(&mut matrix, Axis::V, r0, r0, Some((r1, &mut v1)));
        let last = self.sweep(&mut matrix, Axis::U, r0, r1, Some((r1, &mut u1)));
        debug!(round = round + 2, edges = last.kept, "trimming done");
        Some(Trimmed {
            matrix,
            rule: self.rule,
            u0,
            v0,
            u1,
            v1,
        })
    }

    fn sweep(
        &self,
        matrix: &mut BucketMatrix,
        axis: Axis,
        counted: Encoding,
        other: Encoding,
        rename: Option<(Encoding, &mut [u32])>,
    ) -> LineStats {
        let mut lines = matrix.take_lines(axis);
        let (out, tables): (Option<Encoding>, Vec<Option<&mut [u32]>>) = match rename {
            Some((out, table)) => (
                Some(out),
                table.chunks_mut(NX << out.low_bits).map(Some).collect(),
            ),
            None => (None, (0..NX).map(|_| None).collect()),
        };
        let mut jobs: Vec<LineJob<'_>> = lines
            .iter_mut()
            .zip(tables)
            .enumerate()
            .map(|(x, (line, table))| LineJob { x, line, table })
            .collect();
        let rule = self.rule;
        let stats = for_each_line(
            &mut jobs,
            self.threads,
            || SweepScratch::new(counted, out.is_some()),
            |job, s| sweep_line(job, counted, other, out, rule, s),
        );
        drop(jobs);
        matrix.restore_lines(axis, lines);
        stats.into_iter().fold(LineStats::default(), |acc, s| LineStats {
            kept: acc.kept + s.kept,
            max_group: acc.max_group.max(s.max_group),
        })
    }
}
