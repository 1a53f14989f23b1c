//! Targets, compact bits, graph weights and difficulty retargeting.
//!
//! All share and ratio arithmetic is 32.32 fixed point on big integers.

use num_bigint::{BigInt, BigUint, Sign};
use tracing::debug;

/// Smallest edge bits any graph algorithm accepts; the graph weight base.
pub const MIN_EDGE_BITS: u8 = 24;

/// Work numerator for graph algorithms: `2^64 · 1865 / difficulty`.
const GRAPH_WORK_SCALE: u64 = 1865;

/// Decode a compact target: 8-bit byte exponent, sign bit, 23-bit mantissa.
pub fn compact_to_big(compact: u32) -> BigInt {
    let mantissa = compact & 0x007f_ffff;
    let negative = compact & 0x0080_0000 != 0;
    let exponent = compact >> 24;
    let magnitude = if exponent <= 3 {
        BigUint::from(mantissa >> (8 * (3 - exponent)))
    } else {
        BigUint::from(mantissa) << (8 * (exponent - 3))
    };
    let sign = if negative { Sign::Minus } else { Sign::Plus };
    BigInt::from_biguint(sign, magnitude)
}

/// Encode to compact form, keeping the top 23 significant bits.
pub fn big_to_compact(n: &BigInt) -> u32 {
    let magnitude = n.magnitude();
    if magnitude.bits() == 0 {
        return 0;
    }
    let mut exponent = magnitude.bits().div_ceil(8) as u32;
    let mut mantissa = if exponent <= 3 {
        low_u32(magnitude) << (8 * (3 - exponent))
    } else {
        low_u32(&(magnitude >> (8 * (exponent - 3))))
    };
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }
    let mut compact = (exponent << 24) | mantissa;
    if n.sign() == Sign::Minus {
        compact |= 0x0080_0000;
    }
    compact
}

fn low_u32(n: &BigUint) -> u32 {
    n.iter_u32_digits().next().unwrap_or(0)
}

/// Decode a compact value as an unsigned target; negative values become zero.
pub fn compact_to_target(compact: u32) -> BigUint {
    compact_to_big(compact).to_biguint().unwrap_or_default()
}

/// Encode an unsigned target to compact form.
pub fn target_to_compact(target: &BigUint) -> u32 {
    big_to_compact(&BigInt::from(target.clone()))
}

/// Interpret a hash as a little-endian 256-bit number.
pub fn hash_to_big(hash: &[u8; 32]) -> BigUint {
    BigUint::from_bytes_le(hash)
}

/// Difficulty scale for a graph of `2^edge_bits` edges.
///
/// ```
/// assert_eq!(cyclepow::diff::graph_weight(24), 48);
/// assert_eq!(cyclepow::diff::graph_weight(29), 1856);
/// ```
pub fn graph_weight(edge_bits: u8) -> u64 {
    let shift = edge_bits.saturating_sub(MIN_EDGE_BITS);
    (2u64 << shift) * u64::from(edge_bits)
}

/// Difficulty a solved block represents: `scale · 2^256 / hash`.
pub fn calc_cuckoo_diff(scale: u64, block_hash: &[u8; 32]) -> BigUint {
    let hash = hash_to_big(block_hash).max(BigUint::from(1u8));
    let diff = (BigUint::from(scale) << 256) / hash;
    debug!(%diff, "solution difficulty");
    diff
}

/// Graph difficulty as a hash-style target: the 64-bit fixed-point fraction
/// `scale / diff` written big-endian into the top 8 bytes.
pub fn cuckoo_diff_to_target(scale: u64, diff: u64) -> [u8; 32] {
    let frac = (u128::from(scale) << 64) / u128::from(diff.max(1));
    let mut target = [0u8; 32];
    target[..8].copy_from_slice(&(frac as u64).to_be_bytes());
    target
}

/// Expected work behind a block with compact `bits`.
pub fn calc_work(bits: u32, graph: bool) -> BigUint {
    let Some(value) = compact_to_big(bits).to_biguint().filter(|v| v.bits() > 0) else {
        return BigUint::default();
    };
    if graph {
        (BigUint::from(GRAPH_WORK_SCALE) << 64) / value
    } else {
        (BigUint::from(1u8) << 256) / (value + 1u8)
    }
}

/// How an algorithm's observed share of blocks steers its next difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareRule {
    /// Hash algorithms: `ratio · old · target / (actual · 100)`, then `>> 32`.
    Hash,
    /// Graph algorithms scaled down when over their target share and up when under.
    Balanced,
    /// Graph algorithm always scaled by `actual / target`.
    Proportional,
}

/// Next difficulty for one algorithm.
///
/// `weighted_ratio` and `actual_share` are 32.32 fixed point; `target_share`
/// is the configured percent `<< 32`. A zero target or actual share skips the
/// share scaling; a zero ratio leaves graph difficulties unchanged.
pub fn next_difficulty(
    rule: ShareRule,
    weighted_ratio: &BigUint,
    old: &BigUint,
    actual_share: &BigUint,
    target_share: &BigUint,
) -> BigUint {
    let zero = BigUint::default();
    let scaled = *target_share > zero && *actual_share > zero;
    let actual = actual_share * 100u8;
    match rule {
        ShareRule::Hash => {
            let mut next = weighted_ratio * old;
            if scaled {
                next = next * target_share / actual;
            }
            next >> 32
        }
        ShareRule::Balanced | ShareRule::Proportional => {
            if *weighted_ratio == zero {
                return old.clone();
            }
            let next = (old << 32) / weighted_ratio;
            if !scaled {
                return next;
            }
            if rule == ShareRule::Balanced && actual > *target_share {
                next * target_share / actual
            } else {
                next * actual / target_share
            }
        }
    }
}

/// Clamp a proposed hash target to the algorithm limit.
pub fn safe_target(candidate: u64, limit: &BigUint, limit_bits: u32) -> BigUint {
    if candidate == 0 {
        return compact_to_target(limit_bits);
    }
    BigUint::from(candidate).min(limit.clone())
}

/// Floor a proposed graph difficulty at the minimum.
pub fn safe_difficulty(candidate: u64, min_bits: u32) -> BigUint {
    let min = compact_to_target(min_bits);
    if candidate == 0 {
        return min;
    }
    BigUint::from(candidate).max(min)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(num: u64, den: u64) -> BigUint {
        BigUint::from((num << 32) / den)
    }

    #[test]
    fn graph_weights() {
        assert_eq!(graph_weight(24), 48);
        assert_eq!(graph_weight(25), 100);
        assert_eq!(graph_weight(26), 208);
        assert_eq!(graph_weight(29), 1856);
        assert_eq!(graph_weight(31), 7936);
    }

    #[test]
    fn targets_from_weight() {
        assert_eq!(
            hex::encode(cuckoo_diff_to_target(48, 1000)),
            format!("0c49ba5e353f7ced{}", "0".repeat(48))
        );
        assert_eq!(
            hex::encode(cuckoo_diff_to_target(1856, 1000)),
            format!("db22d0e560418937{}", "0".repeat(48))
        );
    }

    #[test]
    fn compact_round_trips() {
        assert_eq!(big_to_compact(&BigInt::from(48)), 0x0130_0000);
        assert_eq!(compact_to_big(0x0130_0000), BigInt::from(48));
        assert_eq!(compact_to_big(0x1d00_ffff), BigInt::from(0xffffu32) << 208);
        assert_eq!(big_to_compact(&(BigInt::from(0xffffu32) << 208)), 0x1d00_ffff);
        assert_eq!(compact_to_big(0x0181_0000), BigInt::from(-1));
        assert_eq!(big_to_compact(&BigInt::from(-1)), 0x0181_0000);
        assert_eq!(big_to_compact(&BigInt::from(0)), 0);
        assert_eq!(target_to_compact(&compact_to_target(0x207f_ffff)), 0x207f_ffff);
        // mantissa high bit set bumps the exponent
        assert_eq!(big_to_compact(&BigInt::from(0x80u32)), 0x0200_8000);
    }

    #[test]
    fn compact_drops_low_precision() {
        let precise = BigInt::from(0x1234_5678_9au64);
        let back = compact_to_big(big_to_compact(&precise));
        assert_eq!(back, BigInt::from(0x1234_5600_00u64));
    }

    #[test]
    fn cuckoo_diff_from_hash() {
        let mut hash = [0u8; 32];
        hash[..4].copy_from_slice(&33_964_288u32.to_le_bytes());
        let expected = BigUint::parse_bytes(
            b"17b5dbd6151319c5e8a604ddc87e903df63f7e7512ea5a30f9dab794f2be",
            16,
        )
        .expect("hex literal");
        assert_eq!(calc_cuckoo_diff(48, &hash), expected);
    }

    #[test]
    fn work_from_bits() {
        assert_eq!(calc_work(0, true), BigUint::default());
        assert_eq!(calc_work(0x0181_0000, false), BigUint::default());
        assert_eq!(
            calc_work(0x0130_0000, true),
            (BigUint::from(1865u32) << 64) / 48u32
        );
        assert_eq!(
            calc_work(0x0130_0000, false),
            (BigUint::from(1u8) << 256) / 49u32
        );
    }

    #[test]
    fn hash_retarget() {
        let old = BigUint::from(10_000u32);
        let next = next_difficulty(
            ShareRule::Hash,
            &fixed(2, 5),
            &old,
            &fixed(4, 100),
            &(BigUint::from(34u32) << 32),
        );
        assert_eq!(next, BigUint::from(34_000u32));
        let next = next_difficulty(
            ShareRule::Hash,
            &fixed(27, 30),
            &old,
            &fixed(50, 100),
            &(BigUint::from(30u32) << 32),
        );
        assert_eq!(next, BigUint::from(5399u32));
    }

    #[test]
    fn graph_retarget_both_branches() {
        let old = BigUint::from(10_000u32);
        let target = BigUint::from(33u32) << 32;
        let under = next_difficulty(ShareRule::Balanced, &fixed(2, 5), &old, &fixed(4, 100), &target);
        assert_eq!(under, BigUint::from(3030u32));
        let over = next_difficulty(ShareRule::Balanced, &fixed(2, 5), &old, &fixed(50, 100), &target);
        assert_eq!(over, BigUint::from(16_500u32));
    }

    #[test]
    fn proportional_retarget() {
        let old = BigUint::from(10_000u32);
        let next = next_difficulty(
            ShareRule::Proportional,
            &fixed(42, 30),
            &old,
            &fixed(100, 100),
            &(BigUint::from(70u32) << 32),
        );
        assert_eq!(next, BigUint::from(10_202u32));
        let unscaled = next_difficulty(
            ShareRule::Proportional,
            &fixed(42, 30),
            &old,
            &fixed(100, 100),
            &BigUint::default(),
        );
        assert_eq!(unscaled, BigUint::from(7142u32));
    }

    #[test]
    fn safe_values_clamp() {
        let limit = BigUint::from(1000u32);
        assert_eq!(safe_target(5000, &limit, 0x0130_0000), limit);
        assert_eq!(safe_target(0, &limit, 0x0130_0000), BigUint::from(48u32));
        assert_eq!(safe_target(7, &limit, 0x0130_0000), BigUint::from(7u32));
        assert_eq!(safe_difficulty(0, 0x0130_0000), BigUint::from(48u32));
        assert_eq!(safe_difficulty(10, 0x0130_0000), BigUint::from(48u32));
        assert_eq!(safe_difficulty(100, 0x0130_0000), BigUint::from(100u32));
    }
}
