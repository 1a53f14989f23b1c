//! Cycle verification for the three graph schemes.
//!
//! Each verifier is a pure function of the key and the claimed nonces.

use super::{Geometry, PROOF_SIZE};
use crate::error::{Side, VerifyError};
use crate::siphash::{sip_block, SipState};
use tracing::debug;

/// Lean scheme: bipartite graph, U nodes even and V nodes odd.
pub fn verify_lean(
    sip: &SipState,
    nonces: &[u32],
    edge_bits: u8,
) -> Result<(), VerifyError> {
    let geo = Geometry::checked(edge_bits)?;
    check_shape(nonces, geo.easiness)?;
    let mut uvs = [0u64; 2 * PROOF_SIZE];
    let (mut xor0, mut xor1) = (0u64, 0u64);
    for (n, &nonce) in nonces.iter().enumerate() {
        let nonce = u64::from(nonce);
        let u = (sip.prf(nonce << 1) & geo.edge_mask) << 1;
        let v = ((sip.prf((nonce << 1) | 1) & geo.edge_mask) << 1) | 1;
        uvs[2 * n] = u;
        uvs[2 * n + 1] = v;
        xor0 ^= u;
        xor1 ^= v;
    }
    check_parity(xor0, xor1)?;
    walk_pairs(&uvs, |a, b| a == b, |_, _| false)
}

/// Mean scheme: a node is matched by its partner `x ^ 1` on the same side.
pub fn verify_mean(
    sip: &SipState,
    nonces: &[u32],
    edge_bits: u8,
) -> Result<(), VerifyError> {
    let geo = Geometry::checked(edge_bits)?;
    check_shape(nonces, geo.easiness)?;
    let mut uvs = [0u64; 2 * PROOF_SIZE];
    let init = ((PROOF_SIZE / 2) & 1) as u64;
    let (mut xor0, mut xor1) = (init, init);
    for (n, &nonce) in nonces.iter().enumerate() {
        let nonce = u64::from(nonce);
        uvs[2 * n] = sip.prf(nonce << 1) & geo.edge_mask;
        uvs[2 * n + 1] = sip.prf((nonce << 1) | 1) & geo.edge_mask;
        xor0 ^= uvs[2 * n];
        xor1 ^= uvs[2 * n + 1];
    }
    check_parity(xor0, xor1)?;
    walk_pairs(&uvs, |a, b| a >> 1 == b >> 1, |a, b| a == b)
}

/// Directed scheme: edge `i` runs `from[i] -> to[i]` and the cycle must follow
/// the edge directions.
pub fn verify_directed(keys: [u64; 4], nonces: &[u32], edge_bits: u8) -> Result<(), VerifyError> {
    if nonces.len() != PROOF_SIZE {
        return Err(VerifyError::LengthMismatch(nonces.len()));
    }
    let geo = Geometry::checked(edge_bits)?;
    let node_mask = geo.edge_mask >> 1;
    let mut from = [0u64; PROOF_SIZE];
    let mut to = [0u64; PROOF_SIZE];
    let (mut xor_from, mut xor_to) = (0u64, 0u64);
    for (n, &nonce) in nonces.iter().enumerate() {
        if u64::from(nonce) > geo.edge_mask {
            return Err(VerifyError::NonceTooLarge(nonce));
        }
        if n > 0 && nonce <= nonces[n - 1] {
            return Err(VerifyError::NotAscending(n));
        }
        let edge = sip_block(keys, u64::from(nonce), 21, true);
        from[n] = edge & node_mask;
        to[n] = (edge >> 32) & node_mask;
        xor_from ^= from[n];
        xor_to ^= to[n];
    }
    if xor_from != xor_to {
        return Err(VerifyError::EndpointParityMismatch { side: Side::V });
    }
    let mut visited = [false; PROOF_SIZE];
    let mut i = 0usize;
    let mut steps = 0usize;
    loop {
        if visited[i] {
            return Err(VerifyError::BranchInCycle);
        }
        visited[i] = true;
        i = from
            .iter()
            .position(|&f| f == to[i])
            .ok_or(VerifyError::DeadEnd)?;
        steps += 1;
        if i == 0 {
            break;
        }
    }
    if steps != PROOF_SIZE {
        return Err(VerifyError::CycleWrongLength(steps));
    }
    Ok(())
}

fn check_shape(nonces: &[u32], easiness: u64) -> Result<(), VerifyError> {
    if nonces.len() != PROOF_SIZE {
        return Err(VerifyError::LengthMismatch(nonces.len()));
    }
    if u64::from(nonces[PROOF_SIZE - 1]) > easiness {
        return Err(VerifyError::NonceTooLarge(nonces[PROOF_SIZE - 1]));
    }
    if let Some(n) = (1..PROOF_SIZE).find(|&n| nonces[n] <= nonces[n - 1]) {
        return Err(VerifyError::NotAscending(n));
    }
    Ok(())
}

fn check_parity(xor0: u64, xor1: u64) -> Result<(), VerifyError> {
    if xor0 != 0 {
        debug!(xor = xor0, "U endpoints do not close");
        return Err(VerifyError::EndpointParityMismatch { side: Side::U });
    }
    if xor1 != 0 {
        debug!(xor = xor1, "V endpoints do not close");
        return Err(VerifyError::EndpointParityMismatch { side: Side::V });
    }
    Ok(())
}

/// Walk the endpoint permutation from index 0: hop to the single other
/// same-side endpoint that `matches`, then across the edge to its partner.
fn walk_pairs(
    uvs: &[u64; 2 * PROOF_SIZE],
    matches: impl Fn(u64, u64) -> bool,
    dead: impl Fn(u64, u64) -> bool,
) -> Result<(), VerifyError> {
    let len = uvs.len();
    let mut i = 0usize;
    let mut steps = 0usize;
    loop {
        let mut another = i;
        let mut k = (i + 2) % len;
        while k != i {
            if matches(uvs[k], uvs[i]) {
                if another != i {
                    return Err(VerifyError::BranchInCycle);
                }
                another = k;
            }
            k = (k + 2) % len;
        }
        if another == i || dead(uvs[another], uvs[i]) {
            return Err(VerifyError::DeadEnd);
        }
        i = another ^ 1;
        steps += 1;
        if i == 0 {
            break;
        }
    }
    if steps != PROOF_SIZE {
        return Err(VerifyError::CycleWrongLength(steps));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cuckoo::Scheme;

    const KEY_19: [u64; 4] = [
        0xdb7896f799c76dab,
        0x352e8bf25df7a723,
        0xf0aa29cbb1150ea6,
        0x3206c2759f41cbd5,
    ];

    const SOL_19: [u32; PROOF_SIZE] = [
        0x0413c, 0x05121, 0x0546e, 0x1293a, 0x1dd27, 0x1e13e, 0x1e1d2, 0x22870, 0x24642, 0x24833,
        0x29190, 0x2a732, 0x2ccf6, 0x302cf, 0x32d9a, 0x33700, 0x33a20, 0x351d9, 0x3554b, 0x35a70,
        0x376c1, 0x398c6, 0x3f404, 0x3ff0c, 0x48b26, 0x49a03, 0x4c555, 0x4dcda, 0x4dfcd, 0x4fbb6,
        0x50275, 0x584a8, 0x5da0d, 0x5dbf1, 0x6038f, 0x66540, 0x72bbd, 0x77323, 0x77424, 0x77a14,
        0x77dc9, 0x7d9dc,
    ];

    const KEY_29: [u64; 4] = [
        0xe4b4a751f2eac47d,
        0x3115d47edfb69267,
        0x87de84146d9d609e,
        0x7deb20eab6d976a1,
    ];

    const SOL_29: [u32; PROOF_SIZE] = [
        0x04acd28, 0x29ccf71, 0x2a5572b, 0x2f31c2c, 0x2f60c37, 0x317fe1d, 0x32f6d4c, 0x3f51227,
        0x45ee1dc, 0x535eeb8, 0x5e135d5, 0x6184e3d, 0x6b1b8e0, 0x6f857a9, 0x8916a0f, 0x9beb5f8,
        0xa3c8dc9, 0xa886d94, 0xaab6a57, 0xd6df8f8, 0xe4d630f, 0xe6ae422, 0xea2d658, 0xf7f369b,
        0x10c465d8, 0x1130471e, 0x12049efb, 0x12f43bc5, 0x15b493a6, 0x16899354, 0x1915dfca,
        0x195c3dac, 0x19b09ab6, 0x1a1a8ed7, 0x1bba748f, 0x1bdbf777, 0x1c806542, 0x1d201b53,
        0x1d9e6af7, 0x1e99885e, 0x1f255834, 0x1f9c383b,
    ];

    #[test]
    fn directed_accepts_known_cycles() {
        assert_eq!(verify_directed(KEY_19, &SOL_19, 19), Ok(()));
        assert_eq!(verify_directed(KEY_29, &SOL_29, 29), Ok(()));
    }

    #[test]
    fn directed_rejects_wrong_key() {
        let err = verify_directed(KEY_29, &SOL_19, 19).expect_err("foreign key");
        assert!(matches!(
            err,
            VerifyError::EndpointParityMismatch { .. }
                | VerifyError::DeadEnd
                | VerifyError::BranchInCycle
                | VerifyError::CycleWrongLength(_)
        ));
    }

    #[test]
    fn directed_rejects_shape_errors() {
        assert_eq!(
            verify_directed(KEY_19, &SOL_19[..41], 19),
            Err(VerifyError::LengthMismatch(41))
        );
        let mut unordered = SOL_19;
        unordered.swap(3, 4);
        assert_eq!(
            verify_directed(KEY_19, &unordered, 19),
            Err(VerifyError::NotAscending(4))
        );
        let mut too_big = SOL_19;
        too_big[41] = 1 << 19;
        assert_eq!(
            verify_directed(KEY_19, &too_big, 19),
            Err(VerifyError::NonceTooLarge(1 << 19))
        );
    }

    #[test]
    fn lean_rejects_shape_errors() {
        let sip = SipState::new(1, 2);
        let ascending: Vec<u32> = (1..=42).collect();
        assert_eq!(
            verify_lean(&sip, &ascending[..10], 24),
            Err(VerifyError::LengthMismatch(10))
        );
        let mut unordered = ascending.clone();
        unordered.swap(0, 1);
        assert_eq!(
            verify_lean(&sip, &unordered, 24),
            Err(VerifyError::NotAscending(1))
        );
        let mut too_big = ascending.clone();
        too_big[41] = (1 << 24) + 1;
        assert_eq!(
            verify_lean(&sip, &too_big, 24),
            Err(VerifyError::NonceTooLarge((1 << 24) + 1))
        );
    }

    #[test]
    fn oversized_graphs_are_rejected() {
        let nonces: Vec<u32> = (1..=42).collect();
        let sip = SipState::new(1, 2);
        for bits in [0u8, 33, 63, 64, 255] {
            let err = VerifyError::EdgeBitsOutOfRange {
                bits,
                min: 1,
                max: 32,
            };
            assert_eq!(verify_lean(&sip, &nonces, bits), Err(err.clone()));
            assert_eq!(verify_mean(&sip, &nonces, bits), Err(err.clone()));
            assert_eq!(verify_directed(KEY_19, &nonces, bits), Err(err.clone()));
            assert_eq!(
                Scheme::Lean.verify(&[0u8; 32], &[0u32; PROOF_SIZE], bits),
                Err(err)
            );
        }
    }

    #[test]
    fn random_nonces_fail_parity() {
        let sip = SipState::new(7, 9);
        let nonces: Vec<u32> = (0..42).map(|i| i * 1000 + 3).collect();
        assert!(matches!(
            verify_lean(&sip, &nonces, 24),
            Err(VerifyError::EndpointParityMismatch { side: Side::U })
        ));
        assert!(matches!(
            verify_mean(&sip, &nonces, 29),
            Err(VerifyError::EndpointParityMismatch { .. })
        ));
    }

    #[test]
    fn walk_detects_short_cycle() {
        // A two-edge cycle on nodes (a, b) followed by a separate 40-edge ring.
        let mut uvs = [0u64; 2 * PROOF_SIZE];
        uvs[0] = 2 << 1;
        uvs[1] = (2 << 1) | 1;
        uvs[2] = 2 << 1;
        uvs[3] = (2 << 1) | 1;
        for k in 0..20u64 {
            let (even, odd) = (2 + 2 * k as usize, 3 + 2 * k as usize);
            uvs[2 * even] = (100 + k) << 1;
            uvs[2 * even + 1] = ((100 + k) << 1) | 1;
            uvs[2 * odd] = (100 + (k + 1) % 20) << 1;
            uvs[2 * odd + 1] = ((100 + k) << 1) | 1;
        }
        assert_eq!(
            walk_pairs(&uvs, |a, b| a == b, |_, _| false),
            Err(VerifyError::CycleWrongLength(2))
        );
        uvs[2] = 4 << 1;
        assert_eq!(
            walk_pairs(&uvs, |a, b| a == b, |_, _| false),
            Err(VerifyError::DeadEnd)
        );
    }
}
