//! Keyed PRF used to derive graph endpoints.
//!
//! Two compression rounds and four finalization rounds per input. The lean
//! and mean schemes key the state from the first 16 key bytes the way SipHash
//! does; the directed scheme loads all four words of the key as the raw state
//! and hashes 64 nonces per block with a chained state.

/// Number of PRF outputs produced by one batched call.
pub const BATCH: usize = 8192;

/// Nonces hashed together by [`sip_block`].
pub const BLOCK_SIZE: u64 = 64;
const BLOCK_MASK: u64 = BLOCK_SIZE - 1;

const IV0: u64 = 0x736f6d6570736575;
const IV1: u64 = 0x646f72616e646f6d;
const IV2: u64 = 0x6c7967656e657261;
const IV3: u64 = 0x7465646279746573;

/// Four-word PRF state derived once per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SipState {
    v: [u64; 4],
}

impl SipState {
    /// State keyed SipHash-style from two key words.
    pub const fn new(k0: u64, k1: u64) -> Self {
        Self {
            v: [k0 ^ IV0, k1 ^ IV1, k0 ^ IV2, k1 ^ IV3],
        }
    }

    /// State keyed from the first 16 bytes of a 32-byte key (little-endian words).
    pub fn from_key(key: &[u8; 32]) -> Self {
        let words = key_words(key);
        Self::new(words[0], words[1])
    }

    /// Use four words as the state directly.
    pub const fn from_words(v: [u64; 4]) -> Self {
        Self { v }
    }

    pub fn words(&self) -> [u64; 4] {
        self.v
    }

    /// Hash a single input.
    #[inline]
    pub fn prf(&self, b: u64) -> u64 {
        let mut s = Round { v: self.v };
        s.absorb(b, 21);
        s.digest()
    }

    /// `out[i] = prf((inputs[i] << 1) | uorv)`.
    pub fn prf_batch(&self, inputs: &[u64], uorv: u64, out: &mut [u64]) {
        debug_assert!(out.len() >= inputs.len());
        for (o, &n) in out.iter_mut().zip(inputs) {
            *o = self.prf((n << 1) | uorv);
        }
    }

    /// `out[i] = prf(((base + i) << 1) | uorv)` for the whole of `out`.
    pub fn prf_seq(&self, base: u64, uorv: u64, out: &mut [u64]) {
        for (i, o) in out.iter_mut().enumerate() {
            *o = self.prf(((base + i as u64) << 1) | uorv);
        }
    }
}

/// Split a 32-byte key into four little-endian words.
pub fn key_words(key: &[u8; 32]) -> [u64; 4] {
    let mut words = [0u64; 4];
    for (w, chunk) in words.iter_mut().zip(key.chunks_exact(8)) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        *w = u64::from_le_bytes(buf);
    }
    words
}

/// One-shot keyed hash of `b`.
pub fn siphash(k0: u64, k1: u64, b: u64) -> u64 {
    SipState::new(k0, k1).prf(b)
}

#[derive(Clone, Copy)]
struct Round {
    v: [u64; 4],
}

impl Round {
    #[inline(always)]
    fn round(&mut self, rot_e: u32) {
        let [mut v0, mut v1, mut v2, mut v3] = self.v;
        v0 = v0.wrapping_add(v1);
        v2 = v2.wrapping_add(v3);
        v1 = v1.rotate_left(13);
        v3 = v3.rotate_left(16);
        v1 ^= v0;
        v3 ^= v2;
        v0 = v0.rotate_left(32);
        v2 = v2.wrapping_add(v1);
        v0 = v0.wrapping_add(v3);
        v1 = v1.rotate_left(17);
        v3 = v3.rotate_left(rot_e);
        v1 ^= v2;
        v3 ^= v0;
        v2 = v2.rotate_left(32);
        self.v = [v0, v1, v2, v3];
    }

    #[inline(always)]
    fn absorb(&mut self, b: u64, rot_e: u32) {
        self.v[3] ^= b;
        self.round(rot_e);
        self.round(rot_e);
        self.v[0] ^= b;
        self.v[2] ^= 0xff;
        for _ in 0..4 {
            self.round(rot_e);
        }
    }

    #[inline(always)]
    fn digest(&self) -> u64 {
        (self.v[0] ^ self.v[1]) ^ (self.v[2] ^ self.v[3])
    }
}

/// Hash every nonce of the 64-nonce block starting at `block_start` and fold
/// the trailing hashes in.
///
/// The state is carried from one nonce to the next. With `xor_all`, entry `i`
/// is xored with every later entry; otherwise only with the last one.
pub fn sip_block_all(v: [u64; 4], block_start: u64, rot_e: u32, xor_all: bool) -> [u64; 64] {
    debug_assert_eq!(block_start & BLOCK_MASK, 0);
    let mut state = Round { v };
    let mut hashes = [0u64; BLOCK_SIZE as usize];
    for (i, h) in hashes.iter_mut().enumerate() {
        state.absorb(block_start + i as u64, rot_e);
        *h = state.digest();
    }
    let last = hashes[BLOCK_MASK as usize];
    if xor_all {
        let mut acc = 0u64;
        for h in hashes.iter_mut().rev() {
            let own = *h;
            *h ^= acc;
            acc ^= own;
        }
    } else {
        for h in hashes[..BLOCK_MASK as usize].iter_mut() {
            *h ^= last;
        }
    }
    hashes
}

/// Block hash for a single nonce; see [`sip_block_all`].
pub fn sip_block(v: [u64; 4], nonce: u64, rot_e: u32, xor_all: bool) -> u64 {
    let block = sip_block_all(v, nonce & !BLOCK_MASK, rot_e, xor_all);
    block[(nonce & BLOCK_MASK) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const K0: u64 = 0x0011223344556677;
    const K1: u64 = 0x8899aabbccddeeff;

    #[test]
    fn known_vectors() {
        assert_eq!(siphash(K0, K1, 0x7766554433221100), 12289717139560654282);
        assert_eq!(siphash(K0, K1, 0xffeeddccbbaa9988), 9875031879028705471);
        let state = SipState::new(K0, K1);
        assert_eq!(state.prf(0x7766554433221100), 12289717139560654282);
    }

    #[test]
    fn batch_matches_single_calls() {
        let state = SipState::new(K0, K1);
        let mut rng = rand::thread_rng();
        let inputs: Vec<u64> = (0..BATCH).map(|_| rng.gen::<u64>() >> 1).collect();
        let mut out = vec![0u64; BATCH];
        state.prf_batch(&inputs, 1, &mut out);
        for (i, &n) in inputs.iter().enumerate() {
            assert_eq!(out[i], siphash(K0, K1, (n << 1) | 1), "mismatch at {i}");
        }
    }

    #[test]
    fn sequential_batch_matches_single_calls() {
        let state = SipState::new(K0, K1);
        let mut out = vec![0u64; BATCH];
        state.prf_seq(1000, 0, &mut out);
        assert_eq!(out[0], state.prf(2000));
        assert_eq!(out[BATCH - 1], state.prf((1000 + BATCH as u64 - 1) << 1));
    }

    #[test]
    fn key_words_are_little_endian() {
        let mut key = [0u8; 32];
        key[0] = 1;
        key[8] = 2;
        key[31] = 0x80;
        assert_eq!(key_words(&key), [1, 2, 0, 0x8000_0000_0000_0000]);
        let state = SipState::from_key(&key);
        assert_eq!(SipState::from_words(state.words()).prf(9), state.prf(9));
    }

    #[test]
    fn block_folds_later_hashes() {
        let v = [1, 2, 3, 4];
        let all = sip_block_all(v, 128, 21, true);
        let mut state = Round { v };
        let raw: Vec<u64> = (0..64)
            .map(|i| {
                state.absorb(128 + i, 21);
                state.digest()
            })
            .collect();
        let expected_3 = raw[3..].iter().fold(0, |acc, h| acc ^ h);
        assert_eq!(all[3], expected_3);
        assert_eq!(all[63], raw[63]);
        assert_eq!(sip_block(v, 131, 21, true), expected_3);
        assert_eq!(sip_block(v, 131, 21, false), raw[3] ^ raw[63]);
    }
}
