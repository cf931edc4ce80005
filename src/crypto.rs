//! Implements the layer scrambling found in `ctb` and `phz` files.
//!
//! Both formats use the same degenerate stream cipher and differ only in how
//! the key and per-layer initialization vector are mixed into the initial
//! state. See the documentation on `KeyRing`.

/// Which set of mixing constants a `KeyRing` uses.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Cipher {
    /// Constants found in `ctb` files.
    Chitubox,
    /// Constants found in `phz` files.
    Phz,
}

/// A per-layer key stream.
///
/// # Cipher details
///
/// The key stream is produced by a degenerate linear congruential PRNG: in
/// the step function `X[n+1] = (a * X[n]) + c`, `a` is fixed at 1, and `c`
/// (called `init` here) is derived from the file key. `X[0]` is derived from
/// both the key and the layer index, which serves as an initialization
/// vector.
///
/// For `ctb` (all math modulo 2^64):
///
/// - `init = key * 0x2D83_CDAC + 0xD8A8_3423`
/// - `X[0] = (layer * 0x1E15_30CD + 0xEC3D_47CD) * init`
///
/// For `phz`, with the key first reduced modulo `0x4324`:
///
/// - `init = key * 0x34A3_2231`
/// - `X[0] = (layer ^ 0x3FAD_2212) * key * 0x4910_913D`
///
/// Each state word yields four bytes, least significant first, before the
/// state advances by `init`. Only the low 32 bits of the state ever reach
/// the output. Data is combined with the stream by XOR, so applying the same
/// fresh `KeyRing` twice restores the input.
///
/// A `KeyRing` must never be reused across layers: the stream restarts at
/// every layer, and continuing an old one would scramble everything after it.
#[derive(Clone, Debug)]
pub struct KeyRing {
    init: u64,
    key: u64,
    index: u8,
}

impl KeyRing {
    /// Creates the key stream for layer `layer_index` of a file keyed with
    /// `seed`. A `seed` of 0 means the file isn't encrypted; callers should
    /// not build a `KeyRing` at all in that case.
    pub fn new(cipher: Cipher, seed: u32, layer_index: u32) -> Self {
        let layer = u64::from(layer_index);
        let (init, key) = match cipher {
            Cipher::Chitubox => {
                let init = u64::from(seed)
                    .wrapping_mul(0x2D83_CDAC)
                    .wrapping_add(0xD8A8_3423);
                let key = layer
                    .wrapping_mul(0x1E15_30CD)
                    .wrapping_add(0xEC3D_47CD)
                    .wrapping_mul(init);
                (init, key)
            }
            Cipher::Phz => {
                let seed = u64::from(seed % 0x4324);
                let init = seed.wrapping_mul(0x34A3_2231);
                let key = (layer ^ 0x3FAD_2212)
                    .wrapping_mul(seed)
                    .wrapping_mul(0x4910_913D);
                (init, key)
            }
        };
        Self {
            init,
            key,
            index: 0,
        }
    }

    /// Produces the next byte of the key stream.
    pub fn next_byte(&mut self) -> u8 {
        let k = (self.key >> (8 * u32::from(self.index))) as u8;
        self.index += 1;
        if self.index == 4 {
            self.index = 0;
            self.key = self.key.wrapping_add(self.init);
        }
        k
    }

    /// XORs `data` in place with the next `data.len()` bytes of the stream.
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte ^= self.next_byte();
        }
    }
}

/// Encrypts or decrypts one layer's `data` in place with a fresh key stream.
pub fn crypt(cipher: Cipher, seed: u32, layer_index: u32, data: &mut [u8]) {
    KeyRing::new(cipher, seed, layer_index).apply(data);
}
