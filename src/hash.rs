//! The `memhash` collaborator: a seeded digest used to detect silent
//! corruption. Two instances are carried on [`crate::config::SyncState`] at
//! once (current + previous), selected per-block by the `rehash` info flag.

use blake2::Blake2bMac;
use blake2::digest::{Mac, consts::U16};
use clap::ArgEnum;
use serde::{Deserialize, Serialize};

use crate::array::Array;

/// Digest width: 16 bytes is typical for this kind of bit-rot check.
pub const HASH_SIZE: usize = 16;

/// A stored or freshly computed digest.
pub type Hash = Array<u8, HASH_SIZE>;

/// `hash_is_zero`: the "no hash known yet" sentinel.
pub fn hash_is_zero(h: &Hash) -> bool
{
    h.0.iter().all(|b| *b == 0)
}

/// `hash_is_real`: the inverse of [`hash_is_zero`].
pub fn hash_is_real(h: &Hash) -> bool
{
    !hash_is_zero(h)
}

/// Which concrete digest backs a [`HashEngine`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, ArgEnum, Serialize, Deserialize)]
pub enum HashAlgo {
    /// Cheap, non-cryptographic; folds the `crc` crate's CRC-32 four times.
    #[clap(name = "crc32c")]
    Crc32c,
    /// Keyed BLAKE2b truncated to 128 bits.
    #[clap(name = "blake2b")]
    Blake2b128,
}

/// A seeded digest function, i.e. `memhash(algo, seed, data)`.
///
/// Modelled as a small dispatch object rather than a generic: two instances
/// (current, previous) are carried alongside `state` and picked per-block.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct HashEngine {
    pub algo: HashAlgo,
    pub seed: Array<u8, HASH_SIZE>,
}

impl HashEngine {
    pub fn new(algo: HashAlgo, seed: [u8; HASH_SIZE]) -> Self
    {
        Self { algo, seed: Array(seed) }
    }

    /// `memhash(algo, seed, out, data, size)`.
    pub fn hash(&self, data: &[u8]) -> Hash
    {
        match self.algo {
            HashAlgo::Crc32c => self.hash_crc32c(data),
            HashAlgo::Blake2b128 => self.hash_blake2b(data),
        }
    }

    fn hash_crc32c(&self, data: &[u8]) -> Hash
    {
        use crc::{crc32, Hasher32};

        let mut out = [0u8; HASH_SIZE];
        // Four independently-seeded CRC-32 lanes give us 16 bytes out of a
        // 32-bit checksum; cheap, not cryptographic, fine for bit-rot
        // detection.
        for (lane, chunk) in out.chunks_mut(4).enumerate() {
            let mut digest = crc32::Digest::new_with_initial(
                crc32::IEEE,
                u32::from_le_bytes([
                    self.seed.0[lane * 4],
                    self.seed.0[lane * 4 + 1],
                    self.seed.0[lane * 4 + 2],
                    self.seed.0[lane * 4 + 3],
                ]) ^ (lane as u32),
            );
            digest.write(data);
            chunk.copy_from_slice(&digest.sum32().to_le_bytes());
        }

        Array(out)
    }

    fn hash_blake2b(&self, data: &[u8]) -> Hash
    {
        let mut mac = <Blake2bMac<U16> as Mac>::new_from_slice(&self.seed.0)
            .expect("16-byte key always valid for Blake2bMac<U16>");
        mac.update(data);
        let out = mac.finalize().into_bytes();

        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&out);
        Array(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hash_is_zero()
    {
        let h: Hash = Array::default();
        assert!(hash_is_zero(&h));
        assert!(!hash_is_real(&h));
    }

    #[test]
    fn crc32c_is_deterministic_and_seed_sensitive()
    {
        let e1 = HashEngine::new(HashAlgo::Crc32c, [1; HASH_SIZE]);
        let e2 = HashEngine::new(HashAlgo::Crc32c, [2; HASH_SIZE]);

        let h1 = e1.hash(b"hello world");
        let h1_again = e1.hash(b"hello world");
        let h2 = e2.hash(b"hello world");

        assert_eq!(h1, h1_again);
        assert_ne!(h1, h2);
        assert!(hash_is_real(&h1));
    }

    #[test]
    fn blake2b_is_deterministic_and_seed_sensitive()
    {
        let e1 = HashEngine::new(HashAlgo::Blake2b128, [7; HASH_SIZE]);
        let e2 = HashEngine::new(HashAlgo::Blake2b128, [8; HASH_SIZE]);

        let h1 = e1.hash(b"snapshot");
        let h1_again = e1.hash(b"snapshot");
        let h2 = e2.hash(b"snapshot");

        assert_eq!(h1, h1_again);
        assert_ne!(h1, h2);
    }

    #[test]
    fn different_data_different_hash()
    {
        let e = HashEngine::new(HashAlgo::Blake2b128, [0; HASH_SIZE]);
        assert_ne!(e.hash(b"a"), e.hash(b"b"));
    }
}
