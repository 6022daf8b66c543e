use std::fmt;

use crc::{Algorithm, Crc};

/// The snapshot trailer checksum algorithm (CRC-64 with the Jones polynomial).
pub const CRC_64_SNAPSHOT: Algorithm<u64> = crc::CRC_64_REDIS;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_SNAPSHOT);

/// Streaming CRC64 over a byte sequence. The running value can be read at any
/// point, which the snapshot loader relies on: the trailer is compared against
/// the value accumulated over every byte before it.
pub struct Hasher {
    checksum: u64,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hasher")
            .field("checksum", &self.checksum)
            .finish()
    }
}

impl Hasher {
    /// Creates a new `Hasher` with a zero initial checksum.
    pub fn new() -> Self {
        Self { checksum: 0 }
    }

    /// Folds more bytes into the checksum.
    pub fn update(&mut self, bytes: &[u8]) {
        let mut digest = CRC64.digest_with_initial(self.checksum);
        digest.update(bytes);
        self.checksum = digest.finalize();
    }

    /// Returns the current checksum.
    pub fn value(&self) -> u64 {
        self.checksum
    }

    /// Resets the checksum to its initial state.
    pub fn reset(&mut self) {
        self.checksum = 0;
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_matches_one_shot() {
        let mut hasher = Hasher::new();
        hasher.update(b"123456789");
        let one_shot = CRC64.checksum(b"123456789");
        assert_eq!(hasher.value(), one_shot);

        // The same bytes fed in pieces must produce the same value.
        hasher.reset();
        hasher.update(b"1234");
        hasher.update(b"56789");
        assert_eq!(hasher.value(), one_shot);
    }

    #[test]
    fn test_empty_update_is_identity() {
        let mut hasher = Hasher::new();
        hasher.update(b"abc");
        let before = hasher.value();
        hasher.update(b"");
        assert_eq!(hasher.value(), before);
    }

    #[test]
    fn test_reset() {
        let mut hasher = Hasher::new();
        hasher.update(b"abc");
        assert_ne!(hasher.value(), 0);
        hasher.reset();
        assert_eq!(hasher.value(), 0);
    }
}
