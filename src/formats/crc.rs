//! CRC-64 checksumming for the artifact footers.
//!
//! All store files carry two CRC-64-ISO values, one over the body and one
//! over the whole file; the incremental digest lets the framed writers and
//! readers accumulate them while streaming instead of buffering artifacts
//! in memory.

use crc::{Crc, CRC_64_GO_ISO};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// One-shot CRC-64-ISO of a byte slice.
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Streaming CRC-64-ISO accumulator; `finalize` yields the same value
/// `checksum` would for the concatenated updates.
pub struct Digest {
    digest: crc::Digest<'static, u64>,
}

impl Digest {
    pub fn new() -> Self {
        Self {
            digest: CRC64.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn finalize(self) -> u64 {
        self.digest.finalize()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_basic() {
        let offsets = [0u64, 17, 42, 99];
        let bytes: Vec<u8> = offsets.iter().flat_map(|v| v.to_le_bytes()).collect();
        let csum = checksum(&bytes);
        assert_ne!(csum, 0);
        // a single flipped byte must change the checksum
        let mut corrupted = bytes.clone();
        corrupted[9] ^= 0xFF;
        assert_ne!(checksum(&corrupted), csum);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let bytes: Vec<u8> = (0u16..300).flat_map(|v| v.to_le_bytes()).collect();
        let mut digest = Digest::new();
        for chunk in bytes.chunks(7) {
            digest.update(chunk);
        }
        assert_eq!(digest.finalize(), checksum(&bytes));
    }
}
