//! Heuristic 32-vs-64 map size detection.
//!
//! Nothing in the container declares the map size. The two per-tile
//! maps that open a block are themselves sized by it, so the central
//! directory can only live at one of two candidate offsets. Each
//! candidate is probed for plausibility; exactly one must survive.

use log::debug;

use crate::bits::BitReader;
use crate::error::{Error, Result};

pub const CANDIDATE_SIZES: [usize; 2] = [32, 64];

/// Leading directory words probed per candidate: the three structure
/// offsets plus the 16 action-class table offsets. Heuristic window,
/// preserved as-is from the original format knowledge.
const PROBE_WORDS: usize = 19;

/// Returns the edge length of the tile maps (32 or 64) for a fully
/// decrypted block, or a format error when zero or both candidates
/// look plausible.
pub fn detect(plain: &[u8]) -> Result<usize> {
    let mut detected = None;
    for &size in &CANDIDATE_SIZES {
        if !probe(plain, size) {
            continue;
        }
        if let Some(previous) = detected {
            return Err(Error::format(
                directory_offset(previous),
                format!("ambiguous map size: both {previous} and {size} look plausible"),
            ));
        }
        detected = Some(size);
    }

    match detected {
        Some(size) => {
            debug!("detected {size}x{size} map");
            Ok(size)
        }
        None => Err(Error::format(0, "map size not detectable")),
    }
}

/// Byte offset of the central directory for a given map size: the end
/// of the 4-bit action-class map plus the 8-bit action-selector map.
pub fn directory_offset(size: usize) -> usize {
    size * size * 3 / 2
}

/// A candidate passes when the probe window fits inside the block and
/// every nonzero word could be an offset into it.
fn probe(plain: &[u8], size: usize) -> bool {
    let start = directory_offset(size);
    if start + PROBE_WORDS * 2 > plain.len() {
        return false;
    }
    let mut r = BitReader::at(plain, start);
    for _ in 0..PROBE_WORDS {
        let Some(word) = r.read_word() else {
            return false;
        };
        if word != 0 && word as usize > plain.len() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with_directory(size: usize, len: usize) -> Vec<u8> {
        let mut plain = vec![0u8; len];
        let start = directory_offset(size);
        // A couple of plausible nonzero offsets inside the block.
        plain[start] = (start + 60) as u8;
        plain[start + 1] = ((start + 60) >> 8) as u8;
        plain[start + 2] = 0x10;
        plain
    }

    #[test]
    fn detects_32() {
        // Small block: the 64 candidate cannot even fit its window.
        let plain = block_with_directory(32, 0x800);
        assert_eq!(detect(&plain).unwrap(), 32);
    }

    #[test]
    fn detects_64_when_32_window_is_implausible() {
        let mut plain = block_with_directory(64, 0x1A00);
        // Poison the 32-candidate window with a word far outside the
        // block so only the 64 candidate survives.
        let off32 = directory_offset(32);
        plain[off32] = 0xFF;
        plain[off32 + 1] = 0xFF;
        assert_eq!(detect(&plain).unwrap(), 64);
    }

    #[test]
    fn all_zero_directories_are_ambiguous() {
        // Both candidate windows fit and contain only zeros.
        let plain = vec![0u8; 0x2000];
        assert!(matches!(detect(&plain), Err(Error::Format { .. })));
    }

    #[test]
    fn undetectable_when_no_candidate_fits() {
        let plain = vec![0u8; 64];
        assert!(matches!(detect(&plain), Err(Error::Format { .. })));
    }
}
