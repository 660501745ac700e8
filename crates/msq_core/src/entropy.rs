//! Seam for the entropy sub-codec.
//!
//! The string table and the visual tile map are compressed with a
//! scheme this crate does not implement; their byte ranges are carried
//! verbatim through decode and encode. An external collaborator plugs
//! in here when the compressed content itself needs editing.

use crate::error::Result;

pub trait EntropyCodec {
    /// Expands one compressed range into its plain form.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Compresses a plain form back into the on-disk representation.
    /// Must be the exact inverse of [`decompress`](Self::decompress)
    /// for any data it produced.
    fn compress(&self, plain: &[u8]) -> Result<Vec<u8>>;
}

/// The default codec: leaves the bytes untouched, which is all the
/// lossless container round trip needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbatim;

impl EntropyCodec for Verbatim {
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn compress(&self, plain: &[u8]) -> Result<Vec<u8>> {
        Ok(plain.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbatim_is_its_own_inverse() {
        let data = vec![0x10u8, 0x20, 0x30];
        let codec = Verbatim;
        let plain = codec.decompress(&data).unwrap();
        assert_eq!(codec.compress(&plain).unwrap(), data);
    }
}
