//! MSQ container framing: locating block spans in a raw game file and
//! classifying each span as map, savegame or shop-item list.

use log::{debug, trace};

use crate::crypto;
use crate::error::{Error, Result};

/// Marker prefix opening every block; the fourth marker byte is the
/// disk id, fixed per file.
pub const MARKER: &[u8; 3] = b"msq";

/// Marker plus disk id.
pub const MARKER_SIZE: usize = 4;

/// Raw span size of a savegame block: marker, xor header, 0x800
/// encrypted bytes.
pub const SAVEGAME_SPAN_SIZE: usize = MARKER_SIZE + crypto::HEADER_SIZE + SAVEGAME_ENCRYPTED_LEN;

/// Encrypted length of a savegame block; unlike map blocks it is fixed
/// rather than derived from content.
pub const SAVEGAME_ENCRYPTED_LEN: usize = 0x800;

/// Raw span size of a shop-item-list block. Shop lists are encrypted
/// end to end.
pub const SHOP_LIST_SPAN_SIZE: usize = 766;

/// First three decrypted bytes of every shop-item-list block.
const SHOP_LIST_SENTINEL: [u8; 3] = [0x60, 0x60, 0x60];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Map,
    Savegame,
    ShopList,
}

/// One MSQ-framed region of the file, marker included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub offset: usize,
    pub size: usize,
    pub kind: BlockKind,
}

impl BlockSpan {
    /// The whole raw span, marker and disk id included.
    pub fn raw<'a>(&self, file: &'a [u8]) -> &'a [u8] {
        &file[self.offset..self.offset + self.size]
    }

    /// The block body: xor header plus content, marker stripped.
    pub fn body<'a>(&self, file: &'a [u8]) -> &'a [u8] {
        &file[self.offset + MARKER_SIZE..self.offset + self.size]
    }
}

/// A fully framed game file: the disk id and every block span, in file
/// order.
#[derive(Debug)]
pub struct FramedFile {
    pub disk_id: u8,
    pub spans: Vec<BlockSpan>,
}

/// Scans a raw file for block markers and classifies every span.
///
/// The disk id is read once from the first marker and then required on
/// every subsequent marker; each further match terminates the previous
/// span. Classification decrypts only the first few bytes of each span
/// and never consumes the span, so the full body can be re-read for
/// real decoding.
pub fn scan(file: &[u8]) -> Result<FramedFile> {
    if file.len() < MARKER_SIZE || &file[..3] != MARKER {
        return Err(Error::format(0, "missing msq marker at start of file"));
    }
    let disk_id = file[3];
    let mut needle = [0u8; MARKER_SIZE];
    needle[..3].copy_from_slice(MARKER);
    needle[3] = disk_id;

    let mut starts = vec![0usize];
    let mut pos = MARKER_SIZE;
    while pos + MARKER_SIZE <= file.len() {
        if file[pos..pos + MARKER_SIZE] == needle {
            starts.push(pos);
            pos += MARKER_SIZE;
        } else {
            pos += 1;
        }
    }

    let mut spans = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(file.len());
        let size = end - start;
        if size < MARKER_SIZE + crypto::HEADER_SIZE {
            return Err(Error::truncated(start, "block span too small for xor header"));
        }
        let kind = classify(&file[start..end])?;
        trace!("block at {start:#x}, {size} bytes, {kind:?}");
        spans.push(BlockSpan {
            offset: start,
            size,
            kind,
        });
    }

    debug!("framed {} block(s), disk id {disk_id}", spans.len());
    Ok(FramedFile { disk_id, spans })
}

/// Classifies one raw span by its size and its first nine decrypted
/// bytes. Read-only: works on a temporary decrypt of the span head.
fn classify(raw: &[u8]) -> Result<BlockKind> {
    let body = &raw[MARKER_SIZE..];
    let head_len = (crypto::HEADER_SIZE + 9).min(body.len());
    let head = crypto::decrypt_unchecked(&body[..head_len])?;

    if raw.len() == SAVEGAME_SPAN_SIZE && head.len() >= 9 && is_party_roster(&head[1..9]) {
        return Ok(BlockKind::Savegame);
    }
    if raw.len() == SHOP_LIST_SPAN_SIZE && head.len() >= 3 && head[..3] == SHOP_LIST_SENTINEL {
        return Ok(BlockKind::ShopList);
    }
    Ok(BlockKind::Map)
}

/// Savegame blocks open with the party roster: eight slot bytes, each
/// a member index 0-7, with no non-zero index repeated.
fn is_party_roster(slots: &[u8]) -> bool {
    let mut seen = [false; 8];
    for &slot in slots {
        if slot > 7 {
            return false;
        }
        if slot != 0 {
            if seen[slot as usize] {
                return false;
            }
            seen[slot as usize] = true;
        }
    }
    true
}

/// Decrypts a non-map block body to plaintext using the fixed boundary
/// for its kind. Map blocks derive their boundary from content and are
/// handled by [`crate::map::decode`].
pub fn decrypt_body(kind: BlockKind, body: &[u8]) -> Result<Vec<u8>> {
    let encrypted_len = match kind {
        BlockKind::Savegame => SAVEGAME_ENCRYPTED_LEN.min(body.len() - crypto::HEADER_SIZE),
        BlockKind::ShopList => body.len() - crypto::HEADER_SIZE,
        BlockKind::Map => {
            return Err(Error::format(
                0,
                "map blocks have no fixed encrypted length",
            ));
        }
    };
    crypto::decrypt(body, encrypted_len)
}

/// Re-encrypts a non-map block plaintext, the inverse of
/// [`decrypt_body`].
pub fn encrypt_body(kind: BlockKind, plain: &[u8]) -> Result<Vec<u8>> {
    let encrypted_len = match kind {
        BlockKind::Savegame => SAVEGAME_ENCRYPTED_LEN.min(plain.len()),
        BlockKind::ShopList => plain.len(),
        BlockKind::Map => {
            return Err(Error::format(
                0,
                "map blocks have no fixed encrypted length",
            ));
        }
    };
    crypto::encrypt(plain, encrypted_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(disk_id: u8, plain: &[u8], encrypted_len: usize) -> Vec<u8> {
        let mut raw = vec![b'm', b's', b'q', disk_id];
        raw.extend_from_slice(&crypto::encrypt(plain, encrypted_len).unwrap());
        raw
    }

    #[test]
    fn rejects_missing_marker() {
        assert!(matches!(scan(b"nope"), Err(Error::Format { .. })));
    }

    #[test]
    fn splits_on_each_marker() {
        let mut file = frame(0, &[1u8; 40], 40);
        file.extend(frame(0, &[2u8; 60], 60));
        let framed = scan(&file).unwrap();
        assert_eq!(framed.disk_id, 0);
        assert_eq!(framed.spans.len(), 2);
        assert_eq!(framed.spans[0].offset, 0);
        assert_eq!(framed.spans[0].size, 46);
        assert_eq!(framed.spans[1].offset, 46);
        assert_eq!(framed.spans[1].size, 66);
    }

    #[test]
    fn foreign_disk_id_does_not_split() {
        let mut file = frame(1, &[1u8; 40], 40);
        // A stray "msq\0" in the clear suffix must not terminate the
        // span because the file's disk id is 1.
        let mut inner = vec![0u8; 20];
        inner[4..8].copy_from_slice(b"msq\0");
        file.extend(frame(1, &inner, 4));
        let framed = scan(&file).unwrap();
        assert_eq!(framed.disk_id, 1);
        assert_eq!(framed.spans.len(), 2);
    }

    #[test]
    fn classifies_savegame_by_size_and_roster() {
        let mut plain = vec![0u8; SAVEGAME_ENCRYPTED_LEN];
        plain[0] = 0x33;
        plain[1..9].copy_from_slice(&[1, 2, 3, 0, 0, 0, 0, 0]);
        let file = frame(0, &plain, SAVEGAME_ENCRYPTED_LEN);
        let framed = scan(&file).unwrap();
        assert_eq!(framed.spans[0].kind, BlockKind::Savegame);
        assert_eq!(framed.spans[0].size, SAVEGAME_SPAN_SIZE);
    }

    #[test]
    fn duplicate_roster_slot_classifies_as_map() {
        let mut plain = vec![0u8; SAVEGAME_ENCRYPTED_LEN];
        plain[1..9].copy_from_slice(&[1, 1, 0, 0, 0, 0, 0, 0]);
        let file = frame(0, &plain, SAVEGAME_ENCRYPTED_LEN);
        let framed = scan(&file).unwrap();
        assert_eq!(framed.spans[0].kind, BlockKind::Map);
    }

    #[test]
    fn classifies_shop_list_by_size_and_sentinel() {
        let payload_len = SHOP_LIST_SPAN_SIZE - MARKER_SIZE - crypto::HEADER_SIZE;
        let mut plain = vec![0u8; payload_len];
        plain[..3].copy_from_slice(&SHOP_LIST_SENTINEL);
        let file = frame(0, &plain, payload_len);
        let framed = scan(&file).unwrap();
        assert_eq!(framed.spans[0].kind, BlockKind::ShopList);
    }

    #[test]
    fn savegame_body_round_trips() {
        let mut plain = vec![0u8; SAVEGAME_ENCRYPTED_LEN];
        plain[1..9].copy_from_slice(&[4, 0, 0, 0, 0, 0, 0, 0]);
        plain[100] = 0xAA;
        let body = encrypt_body(BlockKind::Savegame, &plain).unwrap();
        assert_eq!(decrypt_body(BlockKind::Savegame, &body).unwrap(), plain);
    }
}
