//! Code pointer tables: per-action-class arrays of word offsets, one
//! entry per action selector.
//!
//! The table length is nowhere declared. Its extent is self-describing:
//! entries are read until the read position reaches the smallest
//! nonzero offset seen so far, i.e. the table ends where its own first
//! record begins.

use log::trace;

use crate::bits::BitReader;
use crate::error::{Error, Result};

/// One pointer table, possibly shared: every action class whose
/// directory slot resolves to the same offset owns the same table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePointerTable {
    pub offset: usize,
    /// `entries[selector]` is the byte offset of that selector's action
    /// code; 0 means "no code for this selector".
    pub entries: Vec<u16>,
    /// Owning action classes, ascending.
    pub owners: Vec<u8>,
}

impl CodePointerTable {
    pub fn size(&self) -> usize {
        self.entries.len() * 2
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        for &entry in &self.entries {
            out.extend_from_slice(&entry.to_le_bytes());
        }
    }

    /// Resolved byte offset for a selector; `None` for out-of-range or
    /// zero entries.
    pub fn resolve(&self, selector: u8) -> Option<usize> {
        match self.entries.get(selector as usize) {
            Some(&entry) if entry != 0 => Some(entry as usize),
            _ => None,
        }
    }
}

/// Scans a pointer table starting at `offset`.
pub fn discover(plain: &[u8], offset: usize) -> Result<Vec<u16>> {
    let mut r = BitReader::at(plain, offset);
    let mut entries = Vec::new();
    let mut first_offset: Option<usize> = None;
    let mut pos = offset;

    loop {
        if let Some(first) = first_offset
            && pos >= first
        {
            break;
        }
        let Some(word) = r.read_word() else {
            return Err(Error::truncated(
                pos,
                "pointer table ran past end of block before closing",
            ));
        };
        pos += 2;
        entries.push(word);
        if word != 0 {
            let target = word as usize;
            if first_offset.is_none_or(|first| target < first) {
                first_offset = Some(target);
            }
        }
    }

    trace!("pointer table at {offset:#x}: {} selector(s)", entries.len());
    Ok(entries)
}
