//! The central directory: a fixed table of 22 little-endian words
//! directly after the two tile maps, naming where every major
//! sub-structure of the block begins.

use crate::bits::BitReader;
use crate::error::{Error, Result};

/// 21 offset words plus the reserved zero guard word.
pub const WORD_COUNT: usize = 22;

/// Serialized size in bytes.
pub const SIZE: usize = WORD_COUNT * 2;

/// Number of action-class table slots.
pub const ACTION_CLASS_COUNT: usize = 16;

/// The directory's words are kept verbatim: interpretation quirks (an
/// NPC offset failing the shape test, action-class slots aliasing the
/// NPC list) are resolved through accessors so re-serialization always
/// reproduces the stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectory {
    pub offset: usize,
    pub strings_offset: u16,
    pub monster_names_offset: u16,
    pub monster_data_offset: u16,
    pub action_class_tables: [u16; ACTION_CLASS_COUNT],
    pub aux_offset: u16,
    pub npc_offset: u16,
    /// Whether `npc_offset` passed the NPC-list shape test. Derived at
    /// parse time, not stored in the block.
    pub npc_shape_ok: bool,
}

impl CentralDirectory {
    pub fn parse(plain: &[u8], offset: usize) -> Result<Self> {
        if offset + SIZE > plain.len() {
            return Err(Error::truncated(offset, "central directory out of bounds"));
        }
        let word =
            |i: usize| u16::from_le_bytes([plain[offset + 2 * i], plain[offset + 2 * i + 1]]);

        let strings_offset = word(0);
        let monster_names_offset = word(1);
        let monster_data_offset = word(2);
        let mut action_class_tables = [0u16; ACTION_CLASS_COUNT];
        for (i, slot) in action_class_tables.iter_mut().enumerate() {
            *slot = word(3 + i);
        }
        let aux_offset = word(19);
        let npc_offset = word(20);
        let guard = word(21);
        if guard != 0 {
            return Err(Error::format(
                offset + SIZE - 2,
                format!("central directory guard word is {guard:#06x}, expected 0"),
            ));
        }

        let npc_shape_ok = npc_offset != 0 && npc_list_shape(plain, npc_offset as usize);

        Ok(Self {
            offset,
            strings_offset,
            monster_names_offset,
            monster_data_offset,
            action_class_tables,
            aux_offset,
            npc_offset,
            npc_shape_ok,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let mut word = |w: u16| out.extend_from_slice(&w.to_le_bytes());
        word(self.strings_offset);
        word(self.monster_names_offset);
        word(self.monster_data_offset);
        for &slot in &self.action_class_tables {
            word(slot);
        }
        word(self.aux_offset);
        word(self.npc_offset);
        word(0);
    }

    /// Validated NPC-list offset, `None` when absent or malformed.
    pub fn npc_list_offset(&self) -> Option<usize> {
        if self.npc_shape_ok {
            Some(self.npc_offset as usize)
        } else {
            None
        }
    }

    /// Effective pointer-table offset for an action class. Slots that
    /// alias a valid NPC list are bogus pointers left behind by the
    /// original encoder and read as absent.
    pub fn class_table_offset(&self, class: u8) -> Option<usize> {
        let slot = *self.action_class_tables.get(class as usize)?;
        if slot == 0 {
            return None;
        }
        if self.npc_shape_ok && slot == self.npc_offset {
            return None;
        }
        Some(slot as usize)
    }
}

/// NPC-list shape test.
///
/// A real NPC list starts with a zero word, then a pointer word per
/// character; the first pointer doubles as the quantity (it points just
/// past the pointer words) and the character records follow on an exact
/// 0x100-byte stride.
pub fn npc_list_shape(plain: &[u8], offset: usize) -> bool {
    let mut r = BitReader::at(plain, offset);
    let Some(word0) = r.read_word() else {
        return false;
    };
    if word0 != 0 {
        return false;
    }
    let Some(word1) = r.read_word() else {
        return false;
    };
    let base = offset + 2;
    let first = word1 as usize;
    if first < base || (first - base) % 2 != 0 {
        return false;
    }
    let quantity = (first - base) / 2;
    if quantity > 255 {
        return false;
    }
    for i in 2..=quantity {
        let Some(word_i) = r.read_word() else {
            return false;
        };
        if word_i as usize != first + (i - 1) * 0x100 {
            return false;
        }
    }
    true
}

/// Byte length of an NPC list with `quantity` characters: the zero
/// word, the pointer words, and the fixed-size character records.
pub fn npc_list_len(quantity: usize) -> usize {
    2 + quantity * 2 + quantity * 0x100
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_word(buf: &mut [u8], offset: usize, word: u16) {
        buf[offset..offset + 2].copy_from_slice(&word.to_le_bytes());
    }

    fn npc_fixture(offset: usize, quantity: usize) -> Vec<u8> {
        let mut buf = vec![0u8; offset + npc_list_len(quantity) + 16];
        let first = offset + 2 + quantity * 2;
        put_word(&mut buf, offset, 0);
        for i in 1..=quantity {
            put_word(
                &mut buf,
                offset + 2 * i,
                (first + (i - 1) * 0x100) as u16,
            );
        }
        buf
    }

    #[test]
    fn shape_accepts_exact_stride() {
        let buf = npc_fixture(0x40, 3);
        assert!(npc_list_shape(&buf, 0x40));
    }

    #[test]
    fn shape_accepts_single_character() {
        let buf = npc_fixture(0x10, 1);
        assert!(npc_list_shape(&buf, 0x10));
    }

    #[test]
    fn shape_rejects_nonzero_first_word() {
        let mut buf = npc_fixture(0x40, 3);
        put_word(&mut buf, 0x40, 7);
        assert!(!npc_list_shape(&buf, 0x40));
    }

    #[test]
    fn shape_rejects_broken_stride() {
        let mut buf = npc_fixture(0x40, 3);
        // Third pointer off by one: not a fixed 0x100 stride.
        let first = 0x40 + 2 + 3 * 2;
        put_word(&mut buf, 0x40 + 4, (first + 0x101) as u16);
        assert!(!npc_list_shape(&buf, 0x40));
    }

    #[test]
    fn shape_rejects_backward_pointer() {
        let mut buf = vec![0u8; 0x100];
        put_word(&mut buf, 0x40 + 2, 0x10);
        assert!(!npc_list_shape(&buf, 0x40));
    }

    fn directory_fixture(offset: usize) -> Vec<u8> {
        let mut buf = vec![0u8; offset + SIZE + 0x40];
        put_word(&mut buf, offset, 0x500); // strings
        put_word(&mut buf, offset + 2, 0x300); // monster names
        put_word(&mut buf, offset + 4, 0x380); // monster data
        put_word(&mut buf, offset + 6 + 2 * 2, 0x200); // class 2 table
        buf
    }

    #[test]
    fn parses_and_rewrites_identically() {
        let offset = 0x60;
        let buf = directory_fixture(offset);
        let dir = CentralDirectory::parse(&buf, offset).unwrap();
        assert_eq!(dir.strings_offset, 0x500);
        assert_eq!(dir.class_table_offset(2), Some(0x200));
        assert_eq!(dir.class_table_offset(3), None);
        assert_eq!(dir.npc_list_offset(), None);

        let mut out = Vec::new();
        dir.write(&mut out);
        assert_eq!(out, &buf[offset..offset + SIZE]);
    }

    #[test]
    fn nonzero_guard_word_is_a_format_error() {
        let offset = 0x60;
        let mut buf = directory_fixture(offset);
        put_word(&mut buf, offset + SIZE - 2, 1);
        assert!(matches!(
            CentralDirectory::parse(&buf, offset),
            Err(Error::Format { .. })
        ));
    }

    #[test]
    fn class_slot_aliasing_npc_list_reads_as_absent() {
        let offset = 0x00;
        let npc_offset = 0x100;
        let mut buf = npc_fixture(npc_offset, 2);
        buf.resize(0x600, 0);
        put_word(&mut buf, offset, 0x500); // strings
        put_word(&mut buf, offset + 6 + 2 * 5, npc_offset as u16); // class 5 aliases npc
        put_word(&mut buf, offset + 6 + 2 * 6, 0x80); // class 6 genuine
        put_word(&mut buf, offset + 40, npc_offset as u16); // npc offset word

        let dir = CentralDirectory::parse(&buf, offset).unwrap();
        assert!(dir.npc_shape_ok);
        assert_eq!(dir.npc_list_offset(), Some(npc_offset));
        assert_eq!(dir.class_table_offset(5), None);
        assert_eq!(dir.class_table_offset(6), Some(0x80));
    }
}
