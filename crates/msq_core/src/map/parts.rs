//! The parts a decoded map block is made of. Every part knows its own
//! byte offset and serialized size; together they partition the block
//! with no gap and no overlap.

use crate::bits::BitReader;
use crate::error::{Error, Result};
use crate::map::actions::ActionCode;
use crate::map::directory::{self, CentralDirectory};
use crate::map::pointers::CodePointerTable;

/// 4-bit action class per tile, row-major, high nibble first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionClassMap {
    pub size: usize,
    pub cells: Vec<u8>,
}

impl ActionClassMap {
    pub fn parse(plain: &[u8], size: usize) -> Result<Self> {
        let bytes = size * size / 2;
        if plain.len() < bytes {
            return Err(Error::truncated(0, "action class map out of bounds"));
        }
        let mut r = BitReader::new(&plain[..bytes]);
        let mut cells = Vec::with_capacity(size * size);
        for _ in 0..size * size {
            cells.push(r.read_bits(4).unwrap_or(0) as u8);
        }
        Ok(Self { size, cells })
    }

    pub fn byte_len(&self) -> usize {
        self.size * self.size / 2
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.cells[y * self.size + x]
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        for pair in self.cells.chunks(2) {
            out.push(pair[0] << 4 | pair.get(1).copied().unwrap_or(0) & 0x0F);
        }
    }
}

/// 8-bit action selector per tile, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSelectorMap {
    pub size: usize,
    pub cells: Vec<u8>,
}

impl ActionSelectorMap {
    pub fn parse(plain: &[u8], size: usize) -> Result<Self> {
        let offset = size * size / 2;
        let end = offset + size * size;
        if plain.len() < end {
            return Err(Error::truncated(offset, "action selector map out of bounds"));
        }
        Ok(Self {
            size,
            cells: plain[offset..end].to_vec(),
        })
    }

    pub fn offset(&self) -> usize {
        self.size * self.size / 2
    }

    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.cells[y * self.size + x]
    }
}

/// Fixed 12-byte map parameter record directly after the central
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapInfo {
    pub offset: usize,
    pub unknown0: u8,
    pub map_size: u8,
    pub unknown2: u8,
    pub unknown3: u8,
    pub encounter_frequency: u8,
    pub tileset: u8,
    pub last_monster: u8,
    pub max_encounters: u8,
    pub background_tile: u8,
    pub time_factor: u16,
    pub unknown11: u8,
}

pub const MAP_INFO_SIZE: usize = 12;

impl MapInfo {
    pub fn parse(plain: &[u8], offset: usize) -> Result<Self> {
        if offset + MAP_INFO_SIZE > plain.len() {
            return Err(Error::truncated(offset, "map info out of bounds"));
        }
        let b = &plain[offset..];
        Ok(Self {
            offset,
            unknown0: b[0],
            map_size: b[1],
            unknown2: b[2],
            unknown3: b[3],
            encounter_frequency: b[4],
            tileset: b[5],
            last_monster: b[6],
            max_encounters: b[7],
            background_tile: b[8],
            time_factor: u16::from_le_bytes([b[9], b[10]]),
            unknown11: b[11],
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[
            self.unknown0,
            self.map_size,
            self.unknown2,
            self.unknown3,
            self.encounter_frequency,
            self.tileset,
            self.last_monster,
            self.max_encounters,
            self.background_tile,
        ]);
        out.extend_from_slice(&self.time_factor.to_le_bytes());
        out.push(self.unknown11);
    }
}

/// The NPC list: a zero word, one pointer word per character, then the
/// fixed 0x100-byte character records. Character internals stay opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpcList {
    pub offset: usize,
    pub records: Vec<Vec<u8>>,
}

pub const NPC_RECORD_SIZE: usize = 0x100;

impl NpcList {
    /// Parses an NPC list that already passed the shape test.
    pub fn parse(plain: &[u8], offset: usize) -> Result<Self> {
        let first = u16::from_le_bytes([plain[offset + 2], plain[offset + 3]]) as usize;
        let quantity = (first - (offset + 2)) / 2;
        let end = offset + directory::npc_list_len(quantity);
        if end > plain.len() {
            return Err(Error::truncated(offset, "npc list runs past end of block"));
        }

        let mut records = Vec::with_capacity(quantity);
        for i in 0..quantity {
            let start = first + i * NPC_RECORD_SIZE;
            records.push(plain[start..start + NPC_RECORD_SIZE].to_vec());
        }
        Ok(Self { offset, records })
    }

    pub fn len_bytes(&self) -> usize {
        directory::npc_list_len(self.records.len())
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        let quantity = self.records.len();
        let first = self.offset + 2 + quantity * 2;
        out.extend_from_slice(&0u16.to_le_bytes());
        for i in 0..quantity {
            let pointer = (first + i * NPC_RECORD_SIZE) as u16;
            out.extend_from_slice(&pointer.to_le_bytes());
        }
        for record in &self.records {
            out.extend_from_slice(record);
        }
    }
}

/// NUL-terminated monster name strings. The count is not stored; it is
/// derived from the monster-data distance heuristic by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonsterNames {
    pub offset: usize,
    pub names: Vec<Vec<u8>>,
}

impl MonsterNames {
    pub fn parse(plain: &[u8], offset: usize, count: usize, limit: usize) -> Result<Self> {
        let mut names = Vec::with_capacity(count);
        let mut pos = offset;
        for _ in 0..count {
            let mut name = Vec::new();
            loop {
                if pos >= limit || pos >= plain.len() {
                    return Err(Error::truncated(pos, "unterminated monster name"));
                }
                let byte = plain[pos];
                pos += 1;
                if byte == 0 {
                    break;
                }
                name.push(byte);
            }
            names.push(name);
        }
        Ok(Self { offset, names })
    }

    pub fn len_bytes(&self) -> usize {
        self.names.iter().map(|n| n.len() + 1).sum()
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        for name in &self.names {
            out.extend_from_slice(name);
            out.push(0);
        }
    }
}

/// Fixed 8-byte monster stat records, kept raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonsterData {
    pub offset: usize,
    pub monsters: Vec<[u8; 8]>,
}

pub const MONSTER_RECORD_SIZE: usize = 8;

impl MonsterData {
    pub fn parse(plain: &[u8], offset: usize, count: usize) -> Result<Self> {
        let end = offset + count * MONSTER_RECORD_SIZE;
        if end > plain.len() {
            return Err(Error::truncated(offset, "monster data out of bounds"));
        }
        let monsters = plain[offset..end]
            .chunks_exact(MONSTER_RECORD_SIZE)
            .map(|c| <[u8; 8]>::try_from(c).unwrap_or_default())
            .collect();
        Ok(Self { offset, monsters })
    }

    pub fn len_bytes(&self) -> usize {
        self.monsters.len() * MONSTER_RECORD_SIZE
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        for monster in &self.monsters {
            out.extend_from_slice(monster);
        }
    }
}

/// The entropy-coded string table, preserved verbatim; decompression is
/// the external collaborator's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strings {
    pub offset: usize,
    pub data: Vec<u8>,
}

/// The entropy-coded visual tile map, preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilesMap {
    pub offset: usize,
    pub data: Vec<u8>,
}

/// A byte range the parser does not understand, preserved verbatim so
/// reconstruction stays lossless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPart {
    pub offset: usize,
    pub data: Vec<u8>,
}

/// A discriminated part of the decoded block, ordered by offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    ActionClassMap(ActionClassMap),
    ActionSelectorMap(ActionSelectorMap),
    CentralDirectory(CentralDirectory),
    MapInfo(MapInfo),
    NpcList(NpcList),
    MonsterNames(MonsterNames),
    MonsterData(MonsterData),
    Strings(Strings),
    TilesMap(TilesMap),
    CodePointerTable(CodePointerTable),
    ActionCode(ActionCode),
    Unknown(UnknownPart),
}

impl Part {
    pub fn offset(&self) -> usize {
        match self {
            Part::ActionClassMap(_) => 0,
            Part::ActionSelectorMap(p) => p.offset(),
            Part::CentralDirectory(p) => p.offset,
            Part::MapInfo(p) => p.offset,
            Part::NpcList(p) => p.offset,
            Part::MonsterNames(p) => p.offset,
            Part::MonsterData(p) => p.offset,
            Part::Strings(p) => p.offset,
            Part::TilesMap(p) => p.offset,
            Part::CodePointerTable(p) => p.offset,
            Part::ActionCode(p) => p.offset,
            Part::Unknown(p) => p.offset,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Part::ActionClassMap(p) => p.byte_len(),
            Part::ActionSelectorMap(p) => p.cells.len(),
            Part::CentralDirectory(_) => directory::SIZE,
            Part::MapInfo(_) => MAP_INFO_SIZE,
            Part::NpcList(p) => p.len_bytes(),
            Part::MonsterNames(p) => p.len_bytes(),
            Part::MonsterData(p) => p.len_bytes(),
            Part::Strings(p) => p.data.len(),
            Part::TilesMap(p) => p.data.len(),
            Part::CodePointerTable(p) => p.size(),
            Part::ActionCode(p) => p.size(),
            Part::Unknown(p) => p.data.len(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Part::ActionClassMap(_) => "actionClassMap",
            Part::ActionSelectorMap(_) => "actionSelectorMap",
            Part::CentralDirectory(_) => "centralDirectory",
            Part::MapInfo(_) => "mapInfo",
            Part::NpcList(_) => "npcList",
            Part::MonsterNames(_) => "monsterNames",
            Part::MonsterData(_) => "monsterData",
            Part::Strings(_) => "strings",
            Part::TilesMap(_) => "tilesMap",
            Part::CodePointerTable(_) => "codePointerTable",
            Part::ActionCode(_) => "actionCode",
            Part::Unknown(_) => "unknown",
        }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Part::ActionClassMap(p) => p.write(out),
            Part::ActionSelectorMap(p) => out.extend_from_slice(&p.cells),
            Part::CentralDirectory(p) => p.write(out),
            Part::MapInfo(p) => p.write(out),
            Part::NpcList(p) => p.write(out),
            Part::MonsterNames(p) => p.write(out),
            Part::MonsterData(p) => p.write(out),
            Part::Strings(p) => out.extend_from_slice(&p.data),
            Part::TilesMap(p) => out.extend_from_slice(&p.data),
            Part::CodePointerTable(p) => p.write(out),
            Part::ActionCode(p) => p.write(out),
            Part::Unknown(p) => out.extend_from_slice(&p.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_map_round_trips_nibbles() {
        let mut plain = vec![0u8; 32 * 32 / 2];
        plain[0] = 0xA2;
        plain[1] = 0x0F;
        let map = ActionClassMap::parse(&plain, 32).unwrap();
        assert_eq!(map.get(0, 0), 0xA);
        assert_eq!(map.get(1, 0), 0x2);
        assert_eq!(map.get(3, 0), 0xF);

        let mut out = Vec::new();
        map.write(&mut out);
        assert_eq!(out, plain);
    }

    #[test]
    fn selector_map_sits_after_class_map() {
        let size = 32;
        let mut plain = vec![0u8; size * size * 3 / 2];
        plain[size * size / 2] = 0x42;
        let map = ActionSelectorMap::parse(&plain, size).unwrap();
        assert_eq!(map.offset(), size * size / 2);
        assert_eq!(map.get(0, 0), 0x42);
    }

    #[test]
    fn map_info_round_trips() {
        let raw: Vec<u8> = (1..=12).collect();
        let info = MapInfo::parse(&raw, 0).unwrap();
        assert_eq!(info.map_size, 2);
        assert_eq!(info.time_factor, u16::from_le_bytes([10, 11]));

        let mut out = Vec::new();
        info.write(&mut out);
        assert_eq!(out, raw);
    }

    #[test]
    fn npc_list_round_trips() {
        let offset = 0x10;
        let quantity = 2;
        let first = offset + 2 + quantity * 2;
        let mut plain = vec![0u8; offset + directory::npc_list_len(quantity)];
        for i in 0..quantity {
            let p = (first + i * NPC_RECORD_SIZE) as u16;
            plain[offset + 2 + 2 * i..offset + 4 + 2 * i].copy_from_slice(&p.to_le_bytes());
        }
        plain[first] = 0xAA;
        plain[first + NPC_RECORD_SIZE] = 0xBB;

        let npcs = NpcList::parse(&plain, offset).unwrap();
        assert_eq!(npcs.records.len(), 2);
        assert_eq!(npcs.records[0][0], 0xAA);

        let mut out = Vec::new();
        npcs.write(&mut out);
        assert_eq!(out, &plain[offset..]);
    }

    #[test]
    fn monster_names_stop_at_limit() {
        let plain = b"rat\0dog\0snake".to_vec();
        let names = MonsterNames::parse(&plain, 0, 2, plain.len()).unwrap();
        assert_eq!(names.names, vec![b"rat".to_vec(), b"dog".to_vec()]);
        assert_eq!(names.len_bytes(), 8);

        // A third name never terminates before the limit.
        assert!(MonsterNames::parse(&plain, 0, 3, plain.len()).is_err());
    }

    #[test]
    fn monster_data_is_fixed_width() {
        let plain: Vec<u8> = (0..24).collect();
        let data = MonsterData::parse(&plain, 8, 2).unwrap();
        assert_eq!(data.monsters.len(), 2);
        assert_eq!(data.monsters[0], [8, 9, 10, 11, 12, 13, 14, 15]);

        let mut out = Vec::new();
        data.write(&mut out);
        assert_eq!(out, &plain[8..]);
    }
}
