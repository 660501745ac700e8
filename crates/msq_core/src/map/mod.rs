//! Decoding and re-encoding of one map block.
//!
//! `decode` turns a block body (xor header + content) into a
//! [`MapBlockTree`]; `encode` is its inverse. The tree owns an ordered
//! set of [`Part`]s whose byte ranges partition the decrypted block
//! exactly; unrecognized ranges are preserved as opaque parts so a
//! re-encoded block stays playable by the unmodified engine.

pub mod actions;
pub mod directory;
pub mod parts;
pub mod pointers;
pub mod size;

use std::collections::BTreeMap;

use log::debug;

use crate::crypto;
use crate::error::{Error, Result};
use actions::{ActionCode, CLASS_SENTINEL_MIN, CodeVariant};
use directory::CentralDirectory;
use parts::{
    ActionClassMap, ActionSelectorMap, MAP_INFO_SIZE, MapInfo, MonsterData, MonsterNames, NpcList,
    Part, Strings, TilesMap, UnknownPart,
};
use pointers::CodePointerTable;

/// A fully decoded map block: the inferred tile-map edge length and the
/// ordered parts covering every byte of the decrypted block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapBlockTree {
    map_size: usize,
    block_len: usize,
    parts: Vec<Part>,
}

impl MapBlockTree {
    pub fn map_size(&self) -> usize {
        self.map_size
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Replaces the part at `offset`. The replacement must keep the
    /// original offset and size, otherwise coverage would break.
    pub fn replace_part(&mut self, offset: usize, part: Part) -> Result<()> {
        if part.offset() != offset {
            return Err(Error::format(offset, "replacement part changes its offset"));
        }
        let slot = self
            .parts
            .iter_mut()
            .find(|p| p.offset() == offset)
            .ok_or_else(|| Error::format(offset, "no part at this offset"))?;
        if slot.size() != part.size() {
            return Err(Error::format(offset, "replacement part changes its size"));
        }
        *slot = part;
        Ok(())
    }

    /// Rebuilds a tree from externally supplied parts, enforcing the
    /// coverage invariant.
    pub fn from_parts(map_size: usize, parts: Vec<Part>) -> Result<Self> {
        let block_len = parts.iter().map(|p| p.offset() + p.size()).max().unwrap_or(0);
        let tree = Self {
            map_size,
            block_len,
            parts,
        };
        tree.to_plain()?;
        Ok(tree)
    }

    /// Concatenates all parts into the decrypted block image, enforcing
    /// that their ranges partition `[0, block_len)` with no gap and no
    /// overlap.
    pub fn to_plain(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.block_len);
        let mut previous = "start of block";
        for part in &self.parts {
            let offset = part.offset();
            if offset < out.len() {
                return Err(Error::Overlap {
                    offset,
                    a: previous.to_string(),
                    b: part.name().to_string(),
                });
            }
            if offset > out.len() {
                return Err(Error::format(
                    out.len(),
                    format!("coverage gap before {} at {offset:#x}", part.name()),
                ));
            }
            part.write(&mut out);
            previous = part.name();
        }
        if out.len() != self.block_len {
            return Err(Error::format(
                out.len(),
                format!("parts cover {} bytes of a {} byte block", out.len(), self.block_len),
            ));
        }
        Ok(out)
    }
}

/// Decodes one map-block body (xor header included, marker stripped).
///
/// Runs the unchecked decryption pass first: the encrypted length is
/// derived from the strings offset, which itself sits inside the
/// encrypted region. The second, checksum-verified pass produces the
/// bytes everything else is parsed from.
pub fn decode(body: &[u8]) -> Result<MapBlockTree> {
    let guess = crypto::decrypt_unchecked(body)?;
    let map_size = size::detect(&guess)?;
    let dir_offset = size::directory_offset(map_size);
    let first_pass = CentralDirectory::parse(&guess, dir_offset)?;

    let strings_offset = first_pass.strings_offset as usize;
    if strings_offset < dir_offset + directory::SIZE || strings_offset > guess.len() {
        return Err(Error::format(
            dir_offset,
            format!("implausible strings offset {strings_offset:#x}"),
        ));
    }

    let plain = crypto::decrypt(body, strings_offset)?;
    decode_plain(&plain, map_size)
}

/// Decodes an already fully decrypted block image.
pub fn decode_plain(plain: &[u8], map_size: usize) -> Result<MapBlockTree> {
    let dir_offset = size::directory_offset(map_size);
    let dir = CentralDirectory::parse(plain, dir_offset)?;
    let class_map = ActionClassMap::parse(plain, map_size)?;
    let selector_map = ActionSelectorMap::parse(plain, map_size)?;

    let mut named: Vec<Part> = Vec::new();
    named.push(Part::MapInfo(MapInfo::parse(
        plain,
        dir_offset + directory::SIZE,
    )?));

    if let Some(npc_offset) = dir.npc_list_offset() {
        named.push(Part::NpcList(NpcList::parse(plain, npc_offset)?));
    }

    let strings_offset = dir.strings_offset as usize;
    let names_offset = dir.monster_names_offset as usize;
    let data_offset = dir.monster_data_offset as usize;
    if names_offset != 0 && data_offset != 0 && strings_offset > data_offset {
        // The monster count is nowhere stored; it falls out of the
        // distance between the data table and the strings table.
        let count = (strings_offset - data_offset) / parts::MONSTER_RECORD_SIZE;
        if count > 0 {
            named.push(Part::MonsterNames(MonsterNames::parse(
                plain,
                names_offset,
                count,
                data_offset,
            )?));
            named.push(Part::MonsterData(MonsterData::parse(
                plain,
                data_offset,
                count,
            )?));
        }
    }

    let aux_offset = dir.aux_offset as usize;
    let strings_end = if aux_offset > strings_offset && aux_offset <= plain.len() {
        aux_offset
    } else {
        plain.len()
    };
    if strings_offset < plain.len() {
        named.push(Part::Strings(Strings {
            offset: strings_offset,
            data: plain[strings_offset..strings_end].to_vec(),
        }));
    }
    if aux_offset > strings_offset && aux_offset < plain.len() {
        named.push(Part::TilesMap(TilesMap {
            offset: aux_offset,
            data: plain[aux_offset..].to_vec(),
        }));
    }

    // Pointer tables; classes whose directory slots resolve to the same
    // offset share one table.
    let mut tables: BTreeMap<usize, CodePointerTable> = BTreeMap::new();
    for class in 0..directory::ACTION_CLASS_COUNT as u8 {
        let Some(table_offset) = dir.class_table_offset(class) else {
            continue;
        };
        if let Some(table) = tables.get_mut(&table_offset) {
            table.owners.push(class);
        } else {
            tables.insert(
                table_offset,
                CodePointerTable {
                    offset: table_offset,
                    entries: pointers::discover(plain, table_offset)?,
                    owners: vec![class],
                },
            );
        }
    }

    let codes = traverse(plain, &class_map, &selector_map, &dir, &tables)?;
    debug!(
        "decoded {}x{} map: {} pointer table(s), {} action code(s)",
        map_size,
        map_size,
        tables.len(),
        codes.len()
    );

    named.push(Part::ActionClassMap(class_map));
    named.push(Part::ActionSelectorMap(selector_map));
    named.push(Part::CentralDirectory(dir));
    named.extend(tables.into_values().map(Part::CodePointerTable));
    named.extend(codes.into_values().map(Part::ActionCode));

    let parts = fill_unknown(named, plain)?;
    Ok(MapBlockTree {
        map_size,
        block_len: plain.len(),
        parts,
    })
}

/// Re-encodes a tree into a block body.
///
/// The encrypted/plaintext split is not carried in the tree: it is read
/// back out of the just-built bytes, from the strings-offset word of
/// the central directory.
pub fn encode(tree: &MapBlockTree) -> Result<Vec<u8>> {
    let plain = tree.to_plain()?;
    let dir_offset = size::directory_offset(tree.map_size);
    if dir_offset + 2 > plain.len() {
        return Err(Error::truncated(dir_offset, "block too small for directory"));
    }
    let strings_offset =
        u16::from_le_bytes([plain[dir_offset], plain[dir_offset + 1]]) as usize;
    if strings_offset > plain.len() {
        return Err(Error::format(
            dir_offset,
            format!("strings offset {strings_offset:#x} outside block"),
        ));
    }
    crypto::encrypt(&plain, strings_offset)
}

/// Visits every occupied cell of the action maps and parses the action
/// codes reachable from them. The offset-keyed map doubles as the
/// dedup set and the cycle guard; it is shared across the whole
/// traversal of the block, never reset per branch.
fn traverse(
    plain: &[u8],
    class_map: &ActionClassMap,
    selector_map: &ActionSelectorMap,
    dir: &CentralDirectory,
    tables: &BTreeMap<usize, CodePointerTable>,
) -> Result<BTreeMap<usize, ActionCode>> {
    let mut t = Traverser {
        plain,
        dir,
        tables,
        codes: BTreeMap::new(),
    };
    for y in 0..class_map.size {
        for x in 0..class_map.size {
            t.follow(class_map.get(x, y), selector_map.get(x, y))?;
        }
    }
    Ok(t.codes)
}

struct Traverser<'a> {
    plain: &'a [u8],
    dir: &'a CentralDirectory,
    tables: &'a BTreeMap<usize, CodePointerTable>,
    codes: BTreeMap<usize, ActionCode>,
}

impl Traverser<'_> {
    /// Follows one class/selector reference. Class 0, sentinel classes
    /// and classes without a pointer table are valid terminals.
    fn follow(&mut self, class: u8, selector: u8) -> Result<()> {
        if class == 0 || class >= CLASS_SENTINEL_MIN {
            return Ok(());
        }
        let Some(table_offset) = self.dir.class_table_offset(class) else {
            return Ok(());
        };
        let Some(table) = self.tables.get(&table_offset) else {
            return Ok(());
        };
        let Some(target) = table.resolve(selector) else {
            return Ok(());
        };
        self.parse_at(target, class)
    }

    fn parse_at(&mut self, offset: usize, class: u8) -> Result<()> {
        if self.codes.contains_key(&offset) {
            return Ok(());
        }
        let code = ActionCode::parse(self.plain, offset, class)?;
        let links = outgoing_links(&code);
        // Insert before recursing so a cycle through this offset stops.
        self.codes.insert(offset, code);
        for (class, selector) in links {
            self.follow(class, selector)?;
        }
        Ok(())
    }
}

/// Outgoing class/selector references of a record in traversal order:
/// a check visits its fail branch before its pass branch, an alteration
/// record visits every sub-alteration before its own next pointer.
fn outgoing_links(code: &ActionCode) -> Vec<(u8, u8)> {
    let next = |n: &actions::NextRef| (n.class, n.selector.unwrap_or(0xFF));
    match &code.code {
        CodeVariant::Simple(c) => vec![next(&c.next)],
        CodeVariant::Check(c) => vec![next(&c.fail), next(&c.pass)],
        CodeVariant::Mask(c) => vec![next(&c.next)],
        CodeVariant::Alter(c) => {
            let mut links: Vec<(u8, u8)> = c
                .alterations
                .iter()
                .map(|a| (a.class, a.selector))
                .collect();
            links.push(next(&c.next));
            links
        }
        CodeVariant::Transition(c) => vec![next(&c.next)],
        CodeVariant::Radiation(c) => vec![next(&c.next)],
        CodeVariant::Impassable(c) => vec![next(&c.next)],
    }
}

/// Sorts the named parts and synthesizes an opaque part for every gap,
/// including the head and tail of the block. Two named parts claiming
/// the same byte is a parsing mistake, not valid data.
fn fill_unknown(mut named: Vec<Part>, plain: &[u8]) -> Result<Vec<Part>> {
    named.sort_by_key(|p| p.offset());

    let mut parts = Vec::with_capacity(named.len());
    let mut pos = 0usize;
    let mut previous = "start of block";
    for part in named {
        let offset = part.offset();
        if offset < pos {
            return Err(Error::Overlap {
                offset,
                a: previous.to_string(),
                b: part.name().to_string(),
            });
        }
        if offset > pos {
            parts.push(Part::Unknown(UnknownPart {
                offset: pos,
                data: plain[pos..offset].to_vec(),
            }));
        }
        pos = offset + part.size();
        if pos > plain.len() {
            return Err(Error::truncated(offset, "part runs past end of block"));
        }
        previous = part.name();
        parts.push(part);
    }
    if pos < plain.len() {
        parts.push(Part::Unknown(UnknownPart {
            offset: pos,
            data: plain[pos..].to_vec(),
        }));
    }
    Ok(parts)
}
