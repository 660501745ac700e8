//! The editable structured-text form of a map block.
//!
//! A [`MapBlockTree`] converts to and from a generic attributed-node
//! tree: tag name, string attributes, child nodes, and an optional text
//! body holding whitespace-delimited hex bytes or a fixed-width grid.
//! The actual text/JSON/XML writer is an external collaborator; this
//! module only defines the node structure and the conversions.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::map::actions::{
    ActionCode, Alteration, AlterCode, CheckCode, CLASS_SENTINEL_MIN, CodeVariant, ImpassableCode,
    MaskCode, NextRef, RadiationCode, SimpleCode, TransitionCode,
};
use crate::map::directory::{ACTION_CLASS_COUNT, CentralDirectory};
use crate::map::parts::{
    ActionClassMap, ActionSelectorMap, MapInfo, MonsterData, MonsterNames, NpcList, Part, Strings,
    TilesMap, UnknownPart, NPC_RECORD_SIZE,
};
use crate::map::pointers::CodePointerTable;
use crate::map::MapBlockTree;

/// One node of the generic attributed tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl TreeNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
            text: None,
        }
    }

    pub fn attr(mut self, name: &str, value: impl ToString) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: String) -> Self {
        self.text = Some(text);
        self
    }

    pub fn child(mut self, node: TreeNode) -> Self {
        self.children.push(node);
        self
    }

    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, name: &str) -> Result<&str> {
        self.get_attr(name)
            .ok_or_else(|| tree_err(format!("<{}> is missing attribute {name}", self.tag)))
    }

    fn num(&self, name: &str) -> Result<usize> {
        parse_num(self.require(name)?)
            .ok_or_else(|| tree_err(format!("<{}> attribute {name} is not a number", self.tag)))
    }

    fn byte(&self, name: &str) -> Result<u8> {
        let v = self.num(name)?;
        u8::try_from(v).map_err(|_| tree_err(format!("<{}> attribute {name} out of range", self.tag)))
    }

    fn word(&self, name: &str) -> Result<u16> {
        let v = self.num(name)?;
        u16::try_from(v)
            .map_err(|_| tree_err(format!("<{}> attribute {name} out of range", self.tag)))
    }

    fn signed_byte(&self, name: &str) -> Result<i8> {
        self.require(name)?
            .parse::<i8>()
            .map_err(|_| tree_err(format!("<{}> attribute {name} is not a signed byte", self.tag)))
    }

    fn flag(&self, name: &str) -> Result<bool> {
        match self.require(name)? {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(tree_err(format!("<{}> attribute {name} is not a flag", self.tag))),
        }
    }
}

fn tree_err(message: String) -> Error {
    Error::Format { offset: 0, message }
}

fn parse_num(s: &str) -> Option<usize> {
    if let Some(hex) = s.strip_prefix("0x") {
        usize::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn hex_offset(offset: usize) -> String {
    format!("{offset:#x}")
}

/// Renders bytes as whitespace-delimited hex, `width` bytes per line.
pub fn hex_dump(data: &[u8], width: usize) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(if i % width == 0 { '\n' } else { ' ' });
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Parses whitespace-delimited hex bytes.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    text.split_whitespace()
        .map(|t| {
            u8::from_str_radix(t, 16).map_err(|_| tree_err(format!("bad hex byte {t:?}")))
        })
        .collect()
}

fn hex_words(words: &[u16]) -> String {
    words
        .iter()
        .map(|w| format!("{w:04x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_hex_words(text: &str) -> Result<Vec<u16>> {
    text.split_whitespace()
        .map(|t| {
            u16::from_str_radix(t, 16).map_err(|_| tree_err(format!("bad hex word {t:?}")))
        })
        .collect()
}

/// Renders a nibble-per-cell grid, one map row per line.
fn nibble_grid(cells: &[u8], size: usize) -> String {
    let mut out = String::with_capacity(cells.len() + size);
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 && i % size == 0 {
            out.push('\n');
        }
        out.push_str(&format!("{cell:x}"));
    }
    out
}

fn parse_nibble_grid(text: &str, expected: usize) -> Result<Vec<u8>> {
    let cells: Option<Vec<u8>> = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect();
    let cells = cells.ok_or_else(|| tree_err("bad nibble grid".into()))?;
    if cells.len() != expected {
        return Err(tree_err(format!(
            "nibble grid holds {} cells, expected {expected}",
            cells.len()
        )));
    }
    Ok(cells)
}

impl MapBlockTree {
    /// The attributed-node form of the whole block, parts in offset
    /// order.
    pub fn to_tree(&self) -> TreeNode {
        let mut root = TreeNode::new("map").attr("mapSize", self.map_size());
        for part in self.parts() {
            root.children.push(part_to_tree(part, self.map_size()));
        }
        root
    }

    /// Rebuilds a block tree from its attributed-node form, enforcing
    /// the coverage invariant.
    pub fn from_tree(root: &TreeNode) -> Result<MapBlockTree> {
        if root.tag != "map" {
            return Err(tree_err(format!("expected <map>, found <{}>", root.tag)));
        }
        let map_size = root.num("mapSize")?;
        if map_size != 32 && map_size != 64 {
            return Err(tree_err(format!("bad map size {map_size}")));
        }
        let mut parts = Vec::with_capacity(root.children.len());
        for child in &root.children {
            parts.push(part_from_tree(child, map_size)?);
        }
        MapBlockTree::from_parts(map_size, parts)
    }
}

fn part_to_tree(part: &Part, map_size: usize) -> TreeNode {
    match part {
        Part::ActionClassMap(p) => {
            TreeNode::new("actionClassMap").text(nibble_grid(&p.cells, map_size))
        }
        Part::ActionSelectorMap(p) => {
            TreeNode::new("actionSelectorMap").text(hex_dump(&p.cells, map_size))
        }
        Part::CentralDirectory(p) => directory_to_tree(p),
        Part::MapInfo(p) => TreeNode::new("mapInfo")
            .attr("offset", hex_offset(p.offset))
            .attr("unknown0", p.unknown0)
            .attr("mapSize", p.map_size)
            .attr("unknown2", p.unknown2)
            .attr("unknown3", p.unknown3)
            .attr("encounterFrequency", p.encounter_frequency)
            .attr("tileset", p.tileset)
            .attr("lastMonster", p.last_monster)
            .attr("maxEncounters", p.max_encounters)
            .attr("backgroundTile", p.background_tile)
            .attr("timeFactor", p.time_factor)
            .attr("unknown11", p.unknown11),
        Part::NpcList(p) => {
            let mut node = TreeNode::new("npcList").attr("offset", hex_offset(p.offset));
            for record in &p.records {
                node.children.push(TreeNode::new("npc").text(hex_dump(record, 16)));
            }
            node
        }
        Part::MonsterNames(p) => {
            let mut node = TreeNode::new("monsterNames").attr("offset", hex_offset(p.offset));
            for name in &p.names {
                node.children.push(TreeNode::new("name").text(hex_dump(name, 16)));
            }
            node
        }
        Part::MonsterData(p) => {
            let mut node = TreeNode::new("monsterData").attr("offset", hex_offset(p.offset));
            for monster in &p.monsters {
                node.children
                    .push(TreeNode::new("monster").text(hex_dump(monster, 8)));
            }
            node
        }
        Part::Strings(p) => TreeNode::new("strings")
            .attr("offset", hex_offset(p.offset))
            .text(hex_dump(&p.data, 16)),
        Part::TilesMap(p) => TreeNode::new("tilesMap")
            .attr("offset", hex_offset(p.offset))
            .text(hex_dump(&p.data, 16)),
        Part::CodePointerTable(p) => TreeNode::new("codePointerTable")
            .attr("offset", hex_offset(p.offset))
            .attr(
                "owners",
                p.owners
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(" "),
            )
            .text(hex_words(&p.entries)),
        Part::ActionCode(p) => action_to_tree(p),
        Part::Unknown(p) => TreeNode::new("unknown")
            .attr("offset", hex_offset(p.offset))
            .text(hex_dump(&p.data, 16)),
    }
}

fn directory_to_tree(dir: &CentralDirectory) -> TreeNode {
    TreeNode::new("centralDirectory")
        .attr("offset", hex_offset(dir.offset))
        .attr("strings", hex_offset(dir.strings_offset as usize))
        .attr("monsterNames", hex_offset(dir.monster_names_offset as usize))
        .attr("monsterData", hex_offset(dir.monster_data_offset as usize))
        .attr("aux", hex_offset(dir.aux_offset as usize))
        .attr("npc", hex_offset(dir.npc_offset as usize))
        .attr("npcShapeOk", dir.npc_shape_ok)
        .text(hex_words(&dir.action_class_tables))
}

fn directory_from_tree(node: &TreeNode) -> Result<CentralDirectory> {
    let tables = parse_hex_words(node.text.as_deref().unwrap_or(""))?;
    if tables.len() != ACTION_CLASS_COUNT {
        return Err(tree_err(format!(
            "central directory holds {} class tables, expected {ACTION_CLASS_COUNT}",
            tables.len()
        )));
    }
    let mut action_class_tables = [0u16; ACTION_CLASS_COUNT];
    action_class_tables.copy_from_slice(&tables);
    Ok(CentralDirectory {
        offset: node.num("offset")?,
        strings_offset: node.word("strings")?,
        monster_names_offset: node.word("monsterNames")?,
        monster_data_offset: node.word("monsterData")?,
        action_class_tables,
        aux_offset: node.word("aux")?,
        npc_offset: node.word("npc")?,
        npc_shape_ok: node.flag("npcShapeOk")?,
    })
}

fn next_to_attrs(node: TreeNode, prefix: &str, next: &NextRef) -> TreeNode {
    let node = node.attr(&format!("{prefix}Class"), next.class);
    match next.selector {
        Some(selector) => node.attr(&format!("{prefix}Selector"), selector),
        None => node,
    }
}

fn next_from_attrs(node: &TreeNode, prefix: &str) -> Result<NextRef> {
    let class = node.byte(&format!("{prefix}Class"))?;
    let selector = if class < CLASS_SENTINEL_MIN {
        Some(node.byte(&format!("{prefix}Selector"))?)
    } else {
        None
    };
    Ok(NextRef { class, selector })
}

fn action_to_tree(code: &ActionCode) -> TreeNode {
    let base = |tag: &str| {
        TreeNode::new(tag)
            .attr("offset", hex_offset(code.offset))
            .attr("class", code.class)
    };
    match &code.code {
        CodeVariant::Simple(c) => next_to_attrs(base("simple"), "next", &c.next),
        CodeVariant::Check(c) => {
            let mut node = base("check")
                .attr("flags", c.flags)
                .attr("enterMessage", c.enter_message)
                .attr("passMessage", c.pass_message)
                .attr("failMessage", c.fail_message);
            node = next_to_attrs(node, "pass", &c.pass);
            node = next_to_attrs(node, "fail", &c.fail);
            node = node
                .attr("unknown0", c.unknown[0])
                .attr("unknown1", c.unknown[1]);
            if c.operands.is_empty() {
                node
            } else {
                node.text(hex_dump(&c.operands, 16))
            }
        }
        CodeVariant::Mask(c) => next_to_attrs(
            base("mask")
                .attr("message", c.message)
                .attr("impassable", c.impassable)
                .attr("tile", c.tile),
            "next",
            &c.next,
        ),
        CodeVariant::Alter(c) => {
            let mut node = base("alter").attr("message", c.message);
            for alteration in &c.alterations {
                node.children.push(
                    TreeNode::new("alteration")
                        .attr("flags", alteration.flags)
                        .attr("dx", alteration.dx)
                        .attr("dy", alteration.dy)
                        .attr("class", alteration.class)
                        .attr("selector", alteration.selector),
                );
            }
            next_to_attrs(node, "next", &c.next)
        }
        CodeVariant::Transition(c) => next_to_attrs(
            base("transition")
                .attr("flags", c.flags)
                .attr("targetX", c.target_x)
                .attr("targetY", c.target_y)
                .attr("targetMap", c.target_map),
            "next",
            &c.next,
        ),
        CodeVariant::Radiation(c) => {
            next_to_attrs(base("radiation").attr("level", c.level), "next", &c.next)
        }
        CodeVariant::Impassable(c) => next_to_attrs(
            base("impassable").attr("message", c.message),
            "next",
            &c.next,
        ),
    }
}

fn action_from_tree(node: &TreeNode) -> Result<ActionCode> {
    let offset = node.num("offset")?;
    let class = node.byte("class")?;
    let code = match node.tag.as_str() {
        "simple" => CodeVariant::Simple(SimpleCode {
            next: next_from_attrs(node, "next")?,
        }),
        "check" => CodeVariant::Check(CheckCode {
            flags: node.byte("flags")?,
            enter_message: node.byte("enterMessage")?,
            pass_message: node.byte("passMessage")?,
            fail_message: node.byte("failMessage")?,
            pass: next_from_attrs(node, "pass")?,
            fail: next_from_attrs(node, "fail")?,
            unknown: [node.byte("unknown0")?, node.byte("unknown1")?],
            operands: parse_hex(node.text.as_deref().unwrap_or(""))?,
        }),
        "mask" => CodeVariant::Mask(MaskCode {
            message: node.byte("message")?,
            impassable: node.flag("impassable")?,
            tile: node.byte("tile")? & 0x7F,
            next: next_from_attrs(node, "next")?,
        }),
        "alter" => {
            let mut alterations = Vec::with_capacity(node.children.len());
            for child in &node.children {
                if child.tag != "alteration" {
                    return Err(tree_err(format!("<alter> cannot hold <{}>", child.tag)));
                }
                alterations.push(Alteration {
                    flags: child.byte("flags")?,
                    dx: child.signed_byte("dx")?,
                    dy: child.signed_byte("dy")?,
                    class: child.byte("class")?,
                    selector: child.byte("selector")?,
                });
            }
            if alterations.is_empty() {
                return Err(tree_err("<alter> needs at least one alteration".into()));
            }
            CodeVariant::Alter(AlterCode {
                message: node.byte("message")?,
                alterations,
                next: next_from_attrs(node, "next")?,
            })
        }
        "transition" => CodeVariant::Transition(TransitionCode {
            flags: node.byte("flags")?,
            target_x: node.signed_byte("targetX")?,
            target_y: node.signed_byte("targetY")?,
            target_map: node.byte("targetMap")?,
            next: next_from_attrs(node, "next")?,
        }),
        "radiation" => CodeVariant::Radiation(RadiationCode {
            level: node.byte("level")?,
            next: next_from_attrs(node, "next")?,
        }),
        "impassable" => CodeVariant::Impassable(ImpassableCode {
            message: node.byte("message")?,
            next: next_from_attrs(node, "next")?,
        }),
        other => return Err(tree_err(format!("unknown action code tag <{other}>"))),
    };
    Ok(ActionCode {
        offset,
        class,
        code,
    })
}

fn part_from_tree(node: &TreeNode, map_size: usize) -> Result<Part> {
    Ok(match node.tag.as_str() {
        "actionClassMap" => Part::ActionClassMap(ActionClassMap {
            size: map_size,
            cells: parse_nibble_grid(node.text.as_deref().unwrap_or(""), map_size * map_size)?,
        }),
        "actionSelectorMap" => {
            let cells = parse_hex(node.text.as_deref().unwrap_or(""))?;
            if cells.len() != map_size * map_size {
                return Err(tree_err(format!(
                    "selector map holds {} cells, expected {}",
                    cells.len(),
                    map_size * map_size
                )));
            }
            Part::ActionSelectorMap(ActionSelectorMap {
                size: map_size,
                cells,
            })
        }
        "centralDirectory" => Part::CentralDirectory(directory_from_tree(node)?),
        "mapInfo" => Part::MapInfo(MapInfo {
            offset: node.num("offset")?,
            unknown0: node.byte("unknown0")?,
            map_size: node.byte("mapSize")?,
            unknown2: node.byte("unknown2")?,
            unknown3: node.byte("unknown3")?,
            encounter_frequency: node.byte("encounterFrequency")?,
            tileset: node.byte("tileset")?,
            last_monster: node.byte("lastMonster")?,
            max_encounters: node.byte("maxEncounters")?,
            background_tile: node.byte("backgroundTile")?,
            time_factor: node.word("timeFactor")?,
            unknown11: node.byte("unknown11")?,
        }),
        "npcList" => {
            let mut records = Vec::with_capacity(node.children.len());
            for child in &node.children {
                let record = parse_hex(child.text.as_deref().unwrap_or(""))?;
                if record.len() != NPC_RECORD_SIZE {
                    return Err(tree_err(format!(
                        "npc record holds {} bytes, expected {NPC_RECORD_SIZE}",
                        record.len()
                    )));
                }
                records.push(record);
            }
            Part::NpcList(NpcList {
                offset: node.num("offset")?,
                records,
            })
        }
        "monsterNames" => {
            let mut names = Vec::with_capacity(node.children.len());
            for child in &node.children {
                names.push(parse_hex(child.text.as_deref().unwrap_or(""))?);
            }
            Part::MonsterNames(MonsterNames {
                offset: node.num("offset")?,
                names,
            })
        }
        "monsterData" => {
            let mut monsters = Vec::with_capacity(node.children.len());
            for child in &node.children {
                let bytes = parse_hex(child.text.as_deref().unwrap_or(""))?;
                let record: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| tree_err("monster record must hold 8 bytes".into()))?;
                monsters.push(record);
            }
            Part::MonsterData(MonsterData {
                offset: node.num("offset")?,
                monsters,
            })
        }
        "strings" => Part::Strings(Strings {
            offset: node.num("offset")?,
            data: parse_hex(node.text.as_deref().unwrap_or(""))?,
        }),
        "tilesMap" => Part::TilesMap(TilesMap {
            offset: node.num("offset")?,
            data: parse_hex(node.text.as_deref().unwrap_or(""))?,
        }),
        "codePointerTable" => {
            let owners: Option<Vec<u8>> = node
                .require("owners")?
                .split_whitespace()
                .map(|t| t.parse().ok())
                .collect();
            Part::CodePointerTable(CodePointerTable {
                offset: node.num("offset")?,
                entries: parse_hex_words(node.text.as_deref().unwrap_or(""))?,
                owners: owners.ok_or_else(|| tree_err("bad pointer table owners".into()))?,
            })
        }
        "unknown" => Part::Unknown(UnknownPart {
            offset: node.num("offset")?,
            data: parse_hex(node.text.as_deref().unwrap_or(""))?,
        }),
        "simple" | "check" | "mask" | "alter" | "transition" | "radiation" | "impassable" => {
            Part::ActionCode(action_from_tree(node)?)
        }
        other => return Err(tree_err(format!("unknown part tag <{other}>"))),
    })
}
