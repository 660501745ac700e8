//! Action-code records: the polymorphic, offset-linked script records
//! the engine interprets when the party steps on a square.
//!
//! Each record names a "next" action class/selector pair, forming an
//! implicit graph over the block. The record layouts are undeclared;
//! this module owns the per-class byte layouts and the handful of
//! documented bug-compatibility patches for defects in the original
//! encoder's output.

use crate::error::{Error, Result};

/// Class values 253-255 are sentinels: no selector byte follows and the
/// chain ends.
pub const CLASS_SENTINEL_MIN: u8 = 253;

/// Which record layout an action class parses as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Simple,
    Check,
    Mask,
    Alter,
    Transition,
    Radiation,
    Impassable,
}

impl ActionKind {
    /// The class-to-layout mapping of the original engine. Classes not
    /// listed here use the generic simple layout.
    pub fn for_class(class: u8) -> ActionKind {
        match class {
            2 => ActionKind::Check,
            4 => ActionKind::Mask,
            5 => ActionKind::Alter,
            7 => ActionKind::Radiation,
            8 => ActionKind::Impassable,
            10 => ActionKind::Transition,
            _ => ActionKind::Simple,
        }
    }
}

/// A "next action" reference. The selector byte is only present on
/// disk when the class is below the sentinel range, so it is `Some`
/// exactly when `class < 253`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextRef {
    pub class: u8,
    pub selector: Option<u8>,
}

impl NextRef {
    /// Chain terminator: class 0 or a sentinel class.
    pub fn terminates(&self) -> bool {
        self.class == 0 || self.class >= CLASS_SENTINEL_MIN
    }

    fn parse(c: &mut Cursor<'_>) -> Result<Self> {
        let class = c.u8()?;
        let selector = if class < CLASS_SENTINEL_MIN {
            Some(c.u8()?)
        } else {
            None
        };
        Ok(Self { class, selector })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.class);
        if let Some(selector) = self.selector {
            out.push(selector);
        }
    }

    fn size(&self) -> usize {
        if self.selector.is_some() { 2 } else { 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleCode {
    pub next: NextRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCode {
    pub flags: u8,
    pub enter_message: u8,
    pub pass_message: u8,
    pub fail_message: u8,
    pub pass: NextRef,
    pub fail: NextRef,
    pub unknown: [u8; 2],
    /// Comparison operands; on disk the list ends with 0xFF unless a
    /// bug-compat patch applies.
    pub operands: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskCode {
    pub message: u8,
    pub impassable: bool,
    /// Replacement tile, 7 bits.
    pub tile: u8,
    pub next: NextRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alteration {
    /// Bit 7 marks the last alteration of the record, bit 0 selects
    /// relative coordinates.
    pub flags: u8,
    pub dx: i8,
    pub dy: i8,
    pub class: u8,
    pub selector: u8,
}

impl Alteration {
    pub fn is_last(&self) -> bool {
        self.flags & 0x80 != 0
    }

    pub fn relative(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlterCode {
    pub message: u8,
    pub alterations: Vec<Alteration>,
    pub next: NextRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionCode {
    /// Bit 7: relative target coordinates; bit 6: ask for
    /// confirmation; low 6 bits: message index.
    pub flags: u8,
    pub target_x: i8,
    pub target_y: i8,
    pub target_map: u8,
    pub next: NextRef,
}

impl TransitionCode {
    pub fn relative(&self) -> bool {
        self.flags & 0x80 != 0
    }

    pub fn confirm(&self) -> bool {
        self.flags & 0x40 != 0
    }

    pub fn message(&self) -> u8 {
        self.flags & 0x3F
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadiationCode {
    pub level: u8,
    pub next: NextRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpassableCode {
    pub message: u8,
    pub next: NextRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeVariant {
    Simple(SimpleCode),
    Check(CheckCode),
    Mask(MaskCode),
    Alter(AlterCode),
    Transition(TransitionCode),
    Radiation(RadiationCode),
    Impassable(ImpassableCode),
}

/// One parsed action-code record and where it lives in the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCode {
    pub offset: usize,
    /// The action class this record was reached through; fixes the
    /// layout used to parse and re-serialize it.
    pub class: u8,
    pub code: CodeVariant,
}

/// Documented encoder defects in the original data, keyed by exact
/// offset and observed raw size. A patched record is stored truncated
/// on disk: a fixed operand count with no 0xFF terminator and, for two
/// of the cases, a missing fail-selector byte forced to 0xFF in
/// memory. Applied only on exact match, never heuristically.
#[derive(Debug, Clone, Copy)]
pub struct CheckPatch {
    pub offset: usize,
    pub raw_size: usize,
    pub operand_count: usize,
    pub force_fail_selector: bool,
}

pub const CHECK_PATCHES: &[CheckPatch] = &[
    CheckPatch {
        offset: 0x0A41,
        raw_size: 14,
        operand_count: 4,
        force_fail_selector: false,
    },
    CheckPatch {
        offset: 0x17C2,
        raw_size: 11,
        operand_count: 2,
        force_fail_selector: true,
    },
    CheckPatch {
        offset: 0x1D96,
        raw_size: 11,
        operand_count: 2,
        force_fail_selector: true,
    },
];

fn patch_for(offset: usize) -> Option<&'static CheckPatch> {
    CHECK_PATCHES.iter().find(|p| p.offset == offset)
}

struct Cursor<'a> {
    plain: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(plain: &'a [u8], pos: usize) -> Self {
        Self { plain, pos }
    }

    fn u8(&mut self) -> Result<u8> {
        let byte = *self
            .plain
            .get(self.pos)
            .ok_or_else(|| Error::truncated(self.pos, "action code runs past end of block"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }
}

impl ActionCode {
    pub fn parse(plain: &[u8], offset: usize, class: u8) -> Result<ActionCode> {
        let mut c = Cursor::new(plain, offset);
        let code = match ActionKind::for_class(class) {
            ActionKind::Simple => CodeVariant::Simple(SimpleCode {
                next: NextRef::parse(&mut c)?,
            }),
            ActionKind::Check => CodeVariant::Check(parse_check(&mut c, offset)?),
            ActionKind::Mask => {
                let message = c.u8()?;
                let tile_byte = c.u8()?;
                CodeVariant::Mask(MaskCode {
                    message,
                    impassable: tile_byte & 0x80 != 0,
                    tile: tile_byte & 0x7F,
                    next: NextRef::parse(&mut c)?,
                })
            }
            ActionKind::Alter => {
                let message = c.u8()?;
                let mut alterations = Vec::new();
                loop {
                    let alteration = Alteration {
                        flags: c.u8()?,
                        dx: c.i8()?,
                        dy: c.i8()?,
                        class: c.u8()?,
                        selector: c.u8()?,
                    };
                    let last = alteration.is_last();
                    alterations.push(alteration);
                    if last {
                        break;
                    }
                }
                CodeVariant::Alter(AlterCode {
                    message,
                    alterations,
                    next: NextRef::parse(&mut c)?,
                })
            }
            ActionKind::Transition => CodeVariant::Transition(TransitionCode {
                flags: c.u8()?,
                target_x: c.i8()?,
                target_y: c.i8()?,
                target_map: c.u8()?,
                next: NextRef::parse(&mut c)?,
            }),
            ActionKind::Radiation => CodeVariant::Radiation(RadiationCode {
                level: c.u8()?,
                next: NextRef::parse(&mut c)?,
            }),
            ActionKind::Impassable => CodeVariant::Impassable(ImpassableCode {
                message: c.u8()?,
                next: NextRef::parse(&mut c)?,
            }),
        };
        Ok(ActionCode {
            offset,
            class,
            code,
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        match &self.code {
            CodeVariant::Simple(simple) => simple.next.write(out),
            CodeVariant::Check(check) => write_check(check, self.offset, out),
            CodeVariant::Mask(mask) => {
                out.push(mask.message);
                out.push((mask.impassable as u8) << 7 | mask.tile & 0x7F);
                mask.next.write(out);
            }
            CodeVariant::Alter(alter) => {
                out.push(alter.message);
                for alteration in &alter.alterations {
                    out.push(alteration.flags);
                    out.push(alteration.dx as u8);
                    out.push(alteration.dy as u8);
                    out.push(alteration.class);
                    out.push(alteration.selector);
                }
                alter.next.write(out);
            }
            CodeVariant::Transition(transition) => {
                out.push(transition.flags);
                out.push(transition.target_x as u8);
                out.push(transition.target_y as u8);
                out.push(transition.target_map);
                transition.next.write(out);
            }
            CodeVariant::Radiation(radiation) => {
                out.push(radiation.level);
                radiation.next.write(out);
            }
            CodeVariant::Impassable(impassable) => {
                out.push(impassable.message);
                impassable.next.write(out);
            }
        }
    }

    pub fn size(&self) -> usize {
        match &self.code {
            CodeVariant::Simple(simple) => simple.next.size(),
            CodeVariant::Check(check) => check_size(check, self.offset),
            CodeVariant::Mask(mask) => 2 + mask.next.size(),
            CodeVariant::Alter(alter) => {
                1 + alter.alterations.len() * 5 + alter.next.size()
            }
            CodeVariant::Transition(transition) => 4 + transition.next.size(),
            CodeVariant::Radiation(radiation) => 1 + radiation.next.size(),
            CodeVariant::Impassable(impassable) => 1 + impassable.next.size(),
        }
    }
}

fn parse_check(c: &mut Cursor<'_>, offset: usize) -> Result<CheckCode> {
    if let Some(patch) = patch_for(offset) {
        let start = c.pos;
        match parse_check_patched(c, patch) {
            Ok(Some(check)) => return Ok(check),
            // Shape did not match the patch key; reparse normally.
            Ok(None) | Err(_) => c.pos = start,
        }
    }
    parse_check_normal(c)
}

fn parse_check_normal(c: &mut Cursor<'_>) -> Result<CheckCode> {
    let flags = c.u8()?;
    let enter_message = c.u8()?;
    let pass_message = c.u8()?;
    let fail_message = c.u8()?;
    let pass = NextRef::parse(c)?;
    let fail = NextRef::parse(c)?;
    let unknown = [c.u8()?, c.u8()?];
    let mut operands = Vec::new();
    loop {
        let operand = c.u8()?;
        if operand == 0xFF {
            break;
        }
        operands.push(operand);
    }
    Ok(CheckCode {
        flags,
        enter_message,
        pass_message,
        fail_message,
        pass,
        fail,
        unknown,
        operands,
    })
}

/// Parses the truncated on-disk form of a patched check. Returns
/// `Ok(None)` when the bytes do not actually have the patched shape
/// (wrong observed raw size), in which case the caller falls back to
/// the normal layout.
fn parse_check_patched(c: &mut Cursor<'_>, patch: &CheckPatch) -> Result<Option<CheckCode>> {
    let start = c.pos;
    let flags = c.u8()?;
    let enter_message = c.u8()?;
    let pass_message = c.u8()?;
    let fail_message = c.u8()?;
    let pass = NextRef::parse(c)?;
    let fail = if patch.force_fail_selector {
        let class = c.u8()?;
        NextRef {
            class,
            selector: (class < CLASS_SENTINEL_MIN).then_some(0xFF),
        }
    } else {
        NextRef::parse(c)?
    };
    let unknown = [c.u8()?, c.u8()?];
    let mut operands = Vec::with_capacity(patch.operand_count);
    for _ in 0..patch.operand_count {
        operands.push(c.u8()?);
    }
    // No terminator on disk; the record ends here.
    if c.pos - start != patch.raw_size {
        return Ok(None);
    }
    Ok(Some(CheckCode {
        flags,
        enter_message,
        pass_message,
        fail_message,
        pass,
        fail,
        unknown,
        operands,
    }))
}

fn patched_check_size(check: &CheckCode, patch: &CheckPatch) -> Option<usize> {
    if check.operands.len() != patch.operand_count {
        return None;
    }
    let fail_size = if patch.force_fail_selector {
        1
    } else {
        check.fail.size()
    };
    let size = 4 + check.pass.size() + fail_size + 2 + patch.operand_count;
    (size == patch.raw_size).then_some(size)
}

fn check_size(check: &CheckCode, offset: usize) -> usize {
    if let Some(patch) = patch_for(offset)
        && let Some(size) = patched_check_size(check, patch)
    {
        return size;
    }
    4 + check.pass.size() + check.fail.size() + 2 + check.operands.len() + 1
}

fn write_check(check: &CheckCode, offset: usize, out: &mut Vec<u8>) {
    if let Some(patch) = patch_for(offset)
        && patched_check_size(check, patch).is_some()
    {
        out.push(check.flags);
        out.push(check.enter_message);
        out.push(check.pass_message);
        out.push(check.fail_message);
        check.pass.write(out);
        if patch.force_fail_selector {
            out.push(check.fail.class);
        } else {
            check.fail.write(out);
        }
        out.extend_from_slice(&check.unknown);
        out.extend_from_slice(&check.operands);
        return;
    }

    out.push(check.flags);
    out.push(check.enter_message);
    out.push(check.pass_message);
    out.push(check.fail_message);
    check.pass.write(out);
    check.fail.write(out);
    out.extend_from_slice(&check.unknown);
    out.extend_from_slice(&check.operands);
    out.push(0xFF);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(code: &ActionCode, raw: &[u8]) {
        let mut out = Vec::new();
        code.write(&mut out);
        assert_eq!(out, raw);
        assert_eq!(code.size(), raw.len());
    }

    #[test]
    fn transition_with_sentinel_next_is_five_bytes() {
        // flags=0, x=1, y=-1, map=3, next class 255: no selector byte.
        let raw = [0x00, 0x01, 0xFF, 0x03, 0xFF];
        let mut plain = vec![0u8; 0x20];
        plain[0x10..0x15].copy_from_slice(&raw);

        let code = ActionCode::parse(&plain, 0x10, 10).unwrap();
        let CodeVariant::Transition(ref transition) = code.code else {
            panic!("class 10 must parse as a transition");
        };
        assert_eq!(transition.target_x, 1);
        assert_eq!(transition.target_y, -1);
        assert_eq!(transition.target_map, 3);
        assert_eq!(transition.next.class, 255);
        assert_eq!(transition.next.selector, None);
        assert!(transition.next.terminates());

        round_trip(&code, &raw);
    }

    #[test]
    fn transition_flag_accessors() {
        // Sentinel next class, so no selector byte follows.
        let raw = [0xC5, 0x02, 0x02, 0x01, 0xFF];
        let code = ActionCode::parse(&raw, 0, 10).unwrap();
        let CodeVariant::Transition(ref t) = code.code else {
            unreachable!()
        };
        assert!(t.relative());
        assert!(t.confirm());
        assert_eq!(t.message(), 5);
    }

    #[test]
    fn simple_code_with_selector() {
        let raw = [0x05, 0x02];
        let code = ActionCode::parse(&raw, 0, 1).unwrap();
        let CodeVariant::Simple(ref simple) = code.code else {
            unreachable!()
        };
        assert_eq!(simple.next.class, 5);
        assert_eq!(simple.next.selector, Some(2));
        round_trip(&code, &raw);
    }

    #[test]
    fn mask_splits_impassable_flag_from_tile() {
        let raw = [0x07, 0x85, 0xFF];
        let code = ActionCode::parse(&raw, 0, 4).unwrap();
        let CodeVariant::Mask(ref mask) = code.code else {
            unreachable!()
        };
        assert_eq!(mask.message, 7);
        assert!(mask.impassable);
        assert_eq!(mask.tile, 5);
        round_trip(&code, &raw);
    }

    #[test]
    fn alter_reads_subalterations_until_last_marker() {
        let raw = [
            0x09, // message
            0x01, 0x02, 0xFE, 0x04, 0x01, // alteration, relative, not last
            0x80, 0x00, 0x00, 0x00, 0x00, // last alteration
            0xFF, // next: sentinel, no selector
        ];
        let code = ActionCode::parse(&raw, 0, 5).unwrap();
        let CodeVariant::Alter(ref alter) = code.code else {
            unreachable!()
        };
        assert_eq!(alter.alterations.len(), 2);
        assert!(alter.alterations[0].relative());
        assert!(!alter.alterations[0].is_last());
        assert_eq!(alter.alterations[0].dy, -2);
        assert!(alter.alterations[1].is_last());
        round_trip(&code, &raw);
    }

    #[test]
    fn check_reads_operands_to_terminator() {
        let raw = [
            0x01, 0x02, 0x03, 0x04, // flags + messages
            0x06, 0x01, // pass
            0xFF, // fail: sentinel
            0xAA, 0xBB, // unknown
            0x11, 0x12, 0xFF, // operands + terminator
        ];
        let code = ActionCode::parse(&raw, 0, 2).unwrap();
        let CodeVariant::Check(ref check) = code.code else {
            unreachable!()
        };
        assert_eq!(check.pass.selector, Some(1));
        assert_eq!(check.fail.class, 255);
        assert_eq!(check.operands, vec![0x11, 0x12]);
        round_trip(&code, &raw);
    }

    #[test]
    fn truncated_record_is_an_error() {
        let raw = [0x00, 0x01];
        assert!(matches!(
            ActionCode::parse(&raw, 0, 10),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn check_patch_truncates_operand_list() {
        // Patched record at 0x0A41: four operands, no terminator.
        let patch = &CHECK_PATCHES[0];
        let record = [
            0x01, 0x05, 0x06, 0x07, // flags + messages
            0x02, 0x03, // pass
            0x02, 0x04, // fail
            0x00, 0x00, // unknown
            0x21, 0x22, 0x23, 0x24, // exactly four operands, defect: no 0xFF
        ];
        assert_eq!(record.len(), patch.raw_size);
        let mut plain = vec![0u8; patch.offset + record.len()];
        plain[patch.offset..].copy_from_slice(&record);

        let code = ActionCode::parse(&plain, patch.offset, 2).unwrap();
        let CodeVariant::Check(ref check) = code.code else {
            unreachable!()
        };
        assert_eq!(check.operands, vec![0x21, 0x22, 0x23, 0x24]);
        assert_eq!(code.size(), patch.raw_size);

        let mut out = Vec::new();
        code.write(&mut out);
        assert_eq!(out, record);
    }

    #[test]
    fn check_patch_forces_missing_fail_selector() {
        let patch = &CHECK_PATCHES[1];
        let record = [
            0x01, 0x05, 0x06, 0x07, // flags + messages
            0x01, 0x00, // pass
            0x02, // fail class; selector byte missing on disk
            0x00, 0x00, // unknown
            0x31, 0x32, // two operands, no terminator
        ];
        assert_eq!(record.len(), patch.raw_size);
        let mut plain = vec![0u8; patch.offset + record.len()];
        plain[patch.offset..].copy_from_slice(&record);

        let code = ActionCode::parse(&plain, patch.offset, 2).unwrap();
        let CodeVariant::Check(ref check) = code.code else {
            unreachable!()
        };
        assert_eq!(check.fail.class, 2);
        assert_eq!(check.fail.selector, Some(0xFF));

        let mut out = Vec::new();
        code.write(&mut out);
        assert_eq!(out, record);
    }

    #[test]
    fn check_patch_falls_back_when_shape_differs() {
        // A well-formed check sitting at a patch offset but with a
        // different observed size parses with the normal layout.
        let patch = &CHECK_PATCHES[0];
        let record = [
            0x01, 0x05, 0x06, 0x07, // flags + messages
            0xFF, // pass: sentinel
            0xFF, // fail: sentinel
            0x00, 0x00, // unknown
            0x41, 0xFF, // one operand + terminator
        ];
        let mut plain = vec![0u8; patch.offset + record.len()];
        plain[patch.offset..].copy_from_slice(&record);

        let code = ActionCode::parse(&plain, patch.offset, 2).unwrap();
        let CodeVariant::Check(ref check) = code.code else {
            unreachable!()
        };
        assert_eq!(check.operands, vec![0x41]);
        let mut out = Vec::new();
        code.write(&mut out);
        assert_eq!(out, record);
    }
}
