use std::io::Cursor;

use bumpalo::collections::Vec;
use bumpalo::Bump;
use byteorder::{BigEndian, ReadBytesExt};
use color_eyre::eyre::{self, bail, eyre, Context, ContextCompat};
use strum::FromRepr;

/// A decoded instruction. Branch targets are indexes into the decoded instruction
/// list, not byte offsets.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Instruction<'a> {
    // Constants
    nop,
    aconst_null,
    r#const { data_type: NumberType, value: i8 },
    bipush { value: i8 },
    sipush { value: i16 },
    ldc { index: u16 },
    ldc2 { index: u16 },
    // Loads
    load { data_type: LoadStoreType, index: u16 },
    arrayload { data_type: ArrayLoadStoreType },
    // Stores
    store { data_type: LoadStoreType, index: u16 },
    arraystore { data_type: ArrayLoadStoreType },
    // Stack
    pop,
    pop2,
    dup,
    dup_x1,
    dup_x2,
    dup2,
    dup2_x1,
    dup2_x2,
    swap,
    // Math
    add { data_type: NumberType },
    sub { data_type: NumberType },
    mul { data_type: NumberType },
    div { data_type: NumberType },
    rem { data_type: NumberType },
    neg { data_type: NumberType },
    shl { data_type: IntegerType },
    shr { data_type: IntegerType },
    ushr { data_type: IntegerType },
    and { data_type: IntegerType },
    or { data_type: IntegerType },
    xor { data_type: IntegerType },
    inc { index: u16, value: i16 },
    // Conversions
    i2l,
    i2f,
    i2d,
    l2i,
    l2f,
    l2d,
    f2i,
    f2l,
    f2d,
    d2i,
    d2l,
    d2f,
    i2b,
    i2c,
    i2s,
    // Comparisons
    lcmp,
    fcmp { nan: OrdCondition },
    dcmp { nan: OrdCondition },
    r#if { condition: Condition, target: usize },
    if_icmp { condition: Condition, target: usize },
    if_acmp { condition: EqCondition, target: usize },
    // References
    getstatic { index: u16 },
    putstatic { index: u16 },
    getfield { index: u16 },
    putfield { index: u16 },
    invoke { kind: InvokeKind, index: u16 },
    new { index: u16 },
    newarray { atype: ArrayType },
    anewarray { index: u16 },
    arraylength,
    athrow,
    checkcast { index: u16 },
    instanceof { index: u16 },
    monitorenter,
    monitorexit,
    // Control
    goto { target: usize },
    tableswitch { default: usize, low: i32, targets: &'a [usize] },
    lookupswitch { default: usize, pairs: &'a [(i32, usize)] },
    r#return { data_type: ReturnType },
    // Extended
    multianewarray { index: u16, dimensions: u8 },
    ifnull { target: usize },
    ifnonnull { target: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumberType {
    Int,
    Long,
    Float,
    Double,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegerType {
    Int,
    Long,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStoreType {
    Int,
    Long,
    Float,
    Double,
    Reference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayLoadStoreType {
    Int,
    Long,
    Float,
    Double,
    Reference,
    Byte,
    Char,
    Short,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EqCondition {
    Eq,
    Ne,
}

/// Result pushed by a floating point comparison when either operand is NaN:
/// `Lt` pushes -1 (`fcmpl`), `Gt` pushes 1 (`fcmpg`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrdCondition {
    Lt,
    Gt,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
    Dynamic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnType {
    Void,
    Int,
    Long,
    Float,
    Double,
    Reference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum ArrayType {
    Boolean = 4,
    Char = 5,
    Float = 6,
    Double = 7,
    Byte = 8,
    Short = 9,
    Int = 10,
    Long = 11,
}

impl ArrayType {
    pub fn descriptor(self) -> &'static str {
        match self {
            ArrayType::Boolean => "[Z",
            ArrayType::Char => "[C",
            ArrayType::Float => "[F",
            ArrayType::Double => "[D",
            ArrayType::Byte => "[B",
            ArrayType::Short => "[S",
            ArrayType::Int => "[I",
            ArrayType::Long => "[J",
        }
    }
}

impl Condition {
    pub fn test(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Condition::Eq => ordering == Equal,
            Condition::Ne => ordering != Equal,
            Condition::Lt => ordering == Less,
            Condition::Le => ordering != Greater,
            Condition::Gt => ordering == Greater,
            Condition::Ge => ordering != Less,
        }
    }
}

impl<'a> Instruction<'a> {
    fn branch_target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Instruction::r#if { target, .. }
            | Instruction::if_icmp { target, .. }
            | Instruction::if_acmp { target, .. }
            | Instruction::goto { target }
            | Instruction::ifnull { target }
            | Instruction::ifnonnull { target } => Some(target),
            _ => None,
        }
    }
}

/// Decoded method code together with the byte offset of every instruction.
#[derive(Debug)]
pub struct Bytecode<'a> {
    pub instructions: Vec<'a, Instruction<'a>>,
    pub offsets: Vec<'a, usize>,
    pub length: usize,
}

impl<'a> Bytecode<'a> {
    pub fn index_of(&self, offset: usize) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }

    /// Like [`Bytecode::index_of`], but also accepts the offset one past the last
    /// instruction, as used by exclusive range ends.
    pub fn end_index_of(&self, offset: usize) -> Option<usize> {
        if offset == self.length {
            Some(self.instructions.len())
        } else {
            self.index_of(offset)
        }
    }
}

enum PendingSwitch {
    Table {
        index: usize,
        default: usize,
        low: i32,
        targets: std::vec::Vec<usize>,
    },
    Lookup {
        index: usize,
        default: usize,
        pairs: std::vec::Vec<(i32, usize)>,
    },
}

/// Decodes a method's bytecode, resolving every branch target to an instruction index.
pub fn decode<'a>(arena: &'a Bump, bytes: &[u8]) -> eyre::Result<Bytecode<'a>> {
    let mut code = Vec::new_in(arena);
    let mut offsets = Vec::new_in(arena);
    let mut switches = std::vec::Vec::new();
    let mut cursor = Cursor::new(bytes);

    while (cursor.position() as usize) < bytes.len() {
        let pc = cursor.position() as usize;
        let opcode = cursor.read_u8()?;
        let instruction = decode_one(opcode, pc, &mut cursor, code.len(), &mut switches)
            .wrap_err_with(|| eyre!("failed to decode opcode 0x{opcode:02x} at offset {pc}"))?;
        offsets.push(pc);
        code.push(instruction);
    }

    let index_of = |offset: usize| {
        offsets
            .binary_search(&offset)
            .map_err(|_| eyre!("branch target {offset} is not an instruction boundary"))
    };

    for instruction in code.iter_mut() {
        if let Some(target) = instruction.branch_target_mut() {
            *target = index_of(*target)?;
        }
    }

    for switch in switches {
        match switch {
            PendingSwitch::Table {
                index,
                default,
                low,
                targets,
            } => {
                let targets = targets
                    .into_iter()
                    .map(index_of)
                    .collect::<eyre::Result<std::vec::Vec<_>>>()?;
                code[index] = Instruction::tableswitch {
                    default: index_of(default)?,
                    low,
                    targets: arena.alloc_slice_copy(&targets),
                };
            }
            PendingSwitch::Lookup {
                index,
                default,
                pairs,
            } => {
                let pairs = pairs
                    .into_iter()
                    .map(|(key, target)| Ok((key, index_of(target)?)))
                    .collect::<eyre::Result<std::vec::Vec<_>>>()?;
                code[index] = Instruction::lookupswitch {
                    default: index_of(default)?,
                    pairs: arena.alloc_slice_copy(&pairs),
                };
            }
        }
    }

    Ok(Bytecode {
        instructions: code,
        offsets,
        length: bytes.len(),
    })
}

fn decode_one<'a>(
    opcode: u8,
    pc: usize,
    cursor: &mut Cursor<&[u8]>,
    index: usize,
    switches: &mut std::vec::Vec<PendingSwitch>,
) -> eyre::Result<Instruction<'a>> {
    use Instruction as I;

    let branch = |offset: i32| -> eyre::Result<usize> {
        usize::try_from(pc as i64 + offset as i64).wrap_err("branch target before start of code")
    };

    let instruction = match opcode {
        0x00 => I::nop,
        0x01 => I::aconst_null,
        0x02..=0x08 => I::r#const {
            data_type: NumberType::Int,
            value: opcode as i8 - 0x03,
        },
        0x09..=0x0a => I::r#const {
            data_type: NumberType::Long,
            value: (opcode - 0x09) as i8,
        },
        0x0b..=0x0d => I::r#const {
            data_type: NumberType::Float,
            value: (opcode - 0x0b) as i8,
        },
        0x0e..=0x0f => I::r#const {
            data_type: NumberType::Double,
            value: (opcode - 0x0e) as i8,
        },
        0x10 => I::bipush {
            value: cursor.read_i8()?,
        },
        0x11 => I::sipush {
            value: cursor.read_i16::<BigEndian>()?,
        },
        0x12 => I::ldc {
            index: cursor.read_u8()? as u16,
        },
        0x13 => I::ldc {
            index: cursor.read_u16::<BigEndian>()?,
        },
        0x14 => I::ldc2 {
            index: cursor.read_u16::<BigEndian>()?,
        },
        0x15..=0x19 => I::load {
            data_type: load_store_type(opcode - 0x15),
            index: cursor.read_u8()? as u16,
        },
        0x1a..=0x2d => I::load {
            data_type: load_store_type((opcode - 0x1a) / 4),
            index: ((opcode - 0x1a) % 4) as u16,
        },
        0x2e..=0x35 => I::arrayload {
            data_type: array_load_store_type(opcode - 0x2e),
        },
        0x36..=0x3a => I::store {
            data_type: load_store_type(opcode - 0x36),
            index: cursor.read_u8()? as u16,
        },
        0x3b..=0x4e => I::store {
            data_type: load_store_type((opcode - 0x3b) / 4),
            index: ((opcode - 0x3b) % 4) as u16,
        },
        0x4f..=0x56 => I::arraystore {
            data_type: array_load_store_type(opcode - 0x4f),
        },
        0x57 => I::pop,
        0x58 => I::pop2,
        0x59 => I::dup,
        0x5a => I::dup_x1,
        0x5b => I::dup_x2,
        0x5c => I::dup2,
        0x5d => I::dup2_x1,
        0x5e => I::dup2_x2,
        0x5f => I::swap,
        0x60..=0x63 => I::add {
            data_type: number_type(opcode - 0x60),
        },
        0x64..=0x67 => I::sub {
            data_type: number_type(opcode - 0x64),
        },
        0x68..=0x6b => I::mul {
            data_type: number_type(opcode - 0x68),
        },
        0x6c..=0x6f => I::div {
            data_type: number_type(opcode - 0x6c),
        },
        0x70..=0x73 => I::rem {
            data_type: number_type(opcode - 0x70),
        },
        0x74..=0x77 => I::neg {
            data_type: number_type(opcode - 0x74),
        },
        0x78..=0x83 => {
            let data_type = if opcode % 2 == 0 {
                IntegerType::Int
            } else {
                IntegerType::Long
            };
            match (opcode - 0x78) / 2 {
                0 => I::shl { data_type },
                1 => I::shr { data_type },
                2 => I::ushr { data_type },
                3 => I::and { data_type },
                4 => I::or { data_type },
                _ => I::xor { data_type },
            }
        }
        0x84 => I::inc {
            index: cursor.read_u8()? as u16,
            value: cursor.read_i8()? as i16,
        },
        0x85 => I::i2l,
        0x86 => I::i2f,
        0x87 => I::i2d,
        0x88 => I::l2i,
        0x89 => I::l2f,
        0x8a => I::l2d,
        0x8b => I::f2i,
        0x8c => I::f2l,
        0x8d => I::f2d,
        0x8e => I::d2i,
        0x8f => I::d2l,
        0x90 => I::d2f,
        0x91 => I::i2b,
        0x92 => I::i2c,
        0x93 => I::i2s,
        0x94 => I::lcmp,
        0x95 => I::fcmp {
            nan: OrdCondition::Lt,
        },
        0x96 => I::fcmp {
            nan: OrdCondition::Gt,
        },
        0x97 => I::dcmp {
            nan: OrdCondition::Lt,
        },
        0x98 => I::dcmp {
            nan: OrdCondition::Gt,
        },
        0x99..=0x9e => I::r#if {
            condition: condition(opcode - 0x99),
            target: branch(cursor.read_i16::<BigEndian>()? as i32)?,
        },
        0x9f..=0xa4 => I::if_icmp {
            condition: condition(opcode - 0x9f),
            target: branch(cursor.read_i16::<BigEndian>()? as i32)?,
        },
        0xa5 | 0xa6 => I::if_acmp {
            condition: if opcode == 0xa5 {
                EqCondition::Eq
            } else {
                EqCondition::Ne
            },
            target: branch(cursor.read_i16::<BigEndian>()? as i32)?,
        },
        0xa7 => I::goto {
            target: branch(cursor.read_i16::<BigEndian>()? as i32)?,
        },
        0xa8 | 0xa9 | 0xc9 => bail!("jsr/ret subroutines are not supported"),
        0xaa => {
            skip_padding(cursor, pc)?;
            let default = branch(cursor.read_i32::<BigEndian>()?)?;
            let low = cursor.read_i32::<BigEndian>()?;
            let high = cursor.read_i32::<BigEndian>()?;
            if high < low {
                bail!("tableswitch high {high} is below low {low}");
            }
            let targets = (low..=high)
                .map(|_| branch(cursor.read_i32::<BigEndian>()?))
                .collect::<eyre::Result<_>>()?;
            switches.push(PendingSwitch::Table {
                index,
                default,
                low,
                targets,
            });
            I::tableswitch {
                default,
                low,
                targets: &[],
            }
        }
        0xab => {
            skip_padding(cursor, pc)?;
            let default = branch(cursor.read_i32::<BigEndian>()?)?;
            let npairs = cursor.read_i32::<BigEndian>()?;
            let pairs = (0..npairs.max(0))
                .map(|_| {
                    let key = cursor.read_i32::<BigEndian>()?;
                    Ok((key, branch(cursor.read_i32::<BigEndian>()?)?))
                })
                .collect::<eyre::Result<_>>()?;
            switches.push(PendingSwitch::Lookup {
                index,
                default,
                pairs,
            });
            I::lookupswitch {
                default,
                pairs: &[],
            }
        }
        0xac => I::r#return {
            data_type: ReturnType::Int,
        },
        0xad => I::r#return {
            data_type: ReturnType::Long,
        },
        0xae => I::r#return {
            data_type: ReturnType::Float,
        },
        0xaf => I::r#return {
            data_type: ReturnType::Double,
        },
        0xb0 => I::r#return {
            data_type: ReturnType::Reference,
        },
        0xb1 => I::r#return {
            data_type: ReturnType::Void,
        },
        0xb2 => I::getstatic {
            index: cursor.read_u16::<BigEndian>()?,
        },
        0xb3 => I::putstatic {
            index: cursor.read_u16::<BigEndian>()?,
        },
        0xb4 => I::getfield {
            index: cursor.read_u16::<BigEndian>()?,
        },
        0xb5 => I::putfield {
            index: cursor.read_u16::<BigEndian>()?,
        },
        0xb6 => I::invoke {
            kind: InvokeKind::Virtual,
            index: cursor.read_u16::<BigEndian>()?,
        },
        0xb7 => I::invoke {
            kind: InvokeKind::Special,
            index: cursor.read_u16::<BigEndian>()?,
        },
        0xb8 => I::invoke {
            kind: InvokeKind::Static,
            index: cursor.read_u16::<BigEndian>()?,
        },
        0xb9 => {
            let index = cursor.read_u16::<BigEndian>()?;
            // count and a zero byte
            cursor.read_u16::<BigEndian>()?;
            I::invoke {
                kind: InvokeKind::Interface,
                index,
            }
        }
        0xba => {
            let index = cursor.read_u16::<BigEndian>()?;
            cursor.read_u16::<BigEndian>()?;
            I::invoke {
                kind: InvokeKind::Dynamic,
                index,
            }
        }
        0xbb => I::new {
            index: cursor.read_u16::<BigEndian>()?,
        },
        0xbc => {
            let atype = cursor.read_u8()?;
            I::newarray {
                atype: ArrayType::from_repr(atype)
                    .wrap_err_with(|| eyre!("invalid newarray type {atype}"))?,
            }
        }
        0xbd => I::anewarray {
            index: cursor.read_u16::<BigEndian>()?,
        },
        0xbe => I::arraylength,
        0xbf => I::athrow,
        0xc0 => I::checkcast {
            index: cursor.read_u16::<BigEndian>()?,
        },
        0xc1 => I::instanceof {
            index: cursor.read_u16::<BigEndian>()?,
        },
        0xc2 => I::monitorenter,
        0xc3 => I::monitorexit,
        0xc4 => {
            let opcode = cursor.read_u8()?;
            let index = cursor.read_u16::<BigEndian>()?;
            match opcode {
                0x15..=0x19 => I::load {
                    data_type: load_store_type(opcode - 0x15),
                    index,
                },
                0x36..=0x3a => I::store {
                    data_type: load_store_type(opcode - 0x36),
                    index,
                },
                0x84 => I::inc {
                    index,
                    value: cursor.read_i16::<BigEndian>()?,
                },
                _ => bail!("invalid opcode 0x{opcode:02x} after wide"),
            }
        }
        0xc5 => I::multianewarray {
            index: cursor.read_u16::<BigEndian>()?,
            dimensions: cursor.read_u8()?,
        },
        0xc6 => I::ifnull {
            target: branch(cursor.read_i16::<BigEndian>()? as i32)?,
        },
        0xc7 => I::ifnonnull {
            target: branch(cursor.read_i16::<BigEndian>()? as i32)?,
        },
        0xc8 => I::goto {
            target: branch(cursor.read_i32::<BigEndian>()?)?,
        },
        _ => bail!("unknown opcode"),
    };

    Ok(instruction)
}

fn skip_padding(cursor: &mut Cursor<&[u8]>, pc: usize) -> eyre::Result<()> {
    let padding = (4 - (pc + 1) % 4) % 4;
    for _ in 0..padding {
        cursor.read_u8()?;
    }
    Ok(())
}

fn load_store_type(n: u8) -> LoadStoreType {
    match n {
        0 => LoadStoreType::Int,
        1 => LoadStoreType::Long,
        2 => LoadStoreType::Float,
        3 => LoadStoreType::Double,
        _ => LoadStoreType::Reference,
    }
}

fn array_load_store_type(n: u8) -> ArrayLoadStoreType {
    match n {
        0 => ArrayLoadStoreType::Int,
        1 => ArrayLoadStoreType::Long,
        2 => ArrayLoadStoreType::Float,
        3 => ArrayLoadStoreType::Double,
        4 => ArrayLoadStoreType::Reference,
        5 => ArrayLoadStoreType::Byte,
        6 => ArrayLoadStoreType::Char,
        _ => ArrayLoadStoreType::Short,
    }
}

fn number_type(n: u8) -> NumberType {
    match n {
        0 => NumberType::Int,
        1 => NumberType::Long,
        2 => NumberType::Float,
        _ => NumberType::Double,
    }
}

fn condition(n: u8) -> Condition {
    match n {
        0 => Condition::Eq,
        1 => Condition::Ne,
        2 => Condition::Lt,
        3 => Condition::Ge,
        4 => Condition::Gt,
        _ => Condition::Le,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_short_forms() {
        let arena = Bump::new();
        // iload_0, iload_1, iadd, ireturn
        let code = decode(&arena, &[0x1a, 0x1b, 0x60, 0xac]).unwrap();
        assert_eq!(code.offsets.as_slice(), &[0, 1, 2, 3]);
        assert_eq!(
            code.instructions.as_slice(),
            &[
                Instruction::load {
                    data_type: LoadStoreType::Int,
                    index: 0
                },
                Instruction::load {
                    data_type: LoadStoreType::Int,
                    index: 1
                },
                Instruction::add {
                    data_type: NumberType::Int
                },
                Instruction::r#return {
                    data_type: ReturnType::Int
                },
            ]
        );
    }

    #[test]
    fn resolves_branch_targets_to_instruction_indexes() {
        let arena = Bump::new();
        // 0: iload_0
        // 1: ifle 8
        // 4: bipush 5
        // 6: ireturn
        // 7: nop
        // 8: iconst_m1
        // 9: ireturn
        let bytes = [0x1a, 0x9e, 0x00, 0x07, 0x10, 0x05, 0xac, 0x00, 0x02, 0xac];
        let code = decode(&arena, &bytes).unwrap().instructions;
        assert_eq!(
            code[1],
            Instruction::r#if {
                condition: Condition::Le,
                target: 5
            }
        );
        assert_eq!(
            code[5],
            Instruction::r#const {
                data_type: NumberType::Int,
                value: -1
            }
        );
    }

    #[test]
    fn decodes_tableswitch_with_padding() {
        let arena = Bump::new();
        #[rustfmt::skip]
        let bytes = [
            0x1a,                   // 0: iload_0
            0xaa, 0x00, 0x00,       // 1: tableswitch, padded to offset 4
            0x00, 0x00, 0x00, 0x1b, // default -> 28
            0x00, 0x00, 0x00, 0x00, // low 0
            0x00, 0x00, 0x00, 0x01, // high 1
            0x00, 0x00, 0x00, 0x17, // 0 -> 24
            0x00, 0x00, 0x00, 0x19, // 1 -> 26
            0x04, 0xac,             // 24: iconst_1, ireturn
            0x05, 0xac,             // 26: iconst_2, ireturn
            0x03, 0xac,             // 28: iconst_0, ireturn
        ];
        let code = decode(&arena, &bytes).unwrap().instructions;
        let Instruction::tableswitch {
            default,
            low,
            targets,
        } = code[1]
        else {
            panic!("expected tableswitch, got {:?}", code[1]);
        };
        assert_eq!(default, 6);
        assert_eq!(low, 0);
        assert_eq!(targets, &[2, 4]);
    }

    #[test]
    fn rejects_branch_into_operand() {
        let arena = Bump::new();
        // goto +1 lands inside its own operand
        let err = decode(&arena, &[0xa7, 0x00, 0x01]).unwrap_err();
        assert!(err.to_string().contains("not an instruction boundary"));
    }

    #[test]
    fn wide_forms_carry_16_bit_indexes() {
        let arena = Bump::new();
        let code = decode(&arena, &[0xc4, 0x84, 0x01, 0x00, 0xff, 0xfe])
            .unwrap()
            .instructions;
        assert_eq!(
            code[0],
            Instruction::inc {
                index: 256,
                value: -2
            }
        );
    }
}
