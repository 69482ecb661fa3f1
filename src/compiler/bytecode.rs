//! Instruction words and function definitions.
//!
//! Every instruction is one 32-bit word with the opcode in the low byte. Operands sit
//! at fixed offsets:
//!
//! | field | bits   | width |
//! |-------|--------|-------|
//! | A     | 8..16  | 8     |
//! | B     | 16..24 | 8     |
//! | C     | 24..32 | 8     |
//! | E     | 16..32 | 16, optionally signed |
//! | D     | 8..32  | 24, optionally signed |
//!
//! Jump offsets are relative to the jump itself, so a jump at index `i` with offset
//! `d` continues at `i + d`.

use core::fmt;
use std::{fmt::Write as _, rc::Rc};

use bitflags::bitflags;
use lasso::Rodeo;
use logos::Span;

use crate::value::{Symbol, Value};

/// Registers at or below this index fit an 8 bit operand
pub const NEAR_LIMIT: u16 = 0xFF;
/// Largest displacement an unconditional jump can encode
pub const MAX_LONG_JUMP: i32 = (1 << 23) - 1;
/// Smallest displacement an unconditional jump can encode
pub const MIN_LONG_JUMP: i32 = -(1 << 23);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Noop,
    LoadNil,
    LoadTrue,
    LoadFalse,
    LoadInteger,
    LoadConstant,
    LoadUpvalue,
    SetUpvalue,
    LoadSelf,
    MoveNear,
    MoveFar,
    Jump,
    JumpIf,
    JumpIfNot,
    Push,
    Push2,
    Push3,
    Call,
    TailCall,
    Return,
    ReturnNil,
    Closure,
    Get,
    Put,
    GetIndex,
    PutIndex,
    MakeArray,
    MakeTuple,
    MakeTable,
    MakeStruct,
}

impl OpCode {
    const ALL: [OpCode; 30] = [
        Self::Noop,
        Self::LoadNil,
        Self::LoadTrue,
        Self::LoadFalse,
        Self::LoadInteger,
        Self::LoadConstant,
        Self::LoadUpvalue,
        Self::SetUpvalue,
        Self::LoadSelf,
        Self::MoveNear,
        Self::MoveFar,
        Self::Jump,
        Self::JumpIf,
        Self::JumpIfNot,
        Self::Push,
        Self::Push2,
        Self::Push3,
        Self::Call,
        Self::TailCall,
        Self::Return,
        Self::ReturnNil,
        Self::Closure,
        Self::Get,
        Self::Put,
        Self::GetIndex,
        Self::PutIndex,
        Self::MakeArray,
        Self::MakeTuple,
        Self::MakeTable,
        Self::MakeStruct,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }
}

/// A decoded instruction.
///
/// Field names follow the role of each operand; registers are `u8` where the
/// encoding only leaves room for a near register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Noop,
    LoadNil { dest: u8 },
    LoadTrue { dest: u8 },
    LoadFalse { dest: u8 },
    LoadInteger { dest: u8, value: i16 },
    LoadConstant { dest: u8, index: u16 },
    LoadUpvalue { dest: u8, env: u8, index: u8 },
    SetUpvalue { src: u8, env: u8, index: u8 },
    LoadSelf { dest: u8 },
    /// copy a far register into a near one
    MoveNear { dest: u8, src: u16 },
    /// copy a near register into a far one
    MoveFar { src: u8, dest: u16 },
    Jump { offset: i32 },
    JumpIf { cond: u8, offset: i16 },
    JumpIfNot { cond: u8, offset: i16 },
    Push { src: u16 },
    Push2 { a: u8, b: u16 },
    Push3 { a: u8, b: u8, c: u8 },
    Call { dest: u8, callee: u16 },
    TailCall { callee: u16 },
    Return { src: u16 },
    ReturnNil,
    Closure { dest: u8, def: u16 },
    Get { dest: u8, ds: u8, key: u8 },
    Put { ds: u8, key: u8, value: u8 },
    GetIndex { dest: u8, ds: u8, index: u8 },
    PutIndex { ds: u8, value: u8, index: u8 },
    MakeArray { dest: u8 },
    MakeTuple { dest: u8 },
    MakeTable { dest: u8 },
    MakeStruct { dest: u8 },
}

fn abc(op: OpCode, a: u8, b: u8, c: u8) -> u32 {
    op as u32 | (a as u32) << 8 | (b as u32) << 16 | (c as u32) << 24
}

fn ae(op: OpCode, a: u8, e: u16) -> u32 {
    op as u32 | (a as u32) << 8 | (e as u32) << 16
}

fn d(op: OpCode, d: u32) -> u32 {
    op as u32 | d << 8
}

impl Instruction {
    pub fn opcode(&self) -> OpCode {
        match self {
            Self::Noop => OpCode::Noop,
            Self::LoadNil { .. } => OpCode::LoadNil,
            Self::LoadTrue { .. } => OpCode::LoadTrue,
            Self::LoadFalse { .. } => OpCode::LoadFalse,
            Self::LoadInteger { .. } => OpCode::LoadInteger,
            Self::LoadConstant { .. } => OpCode::LoadConstant,
            Self::LoadUpvalue { .. } => OpCode::LoadUpvalue,
            Self::SetUpvalue { .. } => OpCode::SetUpvalue,
            Self::LoadSelf { .. } => OpCode::LoadSelf,
            Self::MoveNear { .. } => OpCode::MoveNear,
            Self::MoveFar { .. } => OpCode::MoveFar,
            Self::Jump { .. } => OpCode::Jump,
            Self::JumpIf { .. } => OpCode::JumpIf,
            Self::JumpIfNot { .. } => OpCode::JumpIfNot,
            Self::Push { .. } => OpCode::Push,
            Self::Push2 { .. } => OpCode::Push2,
            Self::Push3 { .. } => OpCode::Push3,
            Self::Call { .. } => OpCode::Call,
            Self::TailCall { .. } => OpCode::TailCall,
            Self::Return { .. } => OpCode::Return,
            Self::ReturnNil => OpCode::ReturnNil,
            Self::Closure { .. } => OpCode::Closure,
            Self::Get { .. } => OpCode::Get,
            Self::Put { .. } => OpCode::Put,
            Self::GetIndex { .. } => OpCode::GetIndex,
            Self::PutIndex { .. } => OpCode::PutIndex,
            Self::MakeArray { .. } => OpCode::MakeArray,
            Self::MakeTuple { .. } => OpCode::MakeTuple,
            Self::MakeTable { .. } => OpCode::MakeTable,
            Self::MakeStruct { .. } => OpCode::MakeStruct,
        }
    }

    pub fn encode(self) -> u32 {
        let op = self.opcode();
        match self {
            Self::Noop | Self::ReturnNil => op as u32,
            Self::LoadNil { dest }
            | Self::LoadTrue { dest }
            | Self::LoadFalse { dest }
            | Self::LoadSelf { dest }
            | Self::MakeArray { dest }
            | Self::MakeTuple { dest }
            | Self::MakeTable { dest }
            | Self::MakeStruct { dest } => abc(op, dest, 0, 0),
            Self::LoadInteger { dest, value } => ae(op, dest, value as u16),
            Self::LoadConstant { dest, index } => ae(op, dest, index),
            Self::LoadUpvalue { dest, env, index } => abc(op, dest, env, index),
            Self::SetUpvalue { src, env, index } => abc(op, src, env, index),
            Self::MoveNear { dest, src } => ae(op, dest, src),
            Self::MoveFar { src, dest } => ae(op, src, dest),
            Self::Jump { offset } => d(op, offset as u32),
            Self::JumpIf { cond, offset } | Self::JumpIfNot { cond, offset } => {
                ae(op, cond, offset as u16)
            }
            Self::Push { src } => d(op, src as u32),
            Self::Push2 { a, b } => ae(op, a, b),
            Self::Push3 { a, b, c } => abc(op, a, b, c),
            Self::Call { dest, callee } => ae(op, dest, callee),
            Self::TailCall { callee } => d(op, callee as u32),
            Self::Return { src } => d(op, src as u32),
            Self::Closure { dest, def } => ae(op, dest, def),
            Self::Get { dest, ds, key } => abc(op, dest, ds, key),
            Self::Put { ds, key, value } => abc(op, ds, key, value),
            Self::GetIndex { dest, ds, index } => abc(op, dest, ds, index),
            Self::PutIndex { ds, value, index } => abc(op, ds, value, index),
        }
    }

    pub fn decode(word: u32) -> Option<Self> {
        let a = (word >> 8) as u8;
        let b = (word >> 16) as u8;
        let c = (word >> 24) as u8;
        let e = (word >> 16) as u16;
        let es = ((word as i32) >> 16) as i16;
        let du = word >> 8;
        let ds = (word as i32) >> 8;
        Some(match OpCode::from_byte(word as u8)? {
            OpCode::Noop => Self::Noop,
            OpCode::LoadNil => Self::LoadNil { dest: a },
            OpCode::LoadTrue => Self::LoadTrue { dest: a },
            OpCode::LoadFalse => Self::LoadFalse { dest: a },
            OpCode::LoadInteger => Self::LoadInteger { dest: a, value: es },
            OpCode::LoadConstant => Self::LoadConstant { dest: a, index: e },
            OpCode::LoadUpvalue => Self::LoadUpvalue {
                dest: a,
                env: b,
                index: c,
            },
            OpCode::SetUpvalue => Self::SetUpvalue {
                src: a,
                env: b,
                index: c,
            },
            OpCode::LoadSelf => Self::LoadSelf { dest: a },
            OpCode::MoveNear => Self::MoveNear { dest: a, src: e },
            OpCode::MoveFar => Self::MoveFar { src: a, dest: e },
            OpCode::Jump => Self::Jump { offset: ds },
            OpCode::JumpIf => Self::JumpIf {
                cond: a,
                offset: es,
            },
            OpCode::JumpIfNot => Self::JumpIfNot {
                cond: a,
                offset: es,
            },
            OpCode::Push => Self::Push { src: du as u16 },
            OpCode::Push2 => Self::Push2 { a, b: e },
            OpCode::Push3 => Self::Push3 { a, b, c },
            OpCode::Call => Self::Call { dest: a, callee: e },
            OpCode::TailCall => Self::TailCall { callee: du as u16 },
            OpCode::Return => Self::Return { src: du as u16 },
            OpCode::ReturnNil => Self::ReturnNil,
            OpCode::Closure => Self::Closure { dest: a, def: e },
            OpCode::Get => Self::Get {
                dest: a,
                ds: b,
                key: c,
            },
            OpCode::Put => Self::Put {
                ds: a,
                key: b,
                value: c,
            },
            OpCode::GetIndex => Self::GetIndex {
                dest: a,
                ds: b,
                index: c,
            },
            OpCode::PutIndex => Self::PutIndex {
                ds: a,
                value: b,
                index: c,
            },
            OpCode::MakeArray => Self::MakeArray { dest: a },
            OpCode::MakeTuple => Self::MakeTuple { dest: a },
            OpCode::MakeTable => Self::MakeTable { dest: a },
            OpCode::MakeStruct => Self::MakeStruct { dest: a },
        })
    }

    /// The jump displacement, if this is a jump
    pub fn jump_offset(&self) -> Option<i32> {
        match self {
            Self::Jump { offset } => Some(*offset),
            Self::JumpIf { offset, .. } | Self::JumpIfNot { offset, .. } => Some(*offset as i32),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noop => write!(f, "Noop"),
            Self::LoadNil { dest } => write!(f, "LoadNil r{dest}"),
            Self::LoadTrue { dest } => write!(f, "LoadTrue r{dest}"),
            Self::LoadFalse { dest } => write!(f, "LoadFalse r{dest}"),
            Self::LoadInteger { dest, value } => write!(f, "LoadInteger r{dest} {value}"),
            Self::LoadConstant { dest, index } => write!(f, "LoadConstant r{dest} #{index}"),
            Self::LoadUpvalue { dest, env, index } => {
                write!(f, "LoadUpvalue r{dest} env{env}[r{index}]")
            }
            Self::SetUpvalue { src, env, index } => {
                write!(f, "SetUpvalue r{src} env{env}[r{index}]")
            }
            Self::LoadSelf { dest } => write!(f, "LoadSelf r{dest}"),
            Self::MoveNear { dest, src } => write!(f, "MoveNear r{dest} r{src}"),
            Self::MoveFar { src, dest } => write!(f, "MoveFar r{src} r{dest}"),
            Self::Jump { offset } => write!(f, "Jump {offset:+}"),
            Self::JumpIf { cond, offset } => write!(f, "JumpIf r{cond} {offset:+}"),
            Self::JumpIfNot { cond, offset } => write!(f, "JumpIfNot r{cond} {offset:+}"),
            Self::Push { src } => write!(f, "Push r{src}"),
            Self::Push2 { a, b } => write!(f, "Push2 r{a} r{b}"),
            Self::Push3 { a, b, c } => write!(f, "Push3 r{a} r{b} r{c}"),
            Self::Call { dest, callee } => write!(f, "Call r{dest} r{callee}"),
            Self::TailCall { callee } => write!(f, "TailCall r{callee}"),
            Self::Return { src } => write!(f, "Return r{src}"),
            Self::ReturnNil => write!(f, "ReturnNil"),
            Self::Closure { dest, def } => write!(f, "Closure r{dest} def{def}"),
            Self::Get { dest, ds, key } => write!(f, "Get r{dest} r{ds} r{key}"),
            Self::Put { ds, key, value } => write!(f, "Put r{ds} r{key} r{value}"),
            Self::GetIndex { dest, ds, index } => write!(f, "GetIndex r{dest} r{ds} {index}"),
            Self::PutIndex { ds, value, index } => write!(f, "PutIndex r{ds} r{value} {index}"),
            Self::MakeArray { dest } => write!(f, "MakeArray r{dest}"),
            Self::MakeTuple { dest } => write!(f, "MakeTuple r{dest}"),
            Self::MakeTable { dest } => write!(f, "MakeTable r{dest}"),
            Self::MakeStruct { dest } => write!(f, "MakeStruct r{dest}"),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FuncDefFlags: u8 {
        /// trailing arguments are collected into a tuple
        const VARARG = 1 << 0;
        /// calls must pass exactly `arity` arguments
        const FIXARITY = 1 << 1;
    }
}

/// Where a closure finds one of its environments when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvSource {
    /// the frame executing the `Closure` instruction
    Frame,
    /// an environment of the closure executing the `Closure` instruction
    Captured(u16),
}

/// A compiled function
#[derive(Debug, Default)]
pub struct FuncDef {
    pub arity: u16,
    pub flags: FuncDefFlags,
    pub name: Option<Symbol>,
    pub bytecode: Box<[u32]>,
    /// source span of each instruction, parallel to `bytecode`
    pub source_map: Box<[Option<Span>]>,
    pub constants: Box<[Value]>,
    pub environments: Box<[EnvSource]>,
    pub defs: Box<[Rc<FuncDef>]>,
    pub slot_count: u16,
}

impl FuncDef {
    pub fn is_vararg(&self) -> bool {
        self.flags.contains(FuncDefFlags::VARARG)
    }

    pub fn instructions(&self) -> impl Iterator<Item = Option<Instruction>> + '_ {
        self.bytecode.iter().map(|&word| Instruction::decode(word))
    }

    /// Human readable listing of this definition and every nested one
    pub fn disassemble(&self, rodeo: &Rodeo) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, rodeo, "")
            .expect("writing to a String cannot fail");
        out
    }

    fn disassemble_into(&self, out: &mut String, rodeo: &Rodeo, path: &str) -> fmt::Result {
        let name = self.name.map_or("<anonymous>", |name| rodeo.resolve(&name.0));
        write!(out, "== function {name}{path}: arity {}", self.arity)?;
        if self.is_vararg() {
            write!(out, "+")?;
        }
        if self.flags.contains(FuncDefFlags::FIXARITY) {
            write!(out, " fixed")?;
        }
        writeln!(out, ", slots {} ==", self.slot_count)?;
        for (at, word) in self.bytecode.iter().enumerate() {
            match Instruction::decode(*word) {
                Some(instr) => writeln!(out, "{at:>4}  {instr}")?,
                None => writeln!(out, "{at:>4}  <invalid {word:#010x}>")?,
            }
        }
        if !self.constants.is_empty() {
            writeln!(out, "  constants:")?;
            for (k, constant) in self.constants.iter().enumerate() {
                writeln!(out, "{k:>4}  {}", constant.display(rodeo))?;
            }
        }
        if !self.environments.is_empty() {
            writeln!(out, "  environments: {:?}", self.environments)?;
        }
        for (k, def) in self.defs.iter().enumerate() {
            def.disassemble_into(out, rodeo, &format!("{path}/def{k}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::{FuncDef, Instruction, OpCode, MAX_LONG_JUMP, MIN_LONG_JUMP};

    #[test]
    fn signed_fields_keep_their_sign() {
        let word = Instruction::JumpIfNot {
            cond: 3,
            offset: -7,
        }
        .encode();
        check!(word & 0xFF == OpCode::JumpIfNot as u32);
        check!((word as i32) >> 16 == -7);
        check!(
            Instruction::decode(word)
                == Some(Instruction::JumpIfNot {
                    cond: 3,
                    offset: -7
                })
        );

        for offset in [MIN_LONG_JUMP, -1, 0, 1, MAX_LONG_JUMP] {
            let word = Instruction::Jump { offset }.encode();
            check!(Instruction::decode(word) == Some(Instruction::Jump { offset }));
        }
    }

    #[test]
    fn operand_layout() {
        let word = Instruction::GetIndex {
            dest: 1,
            ds: 2,
            index: 3,
        }
        .encode();
        check!(word == 0x0302_0100 | OpCode::GetIndex as u32);

        let word = Instruction::Push { src: 0x1234 }.encode();
        check!(word >> 8 == 0x1234);
    }

    #[test]
    fn unknown_opcodes_do_not_decode() {
        check!(Instruction::decode(0xFF).is_none());
    }

    #[test]
    fn disassembly_lists_instructions() {
        let def = FuncDef {
            bytecode: [
                Instruction::LoadInteger { dest: 0, value: 5 }.encode(),
                Instruction::Return { src: 0 }.encode(),
            ]
            .into(),
            slot_count: 1,
            ..FuncDef::default()
        };
        let listing = def.disassemble(&lasso::Rodeo::default());
        let lines: Vec<&str> = listing.lines().map(str::trim).collect();
        check!(
            lines
                == [
                    "== function <anonymous>: arity 0, slots 1 ==",
                    "0  LoadInteger r0 5",
                    "1  Return r0",
                ]
        );
    }
}
