//! Emitting instructions into the shared buffer.
//!
//! Operands that must be near registers are loaded into temporaries when the slot
//! lives elsewhere, and written back afterwards when the instruction writes them.

use super::{
    bytecode::{Instruction, MAX_LONG_JUMP, MIN_LONG_JUMP},
    scope::{ScopeId, Temp},
    slot::{Location, Slot},
    CompileError, CompileErrorKind, Compiler,
};
use crate::value::Value;

/// A forward jump whose displacement is not known yet.
///
/// Must be given to [`Compiler::patch`] once the target is emitted.
#[must_use = "a pending jump must be patched"]
#[derive(Debug)]
pub struct PendingJump {
    at: usize,
}

/// A position in the output to return to when compiled code is thrown away
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    code: usize,
    function: ScopeId,
    defs: usize,
    consts: usize,
}

fn near(reg: u16) -> u8 {
    debug_assert!(reg <= 0xFF, "r{reg} used as a near register");
    reg as u8
}

impl Compiler<'_> {
    pub(crate) fn emit(&mut self, instr: Instruction) -> usize {
        let at = self.buffer.len();
        self.buffer.push(instr.encode());
        self.map_buffer.push(self.current_span.clone());
        at
    }

    /// Index the next instruction will be emitted at
    pub(crate) fn label(&self) -> usize {
        self.buffer.len()
    }

    /// Adds a constant to the current function's pool, reusing an equal one
    pub(crate) fn constant_index(&mut self, value: Value) -> Result<u16, CompileError> {
        let consts = &mut self.function_scope().consts;
        let index = match consts.iter().position(|known| *known == value) {
            Some(index) => index,
            None => {
                consts.push(value);
                consts.len() - 1
            }
        };
        u16::try_from(index).map_err(|_| self.error(CompileErrorKind::TooManyConstants))
    }

    fn load_constant(&mut self, value: &Value, dest: u8) -> Result<(), CompileError> {
        match value {
            Value::Nil => self.emit(Instruction::LoadNil { dest }),
            Value::Boolean(true) => self.emit(Instruction::LoadTrue { dest }),
            Value::Boolean(false) => self.emit(Instruction::LoadFalse { dest }),
            Value::Integer(int) if i16::try_from(*int).is_ok() => {
                self.emit(Instruction::LoadInteger {
                    dest,
                    value: *int as i16,
                })
            }
            value => {
                let index = self.constant_index(value.clone())?;
                self.emit(Instruction::LoadConstant { dest, index })
            }
        };
        Ok(())
    }

    /// Loads the value of `src` into the near register `dest`
    fn move_near(&mut self, dest: u8, src: &Slot) -> Result<(), CompileError> {
        match &src.location {
            Location::Constant(value) => self.load_constant(value, dest)?,
            Location::Ref(cell) => {
                self.load_constant(&Value::Array(cell.clone()), dest)?;
                self.emit(Instruction::GetIndex {
                    dest,
                    ds: dest,
                    index: 0,
                });
            }
            Location::Upvalue { env, index } => {
                let index = self.upvalue_register(*index)?;
                self.emit(Instruction::LoadUpvalue {
                    dest,
                    env: *env as u8,
                    index,
                });
            }
            Location::Local(src) if *src == dest as u16 => {}
            Location::Local(src) => {
                self.emit(Instruction::MoveNear { dest, src: *src });
            }
        }
        Ok(())
    }

    /// Stores the near register `src` into wherever `dest` lives
    fn move_back(&mut self, dest: &Slot, src: u8) -> Result<(), CompileError> {
        match &dest.location {
            Location::Ref(cell) => {
                let box_reg = self.allocate_temp(Temp::T4)?;
                self.load_constant(&Value::Array(cell.clone()), near(box_reg))?;
                self.emit(Instruction::PutIndex {
                    ds: near(box_reg),
                    value: src,
                    index: 0,
                });
                self.free_temp(box_reg, Temp::T4);
            }
            Location::Upvalue { env, index } => {
                let index = self.upvalue_register(*index)?;
                self.emit(Instruction::SetUpvalue {
                    src,
                    env: *env as u8,
                    index,
                });
            }
            Location::Local(dest) if *dest == src as u16 => {}
            Location::Local(dest) => {
                self.emit(Instruction::MoveFar { src, dest: *dest });
            }
            Location::Constant(_) => Err(self.error(CompileErrorKind::WriteToConstant))?,
        }
        Ok(())
    }

    fn upvalue_register(&self, index: u16) -> Result<u8, CompileError> {
        u8::try_from(index).map_err(|_| self.error(CompileErrorKind::TooManyRegisters))
    }

    /// A near register holding the value of `slot`, loading it into `temp` if needed
    pub(crate) fn near_register(&mut self, slot: &Slot, temp: Temp) -> Result<u8, CompileError> {
        if let Some(reg) = slot.near_register() {
            return Ok(reg);
        }
        let reg = near(self.allocate_temp(temp)?);
        self.move_near(reg, slot)?;
        Ok(reg)
    }

    /// Like [`Self::near_register`], but any local register will do
    pub(crate) fn far_register(&mut self, slot: &Slot, temp: Temp) -> Result<u16, CompileError> {
        match slot.local_register() {
            Some(reg) => Ok(reg),
            None => Ok(self.near_register(slot, temp)? as u16),
        }
    }

    /// Gives back a register returned by [`Self::near_register`] or [`Self::far_register`]
    pub(crate) fn release(&mut self, slot: &Slot, reg: u16, temp: Temp) {
        if slot.local_register() != Some(reg) {
            self.free_temp(reg, temp);
        }
    }

    /// Copies the value of `src` into `dest`
    pub(crate) fn copy(&mut self, dest: &Slot, src: &Slot) -> Result<(), CompileError> {
        if dest.is_constant() {
            return Err(self.error(CompileErrorKind::WriteToConstant));
        }
        if dest.same_storage(src) {
            return Ok(());
        }
        if let Some(dest) = dest.near_register() {
            return self.move_near(dest, src);
        }
        if let Some(src) = src.near_register() {
            return self.move_back(dest, src);
        }
        let through = near(self.allocate_temp(Temp::T3)?);
        self.move_near(through, src)?;
        self.move_back(dest, through)?;
        self.free_temp(through as u16, Temp::T3);
        Ok(())
    }

    /// Emits an instruction with one far operand, writing it back if `wr`
    pub(crate) fn emit_s(
        &mut self,
        slot: &Slot,
        wr: bool,
        make: impl FnOnce(u16) -> Instruction,
    ) -> Result<usize, CompileError> {
        let reg = self.far_register(slot, Temp::T0)?;
        let at = self.emit(make(reg));
        if wr {
            self.move_back(slot, near(reg))?;
        }
        self.release(slot, reg, Temp::T0);
        Ok(at)
    }

    /// Emits an instruction with one near operand and an immediate
    pub(crate) fn emit_si(
        &mut self,
        slot: &Slot,
        wr: bool,
        make: impl FnOnce(u8) -> Instruction,
    ) -> Result<usize, CompileError> {
        let reg = self.near_register(slot, Temp::T0)?;
        let at = self.emit(make(reg));
        if wr {
            self.move_back(slot, reg)?;
        }
        self.release(slot, reg as u16, Temp::T0);
        Ok(at)
    }

    /// Emits an instruction with a near and a far operand
    pub(crate) fn emit_ss(
        &mut self,
        first: &Slot,
        second: &Slot,
        wr: bool,
        make: impl FnOnce(u8, u16) -> Instruction,
    ) -> Result<usize, CompileError> {
        let a = self.near_register(first, Temp::T0)?;
        let b = self.far_register(second, Temp::T1)?;
        let at = self.emit(make(a, b));
        self.release(second, b, Temp::T1);
        if wr {
            self.move_back(first, a)?;
        }
        self.release(first, a as u16, Temp::T0);
        Ok(at)
    }

    /// Emits an instruction with two near operands and an immediate
    pub(crate) fn emit_ssi(
        &mut self,
        first: &Slot,
        second: &Slot,
        wr: bool,
        make: impl FnOnce(u8, u8) -> Instruction,
    ) -> Result<usize, CompileError> {
        let a = self.near_register(first, Temp::T0)?;
        let b = self.near_register(second, Temp::T1)?;
        let at = self.emit(make(a, b));
        self.release(second, b as u16, Temp::T1);
        if wr {
            self.move_back(first, a)?;
        }
        self.release(first, a as u16, Temp::T0);
        Ok(at)
    }

    /// Emits an instruction with three near operands
    pub(crate) fn emit_sss(
        &mut self,
        first: &Slot,
        second: &Slot,
        third: &Slot,
        wr: bool,
        make: impl FnOnce(u8, u8, u8) -> Instruction,
    ) -> Result<usize, CompileError> {
        let a = self.near_register(first, Temp::T0)?;
        let b = self.near_register(second, Temp::T1)?;
        let c = self.near_register(third, Temp::T2)?;
        let at = self.emit(make(a, b, c));
        self.release(third, c as u16, Temp::T2);
        self.release(second, b as u16, Temp::T1);
        if wr {
            self.move_back(first, a)?;
        }
        self.release(first, a as u16, Temp::T0);
        Ok(at)
    }

    /// Pushes call arguments, three at a time where possible
    pub(crate) fn push_slots(&mut self, slots: &[Slot]) -> Result<(), CompileError> {
        for chunk in slots.chunks(3) {
            match chunk {
                [a] => self.emit_s(a, false, |src| Instruction::Push { src })?,
                [a, b] => self.emit_ss(a, b, false, |a, b| Instruction::Push2 { a, b })?,
                [a, b, c] => {
                    self.emit_sss(a, b, c, false, |a, b, c| Instruction::Push3 { a, b, c })?
                }
                _ => unreachable!("chunks(3) yields one to three slots"),
            };
        }
        Ok(())
    }

    pub(crate) fn free_slots(&mut self, slots: &[Slot]) {
        for slot in slots {
            self.free_slot(slot);
        }
    }

    /// Emits a return of `slot` unless one was already emitted
    pub(crate) fn emit_return(&mut self, slot: Slot) -> Result<Slot, CompileError> {
        if slot.is_returned() {
            return Ok(slot);
        }
        if slot.is_nil_constant() {
            self.emit(Instruction::ReturnNil);
        } else {
            self.emit_s(&slot, false, |src| Instruction::Return { src })?;
        }
        Ok(slot.with_flags(super::slot::SlotFlags::RETURNED))
    }

    /// Emits an unconditional jump to be patched later
    pub(crate) fn emit_jump(&mut self) -> PendingJump {
        PendingJump {
            at: self.emit(Instruction::Jump { offset: 0 }),
        }
    }

    /// Emits a jump taken when `cond` is falsy, to be patched later
    pub(crate) fn emit_jump_if_not(&mut self, cond: &Slot) -> Result<PendingJump, CompileError> {
        let at = self.emit_si(cond, false, |cond| Instruction::JumpIfNot { cond, offset: 0 })?;
        Ok(PendingJump { at })
    }

    /// Emits a jump back to an already emitted `target`
    pub(crate) fn emit_jump_to(&mut self, target: usize) -> Result<(), CompileError> {
        let jump = self.emit_jump();
        self.patch(jump, target)
    }

    /// Points a pending jump at `target`
    pub(crate) fn patch(&mut self, jump: PendingJump, target: usize) -> Result<(), CompileError> {
        let displacement = target as i64 - jump.at as i64;
        let instr = Instruction::decode(self.buffer[jump.at]);
        let patched = match instr {
            Some(Instruction::Jump { .. })
                if (MIN_LONG_JUMP as i64..=MAX_LONG_JUMP as i64).contains(&displacement) =>
            {
                Instruction::Jump {
                    offset: displacement as i32,
                }
            }
            Some(Instruction::JumpIf { cond, .. }) if i16::try_from(displacement).is_ok() => {
                Instruction::JumpIf {
                    cond,
                    offset: displacement as i16,
                }
            }
            Some(Instruction::JumpIfNot { cond, .. }) if i16::try_from(displacement).is_ok() => {
                Instruction::JumpIfNot {
                    cond,
                    offset: displacement as i16,
                }
            }
            Some(Instruction::Jump { .. } | Instruction::JumpIf { .. } | Instruction::JumpIfNot { .. }) => {
                return Err(self.error(CompileErrorKind::JumpOutOfRange))
            }
            _ => unreachable!("pending jumps always point at jump instructions"),
        };
        self.buffer[jump.at] = patched.encode();
        Ok(())
    }

    /// Remembers how much code, and how many nested definitions and constants the
    /// current function has
    pub(crate) fn checkpoint(&mut self) -> Checkpoint {
        let function = self.function_scope_id();
        let scope = self.scope_at(function);
        let (defs, consts) = (scope.defs.len(), scope.consts.len());
        Checkpoint {
            code: self.buffer.len(),
            function,
            defs,
            consts,
        }
    }

    /// Throws away everything emitted since `checkpoint`
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        self.buffer.truncate(checkpoint.code);
        self.map_buffer.truncate(checkpoint.code);
        let scope = self.scope_at(checkpoint.function);
        scope.defs.truncate(checkpoint.defs);
        scope.consts.truncate(checkpoint.consts);
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use crate::{
        compiler::{
            bytecode::Instruction,
            scope::ScopeFlags,
            slot::{Slot, SlotFlags},
            CompileErrorKind, Compiler,
        },
        value::Value,
        World,
    };

    fn decoded(compiler: &Compiler<'_>) -> Vec<Instruction> {
        compiler
            .buffer
            .iter()
            .map(|word| Instruction::decode(*word).unwrap())
            .collect()
    }

    #[test]
    fn patched_jumps_are_relative() {
        let mut world = World::new();
        let mut compiler = Compiler::new(&mut world);
        compiler.push_scope(ScopeFlags::FUNCTION | ScopeFlags::TOP, "test");

        let cond = compiler.far_slot().unwrap();
        let forward = compiler.emit_jump_if_not(&cond).unwrap();
        compiler.emit(Instruction::Noop);
        compiler.emit(Instruction::Noop);
        compiler.emit_jump_to(0).unwrap();
        let end = compiler.label();
        compiler.patch(forward, end).unwrap();

        check!(
            decoded(&compiler)
                == [
                    Instruction::JumpIfNot { cond: 0, offset: 4 },
                    Instruction::Noop,
                    Instruction::Noop,
                    Instruction::Jump { offset: -3 },
                ]
        );
    }

    #[test]
    fn copies_between_slots() {
        let mut world = World::new();
        let mut compiler = Compiler::new(&mut world);
        compiler.push_scope(ScopeFlags::FUNCTION | ScopeFlags::TOP, "test");

        let dest = Slot::local(1).with_flags(SlotFlags::NAMED);
        compiler.copy(&dest, &Slot::local(1)).unwrap();
        check!(compiler.buffer.is_empty());

        compiler.copy(&dest, &Slot::constant(Value::Integer(7))).unwrap();
        compiler.copy(&Slot::local(0x120), &dest).unwrap();
        compiler.copy(&dest, &Slot::local(0x120)).unwrap();
        check!(
            decoded(&compiler)
                == [
                    Instruction::LoadInteger { dest: 1, value: 7 },
                    Instruction::MoveFar { src: 1, dest: 0x120 },
                    Instruction::MoveNear { dest: 1, src: 0x120 },
                ]
        );

        let_assert!(Err(err) = compiler.copy(&Slot::nil(), &dest));
        check!(err.kind == CompileErrorKind::WriteToConstant);
    }

    #[test]
    fn large_constants_go_through_the_pool() {
        let mut world = World::new();
        let mut compiler = Compiler::new(&mut world);
        compiler.push_scope(ScopeFlags::FUNCTION | ScopeFlags::TOP, "test");

        let big = Slot::constant(Value::Integer(1 << 20));
        compiler.copy(&Slot::local(0), &big).unwrap();
        compiler.copy(&Slot::local(1), &big).unwrap();
        check!(compiler.scope().consts.len() == 1);
        check!(
            decoded(&compiler)
                == [
                    Instruction::LoadConstant { dest: 0, index: 0 },
                    Instruction::LoadConstant { dest: 1, index: 0 },
                ]
        );
    }

    #[test]
    fn rollback_discards_code_and_constants() {
        let mut world = World::new();
        let mut compiler = Compiler::new(&mut world);
        compiler.push_scope(ScopeFlags::FUNCTION | ScopeFlags::TOP, "test");

        compiler.emit(Instruction::Noop);
        let checkpoint = compiler.checkpoint();
        compiler
            .copy(&Slot::local(0), &Slot::constant(Value::string("gone")))
            .unwrap();
        compiler.rollback(checkpoint);
        check!(decoded(&compiler) == [Instruction::Noop]);
        check!(compiler.map_buffer.len() == 1);
        check!(compiler.scope().consts.is_empty());
    }
}
