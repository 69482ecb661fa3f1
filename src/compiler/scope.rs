//! Lexical scopes and register allocation.
//!
//! Scopes live in an arena owned by the [`Compiler`] and point at their parent by
//! index. Only the innermost scope is ever popped, so the arena behaves as a stack.

use std::rc::Rc;

use bitflags::bitflags;
use log::trace;

use super::{
    bytecode::{EnvSource, FuncDef},
    slot::{Location, Slot},
    CompileError, CompileErrorKind, Compiler,
};
use crate::{
    compiler::environment::{self, Binding},
    value::{Symbol, Value},
};

/// First register kept back for temporaries once the near range runs out
const TEMP_BASE: u16 = 0xF0;
const TEMP_LAST: u16 = 0xF7;
/// Largest register index a frame may use
const MAX_REGISTER: u16 = u16::MAX - 1;

/// The temporaries the emitter juggles at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Temp {
    T0,
    T1,
    T2,
    /// slot to slot copies
    T3,
    /// loading reference boxes
    T4,
}

impl Temp {
    fn bit(self) -> u8 {
        1 << self as u8
    }

    fn register(self) -> u16 {
        TEMP_BASE + self as u16
    }
}

/// A bitset of registers in use, with a high-water mark
#[derive(Debug, Clone, Default)]
pub struct RegisterAllocator {
    chunks: Vec<u32>,
    max: Option<u16>,
    temps: u8,
}

fn is_reserved(reg: u16) -> bool {
    (TEMP_BASE..=TEMP_LAST).contains(&reg)
}

impl RegisterAllocator {
    fn chunk_for(&mut self, reg: u16) -> &mut u32 {
        let chunk = reg as usize / 32;
        while self.chunks.len() <= chunk {
            // keep the temporary range out of normal allocation
            let base = self.chunks.len() as u16 * 32;
            let reserved = (0..32)
                .filter(|bit| is_reserved(base + bit))
                .fold(0, |mask, bit| mask | 1 << bit);
            self.chunks.push(reserved);
        }
        &mut self.chunks[chunk]
    }

    fn find_free(&self) -> Option<u16> {
        let free = self
            .chunks
            .iter()
            .enumerate()
            .find(|(_, chunk)| **chunk != u32::MAX)
            .map(|(i, chunk)| i * 32 + chunk.trailing_ones() as usize)
            .unwrap_or(self.chunks.len() * 32);
        u16::try_from(free).ok().filter(|reg| *reg <= MAX_REGISTER)
    }

    /// Takes the lowest free register
    pub fn allocate(&mut self) -> Option<u16> {
        let reg = self.find_free()?;
        self.touch(reg);
        Some(reg)
    }

    /// Takes a register that fits an 8 bit operand for `temp`, falling back to the
    /// reserved temporary range when every near register is taken.
    pub fn allocate_temp(&mut self, temp: Temp) -> Option<u16> {
        debug_assert!(self.temps & temp.bit() == 0, "{temp:?} is already in use");
        self.temps |= temp.bit();
        match self.find_free()? {
            reg if reg <= 0xFF => {
                self.touch(reg);
                Some(reg)
            }
            _ => {
                let reg = temp.register();
                self.raise_max(Some(reg));
                Some(reg)
            }
        }
    }

    pub fn free_temp(&mut self, reg: u16, temp: Temp) {
        self.temps &= !temp.bit();
        if !is_reserved(reg) {
            self.free(reg);
        }
    }

    pub fn free(&mut self, reg: u16) {
        if is_reserved(reg) {
            return;
        }
        *self.chunk_for(reg) &= !(1 << (reg % 32));
    }

    /// Marks a register as used
    pub fn touch(&mut self, reg: u16) {
        *self.chunk_for(reg) |= 1 << (reg % 32);
        self.raise_max(Some(reg));
    }

    pub fn is_set(&self, reg: u16) -> bool {
        self.chunks
            .get(reg as usize / 32)
            .is_some_and(|chunk| chunk & (1 << (reg % 32)) != 0)
    }

    pub fn raise_max(&mut self, max: Option<u16>) {
        self.max = self.max.max(max);
    }

    /// Highest register ever handed out
    pub fn max(&self) -> Option<u16> {
        self.max
    }

    /// Number of registers a frame needs
    pub fn slot_count(&self) -> u16 {
        self.max.map_or(0, |max| max + 1)
    }

    /// Registers currently set, excluding the reserved temporary range
    pub fn registers(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.chunks.len() * 32)
            .map(|reg| reg as u16)
            .filter(|reg| !is_reserved(*reg) && self.is_set(*reg))
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ScopeFlags: u8 {
        /// the root scope of a top-level form
        const TOP = 1 << 0;
        /// owns a frame, and becomes a function definition
        const FUNCTION = 1 << 1;
        /// a closure was created inside
        const CLOSURE = 1 << 2;
        /// code compiled here is thrown away
        const UNUSED = 1 << 3;
        /// one of its registers is captured by a nested function
        const ENV = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(usize);

#[derive(Debug)]
pub struct Scope {
    pub(crate) name: &'static str,
    pub(crate) flags: ScopeFlags,
    pub(crate) parent: Option<ScopeId>,
    /// bindings in order of creation, searched newest first
    pub(crate) symbols: Vec<(Symbol, Slot)>,
    pub(crate) ra: RegisterAllocator,
    /// registers captured by nested functions
    pub(crate) ua: RegisterAllocator,
    // only used by function scopes
    pub(crate) consts: Vec<Value>,
    pub(crate) envs: Vec<EnvSource>,
    pub(crate) defs: Vec<Rc<FuncDef>>,
    pub(crate) bytecode_start: usize,
}

impl Scope {
    pub fn is_function(&self) -> bool {
        self.flags.contains(ScopeFlags::FUNCTION)
    }
}

impl Compiler<'_> {
    pub(crate) fn push_scope(&mut self, flags: ScopeFlags, name: &'static str) -> ScopeId {
        let parent = self.scopes.len().checked_sub(1).map(ScopeId);
        // function scopes start with a fresh frame
        let ra = match self.scopes.last() {
            Some(parent) if !flags.contains(ScopeFlags::FUNCTION) => parent.ra.clone(),
            _ => RegisterAllocator::default(),
        };
        trace!("push scope {name} ({flags:?}) at depth {}", self.scopes.len());
        self.scopes.push(Scope {
            name,
            flags,
            parent,
            symbols: vec![],
            ra,
            ua: RegisterAllocator::default(),
            consts: vec![],
            envs: vec![],
            defs: vec![],
            bytecode_start: self.buffer.len(),
        });
        ScopeId(self.scopes.len() - 1)
    }

    /// Leaves the innermost scope, handing its closure flag, register high-water mark
    /// and captured registers to the parent unless it is a function or unused scope.
    pub(crate) fn pop_scope(&mut self) -> Option<Scope> {
        let old = self.scopes.pop()?;
        trace!("pop scope {} ({:?})", old.name, old.flags);
        if !old
            .flags
            .intersects(ScopeFlags::FUNCTION | ScopeFlags::UNUSED)
        {
            if let Some(parent) = self.scopes.last_mut() {
                if old.flags.contains(ScopeFlags::CLOSURE) {
                    parent.flags |= ScopeFlags::CLOSURE;
                }
                parent.ra.raise_max(old.ra.max());
                for reg in old.ua.registers() {
                    parent.ra.touch(reg);
                    parent.ua.touch(reg);
                }
            }
        }
        Some(old)
    }

    /// Pops the innermost scope while keeping `slot`'s register alive in the parent
    pub(crate) fn pop_scope_keepslot(&mut self, slot: &Slot) {
        self.pop_scope();
        if let (Some(reg), Some(scope)) = (slot.local_register(), self.scopes.last_mut()) {
            scope.ra.touch(reg);
        }
    }

    pub(crate) fn scope(&self) -> &Scope {
        self.scopes.last().expect("compiler always has a root scope")
    }

    pub(crate) fn scope_mut(&mut self) -> &mut Scope {
        self.scopes
            .last_mut()
            .expect("compiler always has a root scope")
    }

    pub(crate) fn scope_at(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0]
    }

    pub(crate) fn function_scope_id(&self) -> ScopeId {
        let mut id = self.scopes.len() - 1;
        while !self.scopes[id].is_function() {
            match self.scopes[id].parent {
                Some(ScopeId(parent)) => id = parent,
                None => break,
            }
        }
        ScopeId(id)
    }

    /// The nearest enclosing function scope
    pub(crate) fn function_scope(&mut self) -> &mut Scope {
        let id = self.function_scope_id();
        self.scope_at(id)
    }

    pub(crate) fn allocate_far(&mut self) -> Result<u16, CompileError> {
        self.scope_mut()
            .ra
            .allocate()
            .ok_or_else(|| self.error(CompileErrorKind::TooManyRegisters))
    }

    pub(crate) fn far_slot(&mut self) -> Result<Slot, CompileError> {
        Ok(Slot::local(self.allocate_far()?))
    }

    pub(crate) fn allocate_temp(&mut self, temp: Temp) -> Result<u16, CompileError> {
        self.scope_mut()
            .ra
            .allocate_temp(temp)
            .ok_or_else(|| self.error(CompileErrorKind::TooManyRegisters))
    }

    pub(crate) fn free_temp(&mut self, reg: u16, temp: Temp) {
        self.scope_mut().ra.free_temp(reg, temp);
    }

    /// Releases a temporary register. Constants, references, named slots and
    /// upvalues are left alone.
    pub(crate) fn free_slot(&mut self, slot: &Slot) {
        if slot.is_named() {
            return;
        }
        if let Location::Local(reg) = slot.location {
            self.scope_mut().ra.free(reg);
        }
    }

    /// Binds `symbol` in the innermost scope
    pub(crate) fn name_slot(&mut self, symbol: Symbol, slot: Slot) {
        trace!("bind {} -> {:?}", self.world.resolve(symbol), slot.location);
        self.scope_mut().symbols.push((symbol, slot));
    }

    /// Finds the slot a name refers to, searching from the innermost scope out and
    /// falling back to the environment table.
    pub(crate) fn resolve(&mut self, symbol: Symbol) -> Result<Slot, CompileError> {
        let mut found_local = true;
        let mut at = Some(ScopeId(self.scopes.len() - 1));
        let mut found = None;
        while let Some(ScopeId(id)) = at {
            let scope = &self.scopes[id];
            if let Some((_, slot)) = scope.symbols.iter().rev().find(|(sym, _)| *sym == symbol) {
                found = Some((id, slot.clone()));
                break;
            }
            if scope.is_function() {
                found_local = false;
            }
            at = scope.parent;
        }

        let Some((defined_in, slot)) = found else {
            return match environment::lookup(self.world, symbol) {
                Some(Binding::Value(value)) => Ok(Slot::constant(value)),
                Some(Binding::Ref(cell)) => Ok(Slot::reference(cell)),
                None => Err(self.error(CompileErrorKind::UnboundName(
                    self.world.resolve(symbol).into(),
                ))),
            };
        };

        let reg = match slot.location {
            Location::Local(reg) if !found_local => reg,
            _ => return Ok(slot),
        };

        // expose the defining scope's register to the functions in between
        let defining = &mut self.scopes[defined_in];
        defining.flags |= ScopeFlags::ENV;
        defining.ua.touch(reg);

        let mut source = EnvSource::Frame;
        let mut env = 0;
        for scope in &mut self.scopes[defined_in + 1..] {
            if !scope.is_function() {
                continue;
            }
            env = match scope.envs.iter().position(|known| *known == source) {
                Some(known) => known,
                None => {
                    scope.envs.push(source);
                    scope.envs.len() - 1
                }
            };
            source = EnvSource::Captured(env as u16);
        }
        if env > 0xFF {
            return Err(self.error(CompileErrorKind::TooManyEnvironments));
        }
        Ok(Slot {
            flags: slot.flags,
            location: Location::Upvalue {
                env: env as u16,
                index: reg,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::{RegisterAllocator, Temp};

    #[test]
    fn allocates_lowest_free_register() {
        let mut ra = RegisterAllocator::default();
        check!(ra.allocate() == Some(0));
        check!(ra.allocate() == Some(1));
        check!(ra.allocate() == Some(2));
        ra.free(1);
        check!(ra.allocate() == Some(1));
        check!(ra.max() == Some(2));
        check!(ra.slot_count() == 3);
    }

    #[test]
    fn reserved_range_is_skipped() {
        let mut ra = RegisterAllocator::default();
        for _ in 0..0xF0 {
            ra.allocate();
        }
        check!(ra.allocate() == Some(0xF8));
        check!(!ra.registers().any(|reg| (0xF0..=0xF7).contains(&reg)));
    }

    #[test]
    fn temps_fall_back_to_reserved_registers() {
        let mut ra = RegisterAllocator::default();
        check!(ra.allocate_temp(Temp::T0) == Some(0));
        ra.free_temp(0, Temp::T0);
        check!(!ra.is_set(0));

        for _ in 0..0x100 {
            ra.allocate();
        }
        check!(ra.allocate_temp(Temp::T3) == Some(0xF3));
        ra.free_temp(0xF3, Temp::T3);
        check!(ra.allocate_temp(Temp::T3) == Some(0xF3));
    }

    #[test]
    fn clones_are_independent() {
        let mut parent = RegisterAllocator::default();
        parent.allocate();
        let mut child = parent.clone();
        check!(child.allocate() == Some(1));
        check!(!parent.is_set(1));
        parent.raise_max(child.max());
        check!(parent.slot_count() == 2);
    }
}
