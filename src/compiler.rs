//! Compile forms into bytecode for the register machine.
//!
//! For example:
//!
//! (fn [x] (+ x x 3))
//!
//! compiles to
//!
//! ```text
//! == function <anonymous>: arity 0, slots 1 ==
//!    0  Closure r0 def0
//!    1  Return r0
//! == function <anonymous>/def0: arity 1 fixed, slots 2 ==
//!    0  LoadInteger r1 3
//!    1  Push3 r0 r0 r1
//!    2  LoadConstant r1 #0
//!    3  TailCall r1
//!   constants:
//!    0  <native +>
//! ```
//!
//! Each form is compiled with a set of [`FnOpts`]: whether its value is returned
//! (tail position), thrown away, or wanted in a particular slot. Special forms are
//! looked up in [`specials`] and everything else is a call.

use std::rc::Rc;

use bitflags::bitflags;
use log::{debug, trace};
use logos::Span;

use crate::{
    runtime::Arity,
    value::{Tuple, Value},
    World,
};

pub mod bytecode;
pub mod destructure;
mod emit;
pub mod environment;
pub mod scope;
pub mod slot;
pub mod specials;

use bytecode::{FuncDef, FuncDefFlags, Instruction};
pub use emit::{Checkpoint, PendingJump};
use scope::{Scope, ScopeFlags};
use slot::{Slot, SlotFlags};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    #[error("{form} expects {expected} argument(s), got {got}")]
    ArgumentCount {
        form: &'static str,
        expected: Arity,
        got: usize,
    },
    #[error("unknown symbol {0}")]
    UnboundName(Box<str>),
    #[error("expected a symbol")]
    NotASymbol,
    #[error("cannot set constant {0}")]
    CannotSetConstant(Box<str>),
    #[error("cannot destructure a value of type {0}")]
    DestructureType(&'static str),
    #[error("`&` must come right before the last parameter")]
    MisplacedVararg,
    #[error("expected function parameters")]
    ExpectedParameters,
    #[error("a value of type {0} cannot be binding metadata")]
    MetadataType(&'static str),
    #[error("cannot write to a constant")]
    WriteToConstant,
    #[error("too many constants")]
    TooManyConstants,
    #[error("too many closure environments")]
    TooManyEnvironments,
    #[error("jump too far")]
    JumpOutOfRange,
    #[error("ran out of registers")]
    TooManyRegisters,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    /// the innermost form being compiled when the error occurred
    pub span: Option<Span>,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OptFlags: u8 {
        /// the value is returned from the current function
        const TAIL = 1 << 0;
        /// the value is not used
        const DROP = 1 << 1;
    }
}

/// How the value of a form is going to be used
#[derive(Debug, Clone, Default)]
pub struct FnOpts {
    pub flags: OptFlags,
    /// a slot the value should end up in
    pub hint: Option<Slot>,
}

impl FnOpts {
    pub fn tail() -> Self {
        Self {
            flags: OptFlags::TAIL,
            hint: None,
        }
    }

    pub fn drop() -> Self {
        Self {
            flags: OptFlags::DROP,
            hint: None,
        }
    }

    pub fn hinted(hint: Slot) -> Self {
        Self {
            flags: OptFlags::empty(),
            hint: Some(hint),
        }
    }

    pub fn is_tail(&self) -> bool {
        self.flags.contains(OptFlags::TAIL)
    }

    pub fn is_drop(&self) -> bool {
        self.flags.contains(OptFlags::DROP)
    }
}

pub struct Compiler<'w> {
    world: &'w mut World,
    /// scope arena, innermost last
    scopes: Vec<Scope>,
    /// instructions of every function still being compiled
    buffer: Vec<u32>,
    /// source span of each instruction in `buffer`
    map_buffer: Vec<Option<Span>>,
    current_span: Option<Span>,
}

/// Compiles a top-level form into a function taking no arguments
pub fn compile(world: &mut World, form: &Value) -> Result<FuncDef, CompileError> {
    let mut compiler = Compiler::new(world);
    compiler.push_scope(ScopeFlags::FUNCTION | ScopeFlags::TOP, "root");
    compiler.compile_value(FnOpts::tail(), form)?;
    let def = compiler.pop_funcdef();
    debug!(
        "compiled {} into {} instruction(s), {} nested definition(s)",
        compiler.world.display(form),
        def.bytecode.len(),
        def.defs.len()
    );
    Ok(def)
}

impl<'w> Compiler<'w> {
    pub(crate) fn new(world: &'w mut World) -> Self {
        Self {
            world,
            scopes: vec![],
            buffer: vec![],
            map_buffer: vec![],
            current_span: None,
        }
    }

    pub(crate) fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError {
            kind,
            span: self.current_span.clone(),
        }
    }

    /// Checks the argument count of a special form
    pub(crate) fn expect_args(
        &self,
        form: &'static str,
        expected: Arity,
        args: &[Value],
    ) -> Result<(), CompileError> {
        if expected.is_satisfied(args.len()) {
            Ok(())
        } else {
            Err(self.error(CompileErrorKind::ArgumentCount {
                form,
                expected,
                got: args.len(),
            }))
        }
    }

    /// The hinted slot if it is a near register, or a fresh register
    pub(crate) fn get_target(&mut self, opts: &FnOpts) -> Result<Slot, CompileError> {
        match &opts.hint {
            Some(hint) if hint.near_register().is_some() => Ok(hint.clone()),
            _ => self.far_slot(),
        }
    }

    pub fn compile_value(&mut self, opts: FnOpts, value: &Value) -> Result<Slot, CompileError> {
        let last_span = self.current_span.clone();
        let result = self.compile_value_inner(opts, value);
        self.current_span = last_span;
        result
    }

    fn compile_value_inner(&mut self, opts: FnOpts, value: &Value) -> Result<Slot, CompileError> {
        let mut slot = match value {
            Value::Symbol(symbol) => self.resolve(*symbol)?,
            Value::Tuple(tuple) => {
                if let Some(span) = tuple.span() {
                    self.current_span = Some(span.clone());
                }
                self.compile_tuple(&opts, tuple)?
            }
            Value::Array(items) => {
                let items = items.borrow().clone();
                self.compile_maker(&opts, &items, |dest| Instruction::MakeArray { dest })?
            }
            Value::Struct(pairs) => {
                let items = flatten(pairs.dict().iter());
                self.compile_maker(&opts, &items, |dest| Instruction::MakeStruct { dest })?
            }
            Value::Table(table) => {
                let items = flatten(table.borrow().dict().iter());
                self.compile_maker(&opts, &items, |dest| Instruction::MakeTable { dest })?
            }
            _ => Slot::constant(value.clone()),
        };
        if opts.is_tail() {
            slot = self.emit_return(slot)?;
        }
        if let Some(hint) = opts.hint {
            self.copy(&hint, &slot)?;
            slot = hint;
        }
        Ok(slot)
    }

    fn compile_tuple(&mut self, opts: &FnOpts, tuple: &Rc<Tuple>) -> Result<Slot, CompileError> {
        if tuple.is_bracketed() {
            return self.compile_maker(opts, tuple.items(), |dest| Instruction::MakeTuple { dest });
        }
        let [head, args @ ..] = tuple.items() else {
            return Ok(Slot::constant(Value::Tuple(tuple.clone())));
        };
        if let Value::Symbol(symbol) = head {
            if let Some(special) = specials::lookup(self.world.resolve(*symbol)) {
                trace!("special form {}", special.name);
                return (special.compile)(self, opts.clone(), args);
            }
        }
        self.compile_call(opts, head, args)
    }

    fn compile_slots(&mut self, values: &[Value]) -> Result<Vec<Slot>, CompileError> {
        values
            .iter()
            .map(|value| self.compile_value(FnOpts::default(), value))
            .collect()
    }

    fn compile_call(
        &mut self,
        opts: &FnOpts,
        head: &Value,
        args: &[Value],
    ) -> Result<Slot, CompileError> {
        let callee = self.compile_value(FnOpts::default(), head)?;
        let slots = self.compile_slots(args)?;
        self.push_slots(&slots)?;
        let ret = if opts.is_tail() {
            self.emit_s(&callee, false, |callee| Instruction::TailCall { callee })?;
            Slot::nil().with_flags(SlotFlags::RETURNED)
        } else {
            let target = self.get_target(opts)?;
            self.emit_ss(&target, &callee, true, |dest, callee| Instruction::Call {
                dest,
                callee,
            })?;
            target
        };
        self.free_slots(&slots);
        self.free_slot(&callee);
        Ok(ret)
    }

    fn compile_maker(
        &mut self,
        opts: &FnOpts,
        items: &[Value],
        make: impl FnOnce(u8) -> Instruction,
    ) -> Result<Slot, CompileError> {
        let slots = self.compile_slots(items)?;
        self.push_slots(&slots)?;
        self.free_slots(&slots);
        let target = self.get_target(opts)?;
        self.emit_si(&target, true, make)?;
        Ok(target)
    }

    /// Compiles `value` only to report its errors; the code is discarded
    pub(crate) fn throwaway(&mut self, opts: FnOpts, value: &Value) -> Result<(), CompileError> {
        let checkpoint = self.checkpoint();
        let depth = self.scopes.len();
        self.push_scope(ScopeFlags::UNUSED, "unused");
        let result = self.compile_value(opts, value);
        self.unwind_scopes(depth);
        self.rollback(checkpoint);
        result.map(drop)
    }

    /// Pops scopes until only `depth` remain
    pub(crate) fn unwind_scopes(&mut self, depth: usize) {
        while self.scopes.len() > depth {
            self.pop_scope();
        }
    }

    /// Finishes the innermost function scope, taking its code out of the shared buffer
    pub(crate) fn pop_funcdef(&mut self) -> FuncDef {
        let scope = self
            .pop_scope()
            .expect("pop_funcdef is only called inside a function scope");
        debug_assert!(scope.is_function());
        let bytecode = self.buffer.split_off(scope.bytecode_start);
        let source_map = self.map_buffer.split_off(scope.bytecode_start);
        FuncDef {
            arity: 0,
            flags: FuncDefFlags::empty(),
            name: None,
            bytecode: bytecode.into(),
            source_map: source_map.into(),
            constants: scope.consts.into(),
            environments: scope.envs.into(),
            defs: scope.defs.into(),
            slot_count: scope.ra.slot_count(),
        }
    }

    /// Registers a nested definition with the nearest function scope
    pub(crate) fn add_funcdef(&mut self, def: FuncDef) -> Result<u16, CompileError> {
        let defs = &mut self.function_scope().defs;
        defs.push(Rc::new(def));
        let index = defs.len() - 1;
        u16::try_from(index).map_err(|_| self.error(CompileErrorKind::TooManyConstants))
    }
}

fn flatten<'a>(pairs: impl Iterator<Item = (&'a Value, &'a Value)>) -> Vec<Value> {
    pairs
        .flat_map(|(key, value)| [key.clone(), value.clone()])
        .collect()
}
