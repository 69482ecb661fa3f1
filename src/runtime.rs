//! Runtimes read source into a world, compile it one top-level form at a time and run
//! the result.

use core::fmt;

use log::debug;
use logos::Span;

use crate::{
    compiler::{self, bytecode::FuncDef, CompileError},
    reader::{self, ReadError},
    value::Value,
    Fuel, World,
};

pub mod base;
pub mod interpreter;

/// Instructions a single top-level form may execute by default
pub const DEFAULT_FUEL: i64 = 10_000_000;

/// Argument count accepted by a procedure or special form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Min(usize),
    /// inclusive on both ends
    Range(usize, usize),
}

impl Arity {
    pub fn is_satisfied(&self, len: usize) -> bool {
        match *self {
            Self::Exact(e) => e == len,
            Self::Min(m) => m <= len,
            Self::Range(min, max) => (min..=max).contains(&len),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(e) => write!(f, "exactly {e}"),
            Self::Min(m) => write!(f, "at least {m}"),
            Self::Range(min, max) => write!(f, "{min} to {max}"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    #[error("cannot call a {0}")]
    NotCallable(&'static str),
    #[error("{name} expects {expected} argument(s), got {got}")]
    ArityMismatch {
        name: Box<str>,
        expected: Arity,
        got: usize,
    },
    #[error("expected {expected}, got {got}")]
    Type {
        expected: &'static str,
        got: &'static str,
    },
    #[error("cannot index a {0}")]
    NotIndexable(&'static str),
    #[error("cannot modify a {0}")]
    NotMutable(&'static str),
    #[error("index {0} is out of range")]
    IndexOutOfRange(i64),
    #[error("division by zero")]
    DivisionByZero,
    #[error("integer overflow")]
    Overflow,
    #[error("out of fuel")]
    OutOfFuel,
    #[error("malformed instruction {0:#010x}")]
    BadInstruction(u32),
    #[error("function ended without returning")]
    MissingReturn,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{kind}")]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// span of the form whose instruction failed
    pub span: Option<Span>,
}

/// Anything that can go wrong between source text and a value
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("read error: {0}")]
    Read(#[from] ReadError),
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl Error {
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Read(err) => Some(err.span.clone()),
            Self::Compile(err) => err.span.clone(),
            Self::Runtime(err) => err.span.clone(),
        }
    }
}

/// A world with the base library, and the fuel each top-level form may burn
pub struct Runtime {
    world: World,
    fuel: Fuel,
    budget: i64,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_fuel(DEFAULT_FUEL)
    }

    pub fn with_fuel(budget: i64) -> Self {
        let mut world = World::new();
        base::install(&mut world);
        Self {
            world,
            fuel: Fuel::with(budget),
            budget,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn read(&mut self, source: &str) -> Result<Vec<Value>, Error> {
        Ok(reader::read_all(source, self.world.rodeo_mut())?)
    }

    pub fn compile(&mut self, form: &Value) -> Result<FuncDef, Error> {
        Ok(compiler::compile(&mut self.world, form)?)
    }

    /// Runs a compiled top-level form with a full tank
    pub fn run(&mut self, def: FuncDef) -> Result<Value, Error> {
        self.fuel.refill(self.budget, self.budget);
        let value = interpreter::run(&self.world, &mut self.fuel, def.into())?;
        debug!(
            "form finished with {} fuel left",
            self.fuel.remaining()
        );
        Ok(value)
    }

    /// Reads, compiles and runs every form of `source` in order, returning the value
    /// of the last one
    pub fn eval(&mut self, source: &str) -> Result<Value, Error> {
        let mut last = Value::Nil;
        for form in self.read(source)? {
            let def = self.compile(&form)?;
            last = self.run(def)?;
        }
        Ok(last)
    }

    /// Compiles every form of `source` without running any of them.
    ///
    /// Top-level `def`s only receive their values when run, so later forms see them
    /// as `nil`.
    pub fn compile_str(&mut self, source: &str) -> Result<Vec<FuncDef>, Error> {
        self.read(source)?
            .iter()
            .map(|form| self.compile(form))
            .collect()
    }
}
