//! A World holds the state that compilation and execution share: the interner for
//! symbols and keywords, and the environment of top-level bindings.

use lasso::Rodeo;

use crate::{
    compiler::environment::{self, Binding},
    value::{NativeFunction, Symbol, Table, TableRef, Value},
};

pub mod fuel;
pub mod value;

/// Names the compiler needs without interning them mid-compile
#[derive(Debug, Clone, Copy)]
pub(crate) struct Names {
    /// `:value`, the key of a `def` entry
    pub value: Symbol,
    /// `:ref`, the key of a `var` entry
    pub reference: Symbol,
    /// `:doc`, set from string attributes
    pub doc: Symbol,
    /// `&`, the variadic parameter marker
    pub vararg: Symbol,
    /// name given to loops recompiled as functions
    pub while_loop: Symbol,
}

pub struct World {
    /// interner
    rodeo: Rodeo,
    names: Names,
    /// top-level bindings: symbol -> entry table
    env: Table,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// A world with an empty environment
    pub fn new() -> Self {
        let mut rodeo = Rodeo::default();
        let mut intern = |s: &str| Symbol(rodeo.get_or_intern(s));
        let names = Names {
            value: intern("value"),
            reference: intern("ref"),
            doc: intern("doc"),
            vararg: intern("&"),
            while_loop: intern("_while"),
        };
        Self {
            rodeo,
            names,
            env: Table::default(),
        }
    }

    pub fn intern(&mut self, name: impl AsRef<str>) -> Symbol {
        Symbol(self.rodeo.get_or_intern(name.as_ref()))
    }

    pub fn resolve(&self, symbol: Symbol) -> &str {
        self.rodeo.resolve(&symbol.0)
    }

    pub fn rodeo(&self) -> &Rodeo {
        &self.rodeo
    }

    pub fn rodeo_mut(&mut self) -> &mut Rodeo {
        &mut self.rodeo
    }

    pub(crate) fn names(&self) -> &Names {
        &self.names
    }

    pub fn env(&self) -> &Table {
        &self.env
    }

    pub(crate) fn env_mut(&mut self) -> &mut Table {
        &mut self.env
    }

    /// Gives up the environment, leaving an empty one behind
    pub fn take_env(&mut self) -> Table {
        core::mem::take(&mut self.env)
    }

    /// The entry table of a top-level binding
    pub fn entry(&self, name: impl AsRef<str>) -> Option<TableRef> {
        let symbol = Symbol(self.rodeo.get(name.as_ref())?);
        match self.env.get_own(&Value::Symbol(symbol))? {
            Value::Table(entry) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Current value of a top-level binding
    pub fn global(&self, name: impl AsRef<str>) -> Option<Value> {
        let symbol = Symbol(self.rodeo.get(name.as_ref())?);
        match environment::lookup(self, symbol)? {
            Binding::Value(value) => Some(value),
            Binding::Ref(cell) => Some(cell.borrow().first().cloned().unwrap_or_default()),
        }
    }

    pub fn define_native(&mut self, native: NativeFunction) {
        let symbol = self.intern(native.name);
        environment::define_constant(self, symbol, Value::Native(native));
    }

    pub fn display(&self, value: &Value) -> String {
        value.display(&self.rodeo).to_string()
    }
}
