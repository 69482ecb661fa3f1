//! Top-level bindings.
//!
//! The environment maps each symbol to an entry table. A `def` entry receives its
//! value under `:value` when the defining code runs; a `var` entry holds a one
//! element array under `:ref` that code reads and writes through. Attributes given
//! to the binding form the entry's prototype.

use std::{cell::RefCell, rc::Rc};

use crate::{
    value::{ArrayRef, Symbol, Table, TableRef, Value},
    World,
};

/// What a top-level name currently refers to
#[derive(Debug, Clone)]
pub enum Binding {
    /// a `def`, or an entry that has not received its value yet (`nil`)
    Value(Value),
    /// a `var`
    Ref(ArrayRef),
}

/// Reads the binding of `symbol` from the environment
pub fn lookup(world: &World, symbol: Symbol) -> Option<Binding> {
    let Value::Table(entry) = world.env().get_own(&Value::Symbol(symbol))? else {
        return None;
    };
    let entry = entry.borrow();
    let names = world.names();
    if let Some(Value::Array(cell)) = entry.get_own(&Value::Keyword(names.reference)) {
        return Some(Binding::Ref(cell.clone()));
    }
    Some(Binding::Value(
        entry
            .get_own(&Value::Keyword(names.value))
            .cloned()
            .unwrap_or_default(),
    ))
}

fn new_entry(world: &mut World, symbol: Symbol, attributes: Option<&TableRef>) -> TableRef {
    let entry = Rc::new(RefCell::new(Table::with_proto(attributes.cloned())));
    world
        .env_mut()
        .put(Value::Symbol(symbol), Value::Table(entry.clone()));
    entry
}

/// Creates (or replaces) the entry of a `def`. The value is put into it at run time.
pub fn def_entry(world: &mut World, symbol: Symbol, attributes: Option<&TableRef>) -> TableRef {
    new_entry(world, symbol, attributes)
}

/// Creates (or replaces) the entry of a `var`, returning its reference cell
pub fn var_entry(world: &mut World, symbol: Symbol, attributes: Option<&TableRef>) -> ArrayRef {
    let cell = Rc::new(RefCell::new(vec![Value::Nil]));
    let reference = world.names().reference;
    new_entry(world, symbol, attributes)
        .borrow_mut()
        .put(Value::Keyword(reference), Value::Array(cell.clone()));
    cell
}

/// Binds `symbol` to `value` right away
pub fn define_constant(world: &mut World, symbol: Symbol, value: Value) {
    let key = world.names().value;
    new_entry(world, symbol, None)
        .borrow_mut()
        .put(Value::Keyword(key), value);
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{define_constant, def_entry, lookup, var_entry, Binding};
    use crate::{
        value::{Table, Value},
        World,
    };

    #[test]
    fn entries_resolve_by_kind() {
        let mut world = World::new();
        let x = world.intern("x");
        let y = world.intern("y");
        let z = world.intern("z");

        define_constant(&mut world, x, Value::Integer(1));
        let_assert!(Some(Binding::Value(Value::Integer(1))) = lookup(&world, x));

        let cell = var_entry(&mut world, y, None);
        let_assert!(Some(Binding::Ref(found)) = lookup(&world, y));
        check!(std::rc::Rc::ptr_eq(&cell, &found));

        // defined, but the defining code never ran
        def_entry(&mut world, z, None);
        let_assert!(Some(Binding::Value(Value::Nil)) = lookup(&world, z));

        let unknown = world.intern("unknown");
        check!(lookup(&world, unknown).is_none());
    }

    #[test]
    fn attributes_become_the_prototype() {
        let mut world = World::new();
        let x = world.intern("x");
        let private = world.intern("private");
        let Value::Table(attributes) =
            Value::table(Table::from_iter([(Value::Symbol(private), Value::Boolean(true))]))
        else {
            unreachable!()
        };

        let entry = def_entry(&mut world, x, Some(&attributes));
        check!(entry.borrow().get(&Value::Symbol(private)) == Some(Value::Boolean(true)));
        check!(entry.borrow().get_own(&Value::Symbol(private)).is_none());
    }
}
