//! Binding the parts of a value to the names in a pattern.

use super::{
    bytecode::Instruction, slot::Slot, CompileError, CompileErrorKind, Compiler, FnOpts,
};
use crate::value::{Symbol, TableRef, Value};

/// Called for every name in a pattern with the slot holding its part of the value.
/// Returns whether the slot may be freed afterwards.
pub type Leaf =
    fn(&mut Compiler<'_>, Symbol, Slot, Option<&TableRef>) -> Result<bool, CompileError>;

/// The shapes a pattern can take
pub enum Pattern {
    Symbol(Symbol),
    /// a tuple or an array
    Sequence(Vec<Value>),
    /// the raw slots of a table or struct, removed keys included
    Mapping(Vec<(Value, Value)>),
}

impl Pattern {
    pub fn classify(value: &Value) -> Option<Self> {
        Some(match value {
            Value::Symbol(symbol) => Self::Symbol(*symbol),
            Value::Tuple(tuple) => Self::Sequence(tuple.items().to_vec()),
            Value::Array(items) => Self::Sequence(items.borrow().clone()),
            Value::Struct(pairs) => Self::Mapping(pairs.dict().raw_slots().to_vec()),
            Value::Table(table) => Self::Mapping(table.borrow().dict().raw_slots().to_vec()),
            _ => return None,
        })
    }
}

impl Compiler<'_> {
    /// Binds every name in `pattern` to the matching part of `source`.
    ///
    /// Returns whether `source` may be freed: composites are always done with it, a
    /// bare name leaves the decision to `leaf`.
    pub fn destructure(
        &mut self,
        pattern: &Value,
        source: Slot,
        leaf: Leaf,
        attributes: Option<&TableRef>,
    ) -> Result<bool, CompileError> {
        let Some(classified) = Pattern::classify(pattern) else {
            return Err(self.error(CompileErrorKind::DestructureType(pattern.type_name())));
        };
        match classified {
            Pattern::Symbol(symbol) => leaf(self, symbol, source, attributes),
            Pattern::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    let part = self.far_slot()?;
                    match u8::try_from(i) {
                        Ok(index) => {
                            self.emit_ssi(&part, &source, true, |dest, ds| {
                                Instruction::GetIndex { dest, ds, index }
                            })?;
                        }
                        Err(_) => {
                            let key = Slot::constant(Value::Integer(i as i64));
                            self.emit_sss(&part, &source, &key, true, |dest, ds, key| {
                                Instruction::Get { dest, ds, key }
                            })?;
                        }
                    }
                    if self.destructure(item, part.clone(), leaf, attributes)? {
                        self.free_slot(&part);
                    }
                }
                Ok(true)
            }
            Pattern::Mapping(pairs) => {
                for (key, item) in pairs.iter().filter(|(key, _)| !key.is_nil()) {
                    let part = self.far_slot()?;
                    let key = self.compile_value(FnOpts::default(), key)?;
                    self.emit_sss(&part, &source, &key, true, |dest, ds, key| {
                        Instruction::Get { dest, ds, key }
                    })?;
                    self.free_slot(&key);
                    if self.destructure(item, part.clone(), leaf, attributes)? {
                        self.free_slot(&part);
                    }
                }
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::Pattern;
    use crate::{
        reader::read_all,
        value::{Table, Value},
        Runtime, World,
    };

    #[test]
    fn patterns_are_classified_by_shape() {
        let mut world = World::new();
        let forms = read_all("a [a b] @[c] {:x a} 3 \"s\"", world.rodeo_mut()).unwrap();
        let_assert!(Some(Pattern::Symbol(_)) = Pattern::classify(&forms[0]));
        let_assert!(Some(Pattern::Sequence(items)) = Pattern::classify(&forms[1]));
        check!(items.len() == 2);
        let_assert!(Some(Pattern::Sequence(_)) = Pattern::classify(&forms[2]));
        let_assert!(Some(Pattern::Mapping(_)) = Pattern::classify(&forms[3]));
        check!(Pattern::classify(&forms[4]).is_none());
        check!(Pattern::classify(&forms[5]).is_none());
    }

    #[test]
    fn mappings_expose_removed_keys() {
        let mut table = Table::default();
        table.put(Value::Integer(1), Value::Integer(2));
        table.put(Value::Integer(3), Value::Integer(4));
        table.remove(&Value::Integer(1));
        let_assert!(Some(Pattern::Mapping(pairs)) = Pattern::classify(&Value::table(table)));
        check!(pairs.len() == 2);
        check!(pairs[0].0.is_nil());
    }

    #[test]
    fn removed_keys_bind_nothing() {
        let mut runtime = Runtime::new();
        let world = runtime.world_mut();
        let (def, a, b) = (world.intern("def"), world.intern("a"), world.intern("b"));
        let (x, y) = (world.intern("x"), world.intern("y"));

        let mut pattern = Table::default();
        pattern.put(Value::Keyword(x), Value::Symbol(a));
        pattern.put(Value::Integer(99), Value::Integer(5));
        pattern.put(Value::Keyword(y), Value::Symbol(b));
        pattern.remove(&Value::Integer(99));

        let source = runtime.read("{:x 1 :y 2}").unwrap().remove(0);
        let form = Value::tuple([Value::Symbol(def), Value::table(pattern), source]);
        let_assert!(Ok(code) = runtime.compile(&form));
        runtime.run(code).unwrap();
        check!(runtime.world().global("a") == Some(Value::Integer(1)));
        check!(runtime.world().global("b") == Some(Value::Integer(2)));
    }
}
