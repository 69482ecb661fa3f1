//! Representation of values, shared by the reader, the compiler and the VM
use core::fmt;
use std::{
    cell::RefCell,
    collections::HashMap,
    hash::{Hash, Hasher},
    rc::Rc,
};

use lasso::{Rodeo, Spur};
use logos::Span;

use crate::{compiler::bytecode::FuncDef, runtime::Arity, World};

pub type Integer = i64;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;
pub type TableRef = Rc<RefCell<Table>>;
/// The registers of one call frame. Closures keep the frames they were
/// created in alive through these handles.
pub type Registers = Rc<RefCell<Vec<Value>>>;

/// An interned name, used for both symbols and keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub(crate) Spur);

impl From<Spur> for Symbol {
    fn from(value: Spur) -> Self {
        Self(value)
    }
}

// Type that stores all possible values!
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(Integer),
    Real(f64),
    String(Rc<str>),
    Symbol(Symbol),
    Keyword(Symbol),
    Array(ArrayRef),
    Tuple(Rc<Tuple>),
    Table(TableRef),
    Struct(Rc<Struct>),
    Function(Rc<Closure>),
    Native(NativeFunction),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Rc::from(s.as_ref()))
    }

    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Tuple(Rc::new(Tuple::new(items)))
    }

    pub fn table(table: Table) -> Self {
        Self::Table(Rc::new(RefCell::new(table)))
    }

    /// `nil` and `false` are the only falsy values
    pub fn truthy(&self) -> bool {
        !matches!(self, Self::Nil | Self::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn as_integer(&self) -> Option<Integer> {
        match self {
            Self::Integer(int) => Some(*int),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Self::Symbol(sym) => Some(*sym),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::String(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Keyword(_) => "keyword",
            Self::Array(_) => "array",
            Self::Tuple(_) => "tuple",
            Self::Table(_) => "table",
            Self::Struct(_) => "struct",
            Self::Function(_) => "function",
            Self::Native(_) => "native",
        }
    }

    /// Formats a value, resolving interned names through `rodeo`
    pub fn display<'a>(&'a self, rodeo: &'a Rodeo) -> ValueDisplay<'a> {
        ValueDisplay { value: self, rodeo }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            // bitwise so that Eq and Hash agree
            (Self::Real(a), Self::Real(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Keyword(a), Self::Keyword(b)) => a == b,
            (Self::Tuple(a), Self::Tuple(b)) => a.items == b.items,
            (Self::Struct(a), Self::Struct(b)) => a == b,
            // mutable and callable values compare by identity
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Table(a), Self::Table(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => a.name == b.name,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Self::Nil => {}
            Self::Boolean(b) => b.hash(state),
            Self::Integer(i) => i.hash(state),
            Self::Real(r) => r.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Symbol(s) | Self::Keyword(s) => s.hash(state),
            Self::Tuple(t) => t.items.hash(state),
            // pair order is not part of struct equality
            Self::Struct(s) => s.dict.len().hash(state),
            Self::Array(a) => Rc::as_ptr(a).hash(state),
            Self::Table(t) => Rc::as_ptr(t).hash(state),
            Self::Function(f) => Rc::as_ptr(f).hash(state),
            Self::Native(n) => n.name.hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "Nil"),
            Self::Boolean(b) => write!(f, "Boolean({b})"),
            Self::Integer(i) => write!(f, "Integer({i})"),
            Self::Real(r) => write!(f, "Real({r:?})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Symbol(s) => write!(f, "Symbol({:?})", s.0),
            Self::Keyword(s) => write!(f, "Keyword({:?})", s.0),
            Self::Array(a) => f.debug_tuple("Array").field(&a.borrow()).finish(),
            Self::Tuple(t) => f.debug_tuple("Tuple").field(&t.items).finish(),
            Self::Table(t) => f.debug_tuple("Table").field(&t.borrow().dict).finish(),
            Self::Struct(s) => f.debug_tuple("Struct").field(&s.dict).finish(),
            Self::Function(c) => write!(f, "Function({:p})", Rc::as_ptr(c)),
            Self::Native(n) => write!(f, "Native({})", n.name),
        }
    }
}

pub struct ValueDisplay<'a> {
    value: &'a Value,
    rodeo: &'a Rodeo,
}

impl<'a> ValueDisplay<'a> {
    fn nested(&self, value: &'a Value) -> ValueDisplay<'a> {
        ValueDisplay {
            value,
            rodeo: self.rodeo,
        }
    }

    fn write_seq(
        &self,
        f: &mut fmt::Formatter<'_>,
        open: &str,
        close: &str,
        items: &[Value],
    ) -> fmt::Result {
        write!(f, "{open}")?;
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", self.nested(item))?;
        }
        write!(f, "{close}")
    }

    fn write_dict(
        &self,
        f: &mut fmt::Formatter<'_>,
        open: &str,
        dict: &Dictionary,
    ) -> fmt::Result {
        write!(f, "{open}")?;
        for (i, (key, value)) in dict.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{} {}", self.nested(key), self.nested(value))?;
        }
        write!(f, "}}")
    }
}

impl fmt::Display for ValueDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Symbol(s) => write!(f, "{}", self.rodeo.resolve(&s.0)),
            Value::Keyword(s) => write!(f, ":{}", self.rodeo.resolve(&s.0)),
            Value::Array(a) => self.write_seq(f, "@[", "]", &a.borrow()),
            Value::Tuple(t) if t.brackets => self.write_seq(f, "[", "]", &t.items),
            Value::Tuple(t) => self.write_seq(f, "(", ")", &t.items),
            Value::Table(t) => self.write_dict(f, "@{", &t.borrow().dict),
            Value::Struct(s) => self.write_dict(f, "{", &s.dict),
            Value::Function(c) => match c.def.name {
                Some(name) => write!(f, "<function {}>", self.rodeo.resolve(&name.0)),
                None => write!(f, "<function>"),
            },
            Value::Native(n) => write!(f, "<native {}>", n.name),
        }
    }
}

/// An immutable sequence. Tuples read from source remember where they came from,
/// and whether they were written with brackets (`[a b]`) instead of parentheses.
#[derive(Debug, Clone, Default)]
pub struct Tuple {
    items: Box<[Value]>,
    span: Option<Span>,
    brackets: bool,
}

impl Tuple {
    pub fn new(items: impl IntoIterator<Item = Value>) -> Self {
        Self {
            items: items.into_iter().collect(),
            span: None,
            brackets: false,
        }
    }

    pub fn bracketed(items: impl IntoIterator<Item = Value>) -> Self {
        Self {
            brackets: true,
            ..Self::new(items)
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    pub fn is_bracketed(&self) -> bool {
        self.brackets
    }
}

/// Backing storage of tables and structs.
///
/// Pairs live in a slot vector in insertion order. Removing a key leaves a
/// tombstone (a slot whose key is `nil`) behind, which [`Self::raw_slots`] exposes.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    slots: Vec<(Value, Value)>,
    index: HashMap<Value, usize>,
}

impl Dictionary {
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.index.get(key).map(|&slot| &self.slots[slot].1)
    }

    /// Inserts a pair. `nil` keys are ignored, and a `nil` value removes the key.
    pub fn insert(&mut self, key: Value, value: Value) {
        if key.is_nil() {
            return;
        }
        if value.is_nil() {
            self.remove(&key);
            return;
        }
        match self.index.get(&key) {
            Some(&slot) => self.slots[slot].1 = value,
            None => {
                self.index.insert(key.clone(), self.slots.len());
                self.slots.push((key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let slot = self.index.remove(key)?;
        let (_, value) = core::mem::take(&mut self.slots[slot]);
        Some(value)
    }

    /// Every slot of the backing storage, including tombstones
    pub fn raw_slots(&self) -> &[(Value, Value)] {
        &self.slots
    }

    /// Live pairs only
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.slots
            .iter()
            .filter(|(key, _)| !key.is_nil())
            .map(|(key, value)| (key, value))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl FromIterator<(Value, Value)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (Value, Value)>>(iter: T) -> Self {
        let mut dict = Self::default();
        for (key, value) in iter {
            dict.insert(key, value);
        }
        dict
    }
}

/// A mutable mapping. Lookups that miss fall through to the prototype chain.
#[derive(Debug, Clone, Default)]
pub struct Table {
    dict: Dictionary,
    proto: Option<TableRef>,
}

impl Table {
    pub fn with_proto(proto: Option<TableRef>) -> Self {
        Self {
            dict: Dictionary::default(),
            proto,
        }
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        match self.dict.get(key) {
            Some(value) => Some(value.clone()),
            None => self.proto.as_ref()?.borrow().get(key),
        }
    }

    pub fn get_own(&self, key: &Value) -> Option<&Value> {
        self.dict.get(key)
    }

    pub fn put(&mut self, key: Value, value: Value) {
        self.dict.insert(key, value);
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.dict.remove(key)
    }

    pub fn proto(&self) -> Option<&TableRef> {
        self.proto.as_ref()
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }
}

impl FromIterator<(Value, Value)> for Table {
    fn from_iter<T: IntoIterator<Item = (Value, Value)>>(iter: T) -> Self {
        Self {
            dict: iter.into_iter().collect(),
            proto: None,
        }
    }
}

/// An immutable mapping
#[derive(Debug, Clone, Default)]
pub struct Struct {
    dict: Dictionary,
}

impl Struct {
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.dict.get(key)
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }
}

impl PartialEq for Struct {
    fn eq(&self, other: &Self) -> bool {
        self.dict.len() == other.dict.len()
            && self
                .dict
                .iter()
                .all(|(key, value)| other.dict.get(key) == Some(value))
    }
}

impl FromIterator<(Value, Value)> for Struct {
    fn from_iter<T: IntoIterator<Item = (Value, Value)>>(iter: T) -> Self {
        Self {
            dict: iter.into_iter().collect(),
        }
    }
}

/// A function definition instantiated together with the frames it closes over
#[derive(Debug)]
pub struct Closure {
    pub def: Rc<FuncDef>,
    pub envs: Box<[Registers]>,
}

pub type NativeFn = fn(&World, &[Value]) -> Result<Value, crate::runtime::RuntimeErrorKind>;

#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: Arity,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<native {} {:?}>", self.name, self.arity)
    }
}

#[cfg(test)]
mod tests {
    use assert2::{check, let_assert};

    use super::{Dictionary, Table, Tuple, Value};

    #[test]
    fn falsy_values() {
        check!(!Value::Nil.truthy());
        check!(!Value::Boolean(false).truthy());
        check!(Value::Boolean(true).truthy());
        check!(Value::Integer(0).truthy());
        check!(Value::string("").truthy());
        check!(Value::tuple([]).truthy());
        check!(Value::array([]).truthy());
    }

    #[test]
    fn removal_leaves_tombstone() {
        let mut dict = Dictionary::default();
        dict.insert(Value::Integer(1), Value::Integer(10));
        dict.insert(Value::Integer(2), Value::Integer(20));
        dict.insert(Value::Integer(1), Value::Nil);

        check!(dict.len() == 1);
        check!(dict.raw_slots().len() == 2);
        check!(dict.raw_slots()[0].0.is_nil());
        check!(dict.iter().count() == 1);
        let_assert!(Some(Value::Integer(20)) = dict.get(&Value::Integer(2)));
    }

    #[test]
    fn tables_fall_through_to_proto() {
        let proto = Value::table(Table::from_iter([(Value::Integer(1), Value::Integer(2))]));
        let Value::Table(proto) = proto else {
            unreachable!()
        };
        let table = Table::with_proto(Some(proto));
        check!(table.get(&Value::Integer(1)) == Some(Value::Integer(2)));
        check!(table.get_own(&Value::Integer(1)).is_none());
    }

    #[test]
    fn tuple_equality_ignores_delimiters() {
        let a = Value::Tuple(Tuple::bracketed([Value::Integer(1)]).with_span(0..3).into());
        let b = Value::tuple([Value::Integer(1)]);
        check!(a == b);
        check!(Value::array([]) != Value::array([]));
    }
}
