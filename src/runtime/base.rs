//! The native functions every runtime starts with.

use std::rc::Rc;

use super::{
    interpreter::{index_get, index_put},
    Arity, RuntimeErrorKind,
};
use crate::{
    value::{Integer, NativeFunction, Value},
    World,
};

type NativeResult = Result<Value, RuntimeErrorKind>;

const fn native(
    name: &'static str,
    arity: Arity,
    func: fn(&World, &[Value]) -> NativeResult,
) -> NativeFunction {
    NativeFunction { name, arity, func }
}

static NATIVES: [NativeFunction; 19] = [
    native("+", Arity::Min(0), add),
    native("-", Arity::Min(0), subtract),
    native("*", Arity::Min(0), multiply),
    native("/", Arity::Min(1), divide),
    native("<", Arity::Min(1), less),
    native(">", Arity::Min(1), greater),
    native("<=", Arity::Min(1), less_equal),
    native(">=", Arity::Min(1), greater_equal),
    native("=", Arity::Min(1), equal),
    native("not=", Arity::Min(1), not_equal),
    native("not", Arity::Exact(1), not),
    native("length", Arity::Exact(1), length),
    native("array-push", Arity::Min(1), array_push),
    native("get", Arity::Range(2, 3), get),
    native("put", Arity::Exact(3), put),
    native("tuple", Arity::Min(0), tuple),
    native("array", Arity::Min(0), array),
    native("type", Arity::Exact(1), type_of),
    native("print", Arity::Min(0), print),
];

/// Defines the base library in `world`
pub fn install(world: &mut World) {
    for native in &NATIVES {
        world.define_native(*native);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Integer(Integer),
    Real(f64),
}

impl Number {
    fn from_value(value: &Value) -> Result<Self, RuntimeErrorKind> {
        match value {
            Value::Integer(int) => Ok(Self::Integer(*int)),
            Value::Real(real) => Ok(Self::Real(*real)),
            other => Err(RuntimeErrorKind::Type {
                expected: "number",
                got: other.type_name(),
            }),
        }
    }

    fn real(self) -> f64 {
        match self {
            Self::Integer(int) => int as f64,
            Self::Real(real) => real,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Integer(int) => Value::Integer(int),
            Self::Real(real) => Value::Real(real),
        }
    }

    /// Integers stay integers; mixing in a real makes the result real
    fn combine(
        self,
        other: Self,
        int_op: fn(Integer, Integer) -> Option<Integer>,
        real_op: fn(f64, f64) -> f64,
    ) -> Result<Self, RuntimeErrorKind> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => int_op(a, b)
                .map(Self::Integer)
                .ok_or(RuntimeErrorKind::Overflow),
            (a, b) => Ok(Self::Real(real_op(a.real(), b.real()))),
        }
    }

    fn partial_cmp(self, other: Self) -> Option<core::cmp::Ordering> {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(&b)),
            (a, b) => a.real().partial_cmp(&b.real()),
        }
    }
}

fn fold(
    init: Number,
    args: &[Value],
    int_op: fn(Integer, Integer) -> Option<Integer>,
    real_op: fn(f64, f64) -> f64,
) -> NativeResult {
    args.iter()
        .try_fold(init, |acc, arg| {
            acc.combine(Number::from_value(arg)?, int_op, real_op)
        })
        .map(Number::into_value)
}

fn add(_: &World, args: &[Value]) -> NativeResult {
    fold(Number::Integer(0), args, Integer::checked_add, |a, b| a + b)
}

fn multiply(_: &World, args: &[Value]) -> NativeResult {
    fold(Number::Integer(1), args, Integer::checked_mul, |a, b| a * b)
}

fn subtract(_: &World, args: &[Value]) -> NativeResult {
    match args {
        [] => Ok(Value::Integer(0)),
        // negation
        [_] => fold(Number::Integer(0), args, Integer::checked_sub, |a, b| a - b),
        [first, rest @ ..] => fold(
            Number::from_value(first)?,
            rest,
            Integer::checked_sub,
            |a, b| a - b,
        ),
    }
}

fn divide(_: &World, args: &[Value]) -> NativeResult {
    let checked_div = |a: Integer, b: Integer| a.checked_div(b);
    let (init, rest) = match args {
        [only] => (Number::Integer(1), core::slice::from_ref(only)),
        [first, rest @ ..] => (Number::from_value(first)?, rest),
        [] => unreachable!("arity is checked before the call"),
    };
    rest.iter()
        .try_fold(init, |acc, arg| {
            let divisor = Number::from_value(arg)?;
            if divisor == Number::Integer(0) && matches!(acc, Number::Integer(_)) {
                return Err(RuntimeErrorKind::DivisionByZero);
            }
            acc.combine(divisor, checked_div, |a, b| a / b)
        })
        .map(Number::into_value)
}

fn compare(args: &[Value], holds: fn(core::cmp::Ordering) -> bool) -> NativeResult {
    let numbers = args
        .iter()
        .map(Number::from_value)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Boolean(numbers.windows(2).all(|pair| {
        pair[0].partial_cmp(pair[1]).is_some_and(holds)
    })))
}

fn less(_: &World, args: &[Value]) -> NativeResult {
    compare(args, core::cmp::Ordering::is_lt)
}

fn greater(_: &World, args: &[Value]) -> NativeResult {
    compare(args, core::cmp::Ordering::is_gt)
}

fn less_equal(_: &World, args: &[Value]) -> NativeResult {
    compare(args, core::cmp::Ordering::is_le)
}

fn greater_equal(_: &World, args: &[Value]) -> NativeResult {
    compare(args, core::cmp::Ordering::is_ge)
}

fn equal(_: &World, args: &[Value]) -> NativeResult {
    Ok(Value::Boolean(args.windows(2).all(|pair| pair[0] == pair[1])))
}

fn not_equal(world: &World, args: &[Value]) -> NativeResult {
    Ok(Value::Boolean(!equal(world, args)?.truthy()))
}

fn not(_: &World, args: &[Value]) -> NativeResult {
    Ok(Value::Boolean(!args[0].truthy()))
}

fn length(_: &World, args: &[Value]) -> NativeResult {
    let len = match &args[0] {
        Value::String(s) => s.len(),
        Value::Array(items) => items.borrow().len(),
        Value::Tuple(tuple) => tuple.items().len(),
        Value::Table(table) => table.borrow().dict().len(),
        Value::Struct(pairs) => pairs.dict().len(),
        other => {
            return Err(RuntimeErrorKind::Type {
                expected: "collection",
                got: other.type_name(),
            })
        }
    };
    Ok(Value::Integer(len as Integer))
}

fn array_push(_: &World, args: &[Value]) -> NativeResult {
    let Value::Array(items) = &args[0] else {
        return Err(RuntimeErrorKind::Type {
            expected: "array",
            got: args[0].type_name(),
        });
    };
    items.borrow_mut().extend(args[1..].iter().cloned());
    Ok(args[0].clone())
}

fn get(_: &World, args: &[Value]) -> NativeResult {
    match index_get(&args[0], &args[1])? {
        Value::Nil => Ok(args.get(2).cloned().unwrap_or_default()),
        value => Ok(value),
    }
}

fn put(_: &World, args: &[Value]) -> NativeResult {
    index_put(&args[0], args[1].clone(), args[2].clone())?;
    Ok(args[0].clone())
}

fn tuple(_: &World, args: &[Value]) -> NativeResult {
    Ok(Value::tuple(args.iter().cloned()))
}

fn array(_: &World, args: &[Value]) -> NativeResult {
    Ok(Value::array(args.iter().cloned()))
}

fn type_of(_: &World, args: &[Value]) -> NativeResult {
    Ok(Value::String(Rc::from(args[0].type_name())))
}

fn print(world: &World, args: &[Value]) -> NativeResult {
    let line = args
        .iter()
        .map(|arg| match arg {
            Value::String(s) => s.to_string(),
            other => world.display(other),
        })
        .collect::<Vec<_>>()
        .join(" ");
    println!("{line}");
    Ok(Value::Nil)
}
