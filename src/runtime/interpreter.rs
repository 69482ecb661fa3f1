//! The register machine.
//!
//! Frames own their registers through shared handles, so closures created by a frame
//! keep reading and writing its registers after it returns. Calls do not recurse on
//! the Rust stack: a call pushes a frame and a tail call replaces the current one.

use std::{cell::RefCell, rc::Rc};

use log::trace;

use super::{Arity, RuntimeError, RuntimeErrorKind};
use crate::{
    compiler::bytecode::{EnvSource, FuncDef, FuncDefFlags, Instruction},
    value::{Closure, NativeFunction, Registers, Tuple, Value},
    Fuel, World,
};

struct Frame {
    closure: Rc<Closure>,
    registers: Registers,
    pc: usize,
    /// caller register receiving the return value
    dest: u8,
}

pub struct Interpreter<'a> {
    world: &'a World,
    fuel: &'a mut Fuel,
    frames: Vec<Frame>,
    /// arguments pushed for the next call or constructor
    args: Vec<Value>,
}

/// Runs a top-level definition as a closure of no arguments
pub fn run(world: &World, fuel: &mut Fuel, def: Rc<FuncDef>) -> Result<Value, RuntimeError> {
    let mut interpreter = Interpreter {
        world,
        fuel,
        frames: vec![],
        args: vec![],
    };
    let closure = Rc::new(Closure {
        def,
        envs: Box::new([]),
    });
    let frame = interpreter
        .frame(closure, vec![], 0)
        .map_err(|kind| RuntimeError { kind, span: None })?;
    interpreter.frames.push(frame);
    interpreter.execute()
}

impl Interpreter<'_> {
    fn execute(&mut self) -> Result<Value, RuntimeError> {
        loop {
            let frame = self.current();
            let span = frame.closure.def.source_map.get(frame.pc).cloned().flatten();
            match self.step() {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(kind) => return Err(RuntimeError { kind, span }),
            }
        }
    }

    fn current(&self) -> &Frame {
        self.frames.last().expect("a frame is always executing")
    }

    fn get(&self, reg: impl Into<usize>) -> Value {
        self.current()
            .registers
            .borrow()
            .get(reg.into())
            .cloned()
            .unwrap_or_default()
    }

    fn set(&self, reg: impl Into<usize>, value: Value) {
        let reg = reg.into();
        let mut registers = self.current().registers.borrow_mut();
        if reg >= registers.len() {
            registers.resize(reg + 1, Value::Nil);
        }
        registers[reg] = value;
    }

    fn upvalue(&self, env: u8, word: u32) -> Result<Registers, RuntimeErrorKind> {
        self.current()
            .closure
            .envs
            .get(usize::from(env))
            .cloned()
            .ok_or(RuntimeErrorKind::BadInstruction(word))
    }

    fn jump(&mut self, at: usize, offset: i32, word: u32) -> Result<(), RuntimeErrorKind> {
        let target = isize::try_from(offset)
            .ok()
            .and_then(|offset| at.checked_add_signed(offset))
            .ok_or(RuntimeErrorKind::BadInstruction(word))?;
        self.frames
            .last_mut()
            .expect("a frame is always executing")
            .pc = target;
        Ok(())
    }

    /// Executes one instruction, returning the final value once the outermost frame
    /// returns
    fn step(&mut self) -> Result<Option<Value>, RuntimeErrorKind> {
        if !self.fuel.should_continue() {
            return Err(RuntimeErrorKind::OutOfFuel);
        }
        self.fuel.consume(1);

        let (at, word) = {
            let frame = self.frames.last_mut().expect("a frame is always executing");
            let at = frame.pc;
            let word = *frame
                .closure
                .def
                .bytecode
                .get(at)
                .ok_or(RuntimeErrorKind::MissingReturn)?;
            frame.pc += 1;
            (at, word)
        };
        let instr = Instruction::decode(word).ok_or(RuntimeErrorKind::BadInstruction(word))?;
        trace!("{at:>4}  {instr}");

        match instr {
            Instruction::Noop => {}
            Instruction::LoadNil { dest } => self.set(dest, Value::Nil),
            Instruction::LoadTrue { dest } => self.set(dest, Value::Boolean(true)),
            Instruction::LoadFalse { dest } => self.set(dest, Value::Boolean(false)),
            Instruction::LoadInteger { dest, value } => {
                self.set(dest, Value::Integer(value.into()))
            }
            Instruction::LoadConstant { dest, index } => {
                let value = self
                    .current()
                    .closure
                    .def
                    .constants
                    .get(usize::from(index))
                    .cloned()
                    .ok_or(RuntimeErrorKind::BadInstruction(word))?;
                self.set(dest, value);
            }
            Instruction::LoadUpvalue { dest, env, index } => {
                let env = self.upvalue(env, word)?;
                let value = env
                    .borrow()
                    .get(usize::from(index))
                    .cloned()
                    .unwrap_or_default();
                self.set(dest, value);
            }
            Instruction::SetUpvalue { src, env, index } => {
                let value = self.get(src);
                let env = self.upvalue(env, word)?;
                let mut registers = env.borrow_mut();
                let index = usize::from(index);
                if index >= registers.len() {
                    registers.resize(index + 1, Value::Nil);
                }
                registers[index] = value;
            }
            Instruction::LoadSelf { dest } => {
                let closure = self.current().closure.clone();
                self.set(dest, Value::Function(closure));
            }
            Instruction::MoveNear { dest, src } => self.set(dest, self.get(src)),
            Instruction::MoveFar { src, dest } => self.set(dest, self.get(src)),
            Instruction::Jump { offset } => self.jump(at, offset, word)?,
            Instruction::JumpIf { cond, offset } => {
                if self.get(cond).truthy() {
                    self.jump(at, offset.into(), word)?;
                }
            }
            Instruction::JumpIfNot { cond, offset } => {
                if !self.get(cond).truthy() {
                    self.jump(at, offset.into(), word)?;
                }
            }
            Instruction::Push { src } => {
                let value = self.get(src);
                self.args.push(value);
            }
            Instruction::Push2 { a, b } => {
                let values = [self.get(a), self.get(b)];
                self.args.extend(values);
            }
            Instruction::Push3 { a, b, c } => {
                let values = [self.get(a), self.get(b), self.get(c)];
                self.args.extend(values);
            }
            Instruction::Call { dest, callee } => {
                let callee = self.get(callee);
                let args = core::mem::take(&mut self.args);
                self.call(callee, args, dest)?;
            }
            Instruction::TailCall { callee } => {
                let callee = self.get(callee);
                let args = core::mem::take(&mut self.args);
                return self.tail_call(callee, args);
            }
            Instruction::Return { src } => {
                let value = self.get(src);
                return Ok(self.ret(value));
            }
            Instruction::ReturnNil => return Ok(self.ret(Value::Nil)),
            Instruction::Closure { dest, def } => {
                let closure = self.instantiate(def, word)?;
                self.set(dest, Value::Function(closure));
            }
            Instruction::Get { dest, ds, key } => {
                let value = index_get(&self.get(ds), &self.get(key))?;
                self.set(dest, value);
            }
            Instruction::Put { ds, key, value } => {
                index_put(&self.get(ds), self.get(key), self.get(value))?;
            }
            Instruction::GetIndex { dest, ds, index } => {
                let value = index_get(&self.get(ds), &Value::Integer(index.into()))?;
                self.set(dest, value);
            }
            Instruction::PutIndex { ds, value, index } => {
                index_put(&self.get(ds), Value::Integer(index.into()), self.get(value))?;
            }
            Instruction::MakeArray { dest } => {
                let items = core::mem::take(&mut self.args);
                self.set(dest, Value::array(items));
            }
            Instruction::MakeTuple { dest } => {
                let items = core::mem::take(&mut self.args);
                self.set(dest, Value::Tuple(Rc::new(Tuple::bracketed(items))));
            }
            Instruction::MakeTable { dest } => {
                let items = core::mem::take(&mut self.args);
                let table = pairs(items)?.into_iter().collect();
                self.set(dest, Value::table(table));
            }
            Instruction::MakeStruct { dest } => {
                let items = core::mem::take(&mut self.args);
                let pairs = pairs(items)?.into_iter().collect();
                self.set(dest, Value::Struct(Rc::new(pairs)));
            }
        }
        Ok(None)
    }

    /// Creates a closure over nested definition `def` of the current function
    fn instantiate(&self, def: u16, word: u32) -> Result<Rc<Closure>, RuntimeErrorKind> {
        let frame = self.current();
        let def = frame
            .closure
            .def
            .defs
            .get(usize::from(def))
            .cloned()
            .ok_or(RuntimeErrorKind::BadInstruction(word))?;
        let envs = def
            .environments
            .iter()
            .map(|source| match *source {
                EnvSource::Frame => Some(frame.registers.clone()),
                EnvSource::Captured(env) => frame.closure.envs.get(usize::from(env)).cloned(),
            })
            .collect::<Option<Box<[_]>>>()
            .ok_or(RuntimeErrorKind::BadInstruction(word))?;
        Ok(Rc::new(Closure { def, envs }))
    }

    fn name_of(&self, def: &FuncDef) -> Box<str> {
        def.name
            .map_or("<anonymous>", |name| self.world.resolve(name))
            .into()
    }

    /// A fresh frame for calling `closure` with `args`
    fn frame(
        &self,
        closure: Rc<Closure>,
        mut args: Vec<Value>,
        dest: u8,
    ) -> Result<Frame, RuntimeErrorKind> {
        let def = &closure.def;
        let arity = usize::from(def.arity);
        let vararg = def.is_vararg();
        if def.flags.contains(FuncDefFlags::FIXARITY) {
            let expected = Arity::Exact(arity);
            if !expected.is_satisfied(args.len()) {
                return Err(RuntimeErrorKind::ArityMismatch {
                    name: self.name_of(def),
                    expected,
                    got: args.len(),
                });
            }
        }
        let rest = args.split_off(arity.min(args.len()));
        args.resize(arity, Value::Nil);
        if vararg {
            args.push(Value::tuple(rest));
        }
        let slots = usize::from(def.slot_count).max(args.len());
        args.resize(slots, Value::Nil);
        Ok(Frame {
            closure,
            registers: Rc::new(RefCell::new(args)),
            pc: 0,
            dest,
        })
    }

    fn call_native(
        &self,
        native: NativeFunction,
        args: &[Value],
    ) -> Result<Value, RuntimeErrorKind> {
        if !native.arity.is_satisfied(args.len()) {
            return Err(RuntimeErrorKind::ArityMismatch {
                name: native.name.into(),
                expected: native.arity,
                got: args.len(),
            });
        }
        (native.func)(self.world, args)
    }

    fn call(&mut self, callee: Value, args: Vec<Value>, dest: u8) -> Result<(), RuntimeErrorKind> {
        match callee {
            Value::Function(closure) => {
                let frame = self.frame(closure, args, dest)?;
                self.frames.push(frame);
            }
            Value::Native(native) => {
                let value = self.call_native(native, &args)?;
                self.set(dest, value);
            }
            other => return Err(RuntimeErrorKind::NotCallable(other.type_name())),
        }
        Ok(())
    }

    fn tail_call(
        &mut self,
        callee: Value,
        args: Vec<Value>,
    ) -> Result<Option<Value>, RuntimeErrorKind> {
        match callee {
            Value::Function(closure) => {
                let frame = self.frame(closure, args, self.current().dest)?;
                self.frames.pop();
                self.frames.push(frame);
                Ok(None)
            }
            Value::Native(native) => {
                let value = self.call_native(native, &args)?;
                Ok(self.ret(value))
            }
            other => Err(RuntimeErrorKind::NotCallable(other.type_name())),
        }
    }

    /// Pops the current frame, handing `value` to its caller
    fn ret(&mut self, value: Value) -> Option<Value> {
        let frame = self.frames.pop().expect("a frame is always executing");
        if self.frames.is_empty() {
            return Some(value);
        }
        self.set(frame.dest, value);
        None
    }
}

fn pairs(items: Vec<Value>) -> Result<Vec<(Value, Value)>, RuntimeErrorKind> {
    let mut items = items.into_iter();
    let mut pairs = vec![];
    while let Some(key) = items.next() {
        if key.is_nil() {
            return Err(RuntimeErrorKind::Type {
                expected: "key",
                got: "nil",
            });
        }
        pairs.push((key, items.next().unwrap_or_default()));
    }
    Ok(pairs)
}

/// Looks `key` up in `ds`; absent keys and out of range indices give `nil`
pub(crate) fn index_get(ds: &Value, key: &Value) -> Result<Value, RuntimeErrorKind> {
    let position = |len: usize| match key {
        Value::Integer(index) => Ok(usize::try_from(*index).ok().filter(|index| *index < len)),
        other => Err(RuntimeErrorKind::Type {
            expected: "integer",
            got: other.type_name(),
        }),
    };
    Ok(match ds {
        Value::Table(table) => table.borrow().get(key).unwrap_or_default(),
        Value::Struct(pairs) => pairs.get(key).cloned().unwrap_or_default(),
        Value::Array(items) => {
            let items = items.borrow();
            position(items.len())?
                .map(|index| items[index].clone())
                .unwrap_or_default()
        }
        Value::Tuple(tuple) => position(tuple.items().len())?
            .map(|index| tuple.items()[index].clone())
            .unwrap_or_default(),
        Value::String(s) => position(s.len())?
            .map(|index| Value::Integer(s.as_bytes()[index].into()))
            .unwrap_or_default(),
        other => return Err(RuntimeErrorKind::NotIndexable(other.type_name())),
    })
}

/// Stores `value` under `key`. Arrays grow to fit, filling the gap with `nil`.
pub(crate) fn index_put(ds: &Value, key: Value, value: Value) -> Result<(), RuntimeErrorKind> {
    match ds {
        Value::Table(_) if key.is_nil() => {
            return Err(RuntimeErrorKind::Type {
                expected: "key",
                got: "nil",
            })
        }
        Value::Table(table) => table.borrow_mut().put(key, value),
        Value::Array(items) => {
            let Value::Integer(index) = key else {
                return Err(RuntimeErrorKind::Type {
                    expected: "integer",
                    got: key.type_name(),
                });
            };
            let index = usize::try_from(index)
                .map_err(|_| RuntimeErrorKind::IndexOutOfRange(index))?;
            let mut items = items.borrow_mut();
            if index >= items.len() {
                items.resize(index + 1, Value::Nil);
            }
            items[index] = value;
        }
        Value::Tuple(_) | Value::Struct(_) | Value::String(_) => {
            return Err(RuntimeErrorKind::NotMutable(ds.type_name()))
        }
        other => return Err(RuntimeErrorKind::NotIndexable(other.type_name())),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use assert2::{check, let_assert};

    use super::run;
    use crate::{
        compiler::{
            bytecode::{FuncDef, Instruction},
            compile,
        },
        reader::read_all,
        runtime::{base, RuntimeErrorKind},
        value::Value,
        Fuel, World,
    };

    fn assembled(code: &[Instruction], slot_count: u16) -> Rc<FuncDef> {
        Rc::new(FuncDef {
            bytecode: code.iter().map(|instr| instr.encode()).collect(),
            source_map: code.iter().map(|_| None).collect(),
            slot_count,
            ..FuncDef::default()
        })
    }

    fn eval(source: &str) -> Result<Value, RuntimeErrorKind> {
        let mut world = World::new();
        base::install(&mut world);
        let forms = read_all(source, world.rodeo_mut()).unwrap();
        let def = compile(&mut world, &forms[0]).unwrap();
        run(&world, &mut Fuel::with(100_000), def.into()).map_err(|err| err.kind)
    }

    #[test]
    fn jumps_are_relative_to_the_jump() {
        let def = assembled(
            &[
                Instruction::LoadInteger { dest: 0, value: 1 },
                Instruction::JumpIf { cond: 0, offset: 2 },
                Instruction::ReturnNil,
                Instruction::LoadInteger { dest: 1, value: 7 },
                Instruction::Return { src: 1 },
            ],
            2,
        );
        let_assert!(Ok(Value::Integer(7)) = run(&World::new(), &mut Fuel::with(10), def));
    }

    #[test]
    fn malformed_code_is_reported() {
        let def = assembled(&[Instruction::LoadNil { dest: 0 }], 1);
        let_assert!(Err(err) = run(&World::new(), &mut Fuel::with(10), def));
        check!(err.kind == RuntimeErrorKind::MissingReturn);

        let def = Rc::new(FuncDef {
            bytecode: Box::new([0xFF]),
            source_map: Box::new([None]),
            ..FuncDef::default()
        });
        let_assert!(Err(err) = run(&World::new(), &mut Fuel::with(10), def));
        check!(err.kind == RuntimeErrorKind::BadInstruction(0xFF));
    }

    #[test]
    fn every_instruction_burns_fuel() {
        let def = assembled(&[Instruction::Jump { offset: 0 }], 0);
        let mut fuel = Fuel::with(50);
        let_assert!(Err(err) = run(&World::new(), &mut fuel, def));
        check!(err.kind == RuntimeErrorKind::OutOfFuel);
        check!(!fuel.should_continue());
    }

    #[test]
    fn closures_share_their_frame() {
        let_assert!(
            Ok(Value::Integer(2)) =
                eval("(do (var n 0) (def bump (fn [] (:= n (+ n 1)))) (bump) (bump) n)")
        );
    }

    #[test]
    fn calling_a_non_function_fails_at_the_call() {
        let mut world = World::new();
        let forms = read_all("(do 1 (2 3))", world.rodeo_mut()).unwrap();
        let def = compile(&mut world, &forms[0]).unwrap();
        let_assert!(Err(err) = run(&world, &mut Fuel::with(100), def.into()));
        check!(err.kind == RuntimeErrorKind::NotCallable("integer"));
        check!(err.span == Some(6..11));
    }

    #[test]
    fn collections_index_by_kind() {
        let_assert!(Ok(Value::Integer(2)) = eval("(get [1 2] 1)"));
        let_assert!(Ok(Value::Nil) = eval("(get @[1 2] 5)"));
        let_assert!(Ok(Value::Integer(3)) = eval("(get @{:a 3} :a)"));
        let_assert!(Ok(Value::Integer(98)) = eval("(get \"abc\" 1)"));
        let_assert!(Err(RuntimeErrorKind::NotMutable("tuple")) = eval("(put [1] 0 2)"));
        let_assert!(Err(RuntimeErrorKind::NotIndexable("integer")) = eval("(get 1 0)"));
        check!(eval("(do (def a @[]) (put a 2 :x) (length a))") == Ok(Value::Integer(3)));
    }
}
