//! Special forms: the forms that are not calls.
//!
//! Each special receives the options the form was compiled with and its arguments
//! (the form without its head), and returns the slot holding its value.

use std::{cell::RefCell, rc::Rc};

use log::debug;

use super::{
    bytecode::{FuncDef, FuncDefFlags, Instruction},
    environment,
    scope::{ScopeFlags, Temp},
    slot::{Slot, SlotFlags},
    CompileError, CompileErrorKind, Compiler, FnOpts,
};
use crate::{
    runtime::Arity,
    value::{Symbol, Table, TableRef, Value},
};

pub type SpecialFn = fn(&mut Compiler<'_>, FnOpts, &[Value]) -> Result<Slot, CompileError>;

pub struct Special {
    pub name: &'static str,
    pub compile: SpecialFn,
}

// sorted by name
static SPECIALS: [Special; 8] = [
    Special {
        name: ":=",
        compile: compile_set,
    },
    Special {
        name: "def",
        compile: compile_def,
    },
    Special {
        name: "do",
        compile: compile_do,
    },
    Special {
        name: "fn",
        compile: compile_fn,
    },
    Special {
        name: "if",
        compile: compile_if,
    },
    Special {
        name: "quote",
        compile: compile_quote,
    },
    Special {
        name: "var",
        compile: compile_var,
    },
    Special {
        name: "while",
        compile: compile_while,
    },
];

/// Finds the special form called `name`
pub fn lookup(name: &str) -> Option<&'static Special> {
    SPECIALS
        .binary_search_by(|special| special.name.cmp(name))
        .ok()
        .map(|index| &SPECIALS[index])
}

fn compile_quote(
    c: &mut Compiler<'_>,
    _opts: FnOpts,
    args: &[Value],
) -> Result<Slot, CompileError> {
    c.expect_args("quote", Arity::Exact(1), args)?;
    Ok(Slot::constant(args[0].clone()))
}

fn compile_set(c: &mut Compiler<'_>, _opts: FnOpts, args: &[Value]) -> Result<Slot, CompileError> {
    c.expect_args(":=", Arity::Exact(2), args)?;
    let Value::Symbol(name) = args[0] else {
        return Err(c.error(CompileErrorKind::NotASymbol));
    };
    let dest = c.resolve(name)?;
    if !dest.is_mutable() {
        return Err(c.error(CompileErrorKind::CannotSetConstant(
            c.world.resolve(name).into(),
        )));
    }
    let ret = c.compile_value(FnOpts::hinted(dest.clone()), &args[1])?;
    c.copy(&dest, &ret)?;
    Ok(ret)
}

/// Folds the attributes between a binding's pattern and value into a table
fn attributes(c: &mut Compiler<'_>, attrs: &[Value]) -> Result<TableRef, CompileError> {
    let mut table = Table::default();
    let doc = c.world.names().doc;
    for attr in attrs {
        match attr {
            Value::Symbol(_) => table.put(attr.clone(), Value::Boolean(true)),
            Value::String(_) => table.put(Value::Keyword(doc), attr.clone()),
            other => return Err(c.error(CompileErrorKind::MetadataType(other.type_name()))),
        }
    }
    Ok(Rc::new(RefCell::new(table)))
}

/// Names `slot` in the current scope. The slot is taken over when it is an unnamed
/// register of this function; anything else is copied into a fresh register first.
/// Returns whether the original slot may be freed.
fn name_local(
    c: &mut Compiler<'_>,
    symbol: Symbol,
    flags: SlotFlags,
    slot: Slot,
) -> Result<bool, CompileError> {
    let in_place = !slot.is_named() && slot.local_register().is_some();
    let slot = if in_place {
        slot
    } else {
        let local = c.far_slot()?;
        c.copy(&local, &slot)?;
        local
    };
    c.name_slot(symbol, slot.with_flags(flags | SlotFlags::NAMED));
    Ok(!in_place)
}

fn def_leaf(
    c: &mut Compiler<'_>,
    symbol: Symbol,
    slot: Slot,
    attributes: Option<&TableRef>,
) -> Result<bool, CompileError> {
    if !c.scope().flags.contains(ScopeFlags::TOP) {
        return name_local(c, symbol, SlotFlags::empty(), slot);
    }
    let entry = environment::def_entry(c.world, symbol, attributes);
    let key = Slot::constant(Value::Keyword(c.world.names().value));
    c.emit_sss(
        &Slot::constant(Value::Table(entry)),
        &key,
        &slot,
        false,
        |ds, key, value| Instruction::Put { ds, key, value },
    )?;
    Ok(true)
}

fn var_leaf(
    c: &mut Compiler<'_>,
    symbol: Symbol,
    slot: Slot,
    attributes: Option<&TableRef>,
) -> Result<bool, CompileError> {
    if !c.scope().flags.contains(ScopeFlags::TOP) {
        return name_local(c, symbol, SlotFlags::MUTABLE, slot);
    }
    let cell = environment::var_entry(c.world, symbol, attributes);
    c.emit_ssi(
        &Slot::constant(Value::Array(cell)),
        &slot,
        false,
        |ds, value| Instruction::PutIndex {
            ds,
            value,
            index: 0,
        },
    )?;
    Ok(true)
}

/// Shared body of `def` and `var`. The value never takes the caller's hint, since that
/// slot could be one the new binding shadows.
fn compile_binding(
    c: &mut Compiler<'_>,
    form: &'static str,
    args: &[Value],
    leaf: super::destructure::Leaf,
) -> Result<Slot, CompileError> {
    c.expect_args(form, Arity::Min(2), args)?;
    let (pattern, rest) = (&args[0], &args[1..]);
    let Some((value, attrs)) = rest.split_last() else {
        unreachable!("argument count was checked")
    };
    let value = c.compile_value(FnOpts::default(), value)?;
    let attributes = attributes(c, attrs)?;
    if c.destructure(pattern, value.clone(), leaf, Some(&attributes))? {
        c.free_slot(&value);
    }
    Ok(Slot::nil())
}

fn compile_def(c: &mut Compiler<'_>, _opts: FnOpts, args: &[Value]) -> Result<Slot, CompileError> {
    compile_binding(c, "def", args, def_leaf)
}

fn compile_var(c: &mut Compiler<'_>, _opts: FnOpts, args: &[Value]) -> Result<Slot, CompileError> {
    compile_binding(c, "var", args, var_leaf)
}

fn compile_do(c: &mut Compiler<'_>, opts: FnOpts, args: &[Value]) -> Result<Slot, CompileError> {
    c.push_scope(ScopeFlags::empty(), "do");
    let mut ret = Slot::nil();
    if let Some((last, init)) = args.split_last() {
        for form in init {
            let slot = c.compile_value(FnOpts::drop(), form)?;
            c.free_slot(&slot);
        }
        ret = c.compile_value(opts, last)?;
    }
    c.pop_scope_keepslot(&ret);
    Ok(ret)
}

fn compile_if(c: &mut Compiler<'_>, opts: FnOpts, args: &[Value]) -> Result<Slot, CompileError> {
    c.expect_args("if", Arity::Range(2, 3), args)?;
    let nil = Value::Nil;
    let (mut on_true, mut on_false) = (&args[1], args.get(2).unwrap_or(&nil));
    let (tail, drop) = (opts.is_tail(), opts.is_drop());
    let keep = !(tail || drop);
    let target = if keep {
        c.get_target(&opts)?
    } else {
        Slot::nil()
    };
    let finish = |target: Slot| match tail {
        true => target.with_flags(SlotFlags::RETURNED),
        false => target,
    };

    c.push_scope(ScopeFlags::empty(), "if");
    let cond = c.compile_value(FnOpts::default(), &args[0])?;

    if let Some(value) = cond.constant_value() {
        if !value.truthy() {
            core::mem::swap(&mut on_true, &mut on_false);
        }
        c.push_scope(ScopeFlags::empty(), "if-live");
        let body = c.compile_value(opts.clone(), on_true)?;
        if keep {
            c.copy(&target, &body)?;
        }
        c.pop_scope_keepslot(&target);
        c.throwaway(opts, on_false)?;
        c.pop_scope_keepslot(&target);
        return Ok(finish(target));
    }

    let to_false = c.emit_jump_if_not(&cond)?;

    c.push_scope(ScopeFlags::empty(), "if-true");
    let body = c.compile_value(opts.clone(), on_true)?;
    if keep {
        c.copy(&target, &body)?;
    }
    c.pop_scope();

    let to_end = if tail { None } else { Some(c.emit_jump()) };

    let false_start = c.label();
    c.push_scope(ScopeFlags::empty(), "if-false");
    let body = c.compile_value(opts, on_false)?;
    if keep {
        c.copy(&target, &body)?;
    }
    c.pop_scope();
    c.pop_scope();

    let end = c.label();
    c.patch(to_false, false_start)?;
    if let Some(to_end) = to_end {
        c.patch(to_end, end)?;
    }
    Ok(finish(target))
}

fn compile_body_dropped(c: &mut Compiler<'_>, body: &[Value]) -> Result<(), CompileError> {
    for form in body {
        let slot = c.compile_value(FnOpts::drop(), form)?;
        c.free_slot(&slot);
    }
    Ok(())
}

fn compile_while(
    c: &mut Compiler<'_>,
    _opts: FnOpts,
    args: &[Value],
) -> Result<Slot, CompileError> {
    c.expect_args("while", Arity::Min(2), args)?;
    let (cond_form, body) = (&args[0], &args[1..]);
    let checkpoint = c.checkpoint();
    let top = c.label();

    c.push_scope(ScopeFlags::empty(), "while");
    let cond = c.compile_value(FnOpts::default(), cond_form)?;

    let exit = match cond.constant_value() {
        Some(value) if !value.truthy() => {
            // the loop never runs, but its body still has to compile
            c.pop_scope();
            for form in body {
                c.throwaway(FnOpts::drop(), form)?;
            }
            return Ok(Slot::nil());
        }
        Some(_) => None,
        None => Some(c.emit_jump_if_not(&cond)?),
    };

    compile_body_dropped(c, body)?;

    if c.scope().flags.contains(ScopeFlags::CLOSURE) {
        // closures must see a fresh binding per iteration, so each iteration
        // becomes a call of its own
        c.scope_mut().flags |= ScopeFlags::UNUSED;
        c.pop_scope();
        c.rollback(checkpoint);
        drop(exit);
        debug!("recompiling loop as a function");
        return compile_loop_function(c, cond_form, body);
    }

    c.emit_jump_to(top)?;
    if let Some(exit) = exit {
        let end = c.label();
        c.patch(exit, end)?;
    }
    c.pop_scope();
    Ok(Slot::nil())
}

fn compile_loop_function(
    c: &mut Compiler<'_>,
    cond_form: &Value,
    body: &[Value],
) -> Result<Slot, CompileError> {
    c.push_scope(ScopeFlags::FUNCTION, "while-function");
    let cond = c.compile_value(FnOpts::default(), cond_form)?;
    if !cond.is_constant() {
        c.emit_si(&cond, false, |cond| Instruction::JumpIf { cond, offset: 2 })?;
        c.emit(Instruction::ReturnNil);
    }
    compile_body_dropped(c, body)?;

    let own = c.allocate_temp(Temp::T0)?;
    c.emit(Instruction::LoadSelf { dest: own as u8 });
    c.emit(Instruction::TailCall { callee: own });
    c.free_temp(own, Temp::T0);

    let mut def = c.pop_funcdef();
    def.name = Some(c.world.names().while_loop);
    let index = c.add_funcdef(def)?;

    let closure = c.allocate_temp(Temp::T0)?;
    c.emit(Instruction::Closure {
        dest: closure as u8,
        def: index,
    });
    c.emit(Instruction::Call {
        dest: closure as u8,
        callee: closure,
    });
    c.free_temp(closure, Temp::T0);
    c.scope_mut().flags |= ScopeFlags::CLOSURE;
    Ok(Slot::nil())
}

fn compile_fn(c: &mut Compiler<'_>, opts: FnOpts, args: &[Value]) -> Result<Slot, CompileError> {
    c.expect_args("fn", Arity::Min(2), args)?;
    c.scope_mut().flags |= ScopeFlags::CLOSURE;

    let depth = c.scopes.len();
    let start = c.label();
    c.push_scope(ScopeFlags::FUNCTION, "function");
    let def = match compile_function(c, args) {
        Ok(def) => def,
        Err(err) => {
            c.unwind_scopes(depth);
            c.buffer.truncate(start);
            c.map_buffer.truncate(start);
            return Err(err);
        }
    };

    let index = c.add_funcdef(def)?;
    let target = c.get_target(&opts)?;
    c.emit_si(&target, true, |dest| Instruction::Closure { dest, def: index })?;
    Ok(target)
}

/// Compiles parameters and body inside the function scope, then pops it
fn compile_function(c: &mut Compiler<'_>, args: &[Value]) -> Result<FuncDef, CompileError> {
    let (name, rest) = match args {
        [Value::Symbol(name), rest @ ..] => (Some(*name), rest),
        _ => (None, args),
    };
    let Some((params, body)) = rest.split_first() else {
        return Err(c.error(CompileErrorKind::ExpectedParameters));
    };
    let (params, fixed) = match params {
        Value::Tuple(params) => (params.items().to_vec(), true),
        Value::Array(params) => (params.borrow().clone(), false),
        _ => return Err(c.error(CompileErrorKind::ExpectedParameters)),
    };

    // every parameter gets its register before any is destructured, so argument
    // `i` always lands in register `i`
    let marker = c.world.names().vararg;
    let mut vararg = false;
    let mut bound = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        if param.as_symbol() == Some(marker) {
            if i + 2 != params.len() {
                return Err(c.error(CompileErrorKind::MisplacedVararg));
            }
            vararg = true;
            continue;
        }
        bound.push((param, c.far_slot()?));
    }
    let arity = (bound.len() - vararg as usize) as u16;

    for (param, slot) in bound {
        match param {
            Value::Symbol(symbol) => c.name_slot(*symbol, slot.with_flags(SlotFlags::NAMED)),
            pattern => {
                c.destructure(pattern, slot, def_leaf, None)?;
            }
        }
    }

    if let Some(name) = name {
        let slot = c.far_slot()?.with_flags(SlotFlags::NAMED);
        c.emit_si(&slot, true, |dest| Instruction::LoadSelf { dest })?;
        c.name_slot(name, slot);
    }

    match body.split_last() {
        None => {
            c.emit(Instruction::ReturnNil);
        }
        Some((last, init)) => {
            compile_body_dropped(c, init)?;
            c.compile_value(FnOpts::tail(), last)?;
        }
    }

    let mut def = c.pop_funcdef();
    def.arity = arity;
    def.name = name;
    if vararg {
        def.flags |= FuncDefFlags::VARARG;
    } else if fixed {
        def.flags |= FuncDefFlags::FIXARITY;
    }
    def.slot_count = def.slot_count.max(arity + vararg as u16);
    Ok(def)
}

#[cfg(test)]
mod tests {
    use arbtest::arbtest;
    use assert2::{check, let_assert};

    use super::{lookup, SPECIALS};
    use crate::{
        compiler::{
            bytecode::{FuncDef, FuncDefFlags, Instruction},
            compile, CompileError, CompileErrorKind,
        },
        reader::read_all,
        runtime::base,
        value::Value,
        Runtime, World,
    };

    #[derive(Debug, arbitrary::Arbitrary)]
    enum Literal {
        Nil,
        True,
        False,
        Integer(u8),
        Keyword,
        Tuple,
    }

    impl Literal {
        fn source(&self) -> String {
            match self {
                Self::Nil => "nil".into(),
                Self::True => "true".into(),
                Self::False => "false".into(),
                Self::Integer(int) => int.to_string(),
                Self::Keyword => ":k".into(),
                Self::Tuple => "()".into(),
            }
        }

        fn truthy(&self) -> bool {
            !matches!(self, Self::Nil | Self::False)
        }
    }

    fn world() -> World {
        let mut world = World::new();
        base::install(&mut world);
        world
    }

    fn compile_one(world: &mut World, source: &str) -> Result<FuncDef, CompileError> {
        let forms = read_all(source, world.rodeo_mut()).unwrap();
        compile(world, &forms[0])
    }

    fn instructions(def: &FuncDef) -> Vec<Instruction> {
        def.instructions().map(Option::unwrap).collect()
    }

    fn error_kind(source: &str) -> CompileErrorKind {
        let_assert!(Err(err) = compile_one(&mut world(), source));
        err.kind
    }

    #[test]
    fn registry_is_sorted_and_complete() {
        check!(SPECIALS.windows(2).all(|pair| pair[0].name < pair[1].name));
        for name in [":=", "def", "do", "fn", "if", "quote", "var", "while"] {
            let_assert!(Some(special) = lookup(name));
            check!(special.name == name);
        }
        check!(lookup("+").is_none());
        check!(lookup("set").is_none());
    }

    #[test]
    fn quote_returns_its_argument() {
        let mut world = world();
        let def = compile_one(&mut world, "'(1 2)").unwrap();
        check!(def.constants.len() == 1);
        check!(world.display(&def.constants[0]) == "(1 2)");
        check!(error_kind("(quote)").to_string() == "quote expects exactly 1 argument(s), got 0");
    }

    #[test]
    fn constant_if_keeps_only_the_live_branch() {
        let mut world = world();
        let live = [
            Instruction::LoadInteger { dest: 0, value: 1 },
            Instruction::Return { src: 0 },
        ];
        let def = compile_one(&mut world, "(if true 1 (print 2))").unwrap();
        check!(instructions(&def) == live);
        check!(def.constants.is_empty());

        let def = compile_one(&mut world, "(if nil (print 2) 1)").unwrap();
        check!(instructions(&def) == live);

        let def = compile_one(&mut world, "(if false (fn [] 2))").unwrap();
        check!(instructions(&def) == [Instruction::ReturnNil]);
        check!(def.defs.is_empty());
    }

    #[test]
    fn constant_conditions_fold() {
        arbtest(|u| {
            let cond: Literal = u.arbitrary()?;
            let (on_true, on_false): (u8, u8) = (u.arbitrary()?, u.arbitrary()?);
            let source = format!("(if {} {on_true} {on_false})", cond.source());
            let live = if cond.truthy() { on_true } else { on_false };

            let mut world = world();
            let def = compile_one(&mut world, &source).unwrap();
            check!(
                instructions(&def)
                    == [
                        Instruction::LoadInteger {
                            dest: 0,
                            value: live.into()
                        },
                        Instruction::Return { src: 0 },
                    ],
                "{source}"
            );
            check!(Runtime::new().eval(&source).unwrap() == Value::Integer(live.into()));
            Ok(())
        });
    }

    #[test]
    fn dead_branches_still_report_errors() {
        check!(error_kind("(if true 1 (nope))") == CompileErrorKind::UnboundName("nope".into()));
        check!(error_kind("(if false (:= 1 2) 3)") == CompileErrorKind::NotASymbol);
    }

    #[test]
    fn dynamic_if_patches_both_jumps() {
        let mut world = world();
        let def = compile_one(&mut world, "(fn [x] (print (if x 1 2)))").unwrap();
        let code = instructions(&def.defs[0]);
        let_assert!(
            Some((jif, Instruction::JumpIfNot { offset: to_false, .. })) = code
                .iter()
                .enumerate()
                .find(|(_, instr)| matches!(instr, Instruction::JumpIfNot { .. }))
        );
        let_assert!(
            Some((jmp, Instruction::Jump { offset: to_end })) = code
                .iter()
                .enumerate()
                .find(|(_, instr)| matches!(instr, Instruction::Jump { .. }))
        );
        // the false branch starts right after the jump over it
        check!(jif as i32 + *to_false as i32 == jmp as i32 + 1);
        check!(code[jmp + 1] == Instruction::LoadInteger { dest: 1, value: 2 });
        // both branches meet at the push of the result
        check!(code[(jmp as i32 + *to_end) as usize] == Instruction::Push { src: 1 });
    }

    #[test]
    fn loops_without_closures_jump_back() {
        let mut world = world();
        let def = compile_one(
            &mut world,
            "(do (var i 0) (while (< i 3) (:= i (+ i 1))) i)",
        )
        .unwrap();
        let code = instructions(&def);
        check!(code[0] == Instruction::LoadInteger { dest: 0, value: 0 });
        let top = 1;

        let exits: Vec<_> = code
            .iter()
            .enumerate()
            .filter_map(|(at, instr)| match instr {
                Instruction::JumpIfNot { offset, .. } => Some((at, *offset as i32)),
                _ => None,
            })
            .collect();
        let backs: Vec<_> = code
            .iter()
            .enumerate()
            .filter_map(|(at, instr)| match instr {
                Instruction::Jump { offset } => Some((at, *offset)),
                _ => None,
            })
            .collect();
        check!(exits.len() == 1);
        check!(backs.len() == 1);
        let ((exit_at, exit), (back_at, back)) = (exits[0], backs[0]);
        check!(back_at as i32 + back == top);
        check!(exit_at as i32 + exit == back_at as i32 + 1);
        check!(code.last() == Some(&Instruction::Return { src: 0 }));
        check!(def.defs.is_empty());
    }

    #[test]
    fn truthy_loops_have_no_exit() {
        let mut world = world();
        let def = compile_one(&mut world, "(fn [] (while true (print 1)))").unwrap();
        let code = instructions(&def.defs[0]);
        check!(!code
            .iter()
            .any(|instr| matches!(instr, Instruction::JumpIfNot { .. })));
        check!(
            code.iter()
                .filter(|instr| matches!(instr, Instruction::Jump { .. }))
                .count()
                == 1
        );
    }

    #[test]
    fn falsy_loops_emit_nothing_but_check_their_body() {
        let mut world = world();
        let def = compile_one(&mut world, "(while nil (print 1) (fn [] 2))").unwrap();
        check!(instructions(&def) == [Instruction::ReturnNil]);
        check!(def.defs.is_empty());
        check!(error_kind("(while false (nope))") == CompileErrorKind::UnboundName("nope".into()));
    }

    #[test]
    fn capturing_loops_become_functions() {
        let mut world = world();
        let def = compile_one(
            &mut world,
            "(do (var i 0) (while (< i 3) (def j i) (fn [] j) (:= i (+ i 1))))",
        )
        .unwrap();
        check!(def.defs.len() == 1);
        let looped = &def.defs[0];
        check!(world.resolve(looped.name.unwrap()) == "_while");
        check!(looped.defs.len() == 1);
        let code = instructions(looped);
        let_assert!(
            [.., Instruction::LoadSelf { dest }, Instruction::TailCall { callee }] = code.as_slice()
        );
        check!(*callee == *dest as u16);
        check!(!code.iter().any(|instr| matches!(instr, Instruction::Jump { .. })));
        check!(
            instructions(&def)
                .iter()
                .filter(|instr| matches!(instr, Instruction::Closure { .. }))
                .count()
                == 1
        );
    }

    #[test]
    fn parameter_lists_set_arity_flags() {
        let mut world = world();
        let def = compile_one(&mut world, "(fn [a b] a)").unwrap();
        check!(def.defs[0].arity == 2);
        check!(def.defs[0].flags == FuncDefFlags::FIXARITY);

        let def = compile_one(&mut world, "(fn @[a b] a)").unwrap();
        check!(def.defs[0].flags == FuncDefFlags::empty());

        let def = compile_one(&mut world, "(fn [a & rest] rest)").unwrap();
        check!(def.defs[0].arity == 1);
        check!(def.defs[0].flags == FuncDefFlags::VARARG);
        check!(def.defs[0].slot_count >= 2);

        let def = compile_one(&mut world, "(fn named [] named)").unwrap();
        check!(world.resolve(def.defs[0].name.unwrap()) == "named");
        check!(instructions(&def.defs[0])[0] == Instruction::LoadSelf { dest: 0 });
    }

    #[test]
    fn function_errors() {
        check!(error_kind("(fn [& a b] 1)") == CompileErrorKind::MisplacedVararg);
        check!(error_kind("(fn [a &] 1)") == CompileErrorKind::MisplacedVararg);
        check!(error_kind("(fn name 1)") == CompileErrorKind::ExpectedParameters);
        check!(error_kind("(fn name)").to_string() == "fn expects at least 2 argument(s), got 1");
        check!(error_kind("(fn [x] (nope x))") == CompileErrorKind::UnboundName("nope".into()));
    }

    #[test]
    fn binding_errors() {
        check!(error_kind("(do (def x 1) (:= x 2))") == CompileErrorKind::CannotSetConstant("x".into()));
        check!(error_kind("(:= print 2)") == CompileErrorKind::CannotSetConstant("print".into()));
        check!(error_kind("(:= 1 2)") == CompileErrorKind::NotASymbol);
        check!(error_kind("(def 3 4)") == CompileErrorKind::DestructureType("integer"));
        check!(error_kind("(def x :private 4)") == CompileErrorKind::MetadataType("keyword"));
        check!(error_kind("(var x)").to_string() == "var expects at least 2 argument(s), got 1");
    }

    #[test]
    fn top_level_bindings_create_entries() {
        let mut world = world();
        compile_one(&mut world, "(def x private \"the x\" 1)").unwrap();
        let_assert!(Some(entry) = world.entry("x"));
        let doc = world.intern("doc");
        let private = world.intern("private");
        check!(
            entry.borrow().get(&crate::value::Value::Keyword(doc))
                == Some(crate::value::Value::string("the x"))
        );
        check!(
            entry.borrow().get(&crate::value::Value::Symbol(private))
                == Some(crate::value::Value::Boolean(true))
        );

        let def = compile_one(&mut world, "(var y 1)").unwrap();
        check!(
            instructions(&def)[..3]
                == [
                    Instruction::LoadConstant { dest: 0, index: 0 },
                    Instruction::LoadInteger { dest: 1, value: 1 },
                    Instruction::PutIndex {
                        ds: 0,
                        value: 1,
                        index: 0
                    },
                ]
        );
    }
}
