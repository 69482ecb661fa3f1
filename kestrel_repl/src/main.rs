use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use codesnake::{Block, CodeWidth, Label, LineIndex};
use kestrel::{runtime::DEFAULT_FUEL, value::Value, Error, Runtime};
use log::info;
use yansi::Paint;

/// Evaluate kestrel source from a file, or interactively
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// source file to evaluate instead of starting a REPL
    file: Option<PathBuf>,
    /// print the bytecode of every top-level form before running it
    #[arg(long)]
    disasm: bool,
    /// instructions each top-level form may execute
    #[arg(long, default_value_t = DEFAULT_FUEL)]
    fuel: i64,
}

fn eval_source(runtime: &mut Runtime, source: &str, disasm: bool) -> Result<Value, Error> {
    let mut last = Value::Nil;
    for form in runtime.read(source)? {
        let def = runtime.compile(&form)?;
        if disasm {
            print!("{}", def.disassemble(runtime.world().rodeo()));
        }
        last = runtime.run(def)?;
    }
    Ok(last)
}

fn report(name: &str, source: &str, err: &Error) {
    let idx = LineIndex::new(source);
    let message = err.to_string();
    let block = err.span().and_then(|span| {
        Block::new(
            &idx,
            [Label::new(span)
                .with_text(message.red().to_string())
                .with_style(|s: String| s.red().to_string())],
        )
    });
    match block {
        Some(block) => {
            let block = block.map_code(|c| CodeWidth::new(c, c.len()));
            eprintln!("{}[{name}]", block.prologue());
            eprint!("{block}");
            eprintln!("{}", block.epilogue());
        }
        None => eprintln!("{}", message.red()),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut runtime = Runtime::with_fuel(args.fuel);

    if let Some(path) = &args.file {
        let name = path.display().to_string();
        info!("evaluating {name}");
        let source =
            std::fs::read_to_string(path).with_context(|| format!("could not read {name}"))?;
        return match eval_source(&mut runtime, &source, args.disasm) {
            Ok(_) => Ok(()),
            Err(err) => {
                report(&name, &source, &err);
                anyhow::bail!("evaluating {name} failed")
            }
        };
    }

    let mut readline = rustyline::DefaultEditor::new()?;
    while let Ok(input) = readline.readline(">> ") {
        readline.add_history_entry(input.as_str())?;
        match eval_source(&mut runtime, &input, args.disasm) {
            Ok(value) => println!("{}", runtime.world().display(&value).green()),
            Err(err) => report("repl", &input, &err),
        }
    }

    Ok(())
}
