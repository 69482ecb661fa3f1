pub mod compiler;
pub mod lexer;
pub mod reader;
pub mod runtime;
pub mod world;

pub use compiler::{compile, CompileError, CompileErrorKind};
pub use runtime::{Error, Runtime, RuntimeError, RuntimeErrorKind};
pub use world::{fuel::Fuel, value, World};
