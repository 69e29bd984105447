#![doc = include_str!("../../../README.md")]
#![expect(dead_code, reason = "embedding APIs keep some currently-unused surface")]

mod bases;
pub mod bytecode;
mod compiler;
mod diagnostics;
mod dict;
mod engine;
mod function;
mod hash_oracle;
mod heap;
mod intern;
pub mod lexer;
mod limits;
mod modules;
mod parser;
mod registry;
mod runtime;
pub mod tracer;
mod types;
mod unicode;
mod value;
mod vm;

pub use crate::{
    bytecode::Opcode,
    compiler::{Program, SourceLocation, TillInfo, UserFunctionInfo},
    diagnostics::{Diagnostic, Position, Severity},
    engine::{Engine, EngineError},
    heap::HeapId,
    intern::SymbolId,
    limits::Limits,
    value::{Kind, Value},
    vm::{ErrorKind, EvalError, TraceEntry},
};
