//! A small dynamically-typed scripting language: a single-pass Pratt
//! compiler targeting a compact bytecode, and a stack-based VM with
//! closures, classes, iterable subscripting, and a tracing mark-and-sweep
//! collector.
//!
//! The embedding surface is [`Vm`]: compile and run a script with
//! [`Vm::interpret`], register host functions with [`Vm::define_native`] /
//! [`Vm::define_native_class`], and trace extra roots held outside the VM
//! with [`Vm::set_external_marking_func`].

mod chunk;
mod compiler;
mod error;
mod gc;
mod lexer;
mod object;
mod value;
mod vm;

pub use chunk::{Chunk, OpCode};
pub use compiler::Compiler;
pub use error::{CompileError, FrameTrace, InterpretError, RuntimeError};
pub use gc::Heap;
pub use lexer::{Lexer, Token, TokenKind};
pub use object::{
    BoundMethod, Class, Closure, Function, GcHeader, GcObject, Instance, LString, List, Native, NativeFn, ObjKind, ObjRef, Range, Upvalue,
};
pub use value::Value;
pub use vm::Vm;
