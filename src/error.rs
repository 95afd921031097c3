//! Error types surfaced by the compiler and the VM.

use std::fmt;

/// A single compile-time diagnostic.
///
/// Formats as `[line N] Error{at}: message`, matching the scanner/parser's
/// panic-mode reporting convention.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("[line {line}] Error{at}: {message}")]
pub struct CompileError {
    pub line: u32,
    /// Empty, or `" at 'token'"` / `" at end"`.
    pub at: String,
    pub message: String,
}

/// One live call frame at the moment a runtime error was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTrace {
    pub line: u32,
    /// Rendered as `script` for the outermost frame.
    pub function_name: String,
}

/// A runtime fault: illegal operand, undefined variable, arity mismatch,
/// stack overflow, out-of-bounds store, unsupported operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    /// Newest frame first.
    pub frames: Vec<FrameTrace>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "[line {}] in {}()", frame.line, frame.function_name)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

impl RuntimeError {
    pub fn simple(message: impl Into<String>) -> Self {
        RuntimeError { message: message.into(), frames: Vec::new() }
    }
}

/// The result of `Vm::interpret`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum InterpretError {
    #[error("compile failed with {} error(s)", .0.len())]
    Compile(Vec<CompileError>),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
