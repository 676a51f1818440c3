//! Error types for every stage of the pipeline.
//!
//! Each stage has its own error enum; [`CompileError`] unifies them so a
//! caller of [`crate::compile`] sees exactly one error value per failed
//! compilation. Every variant carries the source line it was raised on.

use thiserror::Error;

/// Malformed token.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("{line}: unexpected symbol near '{near}'")]
    UnexpectedChar { near: String, line: u32 },

    #[error("{line}: unfinished string near '{near}'")]
    UnterminatedString { near: String, line: u32 },

    #[error("{line}: unfinished long {what} near <eof>")]
    UnterminatedLongBracket { what: &'static str, line: u32 },

    #[error("{line}: invalid escape sequence near '{near}'")]
    InvalidEscape { near: String, line: u32 },

    #[error("{line}: malformed number near '{near}'")]
    MalformedNumber { near: String, line: u32 },

    #[error("{line}: string literal is not valid UTF-8")]
    MalformedString { line: u32 },
}

impl LexError {
    pub fn line(&self) -> u32 {
        match self {
            LexError::UnexpectedChar { line, .. }
            | LexError::UnterminatedString { line, .. }
            | LexError::UnterminatedLongBracket { line, .. }
            | LexError::InvalidEscape { line, .. }
            | LexError::MalformedNumber { line, .. }
            | LexError::MalformedString { line } => *line,
        }
    }
}

/// A token that cannot extend the grammar rule being parsed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{line}: {message} near '{near}'")]
pub struct SyntaxError {
    pub line: u32,
    /// Textual form of the offending token (`<eof>` at end of input).
    pub near: String,
    pub message: String,
}

/// An operand that does not fit its instruction field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("operand {field}={value} out of range for {op}")]
pub struct EncodeError {
    pub op: &'static str,
    pub field: &'static str,
    pub value: i64,
}

/// Failure while lowering the AST to instructions.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CodeGenError {
    #[error("{line}: function or expression needs too many registers")]
    TooManyRegisters { line: u32 },

    #[error("{line}: register freed with none allocated")]
    RegisterUnderflow { line: u32 },

    #[error("{line}: {source}")]
    OperandOverflow { source: EncodeError, line: u32 },

    #[error("{line}: too many upvalues")]
    TooManyUpvalues { line: u32 },

    #[error("{line}: break outside a loop")]
    BreakOutsideLoop { line: u32 },

    #[error("{line}: cannot use '...' outside a vararg function")]
    VarargOutsideVararg { line: u32 },

    #[error("{line}: {what} is not supported")]
    Unsupported { what: &'static str, line: u32 },

    #[error("{line}: nested function closed with no enclosing function")]
    FunctionStackUnderflow { line: u32 },
}

impl CodeGenError {
    pub fn line(&self) -> u32 {
        match self {
            CodeGenError::TooManyRegisters { line }
            | CodeGenError::RegisterUnderflow { line }
            | CodeGenError::OperandOverflow { line, .. }
            | CodeGenError::TooManyUpvalues { line }
            | CodeGenError::BreakOutsideLoop { line }
            | CodeGenError::VarargOutsideVararg { line }
            | CodeGenError::Unsupported { line, .. }
            | CodeGenError::FunctionStackUnderflow { line } => *line,
        }
    }
}

/// Any error raised while compiling a chunk.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    CodeGen(#[from] CodeGenError),
}

impl CompileError {
    /// Source line the error was raised on.
    pub fn line(&self) -> u32 {
        match self {
            CompileError::Lex(e) => e.line(),
            CompileError::Syntax(e) => e.line,
            CompileError::CodeGen(e) => e.line(),
        }
    }
}
