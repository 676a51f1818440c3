//! Lunar compiler: scanner, parser and bytecode generator for Lua 5.3.
//!
//! Source text goes through [`lexer`] and [`parser`] into an [`ast::Block`],
//! then [`codegen`] lowers it into a tree of [`proto::Prototype`]s holding
//! Lua 5.3 instructions.

pub mod ast;
pub mod codegen;
pub mod disasm;
pub mod error;
pub mod lexer;
pub mod opcode;
pub mod parser;
pub mod proto;
pub mod token;

pub use error::{CodeGenError, CompileError, EncodeError, LexError, SyntaxError};

use std::rc::Rc;
use tracing::instrument;

/// Parse a chunk into its AST.
#[instrument(level = "trace", skip(source), fields(bytes = source.len()))]
pub fn parse(source: &str) -> Result<ast::Block, CompileError> {
    parser::Parser::new(source).parse()
}

/// Compile a chunk into its main prototype.
#[instrument(level = "trace", skip(source), fields(bytes = source.len()))]
pub fn compile(source: &str, name: &str) -> Result<Rc<proto::Prototype>, CompileError> {
    let block = parse(source)?;
    Ok(codegen::compile(&block, name)?)
}
