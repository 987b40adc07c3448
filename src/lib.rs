//! Crate root: wires together the compilation pipeline.
//!
//! Each stage consumes the previous stage's output and fails fast:
//! - `tokenizer` performs lexical analysis and produces a flat token stream.
//! - `parser` owns all syntactic knowledge and returns the program AST.
//! - `sema` resolves names, checks types and control flow, and annotates the
//!   AST in place with symbol ids from its arena.
//! - `codegen` lowers the annotated program into x86-64 AT&T assembly.
//! - `error` centralises reporting utilities shared by the other modules.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod parser;
pub mod sema;
pub mod tokenizer;
pub mod ty;

pub use codegen::CodegenConfig;
pub use error::{CompileError, CompileResult, Pos, Stage};

/// Compile a source string into AT&T assembly. Nothing is returned unless
/// every stage succeeds.
pub fn compile(source: &str, config: &CodegenConfig) -> CompileResult<String> {
  let tokens = tokenizer::tokenize(source)?;
  let mut program = parser::parse(tokens)?;
  let symbols = sema::analyze(&mut program)?;
  if config.emit_start {
    sema::check_reserved(&program, codegen::START_SYMBOL)?;
  }
  Ok(codegen::generate(&program, &symbols, config))
}

/// Compile with the default code generation settings.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  compile(source, &CodegenConfig::default())
}
