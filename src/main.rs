//! Command-line front-end: reads a source file and writes the assembly.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use cmmc::tokenizer::{Lexer, TokenKind};
use cmmc::{CodegenConfig, CompileError, CompileResult, compile, parser, tokenizer};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Emit {
  /// Token listing, including every lexical error.
  Tokens,
  /// Parsed syntax tree.
  Ast,
  Asm,
}

#[derive(Debug, Parser)]
#[command(version, about = "Compile a small C subset to x86-64 assembly")]
struct Args {
  /// Source file to compile
  input: PathBuf,

  /// Output file (defaults to stdout)
  #[arg(short, long)]
  output: Option<PathBuf>,

  /// Stage output to produce
  #[arg(long, value_enum, default_value_t = Emit::Asm)]
  emit: Emit,

  /// Emit a `_start` entry that exits with main's return value
  #[arg(long)]
  start: bool,

  /// Enable debug logging
  #[arg(short, long)]
  verbose: bool,
}

fn main() {
  let args = Args::parse();

  let default_level = if args.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_target(false)
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
    )
    .init();

  let source = match fs::read_to_string(&args.input) {
    Ok(source) => source,
    Err(err) => {
      eprintln!("cannot read {}: {err}", args.input.display());
      process::exit(1);
    }
  };
  tracing::debug!(input = %args.input.display(), bytes = source.len(), "read source");

  let config = CodegenConfig {
    emit_start: args.start,
  };
  let output = match args.emit {
    Emit::Tokens => list_tokens(&source),
    Emit::Ast => dump_ast(&source).map_err(|err| vec![err]),
    Emit::Asm => compile(&source, &config).map_err(|err| vec![err]),
  };

  let text = match output {
    Ok(text) => text,
    Err(errors) => {
      for err in &errors {
        eprintln!("{}", err.render(&source));
      }
      process::exit(1);
    }
  };

  match &args.output {
    Some(path) => {
      if let Err(err) = fs::write(path, text) {
        eprintln!("cannot write {}: {err}", path.display());
        process::exit(1);
      }
    }
    None => print!("{text}"),
  }
}

/// Keep lexing past errors so every bad character in the file is reported.
fn list_tokens(source: &str) -> Result<String, Vec<CompileError>> {
  let mut text = String::new();
  let mut errors = Vec::new();

  for result in Lexer::new(source) {
    match result {
      Ok(token) if token.kind == TokenKind::Eof => text.push_str(&format!("{}\tEOF\n", token.pos)),
      Ok(token) => text.push_str(&format!("{}\t{:?}\t{}\n", token.pos, token.kind, token.lexeme)),
      Err(err) => errors.push(err),
    }
  }

  if errors.is_empty() { Ok(text) } else { Err(errors) }
}

fn dump_ast(source: &str) -> CompileResult<String> {
  let program = tokenizer::tokenize(source).and_then(parser::parse)?;
  Ok(format!("{program:#?}\n"))
}
