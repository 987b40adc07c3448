//! Shared error utilities used across the compilation pipeline.
//!
//! Every stage reports failures through [`CompileError`]. The pipeline is
//! fail-fast, so each error describes exactly one defect and carries the
//! source position it was found at. Diagnostics are rendered in a style
//! reminiscent of chibicc, pointing at the offending column with a caret.

use std::fmt;

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

/// 1-based line and column of a character in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pos {
  pub line: usize,
  pub col: usize,
}

impl Pos {
  pub fn new(line: usize, col: usize) -> Self {
    Self { line, col }
  }
}

impl Default for Pos {
  fn default() -> Self {
    Pos::new(1, 1)
  }
}

impl fmt::Display for Pos {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.line, self.col)
  }
}

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Lexical,
  Syntactic,
  Semantic,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Lexical => "lexical",
      Stage::Syntactic => "syntax",
      Stage::Semantic => "semantic",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  #[snafu(display("{pos}: unrecognized character '{ch}'"))]
  Lex { ch: char, pos: Pos },

  #[snafu(display("{pos}: unterminated block comment"))]
  UnterminatedComment { pos: Pos },

  #[snafu(display("{pos}: invalid number \"{lexeme}\": out of range"))]
  InvalidNumber { lexeme: String, pos: Pos },

  #[snafu(display("{pos}: expected {expected}, but got \"{found}\""))]
  Parse {
    expected: String,
    found: String,
    pos: Pos,
  },

  #[snafu(display("{pos}: redeclaration of '{name}' (previous declaration at {previous})"))]
  DuplicateDeclaration {
    name: String,
    pos: Pos,
    previous: Pos,
  },

  #[snafu(display("{pos}: '{name}' undeclared"))]
  Undeclared { name: String, pos: Pos },

  #[snafu(display("{pos}: {message}"))]
  Type { message: String, pos: Pos },

  #[snafu(display("{pos}: '{keyword}' statement not within {enclosing}"))]
  ControlFlow {
    keyword: &'static str,
    enclosing: &'static str,
    pos: Pos,
  },
}

impl CompileError {
  /// Source position the error is anchored at.
  pub fn pos(&self) -> Pos {
    match self {
      CompileError::Lex { pos, .. }
      | CompileError::UnterminatedComment { pos }
      | CompileError::InvalidNumber { pos, .. }
      | CompileError::Parse { pos, .. }
      | CompileError::DuplicateDeclaration { pos, .. }
      | CompileError::Undeclared { pos, .. }
      | CompileError::Type { pos, .. }
      | CompileError::ControlFlow { pos, .. } => *pos,
    }
  }

  pub fn stage(&self) -> Stage {
    match self {
      CompileError::Lex { .. }
      | CompileError::UnterminatedComment { .. }
      | CompileError::InvalidNumber { .. } => Stage::Lexical,
      CompileError::Parse { .. } => Stage::Syntactic,
      CompileError::DuplicateDeclaration { .. }
      | CompileError::Undeclared { .. }
      | CompileError::Type { .. }
      | CompileError::ControlFlow { .. } => Stage::Semantic,
    }
  }

  /// Render the error against the source it was produced from: the message,
  /// the offending line, and a caret under the reported column.
  pub fn render(&self, source: &str) -> String {
    let pos = self.pos();
    let line = source.lines().nth(pos.line.saturating_sub(1)).unwrap_or("");
    let marker = format!("{}^", " ".repeat(pos.col.saturating_sub(1)));
    format!("{} error: {self}\n{line}\n{marker}", self.stage())
  }
}
