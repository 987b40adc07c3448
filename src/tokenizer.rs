//! Lexical analysis: turns the raw input string into a stream of tokens.
//!
//! [`Lexer`] is a lazy iterator over the source. It knows nothing about
//! semantics beyond recognising keywords, identifiers, operators and numeric
//! literals. Two-character operators are matched before single-character
//! ones to avoid ambiguity. Whitespace, `//` line comments and `/* */` block
//! comments are skipped without producing tokens.

use crate::error::{
  CompileResult, InvalidNumberSnafu, LexSnafu, Pos, UnterminatedCommentSnafu,
};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Keyword,
  Ident,
  Num,
  /// Arithmetic, comparison, logical and assignment operators.
  Operator,
  /// Grouping and separator characters: `( ) { } [ ] ; , :`.
  Punctuator,
  Eof,
}

/// A single lexeme together with where it was found. Tokens borrow their
/// text from the source and are never modified after the lexer yields them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'src> {
  pub kind: TokenKind,
  pub lexeme: &'src str,
  pub value: Option<i64>,
  /// Byte offset of the first character.
  pub loc: usize,
  pub pos: Pos,
}

impl<'src> Token<'src> {
  pub fn new(kind: TokenKind, lexeme: &'src str, loc: usize, pos: Pos) -> Self {
    Self {
      kind,
      lexeme,
      value: None,
      loc,
      pos,
    }
  }

  /// True for a keyword, operator or punctuator spelled exactly `text`.
  pub fn is(&self, text: &str) -> bool {
    matches!(
      self.kind,
      TokenKind::Keyword | TokenKind::Operator | TokenKind::Punctuator
    ) && self.lexeme == text
  }
}

pub const KEYWORDS: [&str; 12] = [
  "int", "void", "if", "else", "while", "for", "switch", "case", "default", "break", "continue",
  "return",
];

const TWO_CHAR_OPERATORS: [&str; 6] = ["==", "!=", "<=", ">=", "&&", "||"];

fn single_char_kind(c: char) -> Option<TokenKind> {
  match c {
    '+' | '-' | '*' | '/' | '%' | '=' | '<' | '>' | '!' => Some(TokenKind::Operator),
    '(' | ')' | '{' | '}' | '[' | ']' | ';' | ',' | ':' => Some(TokenKind::Punctuator),
    _ => None,
  }
}

fn is_ident_start(c: char) -> bool {
  c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_body(c: char) -> bool {
  c.is_ascii_alphanumeric() || c == '_'
}

/// Lazy tokenizer over a source string.
///
/// The sequence is finite and ends with exactly one `Eof` token. When an
/// unrecognized character is met the lexer consumes it before yielding the
/// error, so a caller that keeps iterating resumes right after it. Whether to
/// do so is up to the caller; [`tokenize`] stops at the first error.
#[derive(Debug, Clone)]
pub struct Lexer<'src> {
  source: &'src str,
  loc: usize,
  pos: Pos,
  finished: bool,
}

impl<'src> Lexer<'src> {
  pub fn new(source: &'src str) -> Self {
    Self {
      source,
      loc: 0,
      pos: Pos::default(),
      finished: false,
    }
  }

  fn peek(&self) -> Option<char> {
    self.source[self.loc..].chars().next()
  }

  fn peek_second(&self) -> Option<char> {
    self.source[self.loc..].chars().nth(1)
  }

  /// Advance one character, keeping line and column in sync.
  fn bump(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.loc += c.len_utf8();
    if c == '\n' {
      self.pos.line += 1;
      self.pos.col = 1;
    } else {
      self.pos.col += 1;
    }
    Some(c)
  }

  fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
    while self.peek().is_some_and(&pred) {
      self.bump();
    }
  }

  /// Skip whitespace and comments. Fails only on a block comment that is
  /// still open at end of input; the whole remainder is consumed in that case.
  fn skip_trivia(&mut self) -> CompileResult<()> {
    loop {
      self.bump_while(char::is_whitespace);

      match (self.peek(), self.peek_second()) {
        (Some('/'), Some('/')) => self.bump_while(|c| c != '\n'),
        (Some('/'), Some('*')) => {
          let start = self.pos;
          self.bump();
          self.bump();
          loop {
            match (self.peek(), self.peek_second()) {
              (Some('*'), Some('/')) => {
                self.bump();
                self.bump();
                break;
              }
              (Some(_), _) => {
                self.bump();
              }
              (None, _) => return UnterminatedCommentSnafu { pos: start }.fail(),
            }
          }
        }
        _ => return Ok(()),
      }
    }
  }

  fn lex_token(&mut self) -> CompileResult<Token<'src>> {
    let start = self.loc;
    let pos = self.pos;
    let Some(c) = self.bump() else {
      self.finished = true;
      return Ok(Token::new(TokenKind::Eof, "", start, pos));
    };

    if c.is_ascii_digit() {
      self.bump_while(|c| c.is_ascii_digit());
      let lexeme = &self.source[start..self.loc];
      let value = lexeme
        .parse::<i64>()
        .map_err(|_| InvalidNumberSnafu { lexeme, pos }.build())?;
      let mut token = Token::new(TokenKind::Num, lexeme, start, pos);
      token.value = Some(value);
      return Ok(token);
    }

    if is_ident_start(c) {
      self.bump_while(is_ident_body);
      let lexeme = &self.source[start..self.loc];
      let kind = if KEYWORDS.contains(&lexeme) {
        TokenKind::Keyword
      } else {
        TokenKind::Ident
      };
      return Ok(Token::new(kind, lexeme, start, pos));
    }

    if let Some(op) = TWO_CHAR_OPERATORS
      .into_iter()
      .find(|op| self.source[start..].starts_with(op))
    {
      self.bump();
      return Ok(Token::new(TokenKind::Operator, op, start, pos));
    }

    if let Some(kind) = single_char_kind(c) {
      let lexeme = &self.source[start..self.loc];
      return Ok(Token::new(kind, lexeme, start, pos));
    }

    LexSnafu { ch: c, pos }.fail()
  }
}

impl<'src> Iterator for Lexer<'src> {
  type Item = CompileResult<Token<'src>>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }
    if let Err(err) = self.skip_trivia() {
      return Some(Err(err));
    }
    Some(self.lex_token())
  }
}

/// Lex the whole input into a vector terminated by an `Eof` marker, stopping
/// at the first lexical error.
pub fn tokenize(source: &str) -> CompileResult<Vec<Token<'_>>> {
  let tokens = Lexer::new(source).collect::<CompileResult<Vec<_>>>()?;
  tracing::debug!(tokens = tokens.len(), "tokenized source");
  Ok(tokens)
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => t.lexeme.to_string(),
    },
    None => "EOF".to_string(),
  }
}
