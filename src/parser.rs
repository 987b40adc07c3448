//! Recursive-descent parser producing the program AST.
//!
//! The parser mirrors the classic chibicc structure: a statement layer on top
//! of a precedence-climbing set of expression helpers, one per level, from
//! `||` (lowest) down to primaries. Every binary level is left-associative;
//! assignment is right-associative and binds loosest of all. One token of
//! lookahead is enough for the whole grammar, and parsing stops at the first
//! syntax error.

use crate::ast::{
  BinaryOp, Block, Case, CaseLabel, Expr, Function, Param, Program, Stmt, StmtKind, UnaryOp,
  VarDecl,
};
use crate::error::{CompileResult, ParseSnafu, Pos};
use crate::tokenizer::{Token, TokenKind, describe_token};
use crate::ty::Type;

/// Parse a whole translation unit: a sequence of function definitions.
pub fn parse(tokens: Vec<Token>) -> CompileResult<Program> {
  let mut stream = TokenStream::new(tokens);
  let mut program = Program::default();

  while !stream.is_eof() {
    program.functions.push(parse_function(&mut stream)?);
  }

  tracing::debug!(functions = program.functions.len(), "parsed program");
  Ok(program)
}

/// Parse a single statement. Exposed for tests and tools that work on
/// fragments rather than whole programs.
pub fn parse_statement(tokens: Vec<Token>) -> CompileResult<Stmt> {
  let mut stream = TokenStream::new(tokens);
  let stmt = parse_stmt(&mut stream)?;
  if !stream.is_eof() {
    return Err(stream.unexpected("end of input"));
  }
  Ok(stmt)
}

fn parse_type(stream: &mut TokenStream) -> CompileResult<(Type, Pos)> {
  let pos = stream.current_pos();
  if let Some(ty) = stream.peek().and_then(|t| {
    (t.kind == TokenKind::Keyword)
      .then(|| Type::from_keyword(t.lexeme))
      .flatten()
  }) {
    stream.advance();
    return Ok((ty, pos));
  }
  Err(stream.unexpected("a type name"))
}

fn is_type_keyword(token: Option<&Token>) -> bool {
  token.is_some_and(|t| t.is("int") || t.is("void"))
}

fn parse_function(stream: &mut TokenStream) -> CompileResult<Function> {
  let (ret, pos) = parse_type(stream)?;
  let (name, _) = stream.get_ident()?;
  stream.skip("(")?;
  let params = parse_params(stream)?;
  stream.skip(")")?;
  let body = parse_block(stream)?;

  Ok(Function {
    name,
    params,
    ret,
    body,
    pos,
    symbol: None,
    locals: Vec::new(),
  })
}

/// PARAMS ::= ε | `void` | TYPE IDENT (`,` TYPE IDENT)*
fn parse_params(stream: &mut TokenStream) -> CompileResult<Vec<Param>> {
  let mut params = Vec::new();
  if stream.peek().is_some_and(|t| t.is(")")) {
    return Ok(params);
  }
  if stream.peek().is_some_and(|t| t.is("void")) && stream.peek_nth(1).is_some_and(|t| t.is(")")) {
    stream.advance();
    return Ok(params);
  }

  loop {
    let (ty, _) = parse_type(stream)?;
    let (name, pos) = stream.get_ident()?;
    params.push(Param {
      name,
      ty,
      pos,
      symbol: None,
    });
    if !stream.equal(",") {
      return Ok(params);
    }
  }
}

fn parse_block(stream: &mut TokenStream) -> CompileResult<Block> {
  let pos = stream.current_pos();
  stream.skip("{")?;
  let mut stmts = Vec::new();
  while !stream.equal("}") {
    if stream.is_eof() {
      return Err(stream.unexpected("\"}\""));
    }
    stmts.push(parse_stmt(stream)?);
  }
  Ok(Block { stmts, pos })
}

fn parse_stmt(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let pos = stream.current_pos();

  if is_type_keyword(stream.peek()) {
    return parse_declaration(stream);
  }

  if stream.equal("if") {
    stream.skip("(")?;
    let cond = parse_expr(stream)?;
    stream.skip(")")?;
    let then = Box::new(parse_stmt(stream)?);
    let els = if stream.equal("else") {
      Some(Box::new(parse_stmt(stream)?))
    } else {
      None
    };
    return Ok(Stmt::new(StmtKind::If { cond, then, els }, pos));
  }

  if stream.equal("while") {
    stream.skip("(")?;
    let cond = parse_expr(stream)?;
    stream.skip(")")?;
    let body = Box::new(parse_stmt(stream)?);
    return Ok(Stmt::new(StmtKind::While { cond, body }, pos));
  }

  if stream.equal("for") {
    return parse_for(stream, pos);
  }

  if stream.equal("switch") {
    return parse_switch(stream, pos);
  }

  if stream.equal("break") {
    stream.skip(";")?;
    return Ok(Stmt::new(StmtKind::Break, pos));
  }

  if stream.equal("continue") {
    stream.skip(";")?;
    return Ok(Stmt::new(StmtKind::Continue, pos));
  }

  if stream.equal("return") {
    if stream.equal(";") {
      return Ok(Stmt::new(StmtKind::Return(None), pos));
    }
    let value = parse_expr(stream)?;
    stream.skip(";")?;
    return Ok(Stmt::new(StmtKind::Return(Some(value)), pos));
  }

  if stream.peek().is_some_and(|t| t.is("{")) {
    let block = parse_block(stream)?;
    return Ok(Stmt::new(StmtKind::Block(block), pos));
  }

  if stream.equal(";") {
    return Ok(Stmt::new(StmtKind::Empty, pos));
  }

  parse_expr_stmt(stream)
}

/// DECLARATION ::= TYPE IDENT [`=` EXPR] `;`
fn parse_declaration(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let (ty, pos) = parse_type(stream)?;
  let (name, _) = stream.get_ident()?;
  let init = if stream.equal("=") {
    Some(parse_expr(stream)?)
  } else {
    None
  };
  stream.skip(";")?;
  let decl = VarDecl {
    name,
    ty,
    init,
    symbol: None,
  };
  Ok(Stmt::new(StmtKind::VarDecl(decl), pos))
}

fn parse_expr_stmt(stream: &mut TokenStream) -> CompileResult<Stmt> {
  let pos = stream.current_pos();
  if stream.peek().is_some_and(|t| t.kind == TokenKind::Keyword) {
    return Err(stream.unexpected("a statement"));
  }
  let expr = parse_expr(stream)?;
  stream.skip(";")?;
  Ok(Stmt::new(StmtKind::Expr(expr), pos))
}

/// FOR ::= `for` `(` (DECLARATION | EXPR `;` | `;`) [EXPR] `;` [EXPR] `)` STMT
fn parse_for(stream: &mut TokenStream, pos: Pos) -> CompileResult<Stmt> {
  stream.skip("(")?;

  let init = if is_type_keyword(stream.peek()) {
    Some(Box::new(parse_declaration(stream)?))
  } else if stream.equal(";") {
    None
  } else {
    Some(Box::new(parse_expr_stmt(stream)?))
  };

  let cond = if stream.peek().is_some_and(|t| t.is(";")) {
    None
  } else {
    Some(parse_expr(stream)?)
  };
  stream.skip(";")?;

  let step = if stream.peek().is_some_and(|t| t.is(")")) {
    None
  } else {
    Some(parse_expr(stream)?)
  };
  stream.skip(")")?;

  let body = Box::new(parse_stmt(stream)?);
  Ok(Stmt::new(
    StmtKind::For {
      init,
      cond,
      step,
      body,
    },
    pos,
  ))
}

/// SWITCH ::= `switch` `(` EXPR `)` `{` (LABEL `:` STMT*)* `}`
/// LABEL  ::= `case` [`-`] NUM | `default`
fn parse_switch(stream: &mut TokenStream, pos: Pos) -> CompileResult<Stmt> {
  stream.skip("(")?;
  let scrutinee = parse_expr(stream)?;
  stream.skip(")")?;
  stream.skip("{")?;

  let mut cases: Vec<Case> = Vec::new();
  while !stream.equal("}") {
    let case_pos = stream.current_pos();
    let label = if stream.equal("case") {
      let negative = stream.equal("-");
      let (value, _) = stream.get_number()?;
      CaseLabel::Value(if negative { -value } else { value })
    } else if stream.peek().is_some_and(|t| t.is("default")) {
      if cases.iter().any(|c| c.label == CaseLabel::Default) {
        return Err(stream.unexpected("\"case\" or \"}\" (only one default is allowed)"));
      }
      stream.advance();
      CaseLabel::Default
    } else {
      return Err(stream.unexpected("\"case\" or \"default\""));
    };
    stream.skip(":")?;

    let mut body = Vec::new();
    while !stream
      .peek()
      .is_some_and(|t| t.is("case") || t.is("default") || t.is("}"))
    {
      if stream.is_eof() {
        return Err(stream.unexpected("\"}\""));
      }
      body.push(parse_stmt(stream)?);
    }
    cases.push(Case {
      label,
      body,
      pos: case_pos,
    });
  }

  Ok(Stmt::new(StmtKind::Switch { scrutinee, cases }, pos))
}

pub(crate) fn parse_expr(stream: &mut TokenStream) -> CompileResult<Expr> {
  parse_assign(stream)
}

fn parse_assign(stream: &mut TokenStream) -> CompileResult<Expr> {
  let node = parse_log_or(stream)?;

  let pos = stream.current_pos();
  if stream.equal("=") {
    let rhs = parse_assign(stream)?;
    return Ok(Expr::assign(node, rhs, pos));
  }

  Ok(node)
}

type Level = fn(&mut TokenStream) -> CompileResult<Expr>;

/// Parse one left-associative binary precedence level: `next (op next)*`.
fn parse_binary_level(
  stream: &mut TokenStream,
  ops: &[(&str, BinaryOp)],
  next: Level,
) -> CompileResult<Expr> {
  let mut node = next(stream)?;

  loop {
    let pos = stream.current_pos();
    let Some(&(symbol, op)) = ops
      .iter()
      .find(|(symbol, _)| stream.peek().is_some_and(|t| t.is(symbol)))
    else {
      break;
    };

    stream.skip(symbol)?;
    let rhs = next(stream)?;
    node = Expr::binary(op, node, rhs, pos);
  }

  Ok(node)
}

fn parse_log_or(stream: &mut TokenStream) -> CompileResult<Expr> {
  parse_binary_level(stream, &[("||", BinaryOp::LogOr)], parse_log_and)
}

fn parse_log_and(stream: &mut TokenStream) -> CompileResult<Expr> {
  parse_binary_level(stream, &[("&&", BinaryOp::LogAnd)], parse_equality)
}

fn parse_equality(stream: &mut TokenStream) -> CompileResult<Expr> {
  parse_binary_level(
    stream,
    &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
    parse_relational,
  )
}

fn parse_relational(stream: &mut TokenStream) -> CompileResult<Expr> {
  parse_binary_level(
    stream,
    &[
      ("<", BinaryOp::Lt),
      ("<=", BinaryOp::Le),
      (">", BinaryOp::Gt),
      (">=", BinaryOp::Ge),
    ],
    parse_add,
  )
}

fn parse_add(stream: &mut TokenStream) -> CompileResult<Expr> {
  parse_binary_level(
    stream,
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    parse_mul,
  )
}

fn parse_mul(stream: &mut TokenStream) -> CompileResult<Expr> {
  parse_binary_level(
    stream,
    &[
      ("*", BinaryOp::Mul),
      ("/", BinaryOp::Div),
      ("%", BinaryOp::Mod),
    ],
    parse_unary,
  )
}

fn parse_unary(stream: &mut TokenStream) -> CompileResult<Expr> {
  let pos = stream.current_pos();

  if stream.equal("+") {
    return parse_unary(stream);
  }

  if stream.equal("-") {
    let operand = parse_unary(stream)?;
    return Ok(Expr::unary(UnaryOp::Neg, operand, pos));
  }

  if stream.equal("!") {
    let operand = parse_unary(stream)?;
    return Ok(Expr::unary(UnaryOp::Not, operand, pos));
  }

  parse_primary(stream)
}

/// PRIMARY ::= `(` EXPR `)` | NUM | IDENT | IDENT `(` [EXPR (`,` EXPR)*] `)`
fn parse_primary(stream: &mut TokenStream) -> CompileResult<Expr> {
  if stream.equal("(") {
    let node = parse_expr(stream)?;
    stream.skip(")")?;
    return Ok(node);
  }

  if stream.peek().is_some_and(|t| t.kind == TokenKind::Ident) {
    let (name, pos) = stream.get_ident()?;
    if !stream.equal("(") {
      return Ok(Expr::ident(name, pos));
    }
    let mut args = Vec::new();
    if !stream.equal(")") {
      loop {
        args.push(parse_expr(stream)?);
        if stream.equal(")") {
          break;
        }
        stream.skip(",")?;
      }
    }
    return Ok(Expr::call(name, args, pos));
  }

  if stream.peek().is_some_and(|t| t.kind == TokenKind::Num) {
    let (value, pos) = stream.get_number()?;
    return Ok(Expr::number(value, pos));
  }

  Err(stream.unexpected("an expression"))
}

/// Lightweight cursor over the token vector.
pub(crate) struct TokenStream<'src> {
  tokens: Vec<Token<'src>>,
  pos: usize,
}

impl<'src> TokenStream<'src> {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  pub(crate) fn new(tokens: Vec<Token<'src>>) -> Self {
    Self { tokens, pos: 0 }
  }

  fn peek(&self) -> Option<&Token<'src>> {
    self.tokens.get(self.pos)
  }

  fn peek_nth(&self, n: usize) -> Option<&Token<'src>> {
    self.tokens.get(self.pos + n)
  }

  fn advance(&mut self) {
    self.pos += 1;
  }

  /// Position of the current token, or of the last token once exhausted.
  fn current_pos(&self) -> Pos {
    self
      .peek()
      .or_else(|| self.tokens.last())
      .map_or_else(Pos::default, |t| t.pos)
  }

  /// Consume the current token if it is the keyword or punctuator `op`.
  fn equal(&mut self, op: &str) -> bool {
    if self.peek().is_some_and(|token| token.is(op)) {
      self.pos += 1;
      return true;
    }
    false
  }

  fn skip(&mut self, s: &str) -> CompileResult<()> {
    if self.equal(s) {
      Ok(())
    } else {
      Err(self.unexpected(&format!("\"{s}\"")))
    }
  }

  /// Build a parse error describing what was expected at the current token.
  fn unexpected(&self, expected: &str) -> crate::error::CompileError {
    ParseSnafu {
      expected,
      found: describe_token(self.peek()),
      pos: self.current_pos(),
    }
    .build()
  }

  /// Parse the current token as an integer literal returning its value and position.
  fn get_number(&mut self) -> CompileResult<(i64, Pos)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Num
      && let Some(value) = token.value
    {
      let pos = token.pos;
      self.pos += 1;
      return Ok((value, pos));
    }
    Err(self.unexpected("a number"))
  }

  /// Parse the current token as an identifier.
  fn get_ident(&mut self) -> CompileResult<(String, Pos)> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Ident
    {
      let ident = (token.lexeme.to_string(), token.pos);
      self.pos += 1;
      return Ok(ident);
    }
    Err(self.unexpected("an identifier"))
  }

  fn is_eof(&self) -> bool {
    matches!(self.peek().map(|token| token.kind), Some(TokenKind::Eof) | None)
  }
}
