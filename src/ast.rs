//! Abstract syntax tree.
//!
//! The tree is a strict ownership hierarchy: every node owns its children and
//! nothing is shared. Semantic analysis fills in the `ty` slot of each
//! expression and the `symbol` slot of each name-bearing node in place. A
//! symbol slot is an index into the [`SymbolTable`](crate::sema::SymbolTable)
//! arena, never a pointer, and is only used for lookups.

use crate::error::Pos;
use crate::sema::SymbolId;
use crate::ty::Type;

/// Binary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Mod,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
  LogAnd,
  LogOr,
}

impl BinaryOp {
  pub fn symbol(&self) -> &'static str {
    match self {
      BinaryOp::Add => "+",
      BinaryOp::Sub => "-",
      BinaryOp::Mul => "*",
      BinaryOp::Div => "/",
      BinaryOp::Mod => "%",
      BinaryOp::Eq => "==",
      BinaryOp::Ne => "!=",
      BinaryOp::Lt => "<",
      BinaryOp::Le => "<=",
      BinaryOp::Gt => ">",
      BinaryOp::Ge => ">=",
      BinaryOp::LogAnd => "&&",
      BinaryOp::LogOr => "||",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Neg,
  Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
  pub kind: ExprKind,
  pub pos: Pos,
  /// Filled in by semantic analysis.
  pub ty: Option<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
  Num {
    value: i64,
  },
  Ident {
    name: String,
    symbol: Option<SymbolId>,
  },
  Unary {
    op: UnaryOp,
    operand: Box<Expr>,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  Assign {
    target: Box<Expr>,
    value: Box<Expr>,
  },
  Call {
    name: String,
    args: Vec<Expr>,
    symbol: Option<SymbolId>,
  },
}

impl Expr {
  fn new(kind: ExprKind, pos: Pos) -> Self {
    Self {
      kind,
      pos,
      ty: None,
    }
  }

  pub fn number(value: i64, pos: Pos) -> Self {
    Self::new(ExprKind::Num { value }, pos)
  }

  pub fn ident(name: impl Into<String>, pos: Pos) -> Self {
    Self::new(
      ExprKind::Ident {
        name: name.into(),
        symbol: None,
      },
      pos,
    )
  }

  pub fn unary(op: UnaryOp, operand: Expr, pos: Pos) -> Self {
    Self::new(
      ExprKind::Unary {
        op,
        operand: Box::new(operand),
      },
      pos,
    )
  }

  pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, pos: Pos) -> Self {
    Self::new(
      ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
      },
      pos,
    )
  }

  pub fn assign(target: Expr, value: Expr, pos: Pos) -> Self {
    Self::new(
      ExprKind::Assign {
        target: Box::new(target),
        value: Box::new(value),
      },
      pos,
    )
  }

  pub fn call(name: impl Into<String>, args: Vec<Expr>, pos: Pos) -> Self {
    Self::new(
      ExprKind::Call {
        name: name.into(),
        args,
        symbol: None,
      },
      pos,
    )
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
  pub name: String,
  pub ty: Type,
  pub init: Option<Expr>,
  pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseLabel {
  Value(i64),
  Default,
}

/// One `case <n>:` or `default:` label and the statements up to the next
/// label. Execution falls through into the following case unless a `break`
/// leaves the switch.
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
  pub label: CaseLabel,
  pub body: Vec<Stmt>,
  pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
  pub stmts: Vec<Stmt>,
  pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
  pub kind: StmtKind,
  pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
  VarDecl(VarDecl),
  Block(Block),
  If {
    cond: Expr,
    then: Box<Stmt>,
    els: Option<Box<Stmt>>,
  },
  While {
    cond: Expr,
    body: Box<Stmt>,
  },
  /// `init` is a declaration or expression statement; an absent `cond` is
  /// always true.
  For {
    init: Option<Box<Stmt>>,
    cond: Option<Expr>,
    step: Option<Expr>,
    body: Box<Stmt>,
  },
  Switch {
    scrutinee: Expr,
    cases: Vec<Case>,
  },
  Break,
  Continue,
  Return(Option<Expr>),
  Expr(Expr),
  Empty,
}

impl Stmt {
  pub fn new(kind: StmtKind, pos: Pos) -> Self {
    Self { kind, pos }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
  pub name: String,
  pub ty: Type,
  pub pos: Pos,
  pub symbol: Option<SymbolId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
  pub name: String,
  pub params: Vec<Param>,
  pub ret: Type,
  pub body: Block,
  pub pos: Pos,
  pub symbol: Option<SymbolId>,
  /// Every variable stored in this function's frame, parameters first, in
  /// declaration order. Filled in by semantic analysis.
  pub locals: Vec<SymbolId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
  pub functions: Vec<Function>,
}
