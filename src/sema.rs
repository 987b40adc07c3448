//! Semantic analysis: name resolution, type checking and control-flow checks.
//!
//! The analyzer walks the AST once, keeping an explicit stack of scopes. It
//! records every declared name in a [`SymbolTable`] arena and writes the
//! resulting [`SymbolId`]s and expression types back into the tree in place.
//! Function signatures are registered in a pre-pass so that calls may refer
//! to functions defined later in the file. Analysis stops at the first error.

use std::collections::HashMap;
use std::mem;
use std::ops::Index;

use crate::ast::{Block, Case, CaseLabel, Expr, ExprKind, Function, Program, Stmt, StmtKind};
use crate::error::{
  CompileResult, ControlFlowSnafu, DuplicateDeclarationSnafu, Pos, TypeSnafu, UndeclaredSnafu,
};
use crate::ty::{Signature, Type};

/// Bytes of frame storage per variable; every value is a 64-bit `int`.
pub const SLOT_SIZE: i64 = 8;

/// Index of a symbol in the [`SymbolTable`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKind {
  /// A parameter or local living in slot `slot` of its function's frame.
  Variable { slot: usize },
  Function { label: String, signature: Signature },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
  pub name: String,
  pub kind: SymbolKind,
  pub ty: Type,
  /// Scope nesting depth at the point of declaration; functions live at 0.
  pub depth: usize,
  pub pos: Pos,
}

impl Symbol {
  /// Distance below the frame base pointer, for variables.
  pub fn frame_offset(&self) -> Option<i64> {
    match self.kind {
      SymbolKind::Variable { slot } => Some((slot as i64 + 1) * SLOT_SIZE),
      SymbolKind::Function { .. } => None,
    }
  }

  pub fn signature(&self) -> Option<&Signature> {
    match &self.kind {
      SymbolKind::Function { signature, .. } => Some(signature),
      SymbolKind::Variable { .. } => None,
    }
  }
}

/// Arena owning every symbol of one compilation.
#[derive(Debug, Default)]
pub struct SymbolTable {
  symbols: Vec<Symbol>,
}

impl SymbolTable {
  fn push(&mut self, symbol: Symbol) -> SymbolId {
    self.symbols.push(symbol);
    SymbolId(self.symbols.len() - 1)
  }

  pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
    self.symbols.get(id.0)
  }

  fn len(&self) -> usize {
    self.symbols.len()
  }
}

impl Index<SymbolId> for SymbolTable {
  type Output = Symbol;

  fn index(&self, id: SymbolId) -> &Self::Output {
    &self.symbols[id.0]
  }
}

/// Stack of name-to-symbol mappings, innermost scope last.
#[derive(Debug, Default)]
struct Scopes {
  stack: Vec<HashMap<String, SymbolId>>,
}

impl Scopes {
  fn push(&mut self) {
    self.stack.push(HashMap::new());
  }

  fn pop(&mut self) {
    self.stack.pop();
  }

  /// Depth of the innermost scope; the global scope is 0.
  fn depth(&self) -> usize {
    self.stack.len().saturating_sub(1)
  }

  fn lookup_current(&self, name: &str) -> Option<SymbolId> {
    self.stack.last().and_then(|scope| scope.get(name).copied())
  }

  fn lookup(&self, name: &str) -> Option<SymbolId> {
    self
      .stack
      .iter()
      .rev()
      .find_map(|scope| scope.get(name).copied())
  }

  fn insert(&mut self, name: &str, id: SymbolId) {
    let scope = self
      .stack
      .last_mut()
      .expect("internal error: declaring a name with no open scope");
    scope.insert(name.to_string(), id);
  }
}

/// Resolve and check `program`, annotating it in place. Returns the symbol
/// table the annotations index into.
pub fn analyze(program: &mut Program) -> CompileResult<SymbolTable> {
  let mut analyzer = Analyzer::default();
  analyzer.scopes.push();

  for func in program.functions.iter_mut() {
    analyzer.declare_function(func)?;
  }
  for func in program.functions.iter_mut() {
    analyzer.analyze_function(func)?;
  }

  tracing::debug!(symbols = analyzer.table.len(), "semantic analysis complete");
  Ok(analyzer.table)
}

/// Reject a user function named `name` when the generator is about to emit
/// a symbol of its own under that name.
pub fn check_reserved(program: &Program, name: &str) -> CompileResult<()> {
  match program.functions.iter().find(|f| f.name == name) {
    Some(func) => TypeSnafu {
      message: format!("'{name}' is reserved for the generated program entry"),
      pos: func.pos,
    }
    .fail(),
    None => Ok(()),
  }
}

#[derive(Default)]
struct Analyzer {
  table: SymbolTable,
  scopes: Scopes,
  /// Per-function state, reset for every body.
  ret: Option<(String, Type)>,
  locals: Vec<SymbolId>,
  loop_depth: usize,
  switch_depth: usize,
}

impl Analyzer {
  fn check_redeclaration(&self, name: &str, pos: Pos) -> CompileResult<()> {
    match self.scopes.lookup_current(name) {
      Some(prev) => DuplicateDeclarationSnafu {
        name,
        pos,
        previous: self.table[prev].pos,
      }
      .fail(),
      None => Ok(()),
    }
  }

  fn declare_function(&mut self, func: &mut Function) -> CompileResult<()> {
    self.check_redeclaration(&func.name, func.pos)?;
    let signature = Signature {
      name: func.name.clone(),
      params: func.params.iter().map(|p| p.ty).collect(),
      ret: func.ret,
    };
    let id = self.table.push(Symbol {
      name: func.name.clone(),
      kind: SymbolKind::Function {
        label: func.name.clone(),
        signature,
      },
      ty: func.ret,
      depth: self.scopes.depth(),
      pos: func.pos,
    });
    self.scopes.insert(&func.name, id);
    func.symbol = Some(id);
    Ok(())
  }

  fn declare_variable(&mut self, name: &str, ty: Type, pos: Pos) -> CompileResult<SymbolId> {
    if !ty.is_integer() {
      return TypeSnafu {
        message: format!("variable '{name}' declared {ty}"),
        pos,
      }
      .fail();
    }
    self.check_redeclaration(name, pos)?;
    let id = self.table.push(Symbol {
      name: name.to_string(),
      kind: SymbolKind::Variable {
        slot: self.locals.len(),
      },
      ty,
      depth: self.scopes.depth(),
      pos,
    });
    self.scopes.insert(name, id);
    self.locals.push(id);
    Ok(id)
  }

  fn analyze_function(&mut self, func: &mut Function) -> CompileResult<()> {
    self.ret = Some((func.name.clone(), func.ret));
    self.loop_depth = 0;
    self.switch_depth = 0;

    // Parameters and the outermost block of the body share one scope.
    self.scopes.push();
    for param in func.params.iter_mut() {
      param.symbol = Some(self.declare_variable(&param.name, param.ty, param.pos)?);
    }
    for stmt in func.body.stmts.iter_mut() {
      self.analyze_stmt(stmt)?;
    }
    self.scopes.pop();

    func.locals = mem::take(&mut self.locals);
    tracing::trace!(function = %func.name, locals = func.locals.len(), "function analyzed");
    Ok(())
  }

  fn analyze_block(&mut self, block: &mut Block) -> CompileResult<()> {
    self.scopes.push();
    for stmt in block.stmts.iter_mut() {
      self.analyze_stmt(stmt)?;
    }
    self.scopes.pop();
    Ok(())
  }

  fn analyze_stmt(&mut self, stmt: &mut Stmt) -> CompileResult<()> {
    let pos = stmt.pos;
    match &mut stmt.kind {
      StmtKind::VarDecl(decl) => {
        if let Some(init) = decl.init.as_mut() {
          self.expect_int(init, "initializer")?;
        }
        decl.symbol = Some(self.declare_variable(&decl.name, decl.ty, pos)?);
      }
      StmtKind::Block(block) => self.analyze_block(block)?,
      StmtKind::If { cond, then, els } => {
        self.expect_int(cond, "condition")?;
        self.analyze_stmt(then)?;
        if let Some(els) = els {
          self.analyze_stmt(els)?;
        }
      }
      StmtKind::While { cond, body } => {
        self.expect_int(cond, "condition")?;
        self.loop_depth += 1;
        self.analyze_stmt(body)?;
        self.loop_depth -= 1;
      }
      StmtKind::For {
        init,
        cond,
        step,
        body,
      } => {
        self.scopes.push();
        if let Some(init) = init {
          self.analyze_stmt(init)?;
        }
        if let Some(cond) = cond {
          self.expect_int(cond, "condition")?;
        }
        if let Some(step) = step {
          self.analyze_expr(step)?;
        }
        self.loop_depth += 1;
        self.analyze_stmt(body)?;
        self.loop_depth -= 1;
        self.scopes.pop();
      }
      StmtKind::Switch { scrutinee, cases } => {
        self.expect_int(scrutinee, "switch expression")?;
        check_case_labels(cases)?;
        self.scopes.push();
        self.switch_depth += 1;
        for case in cases.iter_mut() {
          for stmt in case.body.iter_mut() {
            self.analyze_stmt(stmt)?;
          }
        }
        self.switch_depth -= 1;
        self.scopes.pop();
      }
      StmtKind::Break => {
        if self.loop_depth + self.switch_depth == 0 {
          return ControlFlowSnafu {
            keyword: "break",
            enclosing: "a loop or switch",
            pos,
          }
          .fail();
        }
      }
      StmtKind::Continue => {
        if self.loop_depth == 0 {
          return ControlFlowSnafu {
            keyword: "continue",
            enclosing: "a loop",
            pos,
          }
          .fail();
        }
      }
      StmtKind::Return(value) => {
        let (name, ret) = self
          .ret
          .clone()
          .expect("internal error: return outside of a function body");
        match (value, ret) {
          (Some(value), Type::Int) => self.expect_int(value, "return value")?,
          (None, Type::Int) => {
            return TypeSnafu {
              message: format!("non-void function '{name}' should return a value"),
              pos,
            }
            .fail();
          }
          (Some(_), Type::Void) => {
            return TypeSnafu {
              message: format!("void function '{name}' should not return a value"),
              pos,
            }
            .fail();
          }
          (None, Type::Void) => {}
        }
      }
      StmtKind::Expr(expr) => {
        self.analyze_expr(expr)?;
      }
      StmtKind::Empty => {}
    }
    Ok(())
  }

  /// Type `expr` and require the result to be an integer.
  fn expect_int(&mut self, expr: &mut Expr, what: &str) -> CompileResult<()> {
    let ty = self.analyze_expr(expr)?;
    if ty.is_integer() {
      return Ok(());
    }
    TypeSnafu {
      message: format!("{what} has type {ty}, expected int"),
      pos: expr.pos,
    }
    .fail()
  }

  fn resolve(&self, name: &str, pos: Pos) -> CompileResult<SymbolId> {
    match self.scopes.lookup(name) {
      Some(id) => Ok(id),
      None => UndeclaredSnafu { name, pos }.fail(),
    }
  }

  /// Type `expr`, record the type on the node and return it.
  fn analyze_expr(&mut self, expr: &mut Expr) -> CompileResult<Type> {
    let pos = expr.pos;
    let ty = match &mut expr.kind {
      ExprKind::Num { .. } => Type::Int,
      ExprKind::Ident { name, symbol } => {
        let id = self.resolve(name, pos)?;
        if let SymbolKind::Function { .. } = self.table[id].kind {
          return TypeSnafu {
            message: format!("function '{name}' used as a value"),
            pos,
          }
          .fail();
        }
        *symbol = Some(id);
        self.table[id].ty
      }
      ExprKind::Unary { operand, .. } => {
        self.expect_int(operand, "operand")?;
        Type::Int
      }
      ExprKind::Binary { op, lhs, rhs } => {
        let what = format!("operand of '{}'", op.symbol());
        self.expect_int(lhs, &what)?;
        self.expect_int(rhs, &what)?;
        Type::Int
      }
      ExprKind::Assign { target, value } => {
        if !matches!(target.kind, ExprKind::Ident { .. }) {
          return TypeSnafu {
            message: "left-hand side of assignment is not assignable",
            pos: target.pos,
          }
          .fail();
        }
        self.analyze_expr(target)?;
        self.expect_int(value, "assigned value")?;
        Type::Int
      }
      ExprKind::Call { name, args, symbol } => {
        let id = self.resolve(name, pos)?;
        let Some(signature) = self.table[id].signature().cloned() else {
          return TypeSnafu {
            message: format!("called object '{name}' is not a function"),
            pos,
          }
          .fail();
        };
        if signature.params.len() != args.len() {
          return TypeSnafu {
            message: format!(
              "function '{name}' expects {} argument(s), got {}",
              signature.params.len(),
              args.len()
            ),
            pos,
          }
          .fail();
        }
        for (i, arg) in args.iter_mut().enumerate() {
          self.expect_int(arg, &format!("argument {} of call to '{name}'", i + 1))?;
        }
        *symbol = Some(id);
        signature.ret
      }
    };
    expr.ty = Some(ty);
    Ok(ty)
  }
}

/// Reject repeated case values within one switch.
fn check_case_labels(cases: &[Case]) -> CompileResult<()> {
  let mut seen: HashMap<i64, Pos> = HashMap::new();
  for case in cases {
    if let CaseLabel::Value(value) = case.label
      && let Some(previous) = seen.insert(value, case.pos)
    {
      return DuplicateDeclarationSnafu {
        name: format!("case {value}"),
        pos: case.pos,
        previous,
      }
      .fail();
    }
  }
  Ok(())
}
