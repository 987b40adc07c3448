//! Code generation: lower the annotated AST into AT&T x86-64 assembly.
//!
//! The emitter uses a simple stack machine: every expression leaves a single
//! value on the stack and statements pop intermediate results as we chain
//! them. Locals live in a fixed-size frame addressed relative to `%rbp`.
//! Control flow lowers to `.L.<kind>.<n>` labels with one counter per
//! compilation, so the output depends only on the input program.

use crate::ast::{BinaryOp, CaseLabel, Expr, ExprKind, Function, Program, Stmt, StmtKind, UnaryOp};
use crate::sema::{SLOT_SIZE, SymbolId, SymbolKind, SymbolTable};

/// Knobs for the assembly emitter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodegenConfig {
  /// Emit a `_start` entry that calls `main` and exits with its result, so
  /// the output links without a C runtime.
  pub emit_start: bool,
}

/// Entry symbol emitted when [`CodegenConfig::emit_start`] is set.
pub const START_SYMBOL: &str = "_start";

const ARG_REGS: [&str; 6] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

/// Emit assembly for a whole program. `program` must have been accepted by
/// [`analyze`](crate::sema::analyze), which produced `symbols`.
pub fn generate(program: &Program, symbols: &SymbolTable, config: &CodegenConfig) -> String {
  let mut cg = Codegen::new(symbols);
  cg.asm.push_str("  .text\n");

  for func in &program.functions {
    cg.emit_function(func);
  }

  if config.emit_start && program.functions.iter().any(|f| f.name == "main") {
    cg.emit_start();
  }

  // Mark the stack non-executable for the linker.
  cg.asm.push_str("  .section .note.GNU-stack,\"\",@progbits\n");

  tracing::debug!(labels = cg.counter, bytes = cg.asm.len(), "generated assembly");
  cg.asm
}

fn align_to(n: i64, align: i64) -> i64 {
  (n + align - 1) / align * align
}

struct Codegen<'a> {
  symbols: &'a SymbolTable,
  asm: String,
  /// Number of 8-byte values pushed since the frame was set up.
  depth: usize,
  counter: usize,
  break_labels: Vec<String>,
  continue_labels: Vec<String>,
  return_label: String,
}

impl<'a> Codegen<'a> {
  fn new(symbols: &'a SymbolTable) -> Self {
    Self {
      symbols,
      asm: String::new(),
      depth: 0,
      counter: 0,
      break_labels: Vec::new(),
      continue_labels: Vec::new(),
      return_label: String::new(),
    }
  }

  fn ins(&mut self, instruction: &str) {
    self.asm.push_str("    ");
    self.asm.push_str(instruction);
    self.asm.push('\n');
  }

  fn label(&mut self, label: &str) {
    self.asm.push_str(label);
    self.asm.push_str(":\n");
  }

  fn next_id(&mut self) -> usize {
    self.counter += 1;
    self.counter
  }

  fn push(&mut self) {
    self.ins("push %rax");
    self.depth += 1;
  }

  fn pop(&mut self, reg: &str) {
    self.ins(&format!("pop {reg}"));
    self.depth -= 1;
  }

  fn offset_of(&self, symbol: Option<SymbolId>, name: &str) -> i64 {
    symbol
      .and_then(|id| self.symbols.get(id))
      .and_then(|sym| sym.frame_offset())
      .unwrap_or_else(|| panic!("internal error: '{name}' has no frame slot"))
  }

  fn emit_function(&mut self, func: &Function) {
    let stack_size = align_to(func.locals.len() as i64 * SLOT_SIZE, 16);
    tracing::trace!(function = %func.name, stack_size, "emitting function");

    self.return_label = format!(".L.return.{}", func.name);
    self.asm.push_str(&format!(".global {}\n", func.name));
    self.label(&func.name);
    self.ins("push %rbp");
    self.ins("mov %rsp, %rbp");
    if stack_size > 0 {
      self.ins(&format!("sub ${stack_size}, %rsp"));
    }

    // Spill parameters into their slots; the ones past the sixth were pushed
    // by the caller and sit above the return address.
    let count = func.params.len();
    for (i, param) in func.params.iter().enumerate() {
      let offset = self.offset_of(param.symbol, &param.name);
      match ARG_REGS.get(i) {
        Some(reg) => self.ins(&format!("mov {reg}, -{offset}(%rbp)")),
        None => {
          let above = 16 + 8 * (count - 1 - i);
          self.ins(&format!("mov {above}(%rbp), %rax"));
          self.ins(&format!("mov %rax, -{offset}(%rbp)"));
        }
      }
    }

    for stmt in &func.body.stmts {
      self.emit_stmt(stmt);
    }

    // Falling off the end returns 0.
    self.ins("mov $0, %rax");
    let return_label = self.return_label.clone();
    self.label(&return_label);
    self.ins("mov %rbp, %rsp");
    self.ins("pop %rbp");
    self.ins("ret");
  }

  fn emit_start(&mut self) {
    self.asm.push_str(&format!(".global {START_SYMBOL}\n"));
    self.label(START_SYMBOL);
    self.ins("call main");
    self.ins("mov %rax, %rdi");
    self.ins("mov $60, %rax");
    self.ins("syscall");
  }

  /// Pop the value on top of the stack and jump to `target` when it is zero.
  fn jump_if_zero(&mut self, target: &str) {
    self.pop("%rax");
    self.ins("cmp $0, %rax");
    self.ins(&format!("je {target}"));
  }

  fn emit_stmt(&mut self, stmt: &Stmt) {
    match &stmt.kind {
      StmtKind::VarDecl(decl) => {
        if let Some(init) = &decl.init {
          let offset = self.offset_of(decl.symbol, &decl.name);
          self.emit_expr(init);
          self.pop("%rax");
          self.ins(&format!("mov %rax, -{offset}(%rbp)"));
        }
      }
      StmtKind::Block(block) => {
        for stmt in &block.stmts {
          self.emit_stmt(stmt);
        }
      }
      StmtKind::If { cond, then, els } => {
        let n = self.next_id();
        self.emit_expr(cond);
        self.jump_if_zero(&format!(".L.else.{n}"));
        self.emit_stmt(then);
        self.ins(&format!("jmp .L.end.{n}"));
        self.label(&format!(".L.else.{n}"));
        if let Some(els) = els {
          self.emit_stmt(els);
        }
        self.label(&format!(".L.end.{n}"));
      }
      StmtKind::While { cond, body } => {
        let n = self.next_id();
        let begin = format!(".L.begin.{n}");
        let brk = format!(".L.break.{n}");
        self.label(&begin);
        self.emit_expr(cond);
        self.jump_if_zero(&brk);
        self.emit_loop_body(body, &brk, &begin);
        self.ins(&format!("jmp {begin}"));
        self.label(&brk);
      }
      StmtKind::For {
        init,
        cond,
        step,
        body,
      } => {
        let n = self.next_id();
        let begin = format!(".L.begin.{n}");
        let brk = format!(".L.break.{n}");
        let cont = format!(".L.continue.{n}");
        if let Some(init) = init {
          self.emit_stmt(init);
        }
        self.label(&begin);
        if let Some(cond) = cond {
          self.emit_expr(cond);
          self.jump_if_zero(&brk);
        }
        self.emit_loop_body(body, &brk, &cont);
        self.label(&cont);
        if let Some(step) = step {
          self.emit_expr(step);
          self.pop("%rax");
        }
        self.ins(&format!("jmp {begin}"));
        self.label(&brk);
      }
      StmtKind::Switch { scrutinee, cases } => {
        let n = self.next_id();
        let brk = format!(".L.break.{n}");

        // The scrutinee stays in %rax for the whole dispatch sequence.
        self.emit_expr(scrutinee);
        self.pop("%rax");
        for (k, case) in cases.iter().enumerate() {
          if let CaseLabel::Value(value) = case.label {
            self.ins(&format!("mov ${value}, %rdi"));
            self.ins("cmp %rdi, %rax");
            self.ins(&format!("je .L.case.{n}.{k}"));
          }
        }
        match cases.iter().position(|c| c.label == CaseLabel::Default) {
          Some(k) => self.ins(&format!("jmp .L.case.{n}.{k}")),
          None => self.ins(&format!("jmp {brk}")),
        }

        self.break_labels.push(brk.clone());
        for (k, case) in cases.iter().enumerate() {
          self.label(&format!(".L.case.{n}.{k}"));
          for stmt in &case.body {
            self.emit_stmt(stmt);
          }
        }
        self.break_labels.pop();
        self.label(&brk);
      }
      StmtKind::Break => {
        let target = self
          .break_labels
          .last()
          .cloned()
          .unwrap_or_else(|| panic!("internal error: break outside of a loop or switch"));
        self.ins(&format!("jmp {target}"));
      }
      StmtKind::Continue => {
        let target = self
          .continue_labels
          .last()
          .cloned()
          .unwrap_or_else(|| panic!("internal error: continue outside of a loop"));
        self.ins(&format!("jmp {target}"));
      }
      StmtKind::Return(value) => {
        match value {
          Some(value) => {
            self.emit_expr(value);
            self.pop("%rax");
          }
          None => self.ins("mov $0, %rax"),
        }
        let target = format!("jmp {}", self.return_label);
        self.ins(&target);
      }
      StmtKind::Expr(expr) => {
        self.emit_expr(expr);
        self.pop("%rax");
      }
      StmtKind::Empty => {}
    }
    debug_assert_eq!(self.depth, 0, "statement left values on the stack");
  }

  fn emit_loop_body(&mut self, body: &Stmt, brk: &str, cont: &str) {
    self.break_labels.push(brk.to_string());
    self.continue_labels.push(cont.to_string());
    self.emit_stmt(body);
    self.continue_labels.pop();
    self.break_labels.pop();
  }

  /// Emit stack-based code for a single expression node.
  fn emit_expr(&mut self, expr: &Expr) {
    match &expr.kind {
      ExprKind::Num { value } => {
        self.ins(&format!("mov ${value}, %rax"));
        self.push();
      }
      ExprKind::Ident { name, symbol } => {
        let offset = self.offset_of(*symbol, name);
        self.ins(&format!("mov -{offset}(%rbp), %rax"));
        self.push();
      }
      ExprKind::Unary { op, operand } => {
        self.emit_expr(operand);
        self.pop("%rax");
        match op {
          UnaryOp::Neg => self.ins("neg %rax"),
          UnaryOp::Not => {
            self.ins("cmp $0, %rax");
            self.ins("sete %al");
            self.ins("movzbl %al, %eax");
          }
        }
        self.push();
      }
      ExprKind::Binary {
        op: op @ (BinaryOp::LogAnd | BinaryOp::LogOr),
        lhs,
        rhs,
      } => self.emit_logical(*op, lhs, rhs),
      ExprKind::Binary { op, lhs, rhs } => {
        self.emit_expr(lhs);
        self.emit_expr(rhs);
        self.pop("%rdi");
        self.pop("%rax");
        match op {
          BinaryOp::Add => self.ins("add %rdi, %rax"),
          BinaryOp::Sub => self.ins("sub %rdi, %rax"),
          BinaryOp::Mul => self.ins("imul %rdi, %rax"),
          BinaryOp::Div => {
            self.ins("cqo");
            self.ins("idiv %rdi");
          }
          BinaryOp::Mod => {
            self.ins("cqo");
            self.ins("idiv %rdi");
            self.ins("mov %rdx, %rax");
          }
          BinaryOp::Eq => self.emit_compare("sete"),
          BinaryOp::Ne => self.emit_compare("setne"),
          BinaryOp::Lt => self.emit_compare("setl"),
          BinaryOp::Le => self.emit_compare("setle"),
          BinaryOp::Gt => self.emit_compare("setg"),
          BinaryOp::Ge => self.emit_compare("setge"),
          BinaryOp::LogAnd | BinaryOp::LogOr => unreachable!("handled above"),
        }
        self.push();
      }
      ExprKind::Assign { target, value } => {
        let ExprKind::Ident { name, symbol } = &target.kind else {
          panic!("internal error: assignment to a non-variable");
        };
        let offset = self.offset_of(*symbol, name);
        self.emit_expr(value);
        self.pop("%rax");
        self.ins(&format!("mov %rax, -{offset}(%rbp)"));
        self.push();
      }
      ExprKind::Call { name, args, symbol } => self.emit_call(name, args, *symbol),
    }
  }

  fn emit_compare(&mut self, set: &str) {
    self.ins("cmp %rdi, %rax");
    self.ins(&format!("{set} %al"));
    self.ins("movzbl %al, %eax");
  }

  /// `&&` and `||` evaluate the right operand only when the left one does
  /// not already decide the result.
  fn emit_logical(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) {
    let n = self.next_id();
    let (jump, short, short_value) = match op {
      BinaryOp::LogAnd => ("je", format!(".L.false.{n}"), 0),
      _ => ("jne", format!(".L.true.{n}"), 1),
    };
    let end = format!(".L.end.{n}");

    for operand in [lhs, rhs] {
      self.emit_expr(operand);
      self.pop("%rax");
      self.ins("cmp $0, %rax");
      self.ins(&format!("{jump} {short}"));
    }
    self.ins(&format!("mov ${}, %rax", 1 - short_value));
    self.ins(&format!("jmp {end}"));
    self.label(&short);
    self.ins(&format!("mov ${short_value}, %rax"));
    self.label(&end);
    self.push();
  }

  /// Arguments are pushed left to right; the first six are then loaded into
  /// registers and the rest stay where they are for the callee to read.
  fn emit_call(&mut self, name: &str, args: &[Expr], symbol: Option<SymbolId>) {
    let label = match symbol.and_then(|id| self.symbols.get(id)).map(|s| &s.kind) {
      Some(SymbolKind::Function { label, .. }) => label.clone(),
      _ => panic!("internal error: call to unresolved function '{name}'"),
    };

    let count = args.len();
    // %rsp must be 16-byte aligned at the call instruction.
    let padded = (self.depth + count) % 2 == 1;
    if padded {
      self.ins("sub $8, %rsp");
      self.depth += 1;
    }

    for arg in args {
      self.emit_expr(arg);
    }
    for (i, reg) in ARG_REGS.iter().enumerate().take(count) {
      self.ins(&format!("mov {}(%rsp), {reg}", 8 * (count - 1 - i)));
    }

    self.ins(&format!("call {label}"));
    if count > 0 {
      self.ins(&format!("add ${}, %rsp", 8 * count));
      self.depth -= count;
    }
    if padded {
      self.ins("add $8, %rsp");
      self.depth -= 1;
    }
    self.push();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;
  use crate::sema::analyze;
  use crate::tokenizer::tokenize;
  use pretty_assertions::assert_eq;

  fn compile(source: &str, config: &CodegenConfig) -> String {
    let mut program = parse(tokenize(source).unwrap()).unwrap();
    let symbols = analyze(&mut program).unwrap();
    generate(&program, &symbols, config)
  }

  fn asm(source: &str) -> String {
    compile(source, &CodegenConfig::default())
  }

  fn lines(asm: &str) -> Vec<&str> {
    asm.lines().map(str::trim).collect()
  }

  #[test]
  fn return_constant() {
    assert_eq!(
      lines(&asm("int main() { return 42; }")),
      [
        ".text",
        ".global main",
        "main:",
        "push %rbp",
        "mov %rsp, %rbp",
        "mov $42, %rax",
        "push %rax",
        "pop %rax",
        "jmp .L.return.main",
        "mov $0, %rax",
        ".L.return.main:",
        "mov %rbp, %rsp",
        "pop %rbp",
        "ret",
        ".section .note.GNU-stack,\"\",@progbits",
      ]
    );
  }

  #[test]
  fn frame_is_rounded_to_sixteen_bytes() {
    let out = asm("int main() { int a; int b; int c; return 0; }");
    assert!(out.contains("    sub $32, %rsp\n"));
    let out = asm("int f(int x, int y) { return x + y; } int main() { return f(1, 2); }");
    assert!(out.contains("    sub $16, %rsp\n"));
    assert!(out.contains("    mov %rdi, -8(%rbp)\n"));
    assert!(out.contains("    mov %rsi, -16(%rbp)\n"));
  }

  #[test]
  fn loop_locals_get_their_own_slots() {
    let out = asm("int main() { int a = 0; for (int i = 0; i < 3; i = i + 1) { int t = i; a = a + t; } return a; }");
    assert!(out.contains("    sub $32, %rsp\n"));
    assert!(out.contains("-24(%rbp)"));
  }

  #[test]
  fn switch_dispatch_in_source_order() {
    let out = asm(
      "int main() { int c = 3; switch (c) { case 5: c = 1; break; default: c = 2; case 10: c = 3; } return c; }",
    );
    let dispatch: Vec<_> = lines(&out)
      .into_iter()
      .filter(|l| l.starts_with("mov $5") || l.starts_with("mov $10") || l.contains(".L.case.1."))
      .collect();
    assert_eq!(
      dispatch,
      [
        "mov $5, %rdi",
        "je .L.case.1.0",
        "mov $10, %rdi",
        "je .L.case.1.2",
        "jmp .L.case.1.1",
        ".L.case.1.0:",
        ".L.case.1.1:",
        ".L.case.1.2:",
      ]
    );
  }

  #[test]
  fn switch_without_default_falls_back_to_end() {
    let out = asm("int main() { switch (1) { case 1: break; } return 0; }");
    let pos = out.find("je .L.case.1.0").unwrap();
    assert!(out[pos..].starts_with("je .L.case.1.0\n    jmp .L.break.1\n"));
  }

  #[test]
  fn for_continue_targets_step() {
    let out = asm("int main() { int a = 0; for (int i = 0; i < 3; i = i + 1) { continue; } return a; }");
    let cont = out.find(".L.continue.1:").unwrap();
    let jump = out.find("jmp .L.continue.1").unwrap();
    assert!(jump < cont);
    assert!(out[cont..].contains("jmp .L.begin.1"));
  }

  #[test]
  fn calls_keep_the_stack_aligned() {
    // One argument pushed at depth zero needs one padding slot.
    let out = asm("int id(int x) { return x; } int main() { return id(7); }");
    assert!(out.contains("    sub $8, %rsp\n    mov $7, %rax\n    push %rax\n    mov 0(%rsp), %rdi\n    call id\n    add $8, %rsp\n    add $8, %rsp\n"));
    // Two arguments need none.
    let out = asm("int f(int a, int b) { return a; } int main() { return f(1, 2); }");
    assert!(!out.contains("sub $8, %rsp"));
    assert!(out.contains("    mov 8(%rsp), %rdi\n    mov 0(%rsp), %rsi\n    call f\n    add $16, %rsp\n"));
  }

  #[test]
  fn stack_arguments_are_read_above_the_frame() {
    let out = asm(
      "int f(int a, int b, int c, int d, int e, int g, int h, int i) { return h; }\nint main() { return f(1, 2, 3, 4, 5, 6, 7, 8); }",
    );
    assert!(out.contains("    mov 24(%rbp), %rax\n    mov %rax, -56(%rbp)\n"));
    assert!(out.contains("    mov 16(%rbp), %rax\n    mov %rax, -64(%rbp)\n"));
    assert!(out.contains("    mov 16(%rsp), %r9\n"));
  }

  #[test]
  fn start_entry_is_opt_in() {
    let source = "int main() { return 3; }";
    assert!(!asm(source).contains("_start"));
    let out = compile(source, &CodegenConfig { emit_start: true });
    assert!(out.contains(".global _start\n_start:\n    call main\n    mov %rax, %rdi\n    mov $60, %rax\n    syscall\n"));
    assert!(out.ends_with("  .section .note.GNU-stack,\"\",@progbits\n"));
    let out = compile("int f() { return 3; }", &CodegenConfig { emit_start: true });
    assert!(!out.contains("_start"));
  }

  #[test]
  #[should_panic(expected = "internal error")]
  fn unresolved_identifier_aborts() {
    let program = parse(tokenize("int main() { return x; }").unwrap()).unwrap();
    generate(&program, &SymbolTable::default(), &CodegenConfig::default());
  }
}
