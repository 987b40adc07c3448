//! A tiny x86-64 interpreter for the instruction subset the compiler emits.
//!
//! It lets integration tests run generated code and check what it computes
//! instead of matching assembly text. Every `call` also asserts that `%rsp`
//! is 16-byte aligned.

#![allow(dead_code)]

use std::collections::HashMap;

use cmmc::{CodegenConfig, compile};

const STACK_TOP: i64 = 0x10_0000;
const RETURN_SENTINEL: i64 = -1;
const STEP_LIMIT: usize = 5_000_000;

#[derive(Debug, Clone)]
struct Instr {
  op: String,
  args: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Operand {
  Imm(i64),
  Reg(&'static str),
  /// `%al` or `%eax`, both views of `%rax`.
  Low(u32),
  Mem(i64, &'static str),
}

fn reg_name(text: &str) -> &'static str {
  match text {
    "%rax" => "rax",
    "%rbx" => "rbx",
    "%rcx" => "rcx",
    "%rdx" => "rdx",
    "%rsi" => "rsi",
    "%rdi" => "rdi",
    "%rsp" => "rsp",
    "%rbp" => "rbp",
    "%r8" => "r8",
    "%r9" => "r9",
    other => panic!("unknown register {other}"),
  }
}

fn operand(text: &str) -> Operand {
  if let Some(imm) = text.strip_prefix('$') {
    return Operand::Imm(imm.parse().unwrap_or_else(|_| panic!("bad immediate {text}")));
  }
  match text {
    "%al" => return Operand::Low(8),
    "%eax" => return Operand::Low(32),
    _ => {}
  }
  if let Some((disp, base)) = text.split_once('(') {
    let base = reg_name(base.trim_end_matches(')'));
    let disp = if disp.is_empty() { 0 } else { disp.parse().unwrap() };
    return Operand::Mem(disp, base);
  }
  Operand::Reg(reg_name(text))
}

struct Machine {
  code: Vec<Instr>,
  labels: HashMap<String, usize>,
  regs: HashMap<&'static str, i64>,
  mem: HashMap<i64, i64>,
  /// Operands of the last `cmp`, as (destination, source).
  flags: (i64, i64),
  calls: usize,
}

impl Machine {
  fn load(asm: &str) -> Self {
    let mut code = Vec::new();
    let mut labels = HashMap::new();
    for line in asm.lines().map(str::trim).filter(|l| !l.is_empty()) {
      if let Some(label) = line.strip_suffix(':') {
        labels.insert(label.to_string(), code.len());
        continue;
      }
      if line.starts_with('.') {
        continue;
      }
      let (op, rest) = line.split_once(' ').unwrap_or((line, ""));
      let args = rest
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(String::from)
        .collect();
      code.push(Instr {
        op: op.to_string(),
        args,
      });
    }

    let mut regs = HashMap::new();
    regs.insert("rsp", STACK_TOP);
    Self {
      code,
      labels,
      regs,
      mem: HashMap::new(),
      flags: (0, 0),
      calls: 0,
    }
  }

  fn reg(&self, name: &str) -> i64 {
    self.regs.get(name).copied().unwrap_or(0)
  }

  fn get(&self, op: Operand) -> i64 {
    match op {
      Operand::Imm(v) => v,
      Operand::Reg(r) => self.reg(r),
      Operand::Low(8) => self.reg("rax") & 0xff,
      Operand::Low(_) => self.reg("rax") & 0xffff_ffff,
      Operand::Mem(disp, base) => {
        let addr = self.reg(base) + disp;
        *self
          .mem
          .get(&addr)
          .unwrap_or_else(|| panic!("read of uninitialised memory at {addr:#x}"))
      }
    }
  }

  fn set(&mut self, op: Operand, value: i64) {
    match op {
      Operand::Imm(_) => panic!("cannot write to an immediate"),
      Operand::Reg(r) => {
        self.regs.insert(r, value);
      }
      Operand::Low(8) => {
        let rax = self.reg("rax");
        self.regs.insert("rax", (rax & !0xff) | (value & 0xff));
      }
      // Writing a 32-bit register zero-extends into the full register.
      Operand::Low(_) => {
        self.regs.insert("rax", value & 0xffff_ffff);
      }
      Operand::Mem(disp, base) => {
        let addr = self.reg(base) + disp;
        self.mem.insert(addr, value);
      }
    }
  }

  fn push(&mut self, value: i64) {
    let rsp = self.reg("rsp") - 8;
    self.regs.insert("rsp", rsp);
    self.mem.insert(rsp, value);
  }

  fn pop(&mut self) -> i64 {
    let rsp = self.reg("rsp");
    let value = self.get(Operand::Mem(0, "rsp"));
    self.regs.insert("rsp", rsp + 8);
    value
  }

  fn condition(&self, suffix: &str) -> bool {
    let (dst, src) = self.flags;
    match suffix {
      "e" => dst == src,
      "ne" => dst != src,
      "l" => dst < src,
      "le" => dst <= src,
      "g" => dst > src,
      "ge" => dst >= src,
      other => panic!("unknown condition {other}"),
    }
  }

  fn target(&self, label: &str) -> usize {
    *self
      .labels
      .get(label)
      .unwrap_or_else(|| panic!("undefined label {label}"))
  }

  /// Run from `entry` until it returns to the host or exits, yielding `%rax`
  /// or the exit status. A called entry sees a return address on the stack,
  /// leaving %rsp at 8 mod 16; a process entry starts aligned.
  fn run(&mut self, entry: &str, called: bool) -> i64 {
    if called {
      self.push(RETURN_SENTINEL);
    }
    let mut pc = self.target(entry);

    for _ in 0..STEP_LIMIT {
      let instr = self.code[pc].clone();
      let args: Vec<Operand> = match instr.op.as_str() {
        "je" | "jne" | "jmp" | "call" => Vec::new(),
        _ => instr.args.iter().map(|a| operand(a)).collect(),
      };
      pc += 1;

      match instr.op.as_str() {
        "push" => {
          let v = self.get(args[0]);
          self.push(v);
        }
        "pop" => {
          let v = self.pop();
          self.set(args[0], v);
        }
        "mov" | "movzbl" => {
          let v = self.get(args[0]);
          self.set(args[1], v);
        }
        "add" => {
          let v = self.get(args[1]).wrapping_add(self.get(args[0]));
          self.set(args[1], v);
        }
        "sub" => {
          let v = self.get(args[1]).wrapping_sub(self.get(args[0]));
          self.set(args[1], v);
        }
        "imul" => {
          let v = self.get(args[1]).wrapping_mul(self.get(args[0]));
          self.set(args[1], v);
        }
        "neg" => {
          let v = self.get(args[0]).wrapping_neg();
          self.set(args[0], v);
        }
        "cqo" => {
          let rdx = if self.reg("rax") < 0 { -1 } else { 0 };
          self.regs.insert("rdx", rdx);
        }
        "idiv" => {
          let divisor = self.get(args[0]);
          assert_ne!(divisor, 0, "division by zero");
          let rax = self.reg("rax");
          self.regs.insert("rax", rax.wrapping_div(divisor));
          self.regs.insert("rdx", rax.wrapping_rem(divisor));
        }
        "cmp" => self.flags = (self.get(args[1]), self.get(args[0])),
        op if op.starts_with("set") => {
          let v = self.condition(&op[3..]) as i64;
          self.set(args[0], v);
        }
        "jmp" => pc = self.target(&instr.args[0]),
        op @ ("je" | "jne") => {
          if self.condition(&op[1..]) {
            pc = self.target(&instr.args[0]);
          }
        }
        "call" => {
          assert_eq!(self.reg("rsp") % 16, 0, "misaligned stack at call {}", instr.args[0]);
          self.calls += 1;
          self.push(pc as i64);
          pc = self.target(&instr.args[0]);
        }
        "ret" => {
          let addr = self.pop();
          if addr == RETURN_SENTINEL {
            return self.reg("rax");
          }
          pc = addr as usize;
        }
        "syscall" => {
          assert_eq!(self.reg("rax"), 60, "only exit is supported");
          return self.reg("rdi");
        }
        other => panic!("unsupported instruction {other}"),
      }
    }
    panic!("step limit exceeded");
  }
}

/// Run `main` in the given assembly and return its result.
pub fn run_main(asm: &str) -> i64 {
  Machine::load(asm).run("main", true)
}

/// Run from `_start` and return the exit status passed to the kernel.
pub fn run_start(asm: &str) -> i64 {
  Machine::load(asm).run("_start", false)
}

/// Number of `call` instructions executed by `main`.
pub fn count_calls(asm: &str) -> usize {
  let mut machine = Machine::load(asm);
  machine.run("main", true);
  machine.calls
}

pub fn asm(source: &str) -> String {
  compile(source, &CodegenConfig::default())
    .unwrap_or_else(|err| panic!("compilation failed:\n{}", err.render(source)))
}

/// Compile `source` and return what its `main` evaluates to.
pub fn eval(source: &str) -> i64 {
  run_main(&asm(source))
}

pub const FIXTURE: &str = include_str!("../fixtures/basic_example.c");
