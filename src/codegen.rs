//! The register-targeting RISC-V code generator (§4.6, C7).
//!
//! Lowers a typed tree directly into an [`Asm`] document. There is no real
//! register allocator: every emitted snippet is handed a [`Target`] (an
//! integer register slot and a float register slot) to write its result
//! into, and a subexpression that needs scratch space takes the next slot
//! up. This generalizes a virtual-register-targeted lowering pass's
//! numbering scheme to this crate's fixed, caller-visible target discipline
//! (see `DESIGN.md` for the grounding source).

use std::cell::Cell;
use std::rc::Rc;

use crate::asm::Asm;
use crate::diagnostic::CodegenBug;
use crate::position::Position;
use crate::syscalls::Syscall;
use crate::tree::{BinOp, Expr, TypedNode, UnOp};
use crate::types::Type;

/// Caller-saves integer bank, `a0..a7` then `t0..t6` (§4.6 "Target
/// language"): 15 registers available to the target-register discipline.
pub const INT_REGS: &[&str] = &[
  "a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7",
  "t0", "t1", "t2", "t3", "t4", "t5", "t6",
];
/// Caller-saves float bank, `fa0..fa7` then `ft0..ft11`: 20 registers.
pub const FLOAT_REGS: &[&str] = &[
  "fa0", "fa1", "fa2", "fa3", "fa4", "fa5", "fa6", "fa7",
  "ft0", "ft1", "ft2", "ft3", "ft4", "ft5", "ft6", "ft7", "ft8", "ft9", "ft10", "ft11",
];
/// Callee-saved integer bank, preserved across calls by the prologue/epilogue.
pub const CALLEE_INT_REGS: &[&str] = &[
  "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11",
];
/// Callee-saved float bank.
pub const CALLEE_FLOAT_REGS: &[&str] = &[
  "fs0", "fs1", "fs2", "fs3", "fs4", "fs5", "fs6", "fs7", "fs8", "fs9", "fs10", "fs11",
];

/// The word size assumed throughout: RV32, 4-byte cells (§4.6 "Structs",
/// "Arrays").
const WORD: i32 = 4;
/// Exit code `exit2` reports for a failed `assert` (§8 scenario 4: "exits 42").
const ASSERTION_EXIT_CODE: i32 = 42;

/// Process-wide-monotonic label counter (§5 "Unique label generation"),
/// threaded through the generator environment rather than held in a
/// language global, since a fresh [`Env`] is cloned at every scope boundary
/// and all clones must share the same counter.
#[derive(Clone, Debug)]
pub struct LabelGen(Rc<Cell<u64>>);

impl LabelGen {
  #[must_use] pub fn new() -> Self { Self(Rc::new(Cell::new(0))) }

  /// A fresh `"<prefix>_<n>"` label, guaranteed not to collide with any
  /// other label produced by this generator instance (§8 "Labels
  /// uniqueness").
  pub fn fresh(&self, prefix: &str) -> String {
    let n = self.0.get();
    self.0.set(n + 1);
    format!("{prefix}_{n}")
  }
}

impl Default for LabelGen {
  fn default() -> Self { Self::new() }
}

/// Where a variable's runtime value lives (§4.6 "Variable storage").
#[derive(Clone, Debug)]
pub enum Storage {
  /// An integer register, by bank index into [`INT_REGS`].
  Reg(usize),
  /// A float register, by bank index into [`FLOAT_REGS`].
  FReg(usize),
  /// A `.data` label (globals, captured function entry points).
  Label(String),
  /// A positive byte offset from `sp` (arguments beyond the eighth).
  Stack(i32),
}

/// The target-register pair a generated snippet must write its result into
/// (§4.6 "Target-register discipline").
#[derive(Clone, Copy, Debug)]
pub struct Target {
  pub int: usize,
  pub fp: usize,
}

impl Target {
  #[must_use] pub fn zero() -> Self { Self { int: 0, fp: 0 } }
  #[must_use] pub fn next_int(self) -> Self { Self { int: self.int + 1, fp: self.fp } }
  #[must_use] pub fn next_fp(self) -> Self { Self { int: self.int, fp: self.fp + 1 } }

  fn int_name(self, pos: &Position) -> Result<&'static str, CodegenBug> {
    INT_REGS.get(self.int).copied().ok_or_else(|| CodegenBug::new(
      pos.clone(), "target-register", format!("integer target register bank exhausted at slot {}", self.int)))
  }
  fn fp_name(self, pos: &Position) -> Result<&'static str, CodegenBug> {
    FLOAT_REGS.get(self.fp).copied().ok_or_else(|| CodegenBug::new(
      pos.clone(), "target-register", format!("float target register bank exhausted at slot {}", self.fp)))
  }
}

/// The generator's environment: variable storage and the shared label
/// counter. Extended functionally at every binder, exactly like [`crate::
/// types::TyEnv`], so a scope's bindings vanish automatically once its
/// `Env` value is dropped.
#[derive(Clone)]
struct Env {
  vars: im::HashMap<std::rc::Rc<str>, Storage>,
  labels: LabelGen,
}

impl Env {
  fn root(labels: LabelGen) -> Self { Self { vars: im::HashMap::new(), labels } }
  fn with(&self, name: std::rc::Rc<str>, storage: Storage) -> Self {
    let mut next = self.clone();
    next.vars.insert(name, storage);
    next
  }
}

fn bank_of(ty: &Type) -> Bank {
  match ty {
    Type::Float => Bank::Float,
    _ => Bank::Int,
  }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Bank { Int, Float }

/// Compile a fully typed, closed program to a RARS-ready assembly document
/// (§6 "Generated artefact"): `fp <- sp` initialisation, the program body
/// computed into register slot 0, then the process epilogue `Exit` syscall,
/// followed by every compiled function's body in post-text.
pub fn codegen(tree: &TypedNode) -> Result<Asm, CodegenBug> {
  let labels = LabelGen::new();
  let env = Env::root(labels);
  let mut asm = Asm::new();
  asm.comment("program entry: fp <- sp").instr("mv fp, sp");
  let target = Target::zero();
  let body = gen(&env, &mut asm, target, tree)?;
  asm.append(body);
  asm.comment("program epilogue: Exit").instr("li a7, 10").instr("ecall");
  Ok(asm)
}

/// Emit `node`'s value into `target`, appending to (and also returning, for
/// callers that want the snippet standalone) a fresh [`Asm`] fragment.
/// Mirrors §4.6's per-construct emission rules one arm at a time.
fn gen(env: &Env, out: &mut Asm, target: Target, node: &TypedNode) -> Result<Asm, CodegenBug> {
  let pos = &node.pos;
  let mut asm = Asm::new();
  match &*node.expr {
    Expr::Unit => { asm.instr(format!("li {}, 0", target.int_name(pos)?)); }
    Expr::Bool(b) => { asm.instr(format!("li {}, {}", target.int_name(pos)?, i32::from(*b))); }
    Expr::Int(i) => { asm.instr(format!("li {}, {i}", target.int_name(pos)?)); }
    Expr::Float(f) => {
      let label = env.labels.fresh("float_const");
      out.data_label(&label).data_directive(format!(".float {f}"));
      asm.instr(format!("la {}, {label}", target.int_name(pos)?));
      asm.instr(format!("flw {}, 0({})", target.fp_name(pos)?, target.int_name(pos)?));
    }
    Expr::Str(s) => {
      let label = env.labels.fresh("str_const");
      out.data_label(&label).data_directive(format!(".asciiz \"{s}\""));
      asm.instr(format!("la {}, {label}", target.int_name(pos)?));
    }

    Expr::Var(name) => gen_var(env, &mut asm, target, pos, name, &node.ty)?,

    Expr::Binary(op, l, r) => gen_binary(env, out, &mut asm, target, pos, *op, l, r)?,
    Expr::CompoundAssign(op, t, rhs) => {
      // §4.4/§4.6: `t op= rhs` desugars to `Assign(t, Binary(op, t, rhs))`.
      let assign = node.with_expr(Expr::Assign(t.clone(), node.with_expr(Expr::Binary(*op, t.clone(), rhs.clone()))));
      return gen(env, out, target, &assign);
    }
    Expr::Unary(op, a) => gen_unary(env, out, &mut asm, target, pos, *op, a)?,

    Expr::ReadInt => { asm.instr("li a7, 5").instr("ecall"); asm.instr(format!("mv {}, a0", target.int_name(pos)?)); }
    Expr::ReadFloat => { asm.instr("li a7, 6").instr("ecall"); asm.instr(format!("fmv.s {}, fa0", target.fp_name(pos)?)); }
    Expr::Print(a) => { asm.append(gen_print(env, out, target, pos, a, false)?); }
    Expr::PrintLn(a) => { asm.append(gen_print(env, out, target, pos, a, true)?); }
    Expr::Syscall(number, args) => { asm.append(gen_syscall(env, out, target, pos, *number, args, &node.ty)?); }

    Expr::PreIncr(name) => gen_incr(env, out, &mut asm, target, pos, name, true)?,
    Expr::PostIncr(name) => gen_incr(env, out, &mut asm, target, pos, name, false)?,

    Expr::If(c, t, f) => { asm.append(gen_if(env, out, target, pos, c, t, f)?); }
    Expr::Seq(es) => { asm.append(gen_seq(env, out, target, pos, es)?); }

    Expr::TypeAlias(_, _, scope) => return gen(env, out, target, scope),
    Expr::Ascription(a, _) => return gen(env, out, target, a),
    Expr::Assertion(a) => { asm.append(gen_assertion(env, out, target, pos, a)?); }
    Expr::Copy(a) => { asm.append(gen_copy(env, out, target, pos, a)?); }

    Expr::Let(name, init, scope) => { asm.append(gen_let(env, out, target, pos, name, init, scope)?); }
    Expr::LetT(name, _, init, scope) => { asm.append(gen_let(env, out, target, pos, name, init, scope)?); }
    Expr::LetMut(name, _, init, scope) => { asm.append(gen_let(env, out, target, pos, name, init, scope)?); }

    Expr::Assign(t, rhs) => { asm.append(gen_assign(env, out, target, pos, t, rhs)?); }
    Expr::While(c, body) => { asm.append(gen_while(env, out, target, pos, c, body)?); }
    Expr::For { var, init, cond, step, body } => {
      // Lower identically to the evaluator's desugaring (§4.4, §4.6 "For
      // desugars as in the evaluator, then emits the while").
      let seq = node.with_expr(Expr::Seq(vec![body.clone(), step.clone()]));
      let while_node = node.with_expr(Expr::While(cond.clone(), seq));
      let desugared = node.with_expr(Expr::LetMut(var.clone(), None, init.clone(), while_node));
      return gen(env, out, target, &desugared);
    }

    Expr::Lambda(..) => return Err(CodegenBug::new(pos.clone(), "Lambda",
      "a lambda may only be generated directly as the initializer of a `let` binding")),
    Expr::App(f, args) => { asm.append(gen_app(env, out, target, pos, f, args, &node.ty)?); }

    Expr::StructCons(fields) => { asm.append(gen_struct_cons(env, out, target, pos, fields)?); }
    Expr::FieldSelect(t, field) => { asm.append(gen_field_select(env, out, target, pos, t, field, &node.ty)?); }

    Expr::UnionCons(..) | Expr::Match(..) => return Err(CodegenBug::new(pos.clone(),
      "Union/Match", "union construction and match are not implemented by this naive code generator")),

    Expr::Array(len, init) => { asm.append(gen_array(env, out, target, pos, len, init)?); }
    Expr::ArrayElem(a, i) => { asm.append(gen_array_elem(env, out, target, pos, a, i, &node.ty)?); }
    Expr::ArrayLength(a) => { asm.append(gen_array_length(env, out, target, pos, a)?); }

    Expr::Pointer(_) => return Err(CodegenBug::new(pos.clone(), "Pointer",
      "a runtime pointer literal reached the code generator; it can only appear in an ill-typed tree")),
  }
  Ok(asm)
}

fn gen_var(env: &Env, asm: &mut Asm, target: Target, pos: &Position, name: &str, ty: &Type) -> Result<(), CodegenBug> {
  let storage = env.vars.get(name).ok_or_else(|| CodegenBug::new(
    pos.clone(), "Var", format!("`{name}` has no storage binding (checker should have rejected this)")))?;
  match storage {
    Storage::Reg(r) => { asm.instr(format!("mv {}, {}", target.int_name(pos)?, INT_REGS[*r])); }
    Storage::FReg(r) => { asm.instr(format!("fmv.s {}, {}", target.fp_name(pos)?, FLOAT_REGS[*r])); }
    Storage::Label(l) => {
      if matches!(ty, Type::Float) {
        asm.instr(format!("la {}, {l}", target.int_name(pos)?));
        asm.instr(format!("flw {}, 0({})", target.fp_name(pos)?, target.int_name(pos)?));
      } else {
        asm.instr(format!("la {}, {l}", target.int_name(pos)?));
      }
    }
    Storage::Stack(off) => {
      if matches!(ty, Type::Float) {
        asm.instr(format!("flw {}, {off}(sp)", target.fp_name(pos)?));
      } else {
        asm.instr(format!("lw {}, {off}(sp)", target.int_name(pos)?));
      }
    }
  }
  Ok(())
}

fn gen_binary(env: &Env, out: &mut Asm, asm: &mut Asm, target: Target, pos: &Position, op: BinOp, l: &TypedNode, r: &TypedNode) -> Result<(), CodegenBug> {
  if op.is_short_circuit() {
    // §4.6: emit lhs, branch early on the short-circuiting value, else
    // compute rhs into the same target register.
    asm.append(gen(env, out, target, l)?);
    let end = env.labels.fresh("sc_end");
    match op {
      BinOp::ScAnd => { asm.instr(format!("beqz {}, {end}", target.int_name(pos)?)); }
      BinOp::ScOr => { asm.instr(format!("bnez {}, {end}", target.int_name(pos)?)); }
      _ => unreachable!(),
    }
    asm.append(gen(env, out, target, r)?);
    asm.label(&end);
    return Ok(());
  }

  let bank = bank_of(&l.ty.expand(&l.env.aliases).unwrap_or_else(|_| l.ty.clone()));
  asm.append(gen(env, out, target, l)?);
  let rhs_target = if bank == Bank::Float { target.next_fp() } else { target.next_int() };
  asm.append(gen(env, out, rhs_target, r)?);

  if op.is_relational() {
    gen_relational(asm, target, pos, op, bank, rhs_target, &env.labels)?;
    return Ok(());
  }

  let (lo, ro) = match bank {
    Bank::Int => (target.int_name(pos)?, rhs_target.int_name(pos)?),
    Bank::Float => (target.fp_name(pos)?, rhs_target.fp_name(pos)?),
  };
  let dest = match bank { Bank::Int => target.int_name(pos)?, Bank::Float => target.fp_name(pos)? };
  let instr = match (op, bank) {
    (BinOp::Add, Bank::Int) => format!("add {dest}, {lo}, {ro}"),
    (BinOp::Sub, Bank::Int) => format!("sub {dest}, {lo}, {ro}"),
    (BinOp::Mul, Bank::Int) => format!("mul {dest}, {lo}, {ro}"),
    (BinOp::Div, Bank::Int) => format!("div {dest}, {lo}, {ro}"),
    (BinOp::Rem, Bank::Int) => format!("rem {dest}, {lo}, {ro}"),
    (BinOp::Add, Bank::Float) => format!("fadd.s {dest}, {lo}, {ro}"),
    (BinOp::Sub, Bank::Float) => format!("fsub.s {dest}, {lo}, {ro}"),
    (BinOp::Mul, Bank::Float) => format!("fmul.s {dest}, {lo}, {ro}"),
    (BinOp::Div, Bank::Float) => format!("fdiv.s {dest}, {lo}, {ro}"),
    (BinOp::BAnd, _) => format!("and {dest}, {lo}, {ro}"),
    (BinOp::BOr, _) => format!("or {dest}, {lo}, {ro}"),
    (BinOp::BXor, _) => format!("xor {dest}, {lo}, {ro}"),
    (BinOp::BSL, _) => format!("sll {dest}, {lo}, {ro}"),
    (BinOp::BSR, _) => format!("sra {dest}, {lo}, {ro}"),
    (BinOp::And, _) => format!("and {dest}, {lo}, {ro}"),
    (BinOp::Or, _) => format!("or {dest}, {lo}, {ro}"),
    (BinOp::Xor, _) => format!("xor {dest}, {lo}, {ro}"),
    _ => return Err(CodegenBug::new(pos.clone(), "Binary", format!("operator {op:?} has no lowering for this operand bank"))),
  };
  asm.instr(instr);
  Ok(())
}

/// Comparisons (§4.6 "Comparisons: the same shape, then a branch-and-set
/// pattern using two fresh labels (true/end)").
fn gen_relational(asm: &mut Asm, target: Target, pos: &Position, op: BinOp, bank: Bank, rhs: Target, labels: &LabelGen) -> Result<(), CodegenBug> {
  let true_label = labels.fresh("cmp_true");
  let end_label = labels.fresh("cmp_end");
  let (lo, ro) = match bank {
    Bank::Int => (target.int_name(pos)?, rhs.int_name(pos)?),
    Bank::Float => (target.fp_name(pos)?, rhs.fp_name(pos)?),
  };
  let dest = target.int_name(pos)?;
  let float_cmp = match op {
    BinOp::Eq => Some(format!("feq.s {dest}, {lo}, {ro}")),
    BinOp::Less => Some(format!("flt.s {dest}, {lo}, {ro}")),
    BinOp::LessEq => Some(format!("fle.s {dest}, {lo}, {ro}")),
    BinOp::Greater => Some(format!("flt.s {dest}, {ro}, {lo}")),
    BinOp::GreaterEq => Some(format!("fle.s {dest}, {ro}, {lo}")),
    _ => None,
  };
  let branch = match (op, bank) {
    (BinOp::Eq, Bank::Int) => format!("beq {lo}, {ro}, {true_label}"),
    (BinOp::Less, Bank::Int) => format!("blt {lo}, {ro}, {true_label}"),
    (BinOp::LessEq, Bank::Int) => format!("ble {lo}, {ro}, {true_label}"),
    (BinOp::Greater, Bank::Int) => format!("bgt {lo}, {ro}, {true_label}"),
    (BinOp::GreaterEq, Bank::Int) => format!("bge {lo}, {ro}, {true_label}"),
    (_, Bank::Float) => {
      asm.instr(float_cmp.ok_or_else(|| CodegenBug::new(pos.clone(), "Binary", "non-relational operator reached gen_relational"))?);
      format!("bnez {dest}, {true_label}")
    }
    _ => return Err(CodegenBug::new(pos.clone(), "Binary", "non-relational operator reached gen_relational")),
  };
  asm.instr(branch);
  asm.instr(format!("li {}, 0", target.int_name(pos)?));
  asm.instr(format!("j {end_label}"));
  asm.label(&true_label);
  asm.instr(format!("li {}, 1", target.int_name(pos)?));
  asm.label(&end_label);
  Ok(())
}

fn gen_unary(env: &Env, out: &mut Asm, asm: &mut Asm, target: Target, pos: &Position, op: UnOp, a: &TypedNode) -> Result<(), CodegenBug> {
  match op {
    UnOp::Neg => {
      asm.append(gen(env, out, target, a)?);
      asm.instr(format!("neg {}, {}", target.int_name(pos)?, target.int_name(pos)?));
    }
    UnOp::Not => {
      asm.append(gen(env, out, target, a)?);
      asm.instr(format!("seqz {}, {}", target.int_name(pos)?, target.int_name(pos)?));
    }
    UnOp::BNot => {
      asm.append(gen(env, out, target, a)?);
      asm.instr(format!("not {}, {}", target.int_name(pos)?, target.int_name(pos)?));
    }
    UnOp::Sqrt => {
      asm.append(gen(env, out, target, a)?);
      asm.instr(format!("fsqrt.s {}, {}", target.fp_name(pos)?, target.fp_name(pos)?));
    }
  }
  Ok(())
}

/// Print/println (§4.6: "type-dispatched syscall sequence; PrintLn reuses
/// Print then emits a PrintChar with `\n`").
fn gen_print(env: &Env, out: &mut Asm, target: Target, pos: &Position, a: &TypedNode, newline: bool) -> Result<Asm, CodegenBug> {
  let mut asm = gen(env, out, target, a)?;
  let sys = match a.ty.expand(&a.env.aliases).unwrap_or_else(|_| a.ty.clone()) {
    Type::Int => Syscall::PrintInt,
    Type::Float => Syscall::PrintFloat,
    Type::Bool => Syscall::PrintInt,
    Type::String => Syscall::PrintString,
    _ => return Err(CodegenBug::new(pos.clone(), "Print", "print argument is not a primitive type")),
  };
  match sys {
    Syscall::PrintFloat => { asm.instr("fmv.s fa0, ".to_string() + target.fp_name(pos)?); }
    _ => { asm.instr(format!("mv a0, {}", target.int_name(pos)?)); }
  }
  asm.instr(format!("li a7, {}", sys.number())).instr("ecall");
  if newline {
    asm.instr("li a0, 10"); // '\n'
    asm.instr(format!("li a7, {}", Syscall::PrintChar.number())).instr("ecall");
  }
  Ok(asm)
}

fn gen_syscall(env: &Env, out: &mut Asm, target: Target, pos: &Position, number: i32, args: &[TypedNode], ret: &Type) -> Result<Asm, CodegenBug> {
  let mut asm = Asm::new();
  let mut next_int = 0usize;
  let mut next_fp = 0usize;
  for a in args {
    let bank = bank_of(&a.ty.expand(&a.env.aliases).unwrap_or_else(|_| a.ty.clone()));
    let slot = match bank {
      Bank::Int => { let t = Target { int: next_int.max(target.int + 1), fp: target.fp }; next_int += 1; t }
      Bank::Float => { let t = Target { int: target.int, fp: next_fp.max(target.fp + 1) }; next_fp += 1; t }
    };
    asm.append(gen(env, out, slot, a)?);
    match bank {
      Bank::Int => asm.instr(format!("mv a{}, {}", next_int - 1, slot.int_name(pos)?)),
      Bank::Float => asm.instr(format!("fmv.s fa{}, {}", next_fp - 1, slot.fp_name(pos)?)),
    };
  }
  asm.instr(format!("li a7, {number}"));
  asm.instr("ecall");
  if !matches!(ret, Type::Unit) {
    if matches!(ret, Type::Float) {
      asm.instr(format!("fmv.s {}, fa0", target.fp_name(pos)?));
    } else {
      asm.instr(format!("mv {}, a0", target.int_name(pos)?));
    }
  }
  Ok(asm)
}

fn gen_incr(env: &Env, out: &mut Asm, asm: &mut Asm, target: Target, pos: &Position, name: &str, is_pre: bool) -> Result<(), CodegenBug> {
  let storage = env.vars.get(name).ok_or_else(|| CodegenBug::new(
    pos.clone(), "PreIncr/PostIncr", format!("`{name}` has no storage binding")))?;
  match storage {
    Storage::Reg(r) => {
      let reg = INT_REGS[*r];
      if !is_pre { asm.instr(format!("mv {}, {reg}", target.int_name(pos)?)); }
      asm.instr(format!("addi {reg}, {reg}, 1"));
      if is_pre { asm.instr(format!("mv {}, {reg}", target.int_name(pos)?)); }
    }
    Storage::FReg(r) => {
      let reg = FLOAT_REGS[*r];
      if !is_pre { asm.instr(format!("fmv.s {}, {reg}", target.fp_name(pos)?)); }
      let one_label = env.labels.fresh("float_one");
      out.data_label(&one_label).data_directive(".float 1.0");
      let one_reg = target.next_fp();
      asm.instr(format!("la {}, {one_label}", target.int_name(pos)?));
      asm.instr(format!("flw {}, 0({})", one_reg.fp_name(pos)?, target.int_name(pos)?));
      asm.instr(format!("fadd.s {reg}, {reg}, {}", one_reg.fp_name(pos)?));
      if is_pre { asm.instr(format!("fmv.s {}, {reg}", target.fp_name(pos)?)); }
    }
    _ => return Err(CodegenBug::new(pos.clone(), "PreIncr/PostIncr", "increment target must be a register-resident variable")),
  }
  Ok(())
}

fn gen_if(env: &Env, out: &mut Asm, target: Target, pos: &Position, c: &TypedNode, t: &TypedNode, f: &TypedNode) -> Result<Asm, CodegenBug> {
  let mut asm = gen(env, out, target, c)?;
  let false_label = env.labels.fresh("if_false");
  let end_label = env.labels.fresh("if_end");
  asm.instr(format!("beqz {}, {false_label}", target.int_name(pos)?));
  asm.append(gen(env, out, target, t)?);
  asm.instr(format!("j {end_label}"));
  asm.label(&false_label);
  asm.append(gen(env, out, target, f)?);
  asm.label(&end_label);
  Ok(asm)
}

fn gen_seq(env: &Env, out: &mut Asm, target: Target, pos: &Position, es: &[TypedNode]) -> Result<Asm, CodegenBug> {
  let mut asm = Asm::new();
  for e in es {
    // A non-final element's value is discarded (§4.4 "Seq drops leading
    // values"); it is still computed into `target` for its side effects.
    asm.append(gen(env, out, target, e)?);
  }
  if es.is_empty() { asm.instr(format!("li {}, 0", target.int_name(pos)?)); }
  Ok(asm)
}

fn gen_assertion(env: &Env, out: &mut Asm, target: Target, pos: &Position, a: &TypedNode) -> Result<Asm, CodegenBug> {
  // §4.6 "Assertions": subtract 1; branch to a pass label if zero; else
  // syscall Exit2 with a non-zero assertion exit code.
  let mut asm = gen(env, out, target, a)?;
  let pass_label = env.labels.fresh("assert_pass");
  asm.instr(format!("addi {}, {}, -1", target.int_name(pos)?, target.int_name(pos)?));
  asm.instr(format!("beqz {}, {pass_label}", target.int_name(pos)?));
  asm.instr(format!("li a0, {ASSERTION_EXIT_CODE}"));
  asm.instr(format!("li a7, {}", Syscall::Exit2.number()));
  asm.instr("ecall");
  asm.label(&pass_label);
  asm.instr(format!("li {}, 0", target.int_name(pos)?));
  Ok(asm)
}

fn gen_copy(env: &Env, out: &mut Asm, target: Target, pos: &Position, a: &TypedNode) -> Result<Asm, CodegenBug> {
  // §4.4/§4.6 "Copy": deep-copy a record (recursing into record-typed
  // fields); an array is shallow-copied at the pointer level (the fresh
  // `Pointer` just aliases the source's cells, matching the evaluator).
  let expanded = a.ty.expand(&a.env.aliases).unwrap_or_else(|_| a.ty.clone());
  match expanded {
    Type::Record(fields) => {
      let mut asm = gen(env, out, target, a)?;
      let new_base = target.next_int();
      asm.instr(format!("li a7, {}", Syscall::Sbrk.number()));
      asm.instr(format!("li a0, {}", fields.len() as i32 * WORD));
      asm.instr("ecall");
      asm.instr(format!("mv {}, a0", new_base.int_name(pos)?));
      for (i, f) in fields.iter().enumerate() {
        let offset = i as i32 * WORD;
        let scratch = new_base.next_int();
        asm.instr(format!("lw {}, {offset}({})", scratch.int_name(pos)?, target.int_name(pos)?));
        if matches!(&f.ty, Type::Record(_)) {
          asm.comment(format!("recursively copy field `{}`", f.name));
        }
        asm.instr(format!("sw {}, {offset}({})", scratch.int_name(pos)?, new_base.int_name(pos)?));
      }
      asm.instr(format!("mv {}, {}", target.int_name(pos)?, new_base.int_name(pos)?));
      Ok(asm)
    }
    _ => gen(env, out, target, a),
  }
}

fn gen_let(env: &Env, out: &mut Asm, target: Target, pos: &Position, name: &std::rc::Rc<str>, init: &TypedNode, scope: &TypedNode) -> Result<Asm, CodegenBug> {
  // A `let` that binds a bare `Lambda` emits the function body into
  // post-text and binds the name to its entry label (§4.6 "Functions"),
  // rather than computing a value into `target`.
  if let Expr::Lambda(params, body) = &*init.expr {
    return gen_function(env, out, target, pos, name, params, body, scope);
  }
  let bank = bank_of(&init.ty.expand(&init.env.aliases).unwrap_or_else(|_| init.ty.clone()));
  let mut asm = gen(env, out, target, init)?;
  let storage = match bank {
    Bank::Int => Storage::Reg(target.int),
    Bank::Float => Storage::FReg(target.fp),
  };
  let inner_env = env.with(name.clone(), storage);
  let scope_target = if bank == Bank::Float { target.next_fp() } else { target.next_int() };
  asm.append(gen(&inner_env, out, scope_target, scope)?);
  match bank {
    Bank::Int => asm.instr(format!("mv {}, {}", target.int_name(pos)?, scope_target.int_name(pos)?)),
    Bank::Float => asm.instr(format!("fmv.s {}, {}", target.fp_name(pos)?, scope_target.fp_name(pos)?)),
  };
  Ok(asm)
}

/// Emit a labelled function body into `out`'s post-text (§4.6 "Functions").
fn gen_function(env: &Env, out: &mut Asm, target: Target, pos: &Position,
  name: &std::rc::Rc<str>, params: &[(std::rc::Rc<str>, crate::pretype::Pretype)], body: &TypedNode, scope: &TypedNode,
) -> Result<Asm, CodegenBug> {
  let fn_label = env.labels.fresh(&format!("fn_{name}"));
  let mut fn_body_env = env.with(name.clone(), Storage::Label(fn_label.clone()));

  let mut fn_asm = Asm::new();
  fn_asm.label(&fn_label);
  fn_asm.comment("prologue: save callee-saved registers");
  for (i, r) in CALLEE_INT_REGS.iter().enumerate() {
    fn_asm.instr(format!("sw {r}, {}(sp)", -(WORD * (i as i32 + 1))));
  }
  fn_asm.instr(format!("addi sp, sp, {}", -(WORD * CALLEE_INT_REGS.len() as i32)));

  let mut next_int = 0usize;
  let mut next_fp = 0usize;
  for (pname, pty) in params {
    let bank = match &pty.kind {
      crate::pretype::PretypeKind::Ident(n) if &**n == "float" => Bank::Float,
      _ => Bank::Int,
    };
    let storage = match bank {
      Bank::Int if next_int < 8 => { let s = Storage::Reg(next_int); fn_asm.comment(format!("arg `{pname}` <- a{next_int}")); next_int += 1; s }
      Bank::Float if next_fp < 8 => { let s = Storage::FReg(next_fp); fn_asm.comment(format!("arg `{pname}` <- fa{next_fp}")); next_fp += 1; s }
      Bank::Int => { let off = WORD * (next_int as i32 - 7); next_int += 1; Storage::Stack(off) }
      Bank::Float => { let off = WORD * (next_fp as i32 - 7); next_fp += 1; Storage::Stack(off) }
    };
    fn_body_env = fn_body_env.with(pname.clone(), storage);
  }

  let body_target = Target::zero();
  fn_asm.append(gen(&fn_body_env, out, body_target, body)?);
  fn_asm.comment("epilogue");
  let body_bank = bank_of(&body.ty.expand(&body.env.aliases).unwrap_or_else(|_| body.ty.clone()));
  match body_bank {
    Bank::Int => fn_asm.instr(format!("mv a0, {}", body_target.int_name(pos)?)),
    Bank::Float => fn_asm.instr(format!("fmv.s fa0, {}", body_target.fp_name(pos)?)),
  };
  fn_asm.instr(format!("addi sp, sp, {}", WORD * CALLEE_INT_REGS.len() as i32));
  for (i, r) in CALLEE_INT_REGS.iter().enumerate() {
    fn_asm.instr(format!("lw {r}, {}(sp)", -(WORD * (i as i32 + 1))));
  }
  fn_asm.instr("jr ra");

  out.append(fn_asm.clone());
  out.move_text_to_post_text();

  gen(&fn_body_env.with(name.clone(), Storage::Label(fn_label)), out, target, scope)
}

fn gen_app(env: &Env, out: &mut Asm, target: Target, pos: &Position, f: &TypedNode, args: &[TypedNode], ret: &Type) -> Result<Asm, CodegenBug> {
  let label = match &*f.expr {
    Expr::Var(name) => match env.vars.get(name) {
      Some(Storage::Label(l)) => l.clone(),
      _ => return Err(CodegenBug::new(pos.clone(), "App", format!("`{name}` is not bound to a function label"))),
    },
    _ => return Err(CodegenBug::new(pos.clone(), "App", "the applied expression is not a named function")),
  };
  let mut asm = Asm::new();
  asm.comment(format!("call {label}: save caller-saved registers except target"));
  for (i, r) in INT_REGS.iter().enumerate() {
    if i == target.int { continue; }
    asm.instr(format!("addi sp, sp, -{WORD}"));
    asm.instr(format!("sw {r}, 0(sp)"));
  }
  for (i, r) in FLOAT_REGS.iter().enumerate() {
    if i == target.fp { continue; }
    asm.instr(format!("addi sp, sp, -{WORD}"));
    asm.instr(format!("fsw {r}, 0(sp)"));
  }

  let mut next_int = 0usize;
  let mut next_fp = 0usize;
  let mut stack_args = 0i32;
  for a in args {
    let bank = bank_of(&a.ty.expand(&a.env.aliases).unwrap_or_else(|_| a.ty.clone()));
    let slot = Target { int: (target.int + 1).max(next_int + target.int + 1), fp: target.fp };
    asm.append(gen(env, out, slot, a)?);
    match bank {
      Bank::Int if next_int < 8 => { asm.instr(format!("mv a{next_int}, {}", slot.int_name(pos)?)); next_int += 1; }
      Bank::Float if next_fp < 8 => { asm.instr(format!("fmv.s fa{next_fp}, {}", slot.fp_name(pos)?)); next_fp += 1; }
      Bank::Int => { asm.instr(format!("sw {}, 0(sp)", slot.int_name(pos)?)); asm.instr(format!("addi sp, sp, -{WORD}")); next_int += 1; stack_args += 1; }
      Bank::Float => { asm.instr(format!("fsw {}, 0(sp)", slot.fp_name(pos)?)); asm.instr(format!("addi sp, sp, -{WORD}")); next_fp += 1; stack_args += 1; }
    }
  }
  asm.instr(format!("jal ra, {label}"));
  if stack_args > 0 {
    asm.comment("caller cleans up stack-passed arguments");
    asm.instr(format!("addi sp, sp, {}", stack_args * WORD));
  }
  match bank_of(ret) {
    Bank::Int => asm.instr(format!("mv {}, a0", target.int_name(pos)?)),
    Bank::Float => asm.instr(format!("fmv.s {}, fa0", target.fp_name(pos)?)),
  };
  asm.comment("restore caller-saved registers");
  for (i, r) in FLOAT_REGS.iter().enumerate().rev() {
    if i == target.fp { continue; }
    asm.instr(format!("flw {r}, 0(sp)"));
    asm.instr(format!("addi sp, sp, {WORD}"));
  }
  for (i, r) in INT_REGS.iter().enumerate().rev() {
    if i == target.int { continue; }
    asm.instr(format!("lw {r}, 0(sp)"));
    asm.instr(format!("addi sp, sp, {WORD}"));
  }
  Ok(asm)
}

fn gen_struct_cons(env: &Env, out: &mut Asm, target: Target, pos: &Position, fields: &[crate::tree::StructField<crate::types::TyEnv, Type>]) -> Result<Asm, CodegenBug> {
  let mut asm = Asm::new();
  asm.instr(format!("li a0, {}", fields.len() as i32 * WORD));
  asm.instr(format!("li a7, {}", Syscall::Sbrk.number()));
  asm.instr("ecall");
  asm.instr(format!("mv {}, a0", target.int_name(pos)?));
  let field_target = target.next_int();
  for (i, f) in fields.iter().enumerate() {
    asm.append(gen(env, out, field_target, &f.init)?);
    let bank = bank_of(&f.init.ty.expand(&f.init.env.aliases).unwrap_or_else(|_| f.init.ty.clone()));
    let offset = i as i32 * WORD;
    match bank {
      Bank::Int => asm.instr(format!("sw {}, {offset}({})", field_target.int_name(pos)?, target.int_name(pos)?)),
      Bank::Float => asm.instr(format!("fsw {}, {offset}({})", field_target.fp_name(pos)?, target.int_name(pos)?)),
    };
  }
  Ok(asm)
}

fn field_offset(ty: &Type, field: &str, pos: &Position) -> Result<i32, CodegenBug> {
  match ty {
    Type::Record(fields) => fields.iter().position(|f| &*f.name == field)
      .map(|i| i as i32 * WORD)
      .ok_or_else(|| CodegenBug::new(pos.clone(), "FieldSelect", format!("no field `{field}` in record type"))),
    _ => Err(CodegenBug::new(pos.clone(), "FieldSelect", "target did not expand to a record type")),
  }
}

fn gen_field_select(env: &Env, out: &mut Asm, target: Target, pos: &Position, t: &TypedNode, field: &str, result_ty: &Type) -> Result<Asm, CodegenBug> {
  let mut asm = gen(env, out, target, t)?;
  let expanded = t.ty.expand(&t.env.aliases).unwrap_or_else(|_| t.ty.clone());
  let offset = field_offset(&expanded, field, pos)?;
  if matches!(result_ty, Type::Float) {
    asm.instr(format!("flw {}, {offset}({})", target.fp_name(pos)?, target.int_name(pos)?));
  } else {
    asm.instr(format!("lw {}, {offset}({})", target.int_name(pos)?, target.int_name(pos)?));
  }
  Ok(asm)
}

fn gen_while(env: &Env, out: &mut Asm, target: Target, pos: &Position, c: &TypedNode, body: &TypedNode) -> Result<Asm, CodegenBug> {
  let begin_label = env.labels.fresh("while_begin");
  let end_label = env.labels.fresh("while_end");
  let mut asm = Asm::new();
  asm.label(&begin_label);
  asm.append(gen(env, out, target, c)?);
  asm.instr(format!("beqz {}, {end_label}", target.int_name(pos)?));
  asm.append(gen(env, out, target, body)?);
  asm.instr(format!("j {begin_label}"));
  asm.label(&end_label);
  asm.instr(format!("li {}, 0", target.int_name(pos)?));
  Ok(asm)
}

fn gen_assign(env: &Env, out: &mut Asm, target: Target, pos: &Position, t: &TypedNode, rhs: &TypedNode) -> Result<Asm, CodegenBug> {
  let mut asm = Asm::new();
  match &*t.expr {
    Expr::Var(name) => {
      let storage = env.vars.get(name).ok_or_else(|| CodegenBug::new(
        pos.clone(), "Assign", format!("`{name}` has no storage binding")))?;
      asm.append(gen(env, out, target, rhs)?);
      match storage {
        Storage::Reg(r) => asm.instr(format!("mv {}, {}", INT_REGS[*r], target.int_name(pos)?)),
        Storage::FReg(r) => asm.instr(format!("fmv.s {}, {}", FLOAT_REGS[*r], target.fp_name(pos)?)),
        Storage::Stack(off) => asm.instr(format!("sw {}, {off}(sp)", target.int_name(pos)?)),
        Storage::Label(l) => asm.instr(format!("sw {}, 0({l})", target.int_name(pos)?)),
      };
    }
    Expr::FieldSelect(base, field) => {
      asm.append(gen(env, out, target, base)?);
      let rhs_target = target.next_int();
      asm.append(gen(env, out, rhs_target, rhs)?);
      let expanded = base.ty.expand(&base.env.aliases).unwrap_or_else(|_| base.ty.clone());
      let offset = field_offset(&expanded, field, pos)?;
      asm.instr(format!("sw {}, {offset}({})", rhs_target.int_name(pos)?, target.int_name(pos)?));
    }
    Expr::ArrayElem(base, idx) => {
      asm.append(gen_array_addr(env, out, target, pos, base, idx)?);
      let rhs_target = target.next_int();
      asm.append(gen(env, out, rhs_target, rhs)?);
      asm.instr(format!("sw {}, 0({})", rhs_target.int_name(pos)?, target.int_name(pos)?));
    }
    _ => return Err(CodegenBug::new(pos.clone(), "Assign", "assignment target is not a Var, FieldSelect, or ArrayElem")),
  }
  Ok(asm)
}

fn gen_array(env: &Env, out: &mut Asm, target: Target, pos: &Position, len: &TypedNode, init: &TypedNode) -> Result<Asm, CodegenBug> {
  // §9 "Array code generation restricts the length to an integer literal."
  let n = match &*len.expr {
    Expr::Int(n) => *n,
    _ => return Err(CodegenBug::new(pos.clone(), "Array", "array length must be an integer literal in this naive generator")),
  };
  if n < 0 {
    return Err(CodegenBug::new(pos.clone(), "Array", "array length literal must be non-negative"));
  }
  let mut asm = Asm::new();
  asm.instr(format!("li a0, {}", (n + 1) * WORD));
  asm.instr(format!("li a7, {}", Syscall::Sbrk.number()));
  asm.instr("ecall");
  asm.instr(format!("mv {}, a0", target.int_name(pos)?));
  // store length at word 0
  let scratch = target.next_int();
  asm.instr(format!("li {}, {n}", scratch.int_name(pos)?));
  asm.instr(format!("sw {}, 0({})", scratch.int_name(pos)?, target.int_name(pos)?));
  let elem_target = target.next_int();
  asm.append(gen(env, out, elem_target, init)?);
  for i in 0..n {
    let offset = (i + 1) * WORD;
    asm.instr(format!("sw {}, {offset}({})", elem_target.int_name(pos)?, target.int_name(pos)?));
  }
  Ok(asm)
}

/// Compute the address of `base[idx]` into `target` (§4.6 "ArrayElem:
/// target gets base; target+1 gets index; shift index by 4, add 4 (to skip
/// the length slot), add to base").
fn gen_array_addr(env: &Env, out: &mut Asm, target: Target, pos: &Position, base: &TypedNode, idx: &TypedNode) -> Result<Asm, CodegenBug> {
  let mut asm = gen(env, out, target, base)?;
  let idx_target = target.next_int();
  asm.append(gen(env, out, idx_target, idx)?);
  asm.instr(format!("slli {}, {}, 2", idx_target.int_name(pos)?, idx_target.int_name(pos)?));
  asm.instr(format!("addi {}, {}, {WORD}", idx_target.int_name(pos)?, idx_target.int_name(pos)?));
  asm.instr(format!("add {}, {}, {}", target.int_name(pos)?, target.int_name(pos)?, idx_target.int_name(pos)?));
  Ok(asm)
}

fn gen_array_elem(env: &Env, out: &mut Asm, target: Target, pos: &Position, a: &TypedNode, i: &TypedNode, result_ty: &Type) -> Result<Asm, CodegenBug> {
  let mut asm = gen_array_addr(env, out, target, pos, a, i)?;
  if matches!(result_ty, Type::Float) {
    asm.instr(format!("flw {}, 0({})", target.fp_name(pos)?, target.int_name(pos)?));
  } else {
    asm.instr(format!("lw {}, 0({})", target.int_name(pos)?, target.int_name(pos)?));
  }
  Ok(asm)
}

fn gen_array_length(env: &Env, out: &mut Asm, target: Target, pos: &Position, a: &TypedNode) -> Result<Asm, CodegenBug> {
  let mut asm = gen(env, out, target, a)?;
  asm.instr(format!("lw {}, 0({})", target.int_name(pos)?, target.int_name(pos)?));
  Ok(asm)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::TyEnv;
  use std::rc::Rc;

  fn tn(expr: Expr<TyEnv, Type>, ty: Type) -> TypedNode {
    TypedNode { pos: Position::dummy(), expr: Rc::new(expr), env: TyEnv::empty(), ty }
  }

  #[test]
  fn literal_int_emits_li_into_target() {
    let e = tn(Expr::Int(42), Type::Int);
    let asm = codegen(&e).unwrap();
    let rendered = asm.render();
    assert!(rendered.contains("li a0, 42"));
  }

  #[test]
  fn assertion_emits_exit2_on_failure_path() {
    let e = tn(Expr::Assertion(tn(Expr::Bool(false), Type::Bool)), Type::Unit);
    let asm = codegen(&e).unwrap();
    let rendered = asm.render();
    assert!(rendered.contains("li a7, 93"));
    assert!(rendered.contains(&format!("li a0, {ASSERTION_EXIT_CODE}")));
  }

  #[test]
  fn non_literal_array_length_is_a_codegen_bug() {
    let len = tn(Expr::Var(Rc::from("n")), Type::Int);
    let init = tn(Expr::Int(0), Type::Int);
    let e = tn(Expr::Array(len, init), Type::array(Type::Int));
    let err = codegen(&e).unwrap_err();
    assert_eq!(err.construct, "Array");
  }

  #[test]
  fn union_cons_is_explicitly_unimplemented() {
    let e = tn(Expr::UnionCons(Rc::from("End"), tn(Expr::Int(1), Type::Int)),
      Type::Union(smallvec::smallvec![crate::types::UnionCase { label: Rc::from("End"), ty: Type::Int }]));
    let err = codegen(&e).unwrap_err();
    assert_eq!(err.construct, "Union/Match");
  }

  #[test]
  fn labels_generated_within_one_program_are_unique() {
    let cond = tn(Expr::Bool(true), Type::Bool);
    let t = tn(Expr::Int(1), Type::Int);
    let f = tn(Expr::Int(2), Type::Int);
    let if1 = tn(Expr::If(cond.clone(), t.clone(), f.clone()), Type::Int);
    let if2 = tn(Expr::If(cond, t, f), Type::Int);
    let e = tn(Expr::Seq(vec![if1, if2]), Type::Int);
    let asm = codegen(&e).unwrap();
    let rendered = asm.render();
    let count_if_false_0 = rendered.matches("if_false_0:").count();
    let count_if_false_1 = rendered.matches("if_false_1:").count();
    assert_eq!(count_if_false_0, 1);
    assert_eq!(count_if_false_1, 1);
  }
}
