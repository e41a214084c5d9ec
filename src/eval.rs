//! The small-step evaluator (§4.4, C4): a reference semantics, not a
//! compiler — it runs directly over the typed tree, maintaining an explicit
//! heap for records, arrays, and union values.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use crate::diagnostic::StuckReason;
use crate::position::Position;
use crate::subst::subst_all;
use crate::syscalls::Syscall;
use crate::tree::{BinOp, Expr, MatchCase, Node, StructField, TypedNode, UnOp};
use crate::types::Type;

/// A heap-resident value: a flat sequence of cells (a record or an array) or
/// a union cell (a case tag plus one payload slot). Accessing a pointer
/// through the wrong shape (`FieldSelect` on an array, `ArrayElem` on a
/// record, ...) is caught by matching on this enum and reported as
/// [`StuckReason::DescriptorMismatch`] rather than panicking.
#[derive(Clone, Debug)]
pub enum HeapValue {
  Struct(Vec<TypedNode>),
  Array(Vec<TypedNode>),
  Union { label: Rc<str>, payload: Box<TypedNode> },
}

/// The evaluator's heap: a monotonically growing vector of cells addressed
/// by index, with [`Node::Pointer`] values carrying the base index as a
/// `u64` (mirroring the simulator's byte-addressed `Sbrk` heap, but
/// logically: this evaluator never needs real addresses).
#[derive(Debug, Default)]
pub struct Heap {
  cells: RefCell<Vec<HeapValue>>,
}

impl Heap {
  #[must_use] pub fn new() -> Self { Self::default() }

  fn alloc(&self, v: HeapValue) -> u64 {
    let mut cells = self.cells.borrow_mut();
    cells.push(v);
    (cells.len() - 1) as u64
  }

  fn get(&self, addr: u64) -> HeapValue { self.cells.borrow()[addr as usize].clone() }

  fn set(&self, addr: u64, v: HeapValue) { self.cells.borrow_mut()[addr as usize] = v; }
}

/// The mutable-variable store (§4.4: "a `LetMut` binding is a cell the
/// evaluator can `Assign` into; reference semantics, restored on scope
/// exit"). Keyed by name because the tree is substitution-based rather than
/// de Bruijn indexed: a fresh scope shadows, then the old cell (if any) is
/// restored when the scope is left.
#[derive(Debug, Default)]
pub struct Store {
  vars: RefCell<HashMap<Rc<str>, TypedNode>>,
}

impl Store {
  #[must_use] pub fn new() -> Self { Self::default() }
  fn get(&self, name: &str) -> Option<TypedNode> { self.vars.borrow().get(name).cloned() }
  fn set(&self, name: Rc<str>, v: TypedNode) { self.vars.borrow_mut().insert(name, v); }
  fn remove(&self, name: &str) -> Option<TypedNode> { self.vars.borrow_mut().remove(name) }
}

/// The evaluator's runtime I/O capability (§3 "Runtime environment ...
/// optional line-reader, optional text-printer"). `Io::stdio` wires the
/// process's real stdin/stdout for `interpret`; tests and embedders
/// construct one over an in-memory buffer, or over [`io::empty`]/
/// [`io::sink`] when a program is known not to touch
/// `ReadInt`/`ReadFloat`/`Print`/`PrintLn`.
pub struct Io {
  reader: RefCell<Box<dyn BufRead>>,
  printer: RefCell<Box<dyn Write>>,
}

impl std::fmt::Debug for Io {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str("Io { .. }") }
}

impl Default for Io {
  fn default() -> Self { Self::stdio() }
}

impl Io {
  /// Wire the process's real standard input/output.
  #[must_use] pub fn stdio() -> Self {
    Self { reader: RefCell::new(Box::new(io::BufReader::new(io::stdin()))), printer: RefCell::new(Box::new(io::stdout())) }
  }

  /// A reader that is always at end-of-file and a printer that discards
  /// everything written to it, for evaluating programs known not to perform
  /// any I/O.
  #[must_use] pub fn null() -> Self {
    Self::new(io::empty(), io::sink())
  }

  pub fn new(reader: impl BufRead + 'static, printer: impl Write + 'static) -> Self {
    Self { reader: RefCell::new(Box::new(reader)), printer: RefCell::new(Box::new(printer)) }
  }

  fn read_line(&self) -> String {
    let mut line = String::new();
    let _ = self.reader.borrow_mut().read_line(&mut line);
    line
  }

  fn print(&self, text: &str) {
    let _ = write!(self.printer.borrow_mut(), "{text}");
  }
}

/// The result of running a typed tree to completion.
#[derive(Debug)]
pub enum Outcome {
  /// The program reduced to a value.
  Value(TypedNode),
  /// The program reached a term with no applicable reduction rule.
  Stuck(StuckReason, Position),
}

/// Reduce `node` to a value against `heap`/`store`/`io`, or report the first
/// stuck term (§4.4 "Public contract": "the evaluator either produces a
/// final value or names the position and reason it got stuck").
pub fn eval(heap: &Heap, store: &Store, io: &Io, node: &TypedNode) -> Outcome {
  let mut cur = node.clone();
  loop {
    if cur.is_value() { return Outcome::Value(cur); }
    match step(heap, store, io, &cur) {
      Ok(next) => cur = next,
      Err(reason) => return Outcome::Stuck(reason, cur.pos.clone()),
    }
  }
}

type Step = Result<TypedNode, StuckReason>;

fn stuck(what: &'static str) -> Step { Err(StuckReason::NoApplicableRule(what)) }

/// Perform exactly one reduction step. Mirrors the small-step rules of §4.4
/// one arm per construct; sub-expressions are reduced left-to-right (call by
/// value) before the construct's own rule fires.
fn step(heap: &Heap, store: &Store, io: &Io, n: &TypedNode) -> Step {
  match &*n.expr {
    Expr::Var(name) => store.get(name).ok_or(StuckReason::NoApplicableRule("unbound variable at runtime")),

    Expr::Binary(op, l, r) => {
      if !l.is_value() { return Ok(n.with_expr(Expr::Binary(*op, step(heap, store, io, l)?, r.clone()))); }
      if op.is_short_circuit() {
        let lb = as_bool(l)?;
        return match (*op, lb) {
          (BinOp::ScAnd, false) => Ok(bool_node(n, false)),
          (BinOp::ScAnd, true) => Ok(r.clone()),
          (BinOp::ScOr, true) => Ok(bool_node(n, true)),
          (BinOp::ScOr, false) => Ok(r.clone()),
          _ => unreachable!(),
        };
      }
      if !r.is_value() { return Ok(n.with_expr(Expr::Binary(*op, l.clone(), step(heap, store, io, r)?))); }
      eval_binary(n, *op, l, r)
    }

    Expr::CompoundAssign(op, target, rhs) => {
      // §4.4: `target op= rhs` desugars to `Assign(target, Binary(op, target, rhs))`.
      let desugared = Expr::Binary(*op, target.clone(), rhs.clone());
      let binop_node = n.with_expr(desugared);
      Ok(n.with_expr(Expr::Assign(target.clone(), binop_node)))
    }

    Expr::Unary(op, a) => {
      if !a.is_value() { return Ok(n.with_expr(Expr::Unary(*op, step(heap, store, io, a)?))); }
      eval_unary(n, *op, a)
    }

    // §4.4: "`ReadInt`/`ReadFloat` invoke the reader and parse using
    // invariant culture; parse failure yields Unit."
    Expr::ReadInt => {
      let line = io.read_line();
      Ok(match line.trim().parse::<i32>() {
        Ok(i) => n.with_expr(Expr::Int(i)),
        Err(_) => unit_node(n),
      })
    }
    Expr::ReadFloat => {
      let line = io.read_line();
      Ok(match line.trim().parse::<f32>() {
        Ok(f) => n.with_expr(Expr::Float(f)),
        Err(_) => unit_node(n),
      })
    }

    Expr::Print(a) | Expr::PrintLn(a) => {
      if !a.is_value() { return Ok(n.with_expr(reconstruct_print(n, step(heap, store, io, a)?))); }
      io.print(&print_text(a));
      if matches!(&*n.expr, Expr::PrintLn(_)) { io.print("\n"); }
      Ok(unit_node(n))
    }

    Expr::Syscall(number, args) => eval_syscall(heap, store, io, n, *number, args),

    Expr::PreIncr(name) => {
      let cur = store.get(name).ok_or(StuckReason::NoApplicableRule("unbound variable at runtime"))?;
      let next = numeric_add_one(&cur)?;
      store.set(name.clone(), next.clone());
      Ok(next)
    }
    Expr::PostIncr(name) => {
      let cur = store.get(name).ok_or(StuckReason::NoApplicableRule("unbound variable at runtime"))?;
      let next = numeric_add_one(&cur)?;
      store.set(name.clone(), next);
      Ok(cur)
    }

    Expr::If(c, t, f) => {
      if !c.is_value() { return Ok(n.with_expr(Expr::If(step(heap, store, io, c)?, t.clone(), f.clone()))); }
      Ok(if as_bool(c)? { t.clone() } else { f.clone() })
    }

    Expr::Seq(es) => eval_seq(heap, store, io, n, es),

    Expr::TypeAlias(_, _, scope) => Ok(scope.clone()),
    Expr::Ascription(a, _) => {
      if !a.is_value() { return Ok(n.with_expr(Expr::Ascription(step(heap, store, io, a)?, ascription_pretype(n)))); }
      Ok(a.clone())
    }
    Expr::Assertion(a) => {
      if !a.is_value() { return Ok(n.with_expr(Expr::Assertion(step(heap, store, io, a)?))); }
      if as_bool(a)? { Ok(unit_node(n)) } else { Err(StuckReason::AssertionFailed) }
    }
    Expr::Copy(a) => {
      if !a.is_value() { return Ok(n.with_expr(Expr::Copy(step(heap, store, io, a)?))); }
      deep_copy(heap, a)
    }

    Expr::Let(name, init, scope) => eval_let(heap, store, io, n, name, init, scope),
    Expr::LetT(name, _, init, scope) => eval_let(heap, store, io, n, name, init, scope),
    Expr::LetMut(name, _, init, scope) => eval_let_mut(heap, store, io, n, name, init, scope),

    Expr::Assign(target, rhs) => eval_assign(heap, store, io, n, target, rhs),
    Expr::While(c, body) => {
      // §4.4: `While` rewrites to `If(c, Seq(body, While(c, body)), Unit)`.
      let again = n.with_expr(Expr::While(c.clone(), body.clone()));
      let seq = n.with_expr(Expr::Seq(vec![body.clone(), again]));
      Ok(n.with_expr(Expr::If(c.clone(), seq, unit_node(n))))
    }
    Expr::For { var, init, cond, step: step_e, body } => {
      // §4.4: `For` rewrites to `LetMut(var, init, While(cond, Seq(body, step)))`.
      let seq = n.with_expr(Expr::Seq(vec![body.clone(), step_e.clone()]));
      let while_loop = n.with_expr(Expr::While(cond.clone(), seq));
      Ok(n.with_expr(Expr::LetMut(var.clone(), None, init.clone(), while_loop)))
    }

    Expr::Lambda(..) => stuck("Lambda is already a value"),
    Expr::App(f, args) => eval_app(heap, store, io, n, f, args),

    Expr::StructCons(fields) => eval_struct_cons(heap, store, io, n, fields),
    Expr::FieldSelect(target, field) => eval_field_select(heap, store, io, n, target, field),

    Expr::UnionCons(label, a) => {
      if !a.is_value() { return Ok(n.with_expr(Expr::UnionCons(label.clone(), step(heap, store, io, a)?))); }
      let addr = heap.alloc(HeapValue::Union { label: label.clone(), payload: Box::new(a.clone()) });
      Ok(n.with_expr(Expr::Pointer(addr)))
    }
    Expr::Match(disc, cases) => eval_match(heap, store, io, n, disc, cases),

    Expr::Array(len, init) => eval_array(heap, store, io, n, len, init),
    Expr::ArrayElem(a, i) => eval_array_elem(heap, store, io, n, a, i),
    Expr::ArrayLength(a) => eval_array_length(heap, store, io, n, a),

    Expr::Pointer(_) => stuck("Pointer is already a value"),
  }
}

// ---------------------------------------------------------------------
// Small helpers
// ---------------------------------------------------------------------

fn unit_node(n: &TypedNode) -> TypedNode { n.with_expr(Expr::Unit) }
fn bool_node(n: &TypedNode, b: bool) -> TypedNode { n.with_expr(Expr::Bool(b)) }

fn as_bool(n: &TypedNode) -> Result<bool, StuckReason> {
  match &*n.expr { Expr::Bool(b) => Ok(*b), _ => Err(StuckReason::NoApplicableRule("expected a bool value")) }
}
fn as_int(n: &TypedNode) -> Result<i32, StuckReason> {
  match &*n.expr { Expr::Int(i) => Ok(*i), _ => Err(StuckReason::NoApplicableRule("expected an int value")) }
}
fn as_float(n: &TypedNode) -> Result<f32, StuckReason> {
  match &*n.expr { Expr::Float(f) => Ok(*f), _ => Err(StuckReason::NoApplicableRule("expected a float value")) }
}
fn as_pointer(n: &TypedNode) -> Result<u64, StuckReason> {
  match &*n.expr { Expr::Pointer(p) => Ok(*p), _ => Err(StuckReason::NoApplicableRule("expected a pointer value")) }
}

fn ascription_pretype(n: &TypedNode) -> crate::pretype::Pretype {
  match &*n.expr { Expr::Ascription(_, pt) => pt.clone(), _ => unreachable!() }
}

fn reconstruct_print(n: &TypedNode, a: TypedNode) -> Expr<crate::types::TyEnv, Type> {
  match &*n.expr {
    Expr::Print(_) => Expr::Print(a),
    Expr::PrintLn(_) => Expr::PrintLn(a),
    _ => unreachable!(),
  }
}

fn numeric_add_one(n: &TypedNode) -> Step {
  match &*n.expr {
    Expr::Int(i) => Ok(n.with_expr(Expr::Int(i.wrapping_add(1)))),
    Expr::Float(f) => Ok(n.with_expr(Expr::Float(f + 1.0))),
    _ => Err(StuckReason::NoApplicableRule("increment target must hold an int or float")),
  }
}

fn print_text(a: &TypedNode) -> String {
  match &*a.expr {
    Expr::Bool(b) => b.to_string(),
    Expr::Int(i) => i.to_string(),
    Expr::Float(f) => f.to_string(),
    Expr::Str(s) => s.to_string(),
    _ => String::new(),
  }
}

fn eval_binary(n: &TypedNode, op: BinOp, l: &TypedNode, r: &TypedNode) -> Step {
  if op.is_bitwise() {
    let (a, b) = (as_int(l)?, as_int(r)?);
    let v = match op {
      BinOp::BAnd => a & b, BinOp::BOr => a | b, BinOp::BXor => a ^ b,
      BinOp::BSL => a.wrapping_shl(b as u32), BinOp::BSR => a.wrapping_shr(b as u32),
      _ => unreachable!(),
    };
    return Ok(n.with_expr(Expr::Int(v)));
  }
  if op.is_strict_logical() {
    let (a, b) = (as_bool(l)?, as_bool(r)?);
    let v = match op { BinOp::And => a && b, BinOp::Or => a || b, BinOp::Xor => a != b, _ => unreachable!() };
    return Ok(n.with_expr(Expr::Bool(v)));
  }
  if op.is_relational() {
    let v = if let (Ok(a), Ok(b)) = (as_int(l), as_int(r)) {
      relational(op, a.cmp(&b))
    } else {
      let (a, b) = (as_float(l)?, as_float(r)?);
      relational(op, a.partial_cmp(&b).ok_or(StuckReason::NoApplicableRule("NaN in relational comparison"))?)
    };
    return Ok(n.with_expr(Expr::Bool(v)));
  }
  if let (Ok(a), Ok(b)) = (as_int(l), as_int(r)) {
    let v = match op {
      BinOp::Add => a.wrapping_add(b), BinOp::Sub => a.wrapping_sub(b), BinOp::Mul => a.wrapping_mul(b),
      BinOp::Div => a.checked_div(b).ok_or(StuckReason::NoApplicableRule("integer division by zero"))?,
      BinOp::Rem => a.checked_rem(b).ok_or(StuckReason::NoApplicableRule("integer remainder by zero"))?,
      _ => unreachable!(),
    };
    return Ok(n.with_expr(Expr::Int(v)));
  }
  let (a, b) = (as_float(l)?, as_float(r)?);
  let v = match op { BinOp::Add => a + b, BinOp::Sub => a - b, BinOp::Mul => a * b, BinOp::Div => a / b,
    _ => return Err(StuckReason::NoApplicableRule("operator not defined on float")) };
  Ok(n.with_expr(Expr::Float(v)))
}

fn relational(op: BinOp, ord: std::cmp::Ordering) -> bool {
  use std::cmp::Ordering::*;
  match (op, ord) {
    (BinOp::Eq, Equal) => true,
    (BinOp::Less, Less) => true,
    (BinOp::LessEq, Less | Equal) => true,
    (BinOp::Greater, Greater) => true,
    (BinOp::GreaterEq, Greater | Equal) => true,
    _ => false,
  }
}

fn eval_unary(n: &TypedNode, op: UnOp, a: &TypedNode) -> Step {
  match op {
    UnOp::Neg => Ok(n.with_expr(Expr::Int(as_int(a)?.wrapping_neg()))),
    UnOp::Not => Ok(n.with_expr(Expr::Bool(!as_bool(a)?))),
    UnOp::BNot => Ok(n.with_expr(Expr::Int(!as_int(a)?))),
    UnOp::Sqrt => Ok(n.with_expr(Expr::Float(as_float(a)?.sqrt()))),
  }
}

fn eval_syscall(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, number: i32, args: &smallvec::SmallVec<[TypedNode; 4]>) -> Step {
  for (i, a) in args.iter().enumerate() {
    if !a.is_value() {
      let mut next = args.clone();
      next[i] = step(heap, store, io, a)?;
      return Ok(n.with_expr(Expr::Syscall(number, next)));
    }
  }
  let sig = Syscall::from_number(number).ok_or(StuckReason::UnhandledSyscall(number))?;
  match sig {
    Syscall::PrintInt | Syscall::PrintIntHex | Syscall::PrintIntBinary | Syscall::PrintIntUnsigned =>
      { print!("{}", as_int(&args[0])?); Ok(unit_node(n)) }
    Syscall::PrintFloat | Syscall::PrintDouble => { print!("{}", as_float(&args[0])?); Ok(unit_node(n)) }
    Syscall::PrintString => { if let Expr::Str(s) = &*args[0].expr { print!("{s}"); } Ok(unit_node(n)) }
    Syscall::PrintChar => { if let Some(c) = char::from_u32(as_int(&args[0])? as u32) { print!("{c}"); } Ok(unit_node(n)) }
    Syscall::Sbrk => {
      // The reference evaluator has no flat byte heap; it models `Sbrk` as
      // allocating one fresh cell and returning its index as the "address".
      let addr = heap.alloc(HeapValue::Array(Vec::new()));
      Ok(n.with_expr(Expr::Int(addr as i32)))
    }
    Syscall::Exit | Syscall::Exit2 =>
      Err(StuckReason::NoApplicableRule("program requested termination (Exit/Exit2)")),
    _ => Err(StuckReason::UnhandledSyscall(number)),
  }
}

fn eval_seq(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, es: &[TypedNode]) -> Step {
  if es.is_empty() { return Ok(unit_node(n)); }
  if es.len() == 1 { return Ok(es[0].clone()); }
  if !es[0].is_value() {
    let mut next = es.to_vec();
    next[0] = step(heap, store, io, &es[0])?;
    return Ok(n.with_expr(Expr::Seq(next)));
  }
  Ok(n.with_expr(Expr::Seq(es[1..].to_vec())))
}

fn eval_let(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, name: &Rc<str>, init: &TypedNode, scope: &TypedNode) -> Step {
  if !init.is_value() {
    let stepped = step(heap, store, io, init)?;
    let rebuilt = match &*n.expr {
      Expr::Let(..) => Expr::Let(name.clone(), stepped, scope.clone()),
      Expr::LetT(_, pt, _, _) => Expr::LetT(name.clone(), pt.clone(), stepped, scope.clone()),
      _ => unreachable!(),
    };
    return Ok(n.with_expr(rebuilt));
  }
  Ok(subst_all(scope, std::slice::from_ref(&(name.clone(), init.clone()))))
}

/// `LetMut` installs a cell in the mutable-variable [`Store`], evaluates the
/// scope by name lookup (rather than substitution, so `Assign` can observe
/// later reads), then restores whatever the name previously held — or
/// removes it — once the scope finishes (§4.4 "reference semantics ...
/// restored on scope exit").
fn eval_let_mut(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, name: &Rc<str>, init: &TypedNode, scope: &TypedNode) -> Step {
  if !init.is_value() {
    let pt = match &*n.expr { Expr::LetMut(_, pt, _, _) => pt.clone(), _ => unreachable!() };
    return Ok(n.with_expr(Expr::LetMut(name.clone(), pt, step(heap, store, io, init)?, scope.clone())));
  }
  let saved = store.get(name);
  store.set(name.clone(), init.clone());
  let result = run_to_value(heap, store, io, scope);
  match saved { Some(v) => store.set(name.clone(), v), None => { store.remove(name); } }
  result
}

/// Drive `n` to a value using this module's own `step`, surfacing the first
/// [`StuckReason`] encountered. Used where a sub-evaluation (a `LetMut`
/// scope) must run to completion before the outer step can continue,
/// because the mutable-variable [`Store`] entry it depends on must be torn
/// down deterministically afterwards.
fn run_to_value(heap: &Heap, store: &Store, io: &Io, n: &TypedNode) -> Step {
  let mut cur = n.clone();
  loop {
    if cur.is_value() { return Ok(cur); }
    cur = step(heap, store, io, &cur)?;
  }
}

fn eval_assign(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, target: &TypedNode, rhs: &TypedNode) -> Step {
  if !rhs.is_value() {
    return Ok(n.with_expr(Expr::Assign(target.clone(), step(heap, store, io, rhs)?)));
  }
  match &*target.expr {
    Expr::Var(name) => {
      if store.get(name).is_none() { return Err(StuckReason::AssignToImmutable); }
      store.set(name.clone(), rhs.clone());
      Ok(unit_node(n))
    }
    Expr::FieldSelect(base, field) => {
      if !base.is_value() {
        let new_target = n.with_expr(Expr::FieldSelect(step(heap, store, io, base)?, field.clone()));
        return Ok(n.with_expr(Expr::Assign(new_target, rhs.clone())));
      }
      let addr = as_pointer(base)?;
      let mut v = heap.get(addr);
      match &mut v {
        HeapValue::Struct(cells) => {
          let idx = field_index(base, field)?;
          cells[idx] = rhs.clone();
          heap.set(addr, v);
          Ok(unit_node(n))
        }
        _ => Err(StuckReason::DescriptorMismatch),
      }
    }
    Expr::ArrayElem(base, idx) => {
      if !base.is_value() {
        let new_target = n.with_expr(Expr::ArrayElem(step(heap, store, io, base)?, idx.clone()));
        return Ok(n.with_expr(Expr::Assign(new_target, rhs.clone())));
      }
      if !idx.is_value() {
        let new_target = n.with_expr(Expr::ArrayElem(base.clone(), step(heap, store, io, idx)?));
        return Ok(n.with_expr(Expr::Assign(new_target, rhs.clone())));
      }
      let addr = as_pointer(base)?;
      let i = as_int(idx)?;
      let mut v = heap.get(addr);
      match &mut v {
        HeapValue::Array(cells) => {
          if i < 0 || i as usize >= cells.len() {
            return Err(StuckReason::ArrayOutOfBounds { index: i, length: cells.len() as i32 });
          }
          cells[i as usize] = rhs.clone();
          heap.set(addr, v);
          Ok(unit_node(n))
        }
        _ => Err(StuckReason::DescriptorMismatch),
      }
    }
    _ => Err(StuckReason::AssignToImmutable),
  }
}

fn field_index(base: &TypedNode, field: &str) -> Result<usize, StuckReason> {
  let expanded = base.env.expand(&base.ty).unwrap_or_else(|_| base.ty.clone());
  match expanded {
    Type::Record(fields) => fields.iter().position(|f| &*f.name == field)
      .ok_or(StuckReason::NoApplicableRule("field name absent from record type")),
    _ => Err(StuckReason::DescriptorMismatch),
  }
}

fn eval_app(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, f: &TypedNode, args: &[TypedNode]) -> Step {
  if !f.is_value() {
    return Ok(n.with_expr(Expr::App(step(heap, store, io, f)?, args.to_vec())));
  }
  for (i, a) in args.iter().enumerate() {
    if !a.is_value() {
      let mut next = args.to_vec();
      next[i] = step(heap, store, io, a)?;
      return Ok(n.with_expr(Expr::App(f.clone(), next)));
    }
  }
  let (params, body) = match &*f.expr {
    Expr::Lambda(params, body) => (params, body),
    _ => return Err(StuckReason::NoApplicableRule("application target is not a lambda")),
  };
  let bindings: Vec<(Rc<str>, TypedNode)> = params.iter().zip(args.iter())
    .map(|((name, _), v)| (name.clone(), v.clone())).collect();
  Ok(subst_all(body, &bindings))
}

fn eval_struct_cons(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, fields: &[StructField<crate::types::TyEnv, Type>]) -> Step {
  for (i, f) in fields.iter().enumerate() {
    if !f.init.is_value() {
      let mut next = fields.to_vec();
      next[i] = StructField { mutable: f.mutable, name: f.name.clone(), init: step(heap, store, io, &f.init)? };
      return Ok(n.with_expr(Expr::StructCons(next.into_iter().collect())));
    }
  }
  let cells = fields.iter().map(|f| f.init.clone()).collect();
  let addr = heap.alloc(HeapValue::Struct(cells));
  Ok(n.with_expr(Expr::Pointer(addr)))
}

fn eval_field_select(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, target: &TypedNode, field: &str) -> Step {
  if !target.is_value() {
    return Ok(n.with_expr(Expr::FieldSelect(step(heap, store, io, target)?, Rc::from(field))));
  }
  let addr = as_pointer(target)?;
  match heap.get(addr) {
    HeapValue::Struct(cells) => {
      let idx = field_index(target, field)?;
      Ok(cells[idx].clone())
    }
    _ => Err(StuckReason::DescriptorMismatch),
  }
}

fn eval_match(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, disc: &TypedNode, cases: &[MatchCase<crate::types::TyEnv, Type>]) -> Step {
  if !disc.is_value() {
    return Ok(n.with_expr(Expr::Match(step(heap, store, io, disc)?, cases.to_vec())));
  }
  let addr = as_pointer(disc)?;
  match heap.get(addr) {
    HeapValue::Union { label, payload } => {
      let arm = cases.iter().find(|c| c.label == label)
        .ok_or(StuckReason::NoApplicableRule("no match arm for union label"))?;
      Ok(subst_all(&arm.body, &[(arm.var.clone(), *payload)]))
    }
    _ => Err(StuckReason::DescriptorMismatch),
  }
}

fn eval_array(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, len: &TypedNode, init: &TypedNode) -> Step {
  if !len.is_value() { return Ok(n.with_expr(Expr::Array(step(heap, store, io, len)?, init.clone()))); }
  if !init.is_value() { return Ok(n.with_expr(Expr::Array(len.clone(), step(heap, store, io, init)?))); }
  let l = as_int(len)?;
  if l < 0 { return Err(StuckReason::NoApplicableRule("array length must be non-negative")); }
  let cells = vec![init.clone(); l as usize];
  let addr = heap.alloc(HeapValue::Array(cells));
  Ok(n.with_expr(Expr::Pointer(addr)))
}

fn eval_array_elem(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, a: &TypedNode, i: &TypedNode) -> Step {
  if !a.is_value() { return Ok(n.with_expr(Expr::ArrayElem(step(heap, store, io, a)?, i.clone()))); }
  if !i.is_value() { return Ok(n.with_expr(Expr::ArrayElem(a.clone(), step(heap, store, io, i)?))); }
  let addr = as_pointer(a)?;
  let idx = as_int(i)?;
  match heap.get(addr) {
    HeapValue::Array(cells) => {
      if idx < 0 || idx as usize >= cells.len() {
        return Err(StuckReason::ArrayOutOfBounds { index: idx, length: cells.len() as i32 });
      }
      Ok(cells[idx as usize].clone())
    }
    _ => Err(StuckReason::DescriptorMismatch),
  }
}

fn eval_array_length(heap: &Heap, store: &Store, io: &Io, n: &TypedNode, a: &TypedNode) -> Step {
  if !a.is_value() { return Ok(n.with_expr(Expr::ArrayLength(step(heap, store, io, a)?))); }
  let addr = as_pointer(a)?;
  match heap.get(addr) {
    HeapValue::Array(cells) => Ok(n.with_expr(Expr::Int(cells.len() as i32))),
    _ => Err(StuckReason::DescriptorMismatch),
  }
}

/// `Copy` performs a deep copy of a record (every field, recursively) but
/// only a shallow copy "at the pointer" for an array — a fresh heap cell
/// whose elements alias the original's (§4.4 "Copy").
fn deep_copy(heap: &Heap, a: &TypedNode) -> Step {
  if !matches!(&*a.expr, Expr::Pointer(_)) { return Ok(a.clone()); }
  let addr = as_pointer(a)?;
  match heap.get(addr) {
    HeapValue::Struct(cells) => {
      let copied: Result<Vec<TypedNode>, StuckReason> = cells.iter().map(|c| {
        if matches!(&*c.expr, Expr::Pointer(_)) { deep_copy(heap, c) } else { Ok(c.clone()) }
      }).collect();
      let new_addr = heap.alloc(HeapValue::Struct(copied?));
      Ok(a.with_expr(Expr::Pointer(new_addr)))
    }
    HeapValue::Array(cells) => {
      let new_addr = heap.alloc(HeapValue::Array(cells));
      Ok(a.with_expr(Expr::Pointer(new_addr)))
    }
    HeapValue::Union { label, payload } => {
      let new_addr = heap.alloc(HeapValue::Union { label, payload });
      Ok(a.with_expr(Expr::Pointer(new_addr)))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::TyEnv;

  fn tn(expr: Expr<TyEnv, Type>, ty: Type) -> TypedNode {
    Node { pos: Position::dummy(), expr: Rc::new(expr), env: TyEnv::empty(), ty }
  }

  #[test]
  fn arithmetic_reduces_to_a_value() {
    let e = tn(Expr::Binary(BinOp::Add, tn(Expr::Int(2), Type::Int), tn(Expr::Int(3), Type::Int)), Type::Int);
    let heap = Heap::new();
    let store = Store::new();
    let io = Io::null();
    match eval(&heap, &store, &io, &e) {
      Outcome::Value(v) => assert!(matches!(&*v.expr, Expr::Int(5))),
      Outcome::Stuck(r, _) => panic!("unexpectedly stuck: {r}"),
    }
  }

  #[test]
  fn let_binding_substitutes_into_its_scope() {
    let init = tn(Expr::Int(7), Type::Int);
    let scope = tn(Expr::Var(Rc::from("x")), Type::Int);
    let e = tn(Expr::Let(Rc::from("x"), init, scope), Type::Int);
    let heap = Heap::new();
    let store = Store::new();
    let io = Io::null();
    match eval(&heap, &store, &io, &e) {
      Outcome::Value(v) => assert!(matches!(&*v.expr, Expr::Int(7))),
      Outcome::Stuck(r, _) => panic!("unexpectedly stuck: {r}"),
    }
  }

  #[test]
  fn assertion_false_gets_stuck_with_assertion_failed() {
    let e = tn(Expr::Assertion(tn(Expr::Bool(false), Type::Bool)), Type::Unit);
    let heap = Heap::new();
    let store = Store::new();
    let io = Io::null();
    match eval(&heap, &store, &io, &e) {
      Outcome::Stuck(StuckReason::AssertionFailed, _) => {}
      other => panic!("expected AssertionFailed, got {other:?}"),
    }
  }

  #[test]
  fn struct_field_select_round_trips_through_the_heap() {
    let field_a = StructField { mutable: false, name: Rc::from("a"), init: tn(Expr::Int(10), Type::Int) };
    let cons = tn(Expr::StructCons(smallvec::smallvec![field_a]),
      Type::Record(smallvec::smallvec![crate::types::RecordField {
        mutable: false, name: Rc::from("a"), ty: Type::Int }]));
    let select = tn(Expr::FieldSelect(cons, Rc::from("a")), Type::Int);
    let heap = Heap::new();
    let store = Store::new();
    let io = Io::null();
    match eval(&heap, &store, &io, &select) {
      Outcome::Value(v) => assert!(matches!(&*v.expr, Expr::Int(10))),
      Outcome::Stuck(r, _) => panic!("unexpectedly stuck: {r}"),
    }
  }

  #[test]
  fn array_out_of_bounds_is_stuck_with_descriptive_reason() {
    let arr = tn(Expr::Array(tn(Expr::Int(2), Type::Int), tn(Expr::Int(0), Type::Int)), Type::array(Type::Int));
    let idx = tn(Expr::ArrayElem(arr, tn(Expr::Int(5), Type::Int)), Type::Int);
    let heap = Heap::new();
    let store = Store::new();
    let io = Io::null();
    match eval(&heap, &store, &io, &idx) {
      Outcome::Stuck(StuckReason::ArrayOutOfBounds { index: 5, length: 2 }, _) => {}
      other => panic!("expected ArrayOutOfBounds, got {other:?}"),
    }
  }

  #[test]
  fn while_loop_runs_to_completion_via_mutable_store() {
    // let mutable i = 0; while (i < 3) { i <- i + 1 }; i
    let init = tn(Expr::Int(0), Type::Int);
    let cond = tn(Expr::Binary(BinOp::Less, tn(Expr::Var(Rc::from("i")), Type::Int), tn(Expr::Int(3), Type::Int)), Type::Bool);
    let incr = tn(Expr::Assign(
      tn(Expr::Var(Rc::from("i")), Type::Int),
      tn(Expr::Binary(BinOp::Add, tn(Expr::Var(Rc::from("i")), Type::Int), tn(Expr::Int(1), Type::Int)), Type::Int),
    ), Type::Unit);
    let body = tn(Expr::While(cond, incr), Type::Unit);
    let tail = tn(Expr::Var(Rc::from("i")), Type::Int);
    let seq = tn(Expr::Seq(vec![body, tail]), Type::Int);
    let e = tn(Expr::LetMut(Rc::from("i"), None, init, seq), Type::Int);
    let heap = Heap::new();
    let store = Store::new();
    let io = Io::null();
    match eval(&heap, &store, &io, &e) {
      Outcome::Value(v) => assert!(matches!(&*v.expr, Expr::Int(3))),
      Outcome::Stuck(r, _) => panic!("unexpectedly stuck: {r}"),
    }
  }

  #[test]
  fn read_int_parses_the_reader_line() {
    let e = tn(Expr::ReadInt, Type::Int);
    let heap = Heap::new();
    let store = Store::new();
    let io = Io::new(io::Cursor::new(b"42\n".to_vec()), io::sink());
    match eval(&heap, &store, &io, &e) {
      Outcome::Value(v) => assert!(matches!(&*v.expr, Expr::Int(42))),
      Outcome::Stuck(r, _) => panic!("unexpectedly stuck: {r}"),
    }
  }

  #[test]
  fn read_int_on_unparsable_input_yields_unit() {
    let e = tn(Expr::ReadInt, Type::Int);
    let heap = Heap::new();
    let store = Store::new();
    let io = Io::new(io::Cursor::new(b"not a number\n".to_vec()), io::sink());
    match eval(&heap, &store, &io, &e) {
      Outcome::Value(v) => assert!(matches!(&*v.expr, Expr::Unit)),
      Outcome::Stuck(r, _) => panic!("unexpectedly stuck: {r}"),
    }
  }

  #[test]
  fn print_ln_writes_through_the_injected_printer() {
    let e = tn(Expr::PrintLn(tn(Expr::Int(9), Type::Int)), Type::Unit);
    let heap = Heap::new();
    let store = Store::new();
    let out = std::rc::Rc::new(RefCell::new(Vec::new()));
    struct SharedBuf(std::rc::Rc<RefCell<Vec<u8>>>);
    impl Write for SharedBuf {
      fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.0.borrow_mut().write(buf) }
      fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }
    let io = Io::new(io::empty(), SharedBuf(out.clone()));
    match eval(&heap, &store, &io, &e) {
      Outcome::Value(v) => assert!(matches!(&*v.expr, Expr::Unit)),
      Outcome::Stuck(r, _) => panic!("unexpectedly stuck: {r}"),
    }
    assert_eq!(&*out.borrow(), b"9\n");
  }
}
