//! The bidirectional subtyping type checker (§4.3, C3).
//!
//! The public contract: `typecheck(tree)` consumes an untyped tree and
//! returns either a fully annotated typed tree, or a non-empty list of
//! diagnostics accumulated across sibling subtrees (a subtree that fails to
//! check still allows its siblings to be checked, per §4.3 "Public
//! contract").

use std::rc::Rc;
use smallvec::SmallVec;
use crate::diagnostic::Diagnostic;
use crate::position::Position;
use crate::pretype::{Pretype, PretypeKind};
use crate::tree::{BinOp, Expr, MatchCase, Node, StructField, UnOp, UntypedNode};
use crate::types::{self, RecordField, TyEnv, Type, UnionCase};

/// Type-check `tree` from an empty environment (§3 "Typing environment...
/// created empty at program entry").
pub fn typecheck(tree: &UntypedNode) -> Result<crate::tree::TypedNode, Vec<Diagnostic>> {
  log::trace!("typecheck: entering");
  let mut errs = Vec::new();
  let env = TyEnv::empty();
  let out = infer(&env, tree, &mut errs);
  log::trace!("typecheck: leaving, {} diagnostics", errs.len());
  match (out, errs.is_empty()) {
    (Some(node), true) => Ok(node),
    (_, _) => Err(errs),
  }
}

// ---------------------------------------------------------------------
// Pretype resolution (§4.3 "Pretype resolution")
// ---------------------------------------------------------------------

const PRIMITIVE_NAMES: &[&str] = &["bool", "int", "float", "string", "unit"];

fn primitive_type(name: &str) -> Option<Type> {
  match name {
    "bool" => Some(Type::Bool),
    "int" => Some(Type::Int),
    "float" => Some(Type::Float),
    "string" => Some(Type::String),
    "unit" => Some(Type::Unit),
    _ => None,
  }
}

/// Resolve a pretype AST under `env` to a [`Type`] (§4.3 "Pretype
/// resolution"). An identifier resolves to a primitive type, else to a
/// `Type::Var` if the alias table contains it, else it is an error.
pub fn resolve_pretype(env: &TyEnv, pt: &Pretype) -> Result<Type, Diagnostic> {
  match &pt.kind {
    PretypeKind::Ident(name) => {
      if let Some(t) = primitive_type(name) { return Ok(t); }
      if env.aliases.contains_key(name) { return Ok(Type::Var(name.clone())); }
      Err(Diagnostic::new(pt.pos.clone(), format!("undefined type `{name}`")))
    }
    PretypeKind::Fun(args, ret) => {
      let args = args.iter().map(|a| resolve_pretype(env, a)).collect::<Result<SmallVec<[Type; 4]>, _>>()?;
      let ret = resolve_pretype(env, ret)?;
      Ok(Type::Fun(args, Box::new(ret)))
    }
    PretypeKind::Record(fields) => {
      let mut seen = std::collections::HashSet::with_capacity(fields.len());
      let mut out = SmallVec::new();
      for f in fields {
        if !seen.insert(f.name.clone()) {
          return Err(Diagnostic::new(pt.pos.clone(), format!("duplicate field name `{}`", f.name)));
        }
        out.push(RecordField { mutable: f.mutable, name: f.name.clone(), ty: resolve_pretype(env, &f.ty)? });
      }
      Ok(Type::Record(out))
    }
    PretypeKind::Union(cases) => {
      let mut seen = std::collections::HashSet::with_capacity(cases.len());
      let mut out = SmallVec::new();
      for c in cases {
        if !seen.insert(c.label.clone()) {
          return Err(Diagnostic::new(pt.pos.clone(), format!("duplicate case label `{}`", c.label)));
        }
        out.push(UnionCase { label: c.label.clone(), ty: resolve_pretype(env, &c.ty)? });
      }
      Ok(Type::Union(out))
    }
    PretypeKind::Array(elem) => Ok(Type::array(resolve_pretype(env, elem)?)),
  }
}

// ---------------------------------------------------------------------
// Subtyping (§4.3 "Subtyping")
// ---------------------------------------------------------------------

/// A greatest-fixed-point assumption set of `(t1, t2)` pairs already being
/// checked higher up the call stack. `Type` has no total `Eq`/`Hash` (its
/// `Float` payload is an `f32`), so this is a small linear-scan association
/// list rather than a hash set — assumption sets stay shallow in practice,
/// bounded by the nesting of recursive alias unfoldings on one subtyping
/// query.
#[derive(Clone, Default)]
struct Assumptions(Vec<(Type, Type)>);

impl Assumptions {
  fn contains(&self, t1: &Type, t2: &Type) -> bool {
    self.0.iter().any(|(a, b)| a == t1 && b == t2)
  }
  fn extended(&self, t1: Type, t2: Type) -> Self {
    let mut next = self.0.clone();
    next.push((t1, t2));
    Assumptions(next)
  }
}

/// The coinductive subtyping predicate `t1 <: t2`, parameterised by an
/// assumption set used as a greatest-fixed-point guard against infinite
/// unfolding of mutually recursive aliases (§4.3 rules 1-7, §9 "Coinductive
/// subtyping").
pub fn subtype(env: &TyEnv, t1: &Type, t2: &Type) -> bool {
  subtype_assuming(env, t1, t2, &Assumptions::default())
}

fn subtype_assuming(env: &TyEnv, t1: &Type, t2: &Type, assumed: &Assumptions) -> bool {
  // Rule 1: reflexive on syntactic equality.
  if t1 == t2 { return true; }
  // Rule 2: greatest-fixed-point closure for recursive types.
  if assumed.contains(t1, t2) { return true; }

  // Rule 3: expand a type-variable side before anything else, adding the
  // original pair to the assumption set first (the guard must be installed
  // *before* expansion, per §9).
  if matches!(t1, Type::Var(_)) || matches!(t2, Type::Var(_)) {
    let next = assumed.extended(t1.clone(), t2.clone());
    let e1 = match t1 { Type::Var(_) => match t1.expand(&env.aliases) { Ok(t) => t, Err(_) => return false }, _ => t1.clone() };
    let e2 = match t2 { Type::Var(_) => match t2.expand(&env.aliases) { Ok(t) => t, Err(_) => return false }, _ => t2.clone() };
    return subtype_assuming(env, &e1, &e2, &next);
  }

  match (t1, t2) {
    // Rule 4: record width + depth subtyping, invariant on mutability.
    (Type::Record(f1), Type::Record(f2)) => {
      if f1.len() < f2.len() { return false; }
      f1.iter().zip(f2.iter()).all(|(a, b)| {
        a.name == b.name
          && (!b.mutable || a.mutable)
          && subtype_assuming(env, &a.ty, &b.ty, assumed)
      })
    }
    // Rule 5: union — subtype's labels are a subset of supertype's.
    (Type::Union(c1), Type::Union(c2)) => {
      c1.iter().all(|a| {
        c2.iter().find(|b| b.label == a.label)
          .is_some_and(|b| subtype_assuming(env, &a.ty, &b.ty, assumed))
      })
    }
    // Rule 6: arrays are invariant in element type unless equal (caught by
    // rule 1 above for the equal case).
    (Type::Array(_), Type::Array(_)) => false,
    (Type::Fun(a1, r1), Type::Fun(a2, r2)) => {
      a1.len() == a2.len()
        && a1.iter().zip(a2.iter()).all(|(x, y)| subtype_assuming(env, y, x, assumed))
        && subtype_assuming(env, r1, r2, assumed)
    }
    // Rule 7: otherwise reject.
    _ => false,
  }
}

// ---------------------------------------------------------------------
// The checker
// ---------------------------------------------------------------------

type TNode = crate::tree::TypedNode;

fn node(pos: Position, env: TyEnv, ty: Type, expr: Expr<TyEnv, Type>) -> TNode {
  Node { pos, expr: Rc::new(expr), env, ty }
}

fn err(errs: &mut Vec<Diagnostic>, pos: &Position, msg: impl Into<String>) {
  errs.push(Diagnostic::new(pos.clone(), msg));
}

/// Infer (and annotate) a node under `env`, accumulating diagnostics for
/// every failure encountered, anywhere in the subtree, into `errs`.
/// Returns `None` when this node's own type could not be determined; a
/// `None` child does not stop its siblings from being checked.
fn infer(env: &TyEnv, n: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let pos = n.pos.clone();
  match &*n.expr {
    Expr::Unit => Some(node(pos, env.clone(), Type::Unit, Expr::Unit)),
    Expr::Bool(b) => Some(node(pos, env.clone(), Type::Bool, Expr::Bool(*b))),
    Expr::Int(i) => Some(node(pos, env.clone(), Type::Int, Expr::Int(*i))),
    Expr::Float(f) => Some(node(pos, env.clone(), Type::Float, Expr::Float(*f))),
    Expr::Str(s) => Some(node(pos, env.clone(), Type::String, Expr::Str(s.clone()))),

    Expr::Var(name) => match env.lookup_var(name) {
      Some(ty) => Some(node(pos, env.clone(), ty.clone(), Expr::Var(name.clone()))),
      None => { err(errs, &pos, format!("undefined variable `{name}`")); None }
    },

    Expr::Binary(op, l, r) => infer_binary(env, &pos, *op, l, r, errs),
    Expr::CompoundAssign(op, target, rhs) => infer_compound_assign(env, &pos, *op, target, rhs, errs),
    Expr::Unary(op, a) => infer_unary(env, &pos, *op, a, errs),

    Expr::ReadInt => Some(node(pos, env.clone(), Type::Int, Expr::ReadInt)),
    Expr::ReadFloat => Some(node(pos, env.clone(), Type::Float, Expr::ReadFloat)),
    Expr::Print(a) => infer_print(env, &pos, a, errs, false),
    Expr::PrintLn(a) => infer_print(env, &pos, a, errs, true),
    Expr::Syscall(number, args) => infer_syscall(env, &pos, *number, args, errs),

    Expr::PreIncr(name) | Expr::PostIncr(name) => {
      let is_pre = matches!(&*n.expr, Expr::PreIncr(_));
      match env.lookup_var(name) {
        Some(ty) if matches!(ty, Type::Int | Type::Float) && env.is_mutable(name) => {
          let ty = ty.clone();
          let e = if is_pre { Expr::PreIncr(name.clone()) } else { Expr::PostIncr(name.clone()) };
          Some(node(pos, env.clone(), ty, e))
        }
        Some(_) => { err(errs, &pos, format!("`{name}` must be a mutable int or float to increment")); None }
        None => { err(errs, &pos, format!("undefined variable `{name}`")); None }
      }
    }

    Expr::If(c, t, f) => infer_if(env, &pos, c, t, f, errs),
    Expr::Seq(es) => infer_seq(env, &pos, es, errs),

    Expr::TypeAlias(name, pt, scope) => infer_type_alias(env, &pos, name, pt, scope, errs),
    Expr::Ascription(a, pt) => infer_ascription(env, &pos, a, pt, errs),
    Expr::Assertion(a) => infer_assertion(env, &pos, a, errs),
    Expr::Copy(a) => infer(env, a, errs).map(|ta| {
      let ty = ta.ty.clone();
      node(pos, env.clone(), ty, Expr::Copy(ta))
    }),

    Expr::Let(name, init, scope) => infer_let(env, &pos, name, None, init, scope, errs, false),
    Expr::LetT(name, pt, init, scope) => infer_let(env, &pos, name, Some(pt), init, scope, errs, false),
    Expr::LetMut(name, pt, init, scope) => infer_let(env, &pos, name, pt.as_ref(), init, scope, errs, true),

    Expr::Assign(target, rhs) => infer_assign(env, &pos, target, rhs, errs),
    Expr::While(c, body) => infer_while(env, &pos, c, body, errs),
    Expr::For { var, init, cond, step, body } => infer_for(env, &pos, var, init, cond, step, body, errs),

    Expr::Lambda(params, body) => infer_lambda(env, &pos, params, body, errs),
    Expr::App(f, args) => infer_app(env, &pos, f, args, errs),

    Expr::StructCons(fields) => infer_struct_cons(env, &pos, fields, errs),
    Expr::FieldSelect(target, field) => infer_field_select(env, &pos, target, field, errs),

    Expr::UnionCons(label, a) => infer(env, a, errs).map(|ta| {
      let ty = Type::Union(smallvec::smallvec![UnionCase { label: label.clone(), ty: ta.ty.clone() }]);
      node(pos, env.clone(), ty, Expr::UnionCons(label.clone(), ta))
    }),
    Expr::Match(disc, cases) => infer_match(env, &pos, disc, cases, errs),

    Expr::Array(len, init) => infer_array(env, &pos, len, init, errs),
    Expr::ArrayElem(a, i) => infer_array_elem(env, &pos, a, i, errs),
    Expr::ArrayLength(a) => infer_array_length(env, &pos, a, errs),

    Expr::Pointer(_) => { err(errs, &pos, "a runtime pointer literal cannot appear in source"); None }
  }
}

fn infer_binary(env: &TyEnv, pos: &Position, op: BinOp, l: &UntypedNode, r: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let tl = infer(env, l, errs);
  let tr = infer(env, r, errs);
  let (tl, tr) = (tl?, tr?);
  let ty = binary_result_type(env, pos, op, &tl.ty, &tr.ty, errs)?;
  Some(node(pos.clone(), env.clone(), ty, Expr::Binary(op, tl, tr)))
}

fn binary_result_type(env: &TyEnv, pos: &Position, op: BinOp, lt: &Type, rt: &Type, errs: &mut Vec<Diagnostic>) -> Option<Type> {
  if op.is_bitwise() {
    return if subtype(env, lt, &Type::Int) && subtype(env, rt, &Type::Int) { Some(Type::Int) }
      else { err(errs, pos, "bitwise operators require both operands to be int"); None };
  }
  if op.is_strict_logical() || op.is_short_circuit() {
    return if subtype(env, lt, &Type::Bool) && subtype(env, rt, &Type::Bool) { Some(Type::Bool) }
      else { err(errs, pos, "logical operators require both operands to be bool"); None };
  }
  if op.is_relational() {
    return if subtype(env, lt, &Type::Int) && subtype(env, rt, &Type::Int) { Some(Type::Bool) }
      else if subtype(env, lt, &Type::Float) && subtype(env, rt, &Type::Float) { Some(Type::Bool) }
      else { err(errs, pos, "relational operators require both operands to be int or both float"); None };
  }
  // Arithmetic: Add/Sub/Mul/Div on Int or Float; Rem restricted to Int.
  if op == BinOp::Rem {
    return if subtype(env, lt, &Type::Int) && subtype(env, rt, &Type::Int) { Some(Type::Int) }
      else { err(errs, pos, "`%` requires both operands to be int"); None };
  }
  if subtype(env, lt, &Type::Int) && subtype(env, rt, &Type::Int) { Some(Type::Int) }
  else if subtype(env, lt, &Type::Float) && subtype(env, rt, &Type::Float) { Some(Type::Float) }
  else { err(errs, pos, "arithmetic operators require both operands to be int or both float"); None }
}

fn infer_compound_assign(env: &TyEnv, pos: &Position, op: BinOp, target: &UntypedNode, rhs: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let ttarget = infer(env, target, errs);
  let trhs = infer(env, rhs, errs);
  let (ttarget, trhs) = (ttarget?, trhs?);
  if !is_valid_assign_target(env, &ttarget, errs) { return None; }
  binary_result_type(env, pos, op, &ttarget.ty, &trhs.ty, errs)?;
  Some(node(pos.clone(), env.clone(), Type::Unit, Expr::CompoundAssign(op, ttarget, trhs)))
}

fn infer_unary(env: &TyEnv, pos: &Position, op: UnOp, a: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let ta = infer(env, a, errs)?;
  let ty = match op {
    // §4.3: "Neg requires Int (note: Float negation is not admitted;
    // preserve this exactly)" — see also §9 open questions.
    UnOp::Neg => if subtype(env, &ta.ty, &Type::Int) { Type::Int }
      else { err(errs, pos, "unary `-` requires an int operand"); return None },
    UnOp::Not => if subtype(env, &ta.ty, &Type::Bool) { Type::Bool }
      else { err(errs, pos, "`not` requires a bool operand"); return None },
    UnOp::BNot => if subtype(env, &ta.ty, &Type::Int) { Type::Int }
      else { err(errs, pos, "`bnot` requires an int operand"); return None },
    UnOp::Sqrt => if subtype(env, &ta.ty, &Type::Float) { Type::Float }
      else { err(errs, pos, "`sqrt` requires a float operand"); return None },
  };
  Some(node(pos.clone(), env.clone(), ty, Expr::Unary(op, ta)))
}

fn printable(env: &TyEnv, ty: &Type) -> bool {
  [Type::Bool, Type::Int, Type::Float, Type::String].iter().any(|p| subtype(env, ty, p))
}

fn infer_print(env: &TyEnv, pos: &Position, a: &UntypedNode, errs: &mut Vec<Diagnostic>, is_println: bool) -> Option<TNode> {
  let ta = infer(env, a, errs)?;
  if !printable(env, &ta.ty) {
    err(errs, pos, "print/println requires a bool, int, float, or string argument");
    return None;
  }
  let e = if is_println { Expr::PrintLn(ta) } else { Expr::Print(ta) };
  Some(node(pos.clone(), env.clone(), Type::Unit, e))
}

fn infer_syscall(env: &TyEnv, pos: &Position, number: i32, args: &[UntypedNode], errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let sig = match crate::syscalls::Syscall::from_number(number) {
    Some(s) => s,
    None => { err(errs, pos, format!("unknown syscall number {number}")); return None; }
  };
  let targs: Option<SmallVec<[TNode; 4]>> = args.iter().map(|a| infer(env, a, errs)).collect();
  let targs = targs?;
  let sig_args = sig.args();
  if targs.len() != sig_args.len() {
    err(errs, pos, format!("{} expects {} argument(s), found {}", sig.name(), sig_args.len(), targs.len()));
    return None;
  }
  if !targs.iter().zip(sig_args.iter()).all(|(a, t)| subtype(env, &a.ty, t)) {
    err(errs, pos, format!("argument types for {} do not match its signature", sig.name()));
    return None;
  }
  Some(node(pos.clone(), env.clone(), sig.ret(), Expr::Syscall(number, targs)))
}

fn infer_if(env: &TyEnv, pos: &Position, c: &UntypedNode, t: &UntypedNode, f: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let tc = infer(env, c, errs);
  let tt = infer(env, t, errs);
  let tf = infer(env, f, errs);
  let (tc, tt, tf) = (tc?, tt?, tf?);
  if !subtype(env, &tc.ty, &Type::Bool) {
    err(errs, pos, "if condition must be bool");
    return None;
  }
  // The join is the lesser-specific branch type (§4.3 "If").
  let ty = if subtype(env, &tt.ty, &tf.ty) { tf.ty.clone() }
    else if subtype(env, &tf.ty, &tt.ty) { tt.ty.clone() }
    else { err(errs, pos, "if branches have incompatible types"); return None };
  Some(node(pos.clone(), env.clone(), ty, Expr::If(tc, tt, tf)))
}

fn infer_seq(env: &TyEnv, pos: &Position, es: &[UntypedNode], errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let mut cur = env.clone();
  let mut out = Vec::with_capacity(es.len());
  let mut ok = true;
  for e in es {
    match infer(&cur, e, errs) {
      Some(te) => { cur = te.env.clone(); out.push(te); }
      None => ok = false,
    }
  }
  if !ok { return None; }
  let ty = out.last().map_or(Type::Unit, |n| n.ty.clone());
  Some(node(pos.clone(), env.clone(), ty, Expr::Seq(out)))
}

fn infer_type_alias(env: &TyEnv, pos: &Position, name: &Rc<str>, pt: &Pretype, scope: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  if primitive_type(name).is_some() {
    err(errs, pos, format!("cannot redefine primitive type `{name}`"));
    return None;
  }
  if let PretypeKind::Ident(inner) = &pt.kind {
    if inner == name {
      err(errs, pos, "invalid recursive definition");
      return None;
    }
  }
  if env.aliases.contains_key(name) {
    err(errs, pos, format!("type `{name}` is already defined"));
    return None;
  }
  // Insert a placeholder so that a genuinely recursive definition (a field
  // that mentions `name` inside a record/union/array/function constituent)
  // can resolve during its own body.
  let placeholder_env = env.with_alias(name.clone(), Type::Unit);
  let resolved = resolve_pretype(&placeholder_env, pt).inspect_err(|d| errs.push(d.clone())).ok()?;
  let scoped_env = env.with_alias(name.clone(), resolved);
  let tscope = infer(&scoped_env, scope, errs)?;
  // The alias must not escape its scope (§4.3 "Type").
  if tscope.ty.expand(&scoped_env.aliases).map(|t| t.free_type_vars()).unwrap_or_default().contains(name)
    || tscope.ty.free_type_vars().contains(name)
  {
    err(errs, pos, format!("type alias `{name}` escapes its scope"));
    return None;
  }
  let ty = tscope.ty.clone();
  Some(node(pos.clone(), env.clone(), ty, Expr::TypeAlias(name.clone(), pt.clone(), tscope)))
}

fn infer_ascription(env: &TyEnv, pos: &Position, a: &UntypedNode, pt: &Pretype, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let ta = infer(env, a, errs)?;
  let target = resolve_pretype(env, pt).inspect_err(|d| errs.push(d.clone())).ok()?;
  if !subtype(env, &ta.ty, &target) {
    err(errs, pos, "expression type is not a subtype of the ascribed type");
    return None;
  }
  Some(node(pos.clone(), env.clone(), target, Expr::Ascription(ta, pt.clone())))
}

fn infer_assertion(env: &TyEnv, pos: &Position, a: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let ta = infer(env, a, errs)?;
  if !subtype(env, &ta.ty, &Type::Bool) {
    err(errs, pos, "assert requires a bool argument");
    return None;
  }
  Some(node(pos.clone(), env.clone(), Type::Unit, Expr::Assertion(ta)))
}

#[allow(clippy::too_many_arguments)]
fn infer_let(
  env: &TyEnv, pos: &Position, name: &Rc<str>, pt: Option<&Pretype>,
  init: &UntypedNode, scope: &UntypedNode, errs: &mut Vec<Diagnostic>, mutable: bool,
) -> Option<TNode> {
  let tinit = infer(env, init, errs)?;
  let declared = match pt {
    Some(pt) => {
      let t = resolve_pretype(env, pt).inspect_err(|d| errs.push(d.clone())).ok()?;
      if !subtype(env, &tinit.ty, &t) {
        err(errs, pos, format!("initializer for `{name}` is not a subtype of its declared type"));
        return None;
      }
      t
    }
    None => tinit.ty.clone(),
  };
  let next_env = if mutable { env.with_mutable_var(name.clone(), declared) } else { env.with_var(name.clone(), declared) };
  let tscope = infer(&next_env, scope, errs)?;
  let ty = tscope.ty.clone();
  let expr = match pt {
    Some(pt) if !mutable => Expr::LetT(name.clone(), pt.clone(), tinit, tscope),
    _ if mutable => Expr::LetMut(name.clone(), pt.cloned(), tinit, tscope),
    _ => Expr::Let(name.clone(), tinit, tscope),
  };
  Some(node(pos.clone(), env.clone(), ty, expr))
}

/// Is `target` an admissible assignment target (§4.3 "Assign"), and does it
/// satisfy the mutability requirement for its own shape (a `Var` must be in
/// `mutables`; a `FieldSelect` must select a mutable field)? Array elements
/// are always assignable once indexed (array mutability is per-element,
/// not per-array, in this language).
fn is_valid_assign_target(env: &TyEnv, target: &TNode, errs: &mut Vec<Diagnostic>) -> bool {
  match &*target.expr {
    Expr::Var(name) => {
      if env.is_mutable(name) { true }
      else { err(errs, &target.pos, format!("`{name}` is not mutable")); false }
    }
    Expr::FieldSelect(base, field) => {
      match base.ty.expand(&env.aliases) {
        Ok(Type::Record(fields)) => match fields.iter().find(|f| &f.name == field) {
          Some(f) if f.mutable => true,
          Some(_) => { err(errs, &target.pos, format!("field `{field}` is not mutable")); false }
          None => { err(errs, &target.pos, format!("no field `{field}` in record type")); false }
        },
        _ => { err(errs, &target.pos, "field assignment target is not a record"); false }
      }
    }
    Expr::ArrayElem(..) => true,
    _ => { err(errs, &target.pos, "invalid assignment target"); false }
  }
}

fn infer_assign(env: &TyEnv, pos: &Position, target: &UntypedNode, rhs: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let ttarget = infer(env, target, errs);
  let trhs = infer(env, rhs, errs);
  let (ttarget, trhs) = (ttarget?, trhs?);
  if !is_valid_assign_target(env, &ttarget, errs) { return None; }
  if !subtype(env, &trhs.ty, &ttarget.ty) {
    err(errs, pos, "assigned expression is not a subtype of the target's type");
    return None;
  }
  Some(node(pos.clone(), env.clone(), Type::Unit, Expr::Assign(ttarget, trhs)))
}

fn infer_while(env: &TyEnv, pos: &Position, c: &UntypedNode, body: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let tc = infer(env, c, errs);
  let tbody = infer(env, body, errs);
  let (tc, tbody) = (tc?, tbody?);
  if !subtype(env, &tc.ty, &Type::Bool) {
    err(errs, pos, "while condition must be bool");
    return None;
  }
  Some(node(pos.clone(), env.clone(), Type::Unit, Expr::While(tc, tbody)))
}

#[allow(clippy::too_many_arguments)]
fn infer_for(
  env: &TyEnv, pos: &Position, var: &Rc<str>, init: &UntypedNode, cond: &UntypedNode,
  step: &UntypedNode, body: &UntypedNode, errs: &mut Vec<Diagnostic>,
) -> Option<TNode> {
  let tinit = infer(env, init, errs)?;
  let inner = env.with_mutable_var(var.clone(), tinit.ty.clone());
  let tcond = infer(&inner, cond, errs);
  let tstep = infer(&inner, step, errs);
  let tbody = infer(&inner, body, errs);
  let (tcond, tstep, tbody) = (tcond?, tstep?, tbody?);
  if !subtype(&inner, &tcond.ty, &Type::Bool) {
    err(errs, pos, "for condition must be bool");
    return None;
  }
  Some(node(pos.clone(), env.clone(), Type::Unit, Expr::For {
    var: var.clone(), init: tinit, cond: tcond, step: tstep, body: tbody,
  }))
}

fn infer_lambda(env: &TyEnv, pos: &Position, params: &[(Rc<str>, Pretype)], body: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let mut seen = std::collections::HashSet::with_capacity(params.len());
  for (name, _) in params {
    if !seen.insert(name.clone()) {
      err(errs, pos, format!("duplicate argument name `{name}`"));
      return None;
    }
  }
  let mut inner = env.clone();
  let mut resolved_params = SmallVec::<[(Rc<str>, Pretype); 4]>::new();
  let mut arg_types = SmallVec::<[Type; 4]>::new();
  for (name, pt) in params {
    let t = resolve_pretype(&inner, pt).inspect_err(|d| errs.push(d.clone())).ok()?;
    inner = inner.with_var(name.clone(), t.clone());
    arg_types.push(t);
    resolved_params.push((name.clone(), pt.clone()));
  }
  let tbody = infer(&inner, body, errs)?;
  let ty = Type::Fun(arg_types, Box::new(tbody.ty.clone()));
  Some(node(pos.clone(), env.clone(), ty, Expr::Lambda(resolved_params, tbody)))
}

fn infer_app(env: &TyEnv, pos: &Position, f: &UntypedNode, args: &[UntypedNode], errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let tf = infer(env, f, errs);
  let targs: Option<Vec<TNode>> = args.iter().map(|a| infer(env, a, errs)).collect();
  let (tf, targs) = (tf?, targs?);
  let fun_ty = match tf.ty.expand(&env.aliases) {
    Ok(t) => t,
    Err(e) => { err(errs, pos, e.to_string()); return None; }
  };
  let (param_tys, ret_ty) = match fun_ty {
    Type::Fun(a, r) => (a, r),
    _ => { err(errs, pos, "applied expression is not a function"); return None; }
  };
  if param_tys.len() != targs.len() {
    err(errs, pos, format!("function expects {} argument(s), found {}", param_tys.len(), targs.len()));
    return None;
  }
  if !targs.iter().zip(param_tys.iter()).all(|(a, p)| subtype(env, &a.ty, p)) {
    err(errs, pos, "argument type does not match the declared parameter type");
    return None;
  }
  Some(node(pos.clone(), env.clone(), *ret_ty, Expr::App(tf, targs)))
}

fn infer_struct_cons(env: &TyEnv, pos: &Position, fields: &[StructField<(), ()>], errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let mut seen = std::collections::HashSet::with_capacity(fields.len());
  let mut out = SmallVec::<[StructField<TyEnv, Type>; 4]>::new();
  let mut field_tys = SmallVec::<[RecordField; 4]>::new();
  let mut ok = true;
  for f in fields {
    if !seen.insert(f.name.clone()) {
      err(errs, pos, format!("duplicate field name `{}`", f.name));
      ok = false;
      continue;
    }
    match infer(env, &f.init, errs) {
      Some(tinit) => {
        field_tys.push(RecordField { mutable: f.mutable, name: f.name.clone(), ty: tinit.ty.clone() });
        out.push(StructField { mutable: f.mutable, name: f.name.clone(), init: tinit });
      }
      None => ok = false,
    }
  }
  if !ok { return None; }
  Some(node(pos.clone(), env.clone(), Type::Record(field_tys), Expr::StructCons(out)))
}

fn infer_field_select(env: &TyEnv, pos: &Position, target: &UntypedNode, field: &Rc<str>, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let ttarget = infer(env, target, errs)?;
  let expanded = match ttarget.ty.expand(&env.aliases) {
    Ok(t) => t,
    Err(e) => { err(errs, pos, e.to_string()); return None; }
  };
  let fields = match expanded {
    Type::Record(fields) => fields,
    _ => { err(errs, pos, "field selection target is not a record"); return None; }
  };
  let ty = match fields.iter().find(|f| &f.name == field) {
    Some(f) => f.ty.clone(),
    None => { err(errs, pos, format!("no field `{field}` in record type")); return None; }
  };
  Some(node(pos.clone(), env.clone(), ty, Expr::FieldSelect(ttarget, field.clone())))
}

fn infer_match(env: &TyEnv, pos: &Position, disc: &UntypedNode, cases: &[MatchCase<(), ()>], errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let tdisc = infer(env, disc, errs)?;
  let expanded = match tdisc.ty.expand(&env.aliases) {
    Ok(t) => t,
    Err(e) => { err(errs, pos, e.to_string()); return None; }
  };
  let union_cases = match expanded {
    Type::Union(cases) => cases,
    _ => { err(errs, pos, "match discriminant is not a union"); return None; }
  };
  let mut seen = std::collections::HashSet::with_capacity(cases.len());
  let mut out = Vec::with_capacity(cases.len());
  let mut join: Option<Type> = None;
  let mut ok = true;
  for c in cases {
    if !seen.insert(c.label.clone()) {
      err(errs, pos, format!("duplicate case label `{}`", c.label));
      ok = false;
      continue;
    }
    let case_ty = match union_cases.iter().find(|u| u.label == c.label) {
      Some(u) => u.ty.clone(),
      None => { err(errs, pos, format!("label `{}` is not a case of this union", c.label)); ok = false; continue; }
    };
    let inner = env.with_var(c.var.clone(), case_ty);
    let tbody = match infer(&inner, &c.body, errs) { Some(n) => n, None => { ok = false; continue; } };
    match &join {
      None => join = Some(tbody.ty.clone()),
      Some(j) if subtype(env, &tbody.ty, j) => {}
      Some(_) => { err(errs, pos, "match arms have incompatible result types"); ok = false; }
    }
    out.push(MatchCase { label: c.label.clone(), var: c.var.clone(), body: tbody });
  }
  if !ok { return None; }
  let ty = join.unwrap_or(Type::Unit);
  Some(node(pos.clone(), env.clone(), ty, Expr::Match(tdisc, out)))
}

fn infer_array(env: &TyEnv, pos: &Position, len: &UntypedNode, init: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let tlen = infer(env, len, errs);
  let tinit = infer(env, init, errs);
  let (tlen, tinit) = (tlen?, tinit?);
  if !subtype(env, &tlen.ty, &Type::Int) {
    err(errs, pos, "array length must be int");
    return None;
  }
  let ty = Type::array(tinit.ty.clone());
  Some(node(pos.clone(), env.clone(), ty, Expr::Array(tlen, tinit)))
}

fn infer_array_elem(env: &TyEnv, pos: &Position, a: &UntypedNode, i: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let ta = infer(env, a, errs);
  let ti = infer(env, i, errs);
  let (ta, ti) = (ta?, ti?);
  let expanded = match ta.ty.expand(&env.aliases) {
    Ok(t) => t,
    Err(e) => { err(errs, pos, e.to_string()); return None; }
  };
  let elem = match expanded {
    Type::Array(elem) => *elem,
    _ => { err(errs, pos, "indexed expression is not an array"); return None; }
  };
  if !subtype(env, &ti.ty, &Type::Int) {
    err(errs, pos, "array index must be int");
    return None;
  }
  Some(node(pos.clone(), env.clone(), elem, Expr::ArrayElem(ta, ti)))
}

fn infer_array_length(env: &TyEnv, pos: &Position, a: &UntypedNode, errs: &mut Vec<Diagnostic>) -> Option<TNode> {
  let ta = infer(env, a, errs)?;
  let expanded = match ta.ty.expand(&env.aliases) {
    Ok(t) => t,
    Err(e) => { err(errs, pos, e.to_string()); return None; }
  };
  if !matches!(expanded, Type::Array(_)) {
    err(errs, pos, "arrayLength requires an array");
    return None;
  }
  Some(node(pos.clone(), env.clone(), Type::Int, Expr::ArrayLength(ta)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tree::Expr as E;

  fn u(e: Expr<(), ()>) -> UntypedNode { Node::new(Position::dummy(), e) }
  fn var(n: &str) -> UntypedNode { u(E::Var(Rc::from(n))) }
  fn int(n: i32) -> UntypedNode { u(E::Int(n)) }
  fn ident_pt(n: &str) -> Pretype { Pretype::ident(Position::dummy(), n) }

  #[test]
  fn arithmetic_requires_matching_numeric_operands() {
    let e = u(E::Binary(BinOp::Add, int(1), u(E::Bool(true))));
    assert!(typecheck(&e).is_err());
  }

  #[test]
  fn literal_sequence_example_from_spec() {
    // let x = 2 + 3 * 4; x
    let mul = u(E::Binary(BinOp::Mul, int(3), int(4)));
    let add = u(E::Binary(BinOp::Add, int(2), mul));
    let e = u(E::Let(Rc::from("x"), add, var("x")));
    let t = typecheck(&e).unwrap();
    assert_eq!(t.ty, Type::Int);
  }

  #[test]
  fn assignment_to_immutable_field_is_rejected() {
    // let p: struct { immutable a: int; b: int } = struct { a = 1; b = 2 };
    // p.a <- 5
    let rec_pt = Pretype::record(Position::dummy(), [
      crate::pretype::RecordField { mutable: false, name: Rc::from("a"), ty: ident_pt("int") },
      crate::pretype::RecordField { mutable: true, name: Rc::from("b"), ty: ident_pt("int") },
    ]).unwrap();
    let cons = u(E::StructCons(smallvec::smallvec![
      StructField { mutable: false, name: Rc::from("a"), init: int(1) },
      StructField { mutable: true, name: Rc::from("b"), init: int(2) },
    ]));
    let assign_a = u(E::Assign(u(E::FieldSelect(var("p"), Rc::from("a"))), int(5)));
    let body = u(E::LetT(Rc::from("p"), rec_pt, cons, assign_a));
    assert!(typecheck(&body).is_err());
  }

  #[test]
  fn assignment_to_mutable_field_type_checks() {
    let rec_pt = Pretype::record(Position::dummy(), [
      crate::pretype::RecordField { mutable: false, name: Rc::from("a"), ty: ident_pt("int") },
      crate::pretype::RecordField { mutable: true, name: Rc::from("b"), ty: ident_pt("int") },
    ]).unwrap();
    let cons = u(E::StructCons(smallvec::smallvec![
      StructField { mutable: false, name: Rc::from("a"), init: int(1) },
      StructField { mutable: true, name: Rc::from("b"), init: int(2) },
    ]));
    let assign_b = u(E::Assign(u(E::FieldSelect(var("p"), Rc::from("b"))), int(5)));
    let result = u(E::Binary(BinOp::Add,
      u(E::FieldSelect(var("p"), Rc::from("a"))), u(E::FieldSelect(var("p"), Rc::from("b")))));
    let body = u(E::LetT(Rc::from("p"), rec_pt, cons, u(E::Seq(vec![assign_b, result]))));
    let t = typecheck(&body).unwrap();
    assert_eq!(t.ty, Type::Int);
  }

  #[test]
  fn trivial_self_recursive_alias_is_rejected() {
    let scope = u(E::Let(Rc::from("x"), int(0), var("x")));
    let e = u(E::TypeAlias(Rc::from("T"), ident_pt("T"), scope));
    let errs = typecheck(&e).unwrap_err();
    assert!(errs.iter().any(|d| d.message.contains("invalid recursive definition")));
  }

  #[test]
  fn recursive_union_alias_type_checks() {
    // type L = union { End: int; Next: L };
    // isEnd via match, applied to End{3}
    let l_pt = Pretype::union(Position::dummy(), [
      crate::pretype::UnionCase { label: Rc::from("End"), ty: ident_pt("int") },
      crate::pretype::UnionCase { label: Rc::from("Next"), ty: ident_pt("L") },
    ]).unwrap();
    let lam_body = u(E::Match(var("x"), vec![
      MatchCase { label: Rc::from("End"), var: Rc::from("_v"), body: u(E::Bool(true)) },
      MatchCase { label: Rc::from("Next"), var: Rc::from("_v"), body: u(E::Bool(false)) },
    ]));
    let lam = u(E::Lambda(smallvec::smallvec![(Rc::from("x"), ident_pt("L"))], lam_body));
    let app = u(E::App(var("isEnd"), vec![u(E::UnionCons(Rc::from("End"), int(3)))]));
    let assert_node = u(E::Assertion(app));
    let let_fn = u(E::Let(Rc::from("isEnd"), lam, assert_node));
    let e = u(E::TypeAlias(Rc::from("L"), l_pt, let_fn));
    let t = typecheck(&e);
    assert!(t.is_ok(), "{:?}", t.err());
  }

  #[test]
  fn width_subtyping_allows_extra_trailing_fields() {
    let wide = Type::Record(smallvec::smallvec![
      RecordField { mutable: false, name: Rc::from("a"), ty: Type::Int },
      RecordField { mutable: false, name: Rc::from("b"), ty: Type::Int },
    ]);
    let narrow = Type::Record(smallvec::smallvec![
      RecordField { mutable: false, name: Rc::from("a"), ty: Type::Int },
    ]);
    let env = TyEnv::empty();
    assert!(subtype(&env, &wide, &narrow));
    assert!(!subtype(&env, &narrow, &wide));
  }

  #[test]
  fn subtyping_is_reflexive_and_transitive_on_sample_types() {
    let env = TyEnv::empty();
    let a = Type::Int;
    let b = Type::Union(smallvec::smallvec![UnionCase { label: Rc::from("x"), ty: Type::Int }]);
    let c = Type::Union(smallvec::smallvec![
      UnionCase { label: Rc::from("x"), ty: Type::Int },
      UnionCase { label: Rc::from("y"), ty: Type::Bool },
    ]);
    assert!(subtype(&env, &a, &a));
    assert!(subtype(&env, &b, &c)); // fewer labels is a subtype of more labels
    assert!(subtype(&env, &b, &b));
  }
}
