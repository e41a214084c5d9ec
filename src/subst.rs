//! Capture-avoiding substitution and free/captured-variable analysis over
//! the tree (§4.1, C2).

use std::collections::HashSet;
use std::rc::Rc;
use crate::tree::{Expr, Node};

/// `subst(e, x, v)`: produce a new tree with every free occurrence of `x`
/// replaced by `v`, respecting the shadowing introduced by `Let*`, `Lambda`,
/// `Match` binders, and the `For` iteration variable.
pub fn subst<E: Clone, T: Clone>(e: &Node<E, T>, x: &str, v: &Node<E, T>) -> Node<E, T> {
  macro_rules! s { ($n:expr) => { subst($n, x, v) } }
  let expr = match &*e.expr {
    Expr::Var(name) if &**name == x => return v.clone(),
    Expr::Var(name) => Expr::Var(name.clone()),

    Expr::Unit => Expr::Unit,
    Expr::Bool(b) => Expr::Bool(*b),
    Expr::Int(n) => Expr::Int(*n),
    Expr::Float(n) => Expr::Float(*n),
    Expr::Str(s) => Expr::Str(s.clone()),

    Expr::Binary(op, l, r) => Expr::Binary(*op, s!(l), s!(r)),
    Expr::CompoundAssign(op, l, r) => Expr::CompoundAssign(*op, s!(l), s!(r)),
    Expr::Unary(op, a) => Expr::Unary(*op, s!(a)),

    Expr::ReadInt => Expr::ReadInt,
    Expr::ReadFloat => Expr::ReadFloat,
    Expr::Print(a) => Expr::Print(s!(a)),
    Expr::PrintLn(a) => Expr::PrintLn(s!(a)),
    Expr::Syscall(n, args) => Expr::Syscall(*n, args.iter().map(|a| s!(a)).collect()),

    Expr::PreIncr(name) => Expr::PreIncr(name.clone()),
    Expr::PostIncr(name) => Expr::PostIncr(name.clone()),

    Expr::If(c, t, f) => Expr::If(s!(c), s!(t), s!(f)),
    Expr::Seq(es) => Expr::Seq(es.iter().map(|a| s!(a)).collect()),

    Expr::TypeAlias(name, pt, scope) => Expr::TypeAlias(name.clone(), pt.clone(), s!(scope)),
    Expr::Ascription(a, pt) => Expr::Ascription(s!(a), pt.clone()),
    Expr::Assertion(a) => Expr::Assertion(s!(a)),
    Expr::Copy(a) => Expr::Copy(s!(a)),

    Expr::Let(name, init, scope) => {
      let init = s!(init);
      let scope = if &**name == x { scope.clone() } else { s!(scope) };
      Expr::Let(name.clone(), init, scope)
    }
    Expr::LetT(name, pt, init, scope) => {
      let init = s!(init);
      let scope = if &**name == x { scope.clone() } else { s!(scope) };
      Expr::LetT(name.clone(), pt.clone(), init, scope)
    }
    Expr::LetMut(name, pt, init, scope) => {
      let init = s!(init);
      let scope = if &**name == x { scope.clone() } else { s!(scope) };
      Expr::LetMut(name.clone(), pt.clone(), init, scope)
    }

    Expr::Assign(target, rhs) => Expr::Assign(s!(target), s!(rhs)),
    Expr::While(c, body) => Expr::While(s!(c), s!(body)),
    Expr::For { var, init, cond, step, body } => {
      let init = s!(init);
      if &**var == x {
        Expr::For { var: var.clone(), init, cond: cond.clone(), step: step.clone(), body: body.clone() }
      } else {
        Expr::For { var: var.clone(), init, cond: s!(cond), step: s!(step), body: s!(body) }
      }
    }

    Expr::Lambda(params, body) => {
      if params.iter().any(|(n, _)| &**n == x) {
        Expr::Lambda(params.clone(), body.clone())
      } else {
        Expr::Lambda(params.clone(), s!(body))
      }
    }
    Expr::App(f, args) => Expr::App(s!(f), args.iter().map(|a| s!(a)).collect()),

    Expr::StructCons(fields) => Expr::StructCons(fields.iter().map(|f| crate::tree::StructField {
      mutable: f.mutable, name: f.name.clone(), init: s!(&f.init),
    }).collect()),
    Expr::FieldSelect(a, field) => Expr::FieldSelect(s!(a), field.clone()),

    Expr::UnionCons(label, a) => Expr::UnionCons(label.clone(), s!(a)),
    Expr::Match(disc, cases) => Expr::Match(s!(disc), cases.iter().map(|c| {
      crate::tree::MatchCase {
        label: c.label.clone(), var: c.var.clone(),
        body: if &*c.var == x { c.body.clone() } else { s!(&c.body) },
      }
    }).collect()),

    Expr::Array(len, init) => Expr::Array(s!(len), s!(init)),
    Expr::ArrayElem(a, i) => Expr::ArrayElem(s!(a), s!(i)),
    Expr::ArrayLength(a) => Expr::ArrayLength(s!(a)),

    Expr::Pointer(addr) => Expr::Pointer(*addr),
  };
  e.with_expr(expr)
}

/// Simultaneously substitute several name/value pairs (used by function
/// application, §4.4: "body is obtained by simultaneously substituting
/// argument names with their value nodes"). Substitutions do not see each
/// other's replacements.
pub fn subst_all<E: Clone, T: Clone>(e: &Node<E, T>, bindings: &[(Rc<str>, Node<E, T>)]) -> Node<E, T> {
  // A simultaneous substitution over a finite binder set is equivalent to
  // sequential substitution with freshly renamed placeholders; since our
  // binder names are already distinct (arity-checked at call sites) and no
  // two argument names can collide in a single argument list, sequential
  // substitution in order gives the same result here.
  bindings.iter().fold(e.clone(), |acc, (name, val)| subst(&acc, name, val))
}

/// The free variables of a tree: the scope-minus-binders union over the
/// whole tree (§4.1 `freeVars`).
#[must_use] pub fn free_vars<E, T>(e: &Node<E, T>) -> HashSet<Rc<str>> {
  let mut out = HashSet::new();
  collect_free_vars(e, &mut out);
  out
}

fn collect_free_vars<E, T>(e: &Node<E, T>, out: &mut HashSet<Rc<str>>) {
  match &*e.expr {
    Expr::Var(name) => { out.insert(name.clone()); }
    Expr::PreIncr(name) | Expr::PostIncr(name) => { out.insert(name.clone()); }

    Expr::Let(name, init, scope) | Expr::LetT(name, _, init, scope) | Expr::LetMut(name, _, init, scope) => {
      collect_free_vars(init, out);
      let mut sub = HashSet::new();
      collect_free_vars(scope, &mut sub);
      sub.remove(name.as_ref());
      out.extend(sub);
    }
    Expr::For { var, init, cond, step, body } => {
      collect_free_vars(init, out);
      let mut sub = HashSet::new();
      collect_free_vars(cond, &mut sub);
      collect_free_vars(step, &mut sub);
      collect_free_vars(body, &mut sub);
      sub.remove(var.as_ref());
      out.extend(sub);
    }
    Expr::Lambda(params, body) => {
      let mut sub = HashSet::new();
      collect_free_vars(body, &mut sub);
      for (n, _) in params { sub.remove(n.as_ref()); }
      out.extend(sub);
    }
    Expr::Match(disc, cases) => {
      collect_free_vars(disc, out);
      for c in cases {
        let mut sub = HashSet::new();
        collect_free_vars(&c.body, &mut sub);
        sub.remove(c.var.as_ref());
        out.extend(sub);
      }
    }

    Expr::Unit | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) |
    Expr::ReadInt | Expr::ReadFloat | Expr::Pointer(_) => {}

    Expr::Binary(_, l, r) | Expr::CompoundAssign(_, l, r) | Expr::Assign(l, r) |
    Expr::While(l, r) | Expr::Array(l, r) | Expr::ArrayElem(l, r) => {
      collect_free_vars(l, out); collect_free_vars(r, out);
    }
    Expr::Unary(_, a) | Expr::Print(a) | Expr::PrintLn(a) | Expr::Ascription(a, _) |
    Expr::Assertion(a) | Expr::Copy(a) | Expr::FieldSelect(a, _) | Expr::UnionCons(_, a) |
    Expr::ArrayLength(a) => collect_free_vars(a, out),
    Expr::Syscall(_, args) => for a in args { collect_free_vars(a, out); },
    Expr::If(c, t, f) => { collect_free_vars(c, out); collect_free_vars(t, out); collect_free_vars(f, out); }
    Expr::Seq(es) => for a in es { collect_free_vars(a, out); },
    Expr::TypeAlias(_, _, scope) => collect_free_vars(scope, out),
    Expr::App(f, args) => { collect_free_vars(f, out); for a in args { collect_free_vars(a, out); } }
    Expr::StructCons(fields) => for f in fields { collect_free_vars(&f.init, out); },
  }
}

/// The variables captured by a tree (§4.1 `capturedVars`): the free
/// variables of the tree, plus — because a lambda is itself a value, so
/// producing one captures its environment at that point — the free
/// variables of every `Lambda` subterm found anywhere within it.
#[must_use] pub fn captured_vars<E: Clone, T: Clone>(e: &Node<E, T>) -> HashSet<Rc<str>> {
  let mut out = free_vars(e);
  collect_nested_lambda_captures(e, &mut out);
  out
}

fn collect_nested_lambda_captures<E: Clone, T: Clone>(e: &Node<E, T>, out: &mut HashSet<Rc<str>>) {
  if let Expr::Lambda(_, body) = &*e.expr {
    out.extend(free_vars(e));
    collect_nested_lambda_captures(body, out);
    return;
  }
  for_each_child(e, |c| collect_nested_lambda_captures(c, out));
}

fn for_each_child<E: Clone, T: Clone>(e: &Node<E, T>, mut f: impl FnMut(&Node<E, T>)) {
  match &*e.expr {
    Expr::Unit | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Var(_) |
    Expr::ReadInt | Expr::ReadFloat | Expr::Pointer(_) | Expr::PreIncr(_) | Expr::PostIncr(_) => {}
    Expr::Binary(_, l, r) | Expr::CompoundAssign(_, l, r) | Expr::Assign(l, r) |
    Expr::While(l, r) | Expr::Array(l, r) | Expr::ArrayElem(l, r) => { f(l); f(r); }
    Expr::Unary(_, a) | Expr::Print(a) | Expr::PrintLn(a) | Expr::Ascription(a, _) |
    Expr::Assertion(a) | Expr::Copy(a) | Expr::FieldSelect(a, _) | Expr::UnionCons(_, a) |
    Expr::ArrayLength(a) => f(a),
    Expr::Syscall(_, args) => for a in args { f(a); },
    Expr::If(c, t, e2) => { f(c); f(t); f(e2); }
    Expr::Seq(es) => for a in es { f(a); },
    Expr::TypeAlias(_, _, scope) => f(scope),
    Expr::Let(_, init, scope) | Expr::LetT(_, _, init, scope) | Expr::LetMut(_, _, init, scope) =>
      { f(init); f(scope); }
    Expr::For { init, cond, step, body, .. } => { f(init); f(cond); f(step); f(body); }
    Expr::Lambda(_, body) => f(body),
    Expr::App(fun, args) => { f(fun); for a in args { f(a); } }
    Expr::StructCons(fields) => for field in fields { f(&field.init); },
    Expr::Match(disc, cases) => { f(disc); for c in cases { f(&c.body); } }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::position::Position;
  use crate::tree::{Expr, Node};

  fn var(name: &str) -> Node<(), ()> { Node::new(Position::dummy(), Expr::Var(Rc::from(name))) }
  fn int(n: i32) -> Node<(), ()> { Node::new(Position::dummy(), Expr::Int(n)) }

  #[test]
  fn subst_replaces_free_occurrence() {
    let e = Node::new(Position::dummy(), Expr::Binary(crate::tree::BinOp::Add, var("x"), int(1)));
    let out = subst(&e, "x", &int(41));
    if let Expr::Binary(_, l, _) = &*out.expr {
      assert!(matches!(&*l.expr, Expr::Int(41)));
    } else { panic!("expected Binary") }
  }

  #[test]
  fn subst_respects_let_shadowing() {
    // let x = 1; x   -- substituting x in this whole term must not touch the
    // inner bound occurrence.
    let e = Node::new(Position::dummy(), Expr::Let(Rc::from("x"), int(1), var("x")));
    let out = subst(&e, "x", &int(99));
    if let Expr::Let(_, init, scope) = &*out.expr {
      assert!(matches!(&*init.expr, Expr::Int(1)));
      assert!(matches!(&*scope.expr, Expr::Var(n) if &**n == "x"));
    } else { panic!("expected Let") }
  }

  #[test]
  fn free_vars_excludes_lambda_parameters() {
    let body = Node::new(Position::dummy(),
      Expr::Binary(crate::tree::BinOp::Add, var("x"), var("y")));
    let lam = Node::new(Position::dummy(),
      Expr::Lambda(smallvec::smallvec![(Rc::from("x"), crate::pretype::Pretype::ident(Position::dummy(), "int"))], body));
    let fv = free_vars(&lam);
    assert!(!fv.contains("x"));
    assert!(fv.contains("y"));
  }

  #[test]
  fn captured_vars_includes_nested_lambda_free_vars() {
    // let y = 1; (lambda (x: int) -> x + y)
    let body = Node::new(Position::dummy(),
      Expr::Binary(crate::tree::BinOp::Add, var("x"), var("y")));
    let lam = Node::new(Position::dummy(),
      Expr::Lambda(smallvec::smallvec![(Rc::from("x"), crate::pretype::Pretype::ident(Position::dummy(), "int"))], body));
    let outer = Node::new(Position::dummy(), Expr::Let(Rc::from("y"), int(1), lam));
    let cv = captured_vars(&outer);
    assert!(cv.contains("y"));
  }
}
