//! The tree representation shared by every pass: untyped input, typed
//! output, and (by reusing the typed shape) the evaluator's runtime terms
//! (§3 "Tree node", "Expression variants").
//!
//! The tree is parameterised by two slots, `E` (environment) and `T` (type):
//! the untyped tree instantiates both with `()`; the typed tree instantiates
//! `E` with [`crate::types::TyEnv`] and `T` with [`crate::types::Type`]. Every
//! node carries its own snapshot of `E` so that later passes (the code
//! generator, a pretty printer) can inspect scope-local bindings without
//! threading an environment stack alongside the tree.

use std::rc::Rc;
use smallvec::SmallVec;
use crate::position::Position;
use crate::pretype::Pretype;

/// The binary operators of §3. Grouped into one enum (rather than one
/// `Expr` variant per operator) the way the teacher crate represents binary
/// operations (`ExprKind::Binop(op, lhs, rhs)`); nothing about the set of
/// supported operators changes relative to the distilled list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
  Add, Sub, Mul, Div, Rem,
  BAnd, BOr, BXor, BSL, BSR,
  And, Or, Xor,
  ScAnd, ScOr,
  Eq, Less, LessEq, Greater, GreaterEq,
}

impl BinOp {
  #[must_use] pub fn is_arith(self) -> bool {
    matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem)
  }
  #[must_use] pub fn is_bitwise(self) -> bool {
    matches!(self, BinOp::BAnd | BinOp::BOr | BinOp::BXor | BinOp::BSL | BinOp::BSR)
  }
  #[must_use] pub fn is_strict_logical(self) -> bool {
    matches!(self, BinOp::And | BinOp::Or | BinOp::Xor)
  }
  #[must_use] pub fn is_short_circuit(self) -> bool {
    matches!(self, BinOp::ScAnd | BinOp::ScOr)
  }
  #[must_use] pub fn is_relational(self) -> bool {
    matches!(self, BinOp::Eq | BinOp::Less | BinOp::LessEq | BinOp::Greater | BinOp::GreaterEq)
  }
}

/// The unary operators of §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp { Neg, Not, BNot, Sqrt }

/// A field of a `StructCons` literal: `[mutable] name = init`.
#[derive(Clone, Debug)]
pub struct StructField<E, T> {
  pub mutable: bool,
  pub name: Rc<str>,
  pub init: Node<E, T>,
}

/// One arm of a `Match`: `label { var } -> body`.
#[derive(Clone, Debug)]
pub struct MatchCase<E, T> {
  pub label: Rc<str>,
  pub var: Rc<str>,
  pub body: Node<E, T>,
}

/// Every expression form in the language (§3 "Expression variants").
#[derive(Clone, Debug)]
pub enum Expr<E, T> {
  Unit,
  Bool(bool),
  Int(i32),
  Float(f32),
  Str(Rc<str>),
  Var(Rc<str>),

  Binary(BinOp, Node<E, T>, Node<E, T>),
  /// `lhs op= rhs`; desugared to `Assign(lhs, Binary(op, lhs, rhs))` before
  /// evaluation (§4.4) but kept distinct in the tree so the checker can
  /// validate the assignment target once.
  CompoundAssign(BinOp, Node<E, T>, Node<E, T>),
  Unary(UnOp, Node<E, T>),

  ReadInt,
  ReadFloat,
  Print(Node<E, T>),
  PrintLn(Node<E, T>),
  Syscall(i32, SmallVec<[Node<E, T>; 4]>),

  /// Pre-increment, `++x`: returns the value of `x` *after* the update.
  PreIncr(Rc<str>),
  /// Post-increment, `x++`: returns the value of `x` *before* the update.
  PostIncr(Rc<str>),

  If(Node<E, T>, Node<E, T>, Node<E, T>),
  Seq(Vec<Node<E, T>>),

  /// `type name = pretype; scope`
  TypeAlias(Rc<str>, Pretype, Node<E, T>),
  /// `expr : pretype`
  Ascription(Node<E, T>, Pretype),
  Assertion(Node<E, T>),
  /// Structural deep-copy.
  Copy(Node<E, T>),

  /// `let name = init; scope` (inferred-type immutable).
  Let(Rc<str>, Node<E, T>, Node<E, T>),
  /// `let name: pretype = init; scope` (annotated immutable).
  LetT(Rc<str>, Pretype, Node<E, T>, Node<E, T>),
  /// `let mutable name[: pretype] = init; scope`.
  LetMut(Rc<str>, Option<Pretype>, Node<E, T>, Node<E, T>),

  Assign(Node<E, T>, Node<E, T>),
  While(Node<E, T>, Node<E, T>),
  /// `for var = init; cond; step do body` (§4.4 desugars this to
  /// `LetMut(var, init, While(cond, Seq(body, step)))`).
  For {
    var: Rc<str>,
    init: Node<E, T>,
    cond: Node<E, T>,
    step: Node<E, T>,
    body: Node<E, T>,
  },

  Lambda(SmallVec<[(Rc<str>, Pretype); 4]>, Node<E, T>),
  App(Node<E, T>, Vec<Node<E, T>>),

  StructCons(SmallVec<[StructField<E, T>; 4]>),
  FieldSelect(Node<E, T>, Rc<str>),

  UnionCons(Rc<str>, Node<E, T>),
  Match(Node<E, T>, Vec<MatchCase<E, T>>),

  Array(Node<E, T>, Node<E, T>),
  ArrayElem(Node<E, T>, Node<E, T>),
  ArrayLength(Node<E, T>),

  /// A runtime-only heap base address. Never appears in parsed source;
  /// rejected by both the type checker and the code generator (§3).
  Pointer(u64),
}

/// A tuple of `{position, expression, typing environment slot, type slot}`
/// (§3 "Tree node"). `E` and `T` are `()` for the untyped tree produced by
/// the (external) parser, and [`crate::types::TyEnv`]/[`crate::types::Type`]
/// for the tree produced by the type checker.
#[derive(Clone, Debug)]
pub struct Node<E, T> {
  pub pos: Position,
  pub expr: Rc<Expr<E, T>>,
  pub env: E,
  pub ty: T,
}

/// The tree shape the (external) parser produces.
pub type UntypedNode = Node<(), ()>;
/// The tree shape the type checker produces (§4.3).
pub type TypedNode = Node<crate::types::TyEnv, crate::types::Type>;

impl UntypedNode {
  #[must_use] pub fn new(pos: Position, expr: Expr<(), ()>) -> Self {
    Node { pos, expr: Rc::new(expr), env: (), ty: () }
  }
}

impl<E: Clone, T: Clone> Node<E, T> {
  /// Build a node that shares this node's position, environment and type
  /// slots but replaces the expression — used by passes (substitution,
  /// desugaring) that rewrite a subtree in place without re-deriving its
  /// annotations.
  #[must_use] pub fn with_expr(&self, expr: Expr<E, T>) -> Self {
    Node { pos: self.pos.clone(), expr: Rc::new(expr), env: self.env.clone(), ty: self.ty.clone() }
  }
}

impl TypedNode {
  /// `true` for literals, lambdas, and heap pointers — the value forms of
  /// §4.4 ("A node is a *value* iff it is a literal, a lambda, or a heap
  /// pointer").
  #[must_use] pub fn is_value(&self) -> bool {
    matches!(&*self.expr,
      Expr::Unit | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::Str(_) |
      Expr::Lambda(..) | Expr::Pointer(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn dummy() -> Position { Position::dummy() }

  #[test]
  fn literals_are_values() {
    let n: TypedNode = Node {
      pos: dummy(), expr: Rc::new(Expr::Int(3)),
      env: crate::types::TyEnv::empty(), ty: crate::types::Type::Int,
    };
    assert!(n.is_value());
  }

  #[test]
  fn application_is_not_a_value() {
    let f: TypedNode = Node {
      pos: dummy(), expr: Rc::new(Expr::Var(Rc::from("f"))),
      env: crate::types::TyEnv::empty(), ty: crate::types::Type::Int,
    };
    let n: TypedNode = Node {
      pos: dummy(), expr: Rc::new(Expr::App(f, vec![])),
      env: crate::types::TyEnv::empty(), ty: crate::types::Type::Int,
    };
    assert!(!n.is_value());
  }
}
