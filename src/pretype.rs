//! Syntactic types as written by the user, prior to resolution by the
//! type checker (§4.3 "Pretype resolution").

use std::rc::Rc;
use smallvec::SmallVec;
use thiserror::Error;
use crate::position::Position;

/// A field of a `struct` pretype: its declared mutability, name, and the
/// pretype of its contents.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordField {
  pub mutable: bool,
  pub name: Rc<str>,
  pub ty: Pretype,
}

/// A single case of a labelled-union pretype.
#[derive(Clone, Debug, PartialEq)]
pub struct UnionCase {
  pub label: Rc<str>,
  pub ty: Pretype,
}

/// The shape of a pretype, independent of where it was written.
#[derive(Clone, Debug, PartialEq)]
pub enum PretypeKind {
  /// A bare identifier: either a primitive type name or an alias reference.
  Ident(Rc<str>),
  /// `(arg, ...) -> ret`
  Fun(Vec<Pretype>, Box<Pretype>),
  /// `struct { [mutable] name: ty; ... }`, fields in declaration order.
  Record(SmallVec<[RecordField; 4]>),
  /// `union { label: ty; ... }`, cases in declaration order.
  Union(SmallVec<[UnionCase; 4]>),
  /// `array(ty)`, the pretype of an array's elements.
  Array(Box<Pretype>),
}

/// A type as written in source (§3 "Pretype"), carrying the position it was
/// written at, needed by the checker to attach diagnostics when resolution
/// fails (§7 "diagnostics printed ... with spans").
#[derive(Clone, Debug, PartialEq)]
pub struct Pretype {
  pub pos: Position,
  pub kind: PretypeKind,
}

/// A pretype was malformed independent of any typing environment: it named
/// the same record field or union label twice.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PretypeConstructError {
  #[error("duplicate field name `{0}` in struct pretype")]
  DuplicateField(Rc<str>),
  #[error("duplicate case label `{0}` in union pretype")]
  DuplicateLabel(Rc<str>),
}

impl Pretype {
  #[must_use] pub fn new(pos: Position, kind: PretypeKind) -> Self { Self { pos, kind } }

  #[must_use] pub fn ident(pos: Position, name: impl Into<Rc<str>>) -> Self {
    Self::new(pos, PretypeKind::Ident(name.into()))
  }

  /// Build a record pretype, rejecting duplicate field names as required by
  /// §3 ("Field names within a record ... must be unique at construction").
  pub fn record(
    pos: Position,
    fields: impl IntoIterator<Item = RecordField>,
  ) -> Result<Self, PretypeConstructError> {
    let fields: SmallVec<[RecordField; 4]> = fields.into_iter().collect();
    let mut seen = std::collections::HashSet::with_capacity(fields.len());
    for f in &fields {
      if !seen.insert(f.name.clone()) {
        return Err(PretypeConstructError::DuplicateField(f.name.clone()));
      }
    }
    Ok(Self::new(pos, PretypeKind::Record(fields)))
  }

  /// Build a union pretype, rejecting duplicate case labels.
  pub fn union(
    pos: Position,
    cases: impl IntoIterator<Item = UnionCase>,
  ) -> Result<Self, PretypeConstructError> {
    let cases: SmallVec<[UnionCase; 4]> = cases.into_iter().collect();
    let mut seen = std::collections::HashSet::with_capacity(cases.len());
    for c in &cases {
      if !seen.insert(c.label.clone()) {
        return Err(PretypeConstructError::DuplicateLabel(c.label.clone()));
      }
    }
    Ok(Self::new(pos, PretypeKind::Union(cases)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn field(mutable: bool, name: &str, ty: Pretype) -> RecordField {
    RecordField { mutable, name: Rc::from(name), ty }
  }

  fn ident(name: &str) -> Pretype { Pretype::ident(Position::dummy(), name) }

  #[test]
  fn record_rejects_duplicate_field_names() {
    let err = Pretype::record(Position::dummy(), [
      field(false, "a", ident("int")),
      field(true, "a", ident("int")),
    ]).unwrap_err();
    assert_eq!(err, PretypeConstructError::DuplicateField(Rc::from("a")));
  }

  #[test]
  fn union_rejects_duplicate_labels() {
    let case = |l: &str| UnionCase { label: Rc::from(l), ty: ident("int") };
    let err = Pretype::union(Position::dummy(), [case("End"), case("Next"), case("End")]).unwrap_err();
    assert_eq!(err, PretypeConstructError::DuplicateLabel(Rc::from("End")));
  }

  #[test]
  fn well_formed_record_is_accepted() {
    let r = Pretype::record(Position::dummy(), [
      field(false, "a", ident("int")),
      field(true, "b", ident("int")),
    ]).unwrap();
    assert!(matches!(r.kind, PretypeKind::Record(fs) if fs.len() == 2));
  }
}
