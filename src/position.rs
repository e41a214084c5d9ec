//! Source positions carried on every tree and pretype node.
//!
//! A [`Position`] is immutable: file name plus a primary line/column and the
//! `(start, end)` span it covers. Nothing in this crate ever mutates a
//! position once built; new positions are built by passes that synthesize
//! nodes (e.g. the desugaring of `While`/`For` in the evaluator), which reuse
//! the position of the node they are standing in for.

use std::fmt;
use std::rc::Rc;

/// A single point in a source file, 1-based in both coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Point {
  /// 1-based line number.
  pub line: u32,
  /// 1-based column number.
  pub col: u32,
}

impl Point {
  #[must_use] pub fn new(line: u32, col: u32) -> Self { Self { line, col } }
}

impl fmt::Display for Point {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.line, self.col)
  }
}

/// A source position: the file it came from, and the span of text it covers.
///
/// This is the position slot carried on every [`crate::tree::Node`] and every
/// [`crate::pretype::Pretype`] node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Position {
  pub file: Rc<str>,
  pub start: Point,
  pub end: Point,
}

impl Position {
  #[must_use] pub fn new(file: Rc<str>, start: Point, end: Point) -> Self {
    Self { file, start, end }
  }

  /// A position with no useful span, for synthesized nodes and tests.
  #[must_use] pub fn dummy() -> Self {
    Self { file: Rc::from("<generated>"), start: Point::new(0, 0), end: Point::new(0, 0) }
  }
}

impl fmt::Display for Position {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:({}-{})", self.file, self.start, self.end)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_matches_line_col_span_format() {
    let p = Position::new(Rc::from("foo.hyg"), Point::new(1, 2), Point::new(1, 9));
    assert_eq!(p.to_string(), "foo.hyg:(1:2-1:9)");
  }
}
