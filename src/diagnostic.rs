//! Shared diagnostic types (§7 "Error taxonomy"). The type checker
//! accumulates recoverable [`Diagnostic`]s across sibling subtrees; the
//! evaluator reports a [`StuckReason`] on the first stuck term; the code
//! generator treats any assumption violation as an internal bug and aborts
//! via [`CodegenBug`], the one place in this crate that implements
//! `std::error::Error` (everywhere else, "internal bug" is a `panic!`, per
//! `SPEC_FULL.md` §1).

use crate::position::Position;

/// A single type-checking diagnostic: a position and a message (§4.3
/// "Public contract").
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
  pub pos: Position,
  pub message: String,
}

impl Diagnostic {
  #[must_use] pub fn new(pos: Position, message: impl Into<String>) -> Self {
    Self { pos, message: message.into() }
  }
}

impl std::fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}: {}", self.pos, self.message)
  }
}

/// Why the evaluator got stuck (§7.5 "Runtime stuck").
#[derive(Clone, Debug, PartialEq)]
pub enum StuckReason {
  /// `assert` evaluated its argument to `false`.
  AssertionFailed,
  /// Assignment to a target that is not a mutable variable, a mutable
  /// field, or an array element.
  AssignToImmutable,
  /// An array index was out of `[0, length)`.
  ArrayOutOfBounds { index: i32, length: i32 },
  /// A pointer was used as a record where an array was expected, or vice
  /// versa.
  DescriptorMismatch,
  /// `Syscall` named a number with no entry in the registry.
  UnhandledSyscall(i32),
  /// A term was neither a value nor reducible by any rule.
  NoApplicableRule(&'static str),
}

impl std::fmt::Display for StuckReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StuckReason::AssertionFailed => write!(f, "assertion failed"),
      StuckReason::AssignToImmutable => write!(f, "assignment to a non-mutable place"),
      StuckReason::ArrayOutOfBounds { index, length } =>
        write!(f, "array index {index} out of bounds for length {length}"),
      StuckReason::DescriptorMismatch => write!(f, "heap descriptor mismatch (struct vs array)"),
      StuckReason::UnhandledSyscall(n) => write!(f, "unhandled syscall {n}"),
      StuckReason::NoApplicableRule(what) => write!(f, "stuck: no applicable reduction rule for {what}"),
    }
  }
}

/// The code generator's assumption about a well-typed input was violated.
/// Per §4.6/§7.6 this is always a bug in the pipeline (a type-incorrect
/// tree reached the generator), never a user-facing condition; it is the
/// one error type in this crate that implements [`std::error::Error`] so a
/// caller embedding this crate can propagate it with `?`.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("codegen bug at {pos}: {construct} violated a type-correctness assumption: {detail}")]
pub struct CodegenBug {
  pub pos: Position,
  pub construct: &'static str,
  pub detail: String,
}

impl CodegenBug {
  #[must_use] pub fn new(pos: Position, construct: &'static str, detail: impl Into<String>) -> Self {
    Self { pos, construct, detail: detail.into() }
  }
}
