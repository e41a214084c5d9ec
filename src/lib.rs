//! `hyggec`: a didactic compiler and reference evaluator for the Hygge
//! expression language.
//!
//! The crate is organized as a pipeline of independent passes, each in its
//! own module, composed by a caller rather than by this crate (there is no
//! CLI or parser here; see `SPEC_FULL.md` for the external interfaces a
//! command-line front end would wire up):
//!
//! 1. [`pretype`] / [`tree`] — the surface syntax tree, generic over an
//!    `E` (per-node environment) and `T` (per-node type) annotation pair.
//! 2. [`typecheck`] — bidirectional type checking, turning an
//!    [`tree::UntypedNode`] into a [`tree::TypedNode`] or a list of
//!    [`diagnostic::Diagnostic`]s.
//! 3. [`eval`] — a small-step reference evaluator over a typed tree, for
//!    testing the checker and the generator against the same semantics.
//! 4. [`codegen`] — a naive, target-register-discipline RISC-V code
//!    generator, emitting an [`asm::Asm`] document.
//!
//! [`subst`], [`types`], [`syscalls`], [`position`] and [`diagnostic`] are
//! shared infrastructure used by more than one pass.

pub mod asm;
pub mod codegen;
pub mod diagnostic;
pub mod eval;
pub mod position;
pub mod pretype;
pub mod subst;
pub mod syscalls;
pub mod tree;
pub mod typecheck;
pub mod types;

pub use diagnostic::{CodegenBug, Diagnostic, StuckReason};
pub use tree::{TypedNode, UntypedNode};
pub use types::Type;
