//! The syscall registry (§4.2, C5): a static table mapping numeric syscalls
//! to argument/return signatures, consulted in lockstep by the type checker
//! and the code generator.
//!
//! Modelled on the `make_prims!` macro in the teacher crate's
//! `types/entity.rs`, which builds a closed enum plus `from_str`/`as_symbol`
//! lookup tables from one declarative list; here the lookup key is a syscall
//! number rather than a keyword string.

use crate::types::Type;

/// One RARS/RISC-V syscall argument or return slot kind. Only the
/// primitive types that can ever cross the syscall boundary are
/// representable (syscalls never take or return a function, record, union,
/// or array).
macro_rules! syscall_table {
  ($($(#[$doc:meta])* $name:ident = $num:expr, ($($arg:expr),*) -> $ret:expr;)*) => {
    /// A statically known syscall signature.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    #[allow(non_camel_case_types)]
    pub enum Syscall { $($(#[$doc])* $name),* }

    impl Syscall {
      /// Every syscall defined by this table, in declaration order.
      pub const ALL: &'static [Syscall] = &[$(Syscall::$name),*];

      /// The numeric syscall code passed in `a7`.
      #[must_use] pub fn number(self) -> i32 { match self { $(Syscall::$name => $num,)* } }

      /// The argument types, in the order they are loaded into `a0.. `/`fa0..`.
      #[must_use] pub fn args(self) -> &'static [Type] { match self { $(Syscall::$name => &[$($arg),*],)* } }

      /// The type of the value returned in `a0`/`fa0`, or [`Type::Unit`] if
      /// the syscall returns nothing.
      #[must_use] pub fn ret(self) -> Type { match self { $(Syscall::$name => $ret,)* } }

      /// A human-readable name for this syscall (§4.2).
      #[must_use] pub fn name(self) -> &'static str { match self { $(Syscall::$name => stringify!($name),)* } }

      /// Look up a syscall by its numeric code.
      #[must_use] pub fn from_number(n: i32) -> Option<Syscall> {
        match n { $($num => Some(Syscall::$name),)* _ => None }
      }
    }
  }
}

syscall_table! {
  /// `(1)` print the integer argument.
  PrintInt = 1, (Type::Int) -> Type::Unit;
  /// `(2)` print the float argument.
  PrintFloat = 2, (Type::Float) -> Type::Unit;
  /// `(4)` print the string argument.
  PrintString = 4, (Type::String) -> Type::Unit;
  /// `(5)` read an integer from stdin.
  ReadInt = 5, () -> Type::Int;
  /// `(6)` read a float from stdin.
  ReadFloat = 6, () -> Type::Float;
  /// `(9)` request `n` bytes of heap from the simulator; the only allocator
  /// this backend uses (§4.6).
  Sbrk = 9, (Type::Int) -> Type::Int;
  /// `(10)` terminate the program with exit code 0.
  Exit = 10, () -> Type::Unit;
  /// `(11)` print the single character argument.
  PrintChar = 11, (Type::Int) -> Type::Unit;
  /// `(17)` RARS extension: terminate with the given exit code (also see
  /// `Exit2` at 93, which this backend actually emits for assertion failure).
  RarsExit2Legacy = 17, (Type::Int) -> Type::Unit;
  /// `(30)` RARS extension: current system time, low 32 bits.
  TimeLow = 30, () -> Type::Int;
  /// `(31)` RARS extension: current system time, high 32 bits.
  TimeHigh = 31, () -> Type::Int;
  /// `(32)` RARS extension: sleep for the given number of milliseconds.
  Sleep = 32, (Type::Int) -> Type::Unit;
  /// `(33)` RARS extension: print the integer argument in hexadecimal.
  PrintIntHex = 33, (Type::Int) -> Type::Unit;
  /// `(34)` RARS extension: print the integer argument in binary.
  PrintIntBinary = 34, (Type::Int) -> Type::Unit;
  /// `(35)` RARS extension: print the integer argument as unsigned.
  PrintIntUnsigned = 35, (Type::Int) -> Type::Unit;
  /// `(36)` RARS extension: print a double-precision float (unused by this
  /// single-precision backend, kept for table completeness).
  PrintDouble = 36, (Type::Float) -> Type::Unit;
  /// `(40)` RARS extension: seed the pseudo-random generator.
  RandSeed = 40, (Type::Int, Type::Int) -> Type::Unit;
  /// `(41)` RARS extension: a random integer.
  RandInt = 41, (Type::Int) -> Type::Int;
  /// `(42)` RARS extension: a random integer in a bounded range.
  RandIntRange = 42, (Type::Int, Type::Int) -> Type::Int;
  /// `(43)` RARS extension: a random float in `[0, 1)`.
  RandFloat = 43, (Type::Int) -> Type::Float;
  /// `(44)` RARS extension: a random double in `[0, 1)` (kept for table
  /// completeness; truncated to `Float` by this backend).
  RandDouble = 44, (Type::Int) -> Type::Float;
  /// `(50)` RARS extension: confirmation dialog, returns 0/1/2.
  ConfirmDialog = 50, (Type::String) -> Type::Int;
  /// `(51)` RARS extension: integer input dialog.
  InputDialogInt = 51, (Type::String) -> Type::Int;
  /// `(52)` RARS extension: float input dialog.
  InputDialogFloat = 52, (Type::String) -> Type::Float;
  /// `(53)` RARS extension: double input dialog (truncated to `Float`).
  InputDialogDouble = 53, (Type::String) -> Type::Float;
  /// `(54)` RARS extension: string input dialog.
  InputDialogString = 54, (Type::String, Type::Int) -> Type::String;
  /// `(55)` RARS extension: plain message dialog.
  MessageDialog = 55, (Type::String, Type::Int) -> Type::Unit;
  /// `(56)` RARS extension: message dialog with an integer payload.
  MessageDialogInt = 56, (Type::String, Type::Int) -> Type::Unit;
  /// `(57)` RARS extension: message dialog with a float payload.
  MessageDialogFloat = 57, (Type::String, Type::Float) -> Type::Unit;
  /// `(58)` RARS extension: message dialog with a double payload (truncated
  /// to `Float`).
  MessageDialogDouble = 58, (Type::String, Type::Float) -> Type::Unit;
  /// `(59)` RARS extension: message dialog with a string payload.
  MessageDialogString = 59, (Type::String, Type::String) -> Type::Unit;
  /// `(60)` RARS extension: general string input dialog, variant.
  GeneralInputDialog = 60, (Type::String) -> Type::String;
  /// `(61)`-`(64)` RARS extensions reserved for additional dialog variants
  /// in the upstream table; modelled uniformly as string-to-string prompts.
  DialogExt61 = 61, (Type::String) -> Type::String;
  DialogExt62 = 62, (Type::String) -> Type::String;
  DialogExt63 = 63, (Type::String) -> Type::String;
  DialogExt64 = 64, (Type::String) -> Type::String;
  /// `(93)` terminate the program with the given exit code. This is the
  /// syscall the assertion-failure path of the code generator emits (§4.6).
  Exit2 = 93, (Type::Int) -> Type::Unit;
  /// `(1024)` RARS extension reserved by the upstream table for
  /// simulator-internal use; takes no arguments and returns nothing in this
  /// backend.
  RarsReserved1024 = 1024, () -> Type::Unit;
}

/// A human-readable name for any syscall number, falling back to
/// `"syscall_<n>"` for numbers not present in [`Syscall::ALL`] (§4.2).
#[must_use] pub fn display_name(n: i32) -> String {
  match Syscall::from_number(n) {
    Some(s) => s.name().to_string(),
    None => format!("syscall_{n}"),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn required_minimum_table_is_present() {
    for n in [1, 2, 4, 5, 6, 9, 10, 11, 93] {
      assert!(Syscall::from_number(n).is_some(), "missing required syscall {n}");
    }
    for n in [17, 30, 31, 32, 33, 34, 35, 36, 40, 41, 42, 43, 44,
              50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63, 64, 1024] {
      assert!(Syscall::from_number(n).is_some(), "missing RARS extension {n}");
    }
  }

  #[test]
  fn unknown_number_falls_back_to_generic_name() {
    assert_eq!(display_name(999_999), "syscall_999999");
  }

  #[test]
  fn known_number_round_trips_through_name() {
    assert_eq!(display_name(1), "PrintInt");
    assert_eq!(Syscall::PrintInt.ret(), Type::Unit);
    assert_eq!(Syscall::PrintInt.args(), &[Type::Int]);
  }
}
