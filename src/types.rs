//! Resolved types and the typing environment (§3 "Type", "Typing
//! environment"; §4.1 `expandType`/`freeTypeVars`).

use std::collections::HashSet;
use std::rc::Rc;
use smallvec::SmallVec;

/// A field of a resolved record type.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordField {
  pub mutable: bool,
  pub name: Rc<str>,
  pub ty: Type,
}

/// A case of a resolved union type.
#[derive(Clone, Debug, PartialEq)]
pub struct UnionCase {
  pub label: Rc<str>,
  pub ty: Type,
}

/// A fully resolved type. Structural equality (`PartialEq`) is exactly the
/// syntactic equality used as the base case of subtyping (§4.3 rule 1).
#[derive(Clone, Debug, PartialEq)]
pub enum Type {
  Bool,
  Int,
  Float,
  String,
  Unit,
  /// An unbound occurrence of a type-variable name; resolved against the
  /// alias table of the enclosing typing environment.
  Var(Rc<str>),
  Fun(SmallVec<[Type; 4]>, Box<Type>),
  Record(SmallVec<[RecordField; 4]>),
  Union(SmallVec<[UnionCase; 4]>),
  Array(Box<Type>),
}

impl Type {
  #[must_use] pub fn fun(args: impl IntoIterator<Item = Type>, ret: Type) -> Self {
    Type::Fun(args.into_iter().collect(), Box::new(ret))
  }
  #[must_use] pub fn array(elem: Type) -> Self { Type::Array(Box::new(elem)) }

  /// Resolve a chain of type-variables through `aliases` until a non-variable
  /// type is reached (§4.1 `expandType`). Fails if the chain is unbound, or
  /// (defensively) if it cycles without ever reaching a primitive shape.
  pub fn expand(&self, aliases: &AliasEnv) -> Result<Type, ExpandError> {
    let mut cur = self.clone();
    let mut steps = 0usize;
    loop {
      match cur {
        Type::Var(name) => {
          steps += 1;
          if steps > aliases.len() + 1 {
            return Err(ExpandError::Cyclic(name));
          }
          match aliases.get(&name) {
            Some(t) => cur = t.clone(),
            None => return Err(ExpandError::Unbound(name)),
          }
        }
        other => return Ok(other),
      }
    }
  }

  /// The set of unbound type-variable names appearing (anywhere, including
  /// inside nested constituents) in this type (§4.1 `freeTypeVars`).
  #[must_use] pub fn free_type_vars(&self) -> HashSet<Rc<str>> {
    let mut out = HashSet::new();
    self.collect_free_type_vars(&mut out);
    out
  }

  fn collect_free_type_vars(&self, out: &mut HashSet<Rc<str>>) {
    match self {
      Type::Bool | Type::Int | Type::Float | Type::String | Type::Unit => {}
      Type::Var(name) => { out.insert(name.clone()); }
      Type::Fun(args, ret) => {
        for a in args { a.collect_free_type_vars(out); }
        ret.collect_free_type_vars(out);
      }
      Type::Record(fields) => for f in fields { f.ty.collect_free_type_vars(out); },
      Type::Union(cases) => for c in cases { c.ty.collect_free_type_vars(out); },
      Type::Array(elem) => elem.collect_free_type_vars(out),
    }
  }
}

/// Resolving a type-variable chain failed.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExpandError {
  #[error("unbound type name `{0}`")]
  Unbound(Rc<str>),
  #[error("cyclic type alias chain through `{0}`")]
  Cyclic(Rc<str>),
}

/// Alias name -> resolved definition. Implemented with a persistent map
/// (`im::HashMap`) so every [`crate::tree::Node`] can cheaply snapshot its
/// enclosing scope without cloning the whole table (§3 "created empty at
/// program entry, extended functionally at every binding, restored on scope
/// exit").
pub type AliasEnv = im::HashMap<Rc<str>, Type>;

/// The three mappings/sets carried by every typed tree node (§3 "Typing
/// environment").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TyEnv {
  /// Variable name -> current type.
  pub vars: im::HashMap<Rc<str>, Type>,
  /// Alias name -> resolved definition.
  pub aliases: AliasEnv,
  /// The set of variable names currently declared mutable.
  pub mutables: im::HashSet<Rc<str>>,
}

impl TyEnv {
  #[must_use] pub fn empty() -> Self { Self::default() }

  /// Bind (or shadow) `name` as an immutable variable of type `ty`.
  #[must_use] pub fn with_var(&self, name: Rc<str>, ty: Type) -> Self {
    let mut next = self.clone();
    next.vars.insert(name.clone(), ty);
    next.mutables.remove(&name);
    next
  }

  /// Bind (or shadow) `name` as a mutable variable of type `ty`.
  #[must_use] pub fn with_mutable_var(&self, name: Rc<str>, ty: Type) -> Self {
    let mut next = self.clone();
    next.vars.insert(name.clone(), ty);
    next.mutables.insert(name);
    next
  }

  /// Bind (or shadow) a type alias.
  #[must_use] pub fn with_alias(&self, name: Rc<str>, ty: Type) -> Self {
    let mut next = self.clone();
    next.aliases.insert(name, ty);
    next
  }

  #[must_use] pub fn lookup_var(&self, name: &str) -> Option<&Type> { self.vars.get(name) }
  #[must_use] pub fn is_mutable(&self, name: &str) -> bool { self.mutables.contains(name) }

  /// Resolve `ty` fully through this environment's alias table.
  pub fn expand(&self, ty: &Type) -> Result<Type, ExpandError> { ty.expand(&self.aliases) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn expand_follows_alias_chain_to_a_primitive() {
    let mut aliases = AliasEnv::new();
    aliases.insert(Rc::from("A"), Type::Var(Rc::from("B")));
    aliases.insert(Rc::from("B"), Type::Int);
    assert_eq!(Type::Var(Rc::from("A")).expand(&aliases), Ok(Type::Int));
  }

  #[test]
  fn expand_unbound_chain_is_an_error() {
    let aliases = AliasEnv::new();
    assert_eq!(
      Type::Var(Rc::from("A")).expand(&aliases),
      Err(ExpandError::Unbound(Rc::from("A")))
    );
  }

  #[test]
  fn free_type_vars_recurses_into_constituents() {
    let ty = Type::fun([Type::Var(Rc::from("A")), Type::Int], Type::Var(Rc::from("B")));
    let vars = ty.free_type_vars();
    assert_eq!(vars.len(), 2);
    assert!(vars.contains(&Rc::from("A") as &Rc<str>));
    assert!(vars.contains(&Rc::from("B") as &Rc<str>));
  }

  #[test]
  fn env_with_var_drops_stale_mutable_flag_on_shadow() {
    let env = TyEnv::empty().with_mutable_var(Rc::from("x"), Type::Int);
    assert!(env.is_mutable("x"));
    let shadowed = env.with_var(Rc::from("x"), Type::Bool);
    assert!(!shadowed.is_mutable("x"));
    assert_eq!(shadowed.lookup_var("x"), Some(&Type::Bool));
  }
}
