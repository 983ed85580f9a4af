use std::collections::HashSet;

use swc_core::atoms::Atom;
use swc_core::ecma::ast::{Ident, Module, ObjectPatProp, Pat};
use swc_core::ecma::visit::{Visit, VisitWith};

/// Every identifier name used anywhere in a module
#[derive(Default)]
pub struct UsedNames {
  names: HashSet<Atom>,
}

impl UsedNames {
  pub fn collect(module: &Module) -> Self {
    let mut used = Self::default();
    module.visit_with(&mut used);
    used
  }

  /// A name based on `base` that does not clash with the module, reserved for later calls
  pub fn fresh(&mut self, base: &str) -> Atom {
    let mut candidate: Atom = base.into();
    let mut counter = 2;
    while self.names.contains(&candidate) {
      candidate = format!("{}{}", base, counter).into();
      counter += 1;
    }

    self.names.insert(candidate.clone());
    candidate
  }
}

impl Visit for UsedNames {
  fn visit_ident(&mut self, ident: &Ident) {
    self.names.insert(ident.sym.clone());
  }
}

pub fn is_identifier_name(name: &str) -> bool {
  let mut chars = name.chars();
  match chars.next() {
    Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {}
    _ => return false,
  }

  chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// All identifiers bound by a declaration pattern
pub fn binding_idents(pat: &Pat, idents: &mut Vec<Ident>) {
  match pat {
    Pat::Ident(binding) => idents.push(binding.id.clone()),
    Pat::Array(array) => {
      for elem in array.elems.iter().flatten() {
        binding_idents(elem, idents);
      }
    }
    Pat::Object(object) => {
      for prop in &object.props {
        match prop {
          ObjectPatProp::KeyValue(prop) => binding_idents(&prop.value, idents),
          ObjectPatProp::Assign(prop) => idents.push(prop.key.id.clone()),
          ObjectPatProp::Rest(rest) => binding_idents(&rest.arg, idents),
        }
      }
    }
    Pat::Rest(rest) => binding_idents(&rest.arg, idents),
    Pat::Assign(assign) => binding_idents(&assign.left, idents),
    Pat::Invalid(_) | Pat::Expr(_) => {}
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;
  use crate::glue::parse_items;

  #[test]
  fn fresh_names_avoid_used_ones() {
    let items = parse_items("const _unused = 1; const _unused2 = 2;").unwrap();
    let module = Module {
      span: Default::default(),
      body: items,
      shebang: None,
    };

    let mut used = UsedNames::collect(&module);

    assert_eq!(&*used.fresh("_unused"), "_unused3");
    assert_eq!(&*used.fresh("_unused"), "_unused4");
    assert_eq!(&*used.fresh("other"), "other");
  }

  #[test]
  fn recognises_identifier_names() {
    assert!(is_identifier_name("VERSION"));
    assert!(is_identifier_name("$el"));
    assert!(is_identifier_name("default"));
    assert!(!is_identifier_name("a-b"));
    assert!(!is_identifier_name("1a"));
    assert!(!is_identifier_name(""));
  }
}
