use std::collections::{BTreeSet, HashMap, HashSet};

use indexmap::IndexMap;
use swc_core::ecma::ast::{
  Decl, DefaultDecl, ExportSpecifier, Expr, Id, ImportSpecifier, Module, ModuleDecl,
  ModuleExportName, ModuleItem, ObjectPatProp, Pat, Prop, Stmt, VarDeclarator,
};
use swc_core::ecma::visit::{Visit, VisitWith};

/// Exports of a module its importers actually use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Needed {
  All,
  Named(BTreeSet<String>),
}

impl Needed {
  pub fn named<I: IntoIterator<Item = String>>(names: I) -> Self {
    Needed::Named(names.into_iter().collect())
  }

  pub fn contains(&self, name: &str) -> bool {
    match self {
      Needed::All => true,
      Needed::Named(names) => names.contains(name),
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      Needed::All => false,
      Needed::Named(names) => names.is_empty(),
    }
  }

  /// Union `other` into `self`; returns whether the set grew.
  pub fn union_with(&mut self, other: &Needed) -> bool {
    match other {
      Needed::All => {
        if matches!(self, Needed::All) {
          false
        } else {
          *self = Needed::All;
          true
        }
      }
      Needed::Named(names) => match self {
        Needed::All => false,
        Needed::Named(mine) => {
          let before = mine.len();
          mine.extend(names.iter().cloned());
          mine.len() != before
        }
      },
    }
  }
}

/// Shakes a module down to the code its needed exports require, treating the
/// module as side-effect-free. Returns the imports that survived, with the
/// names each dependency must now provide.
pub fn shake_module(module: &mut Module, needed: &Needed) -> IndexMap<String, Needed> {
  prune_exports(module, needed);
  drop_side_effect_items(module);
  remove_unused_bindings(module);
  collect_surviving_imports(module)
}

fn export_name(name: &ModuleExportName) -> String {
  match name {
    ModuleExportName::Ident(ident) => ident.sym.to_string(),
    ModuleExportName::Str(value) => value.value.to_string(),
  }
}

fn pat_names(pat: &Pat, names: &mut Vec<String>) {
  match pat {
    Pat::Ident(ident) => names.push(ident.id.sym.to_string()),
    Pat::Array(array) => {
      for pat in array.elems.iter().flatten() {
        pat_names(pat, names);
      }
    }
    Pat::Object(object) => {
      for prop in &object.props {
        match prop {
          ObjectPatProp::KeyValue(kv) => pat_names(&kv.value, names),
          ObjectPatProp::Assign(assign) => names.push(assign.key.id.sym.to_string()),
          ObjectPatProp::Rest(rest) => pat_names(&rest.arg, names),
        }
      }
    }
    Pat::Rest(rest) => pat_names(&rest.arg, names),
    Pat::Assign(assign) => pat_names(&assign.left, names),
    _ => {}
  }
}

pub(crate) fn decl_names(decl: &Decl) -> Vec<String> {
  let mut names = Vec::new();
  match decl {
    Decl::Var(var) => {
      for declarator in &var.decls {
        pat_names(&declarator.name, &mut names);
      }
    }
    Decl::Fn(function) => names.push(function.ident.sym.to_string()),
    Decl::Class(class) => names.push(class.ident.sym.to_string()),
    _ => {}
  }
  names
}

/// Drops exports the importers do not need. Declarations backing a dropped
/// export are demoted to plain declarations so the unused-binding pass can
/// decide their fate.
fn prune_exports(module: &mut Module, needed: &Needed) {
  let items = std::mem::take(&mut module.body);
  let mut body = Vec::with_capacity(items.len());

  for item in items {
    match item {
      ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
        if decl_names(&export.decl)
          .iter()
          .any(|name| needed.contains(name))
        {
          body.push(ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)));
        } else {
          body.push(ModuleItem::Stmt(Stmt::Decl(export.decl)));
        }
      }
      ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(mut export)) => {
        export.specifiers.retain(|specifier| match specifier {
          ExportSpecifier::Named(named) => {
            let exported = named.exported.as_ref().unwrap_or(&named.orig);
            needed.contains(&export_name(exported))
          }
          ExportSpecifier::Namespace(namespace) => needed.contains(&export_name(&namespace.name)),
          ExportSpecifier::Default(_) => needed.contains("default"),
        });
        if !export.specifiers.is_empty() {
          body.push(ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(export)));
        }
      }
      ModuleItem::ModuleDecl(ModuleDecl::ExportAll(export)) => {
        if !needed.is_empty() {
          body.push(ModuleItem::ModuleDecl(ModuleDecl::ExportAll(export)));
        }
      }
      ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => {
        if needed.contains("default") {
          body.push(ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)));
        } else {
          // Named declarations may still be referenced locally.
          match export.decl {
            DefaultDecl::Fn(function) if function.ident.is_some() => {
              if let Some(ident) = function.ident {
                body.push(ModuleItem::Stmt(Stmt::Decl(Decl::Fn(
                  swc_core::ecma::ast::FnDecl {
                    ident,
                    declare: false,
                    function: function.function,
                  },
                ))));
              }
            }
            DefaultDecl::Class(class) if class.ident.is_some() => {
              if let Some(ident) = class.ident {
                body.push(ModuleItem::Stmt(Stmt::Decl(Decl::Class(
                  swc_core::ecma::ast::ClassDecl {
                    ident,
                    declare: false,
                    class: class.class,
                  },
                ))));
              }
            }
            _ => {}
          }
        }
      }
      ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(export)) => {
        if needed.contains("default") {
          body.push(ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(export)));
        }
      }
      other => body.push(other),
    }
  }

  module.body = body;
}

/// Every module is treated as side-effect-free: bare top-level statements and
/// specifier-less imports contribute nothing to any export and are dropped.
fn drop_side_effect_items(module: &mut Module) {
  module.body.retain(|item| match item {
    ModuleItem::Stmt(stmt) => matches!(stmt, Stmt::Decl(_)),
    ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => !import.specifiers.is_empty(),
    _ => true,
  });
}

/// Multi-pass removal of top-level bindings nothing references, cascading
/// until no pass makes progress.
fn remove_unused_bindings(module: &mut Module) {
  let mut previous_count = usize::MAX;

  loop {
    let declared = collect_declared(module);
    if declared.is_empty() || declared.len() == previous_count {
      break;
    }

    let mut used = HashSet::new();
    module.visit_with(&mut UsageCollector {
      used: &mut used,
      declared: &declared,
    });

    module.body.retain_mut(|item| match item {
      ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) => {
        var
          .decls
          .retain_mut(|declarator| keep_declarator(declarator, &used));
        !var.decls.is_empty()
      }
      ModuleItem::Stmt(Stmt::Decl(Decl::Fn(function))) => used.contains(&function.ident.to_id()),
      ModuleItem::Stmt(Stmt::Decl(Decl::Class(class))) => used.contains(&class.ident.to_id()),
      ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
        import.specifiers.retain(|specifier| {
          let local = match specifier {
            ImportSpecifier::Named(named) => &named.local,
            ImportSpecifier::Default(default) => &default.local,
            ImportSpecifier::Namespace(namespace) => &namespace.local,
          };
          used.contains(&local.to_id())
        });
        !import.specifiers.is_empty()
      }
      _ => true,
    });

    previous_count = declared.len();
  }
}

/// Top-level bindings only: inner scopes run only when something kept calls
/// into them.
fn collect_declared(module: &Module) -> HashMap<Id, bool> {
  let mut declared = HashMap::new();

  let mut collect_pat = |pat: &Pat, declared: &mut HashMap<Id, bool>| {
    let mut idents = Vec::new();
    collect_pat_ids(pat, &mut idents);
    for id in idents {
      declared.insert(id, false);
    }
  };

  for item in &module.body {
    match item {
      ModuleItem::Stmt(Stmt::Decl(decl)) => match decl {
        Decl::Var(var) => {
          for declarator in &var.decls {
            collect_pat(&declarator.name, &mut declared);
          }
        }
        Decl::Fn(function) => {
          declared.insert(function.ident.to_id(), false);
        }
        Decl::Class(class) => {
          declared.insert(class.ident.to_id(), false);
        }
        _ => {}
      },
      ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
        for specifier in &import.specifiers {
          let local = match specifier {
            ImportSpecifier::Named(named) => &named.local,
            ImportSpecifier::Default(default) => &default.local,
            ImportSpecifier::Namespace(namespace) => &namespace.local,
          };
          declared.insert(local.to_id(), false);
        }
      }
      _ => {}
    }
  }

  declared
}

fn collect_pat_ids(pat: &Pat, ids: &mut Vec<Id>) {
  match pat {
    Pat::Ident(ident) => ids.push(ident.id.to_id()),
    Pat::Array(array) => {
      for pat in array.elems.iter().flatten() {
        collect_pat_ids(pat, ids);
      }
    }
    Pat::Object(object) => {
      for prop in &object.props {
        match prop {
          ObjectPatProp::KeyValue(kv) => collect_pat_ids(&kv.value, ids),
          ObjectPatProp::Assign(assign) => ids.push(assign.key.id.to_id()),
          ObjectPatProp::Rest(rest) => collect_pat_ids(&rest.arg, ids),
        }
      }
    }
    Pat::Rest(rest) => collect_pat_ids(&rest.arg, ids),
    Pat::Assign(assign) => collect_pat_ids(&assign.left, ids),
    _ => {}
  }
}

fn keep_declarator(declarator: &mut VarDeclarator, used: &HashSet<Id>) -> bool {
  prune_pat(&mut declarator.name, used)
}

/// Removes unused bindings from a pattern; returns whether anything is left.
fn prune_pat(pat: &mut Pat, used: &HashSet<Id>) -> bool {
  match pat {
    Pat::Ident(ident) => used.contains(&ident.id.to_id()),
    Pat::Object(object) => {
      // A rest element observes every remaining property; leave it intact.
      if object
        .props
        .iter()
        .any(|prop| matches!(prop, ObjectPatProp::Rest(_)))
      {
        return true;
      }
      object.props.retain_mut(|prop| match prop {
        ObjectPatProp::KeyValue(kv) => prune_pat(&mut kv.value, used),
        ObjectPatProp::Assign(assign) => used.contains(&assign.key.id.to_id()),
        ObjectPatProp::Rest(_) => true,
      });
      !object.props.is_empty()
    }
    Pat::Array(array) => {
      for slot in array.elems.iter_mut() {
        let empty = matches!(slot, Some(pat) if !prune_pat(pat, used));
        if empty {
          *slot = None;
        }
      }
      while matches!(array.elems.last(), Some(None)) {
        array.elems.pop();
      }
      !array.elems.is_empty()
    }
    Pat::Rest(rest) => prune_pat(&mut rest.arg, used),
    Pat::Assign(assign) => prune_pat(&mut assign.left, used),
    _ => true,
  }
}

/// Marks identifiers read in expression position, shorthand object props and
/// export specifiers. Pattern binding names are not usages.
struct UsageCollector<'a> {
  used: &'a mut HashSet<Id>,
  declared: &'a HashMap<Id, bool>,
}

impl UsageCollector<'_> {
  fn mark(&mut self, id: Id) {
    if self.declared.contains_key(&id) {
      self.used.insert(id);
    }
  }
}

impl Visit for UsageCollector<'_> {
  fn visit_expr(&mut self, expr: &Expr) {
    if let Expr::Ident(ident) = expr {
      self.mark(ident.to_id());
    }
    expr.visit_children_with(self);
  }

  fn visit_prop(&mut self, prop: &Prop) {
    if let Prop::Shorthand(ident) = prop {
      self.mark(ident.to_id());
    }
    prop.visit_children_with(self);
  }

  fn visit_export_specifier(&mut self, specifier: &ExportSpecifier) {
    if let ExportSpecifier::Named(named) = specifier
      && let ModuleExportName::Ident(ident) = &named.orig
    {
      self.mark(ident.to_id());
    }
    specifier.visit_children_with(self);
  }
}

/// Imports still present after shaking, as the per-dependency export demand.
fn collect_surviving_imports(module: &Module) -> IndexMap<String, Needed> {
  let mut imports: IndexMap<String, Needed> = IndexMap::new();

  let mut union = |specifier: &str, needed: Needed| {
    imports
      .entry(specifier.to_string())
      .or_insert_with(|| Needed::Named(BTreeSet::new()))
      .union_with(&needed);
  };

  for item in &module.body {
    match item {
      ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
        for specifier in &import.specifiers {
          match specifier {
            ImportSpecifier::Named(named) => {
              let imported = named
                .imported
                .as_ref()
                .map(export_name)
                .unwrap_or_else(|| named.local.sym.to_string());
              union(import.src.value.as_ref(), Needed::named([imported]));
            }
            ImportSpecifier::Default(_) => {
              union(import.src.value.as_ref(), Needed::named(["default".to_string()]));
            }
            ImportSpecifier::Namespace(_) => {
              union(import.src.value.as_ref(), Needed::All);
            }
          }
        }
      }
      ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(export)) => {
        if let Some(src) = &export.src {
          for specifier in &export.specifiers {
            match specifier {
              ExportSpecifier::Named(named) => {
                union(src.value.as_ref(), Needed::named([export_name(&named.orig)]));
              }
              _ => union(src.value.as_ref(), Needed::All),
            }
          }
        }
      }
      ModuleItem::ModuleDecl(ModuleDecl::ExportAll(export)) => {
        union(export.src.value.as_ref(), Needed::All);
      }
      _ => {}
    }
  }

  imports
}
