use indexmap::IndexMap;
use swc_core::common::{DUMMY_SP, SyntaxContext};
use swc_core::ecma::ast::{
  AssignExpr, AssignOp, AssignTarget, CallExpr, Callee, ComputedPropName, Decl, DefaultDecl,
  ExportSpecifier, Expr, ExprOrSpread, ExprStmt, Ident, IdentName, ImportSpecifier,
  KeyValuePatProp, Lit, MemberExpr, MemberProp, Module, ModuleDecl, ModuleExportName, ModuleItem,
  ObjectPat, ObjectPatProp, Pat, PropName, SimpleAssignTarget, Stmt, Str, VarDecl, VarDeclKind,
  VarDeclarator,
};

use crate::graph::DepResolution;

pub const INTEROP_HELPER: &str = "__severed_interop__";
pub const STAR_HELPER: &str = "__severed_star__";
pub const EXPORT_STAR_HELPER: &str = "__severed_export_star__";

/// Lowers a shaken ES module to CommonJS: imports become `require`
/// destructurings, exports become `exports.<name>` assignments. Specifiers
/// are rewritten to their resolved ids so the bundle runtime can route them.
pub fn lower_to_cjs(module: &mut Module, resolutions: &IndexMap<String, DepResolution>) {
  let items = std::mem::take(&mut module.body);
  let mut body: Vec<ModuleItem> = Vec::with_capacity(items.len() + 1);
  body.push(stmt(export_assign("__esModule", true_literal())));

  for item in items {
    match item {
      ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
        let target = resolve_target(import.src.value.as_ref(), resolutions);
        let mut declarators = Vec::with_capacity(import.specifiers.len());
        for specifier in import.specifiers {
          declarators.push(match specifier {
            ImportSpecifier::Named(named) => {
              let imported = named
                .imported
                .unwrap_or_else(|| ModuleExportName::Ident(named.local.clone()));
              VarDeclarator {
                span: DUMMY_SP,
                name: Pat::Object(ObjectPat {
                  span: DUMMY_SP,
                  props: vec![ObjectPatProp::KeyValue(KeyValuePatProp {
                    key: export_prop_name(&imported),
                    value: Box::new(Pat::Ident(named.local.into())),
                  })],
                  optional: false,
                  type_ann: None,
                }),
                init: Some(Box::new(require_call(&target))),
                definite: false,
              }
            }
            ImportSpecifier::Default(default) => VarDeclarator {
              span: DUMMY_SP,
              name: Pat::Ident(default.local.into()),
              init: Some(Box::new(helper_call(INTEROP_HELPER, require_call(&target)))),
              definite: false,
            },
            ImportSpecifier::Namespace(namespace) => VarDeclarator {
              span: DUMMY_SP,
              name: Pat::Ident(namespace.local.into()),
              init: Some(Box::new(helper_call(STAR_HELPER, require_call(&target)))),
              definite: false,
            },
          });
        }
        if !declarators.is_empty() {
          body.push(ModuleItem::Stmt(Stmt::Decl(Decl::Var(Box::new(VarDecl {
            span: DUMMY_SP,
            ctxt: SyntaxContext::empty(),
            kind: VarDeclKind::Var,
            declare: false,
            decls: declarators,
          })))));
        }
      }
      ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
        let names = crate::shake::decl_names(&export.decl);
        body.push(ModuleItem::Stmt(Stmt::Decl(export.decl)));
        for name in names {
          body.push(stmt(export_assign(&name, ident_expr(&name))));
        }
      }
      ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(export)) => {
        if let Some(src) = &export.src {
          let target = resolve_target(src.value.as_ref(), resolutions);
          for specifier in export.specifiers {
            match specifier {
              ExportSpecifier::Named(named) => {
                let exported = named.exported.as_ref().unwrap_or(&named.orig);
                let value = member_of(require_call(&target), &named.orig);
                body.push(stmt(export_assign(&export_name(exported), value)));
              }
              ExportSpecifier::Namespace(namespace) => {
                let value = helper_call(STAR_HELPER, require_call(&target));
                body.push(stmt(export_assign(&export_name(&namespace.name), value)));
              }
              ExportSpecifier::Default(default) => {
                let value = helper_call(INTEROP_HELPER, require_call(&target));
                body.push(stmt(export_assign(default.exported.sym.as_ref(), value)));
              }
            }
          }
        } else {
          for specifier in export.specifiers {
            if let ExportSpecifier::Named(named) = specifier {
              let exported = named.exported.as_ref().unwrap_or(&named.orig);
              if let ModuleExportName::Ident(orig) = &named.orig {
                body.push(stmt(export_assign(
                  &export_name(exported),
                  Expr::Ident(orig.clone()),
                )));
              }
            }
          }
        }
      }
      ModuleItem::ModuleDecl(ModuleDecl::ExportAll(export)) => {
        let target = resolve_target(export.src.value.as_ref(), resolutions);
        body.push(ModuleItem::Stmt(Stmt::Expr(ExprStmt {
          span: DUMMY_SP,
          expr: Box::new(Expr::Call(CallExpr {
            span: DUMMY_SP,
            ctxt: SyntaxContext::empty(),
            callee: Callee::Expr(Box::new(Expr::Ident(quote_ident(EXPORT_STAR_HELPER)))),
            args: vec![
              ExprOrSpread {
                spread: None,
                expr: Box::new(require_call(&target)),
              },
              ExprOrSpread {
                spread: None,
                expr: Box::new(Expr::Ident(quote_ident("exports"))),
              },
            ],
            type_args: None,
          })),
        })));
      }
      ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultDecl(export)) => match export.decl {
        DefaultDecl::Fn(function) => {
          if let Some(ident) = &function.ident {
            let name = ident.sym.to_string();
            body.push(ModuleItem::Stmt(Stmt::Decl(Decl::Fn(
              swc_core::ecma::ast::FnDecl {
                ident: ident.clone(),
                declare: false,
                function: function.function,
              },
            ))));
            body.push(stmt(export_assign("default", ident_expr(&name))));
          } else {
            body.push(stmt(export_assign("default", Expr::Fn(function))));
          }
        }
        DefaultDecl::Class(class) => {
          if let Some(ident) = &class.ident {
            let name = ident.sym.to_string();
            body.push(ModuleItem::Stmt(Stmt::Decl(Decl::Class(
              swc_core::ecma::ast::ClassDecl {
                ident: ident.clone(),
                declare: false,
                class: class.class,
              },
            ))));
            body.push(stmt(export_assign("default", ident_expr(&name))));
          } else {
            body.push(stmt(export_assign("default", Expr::Class(class))));
          }
        }
        DefaultDecl::TsInterfaceDecl(_) => {}
      },
      ModuleItem::ModuleDecl(ModuleDecl::ExportDefaultExpr(export)) => {
        body.push(stmt(export_assign("default", *export.expr)));
      }
      other => body.push(other),
    }
  }

  module.body = body;
}

fn resolve_target(specifier: &str, resolutions: &IndexMap<String, DepResolution>) -> String {
  match resolutions.get(specifier) {
    Some(DepResolution::Internal(id)) | Some(DepResolution::External(id)) => id.clone(),
    None => specifier.to_string(),
  }
}

fn quote_ident(sym: &str) -> Ident {
  Ident::new(sym.into(), DUMMY_SP, SyntaxContext::empty())
}

fn ident_expr(sym: &str) -> Expr {
  Expr::Ident(quote_ident(sym))
}

fn true_literal() -> Expr {
  Expr::Lit(Lit::Bool(swc_core::ecma::ast::Bool {
    span: DUMMY_SP,
    value: true,
  }))
}

fn stmt(expr: Expr) -> ModuleItem {
  ModuleItem::Stmt(Stmt::Expr(ExprStmt {
    span: DUMMY_SP,
    expr: Box::new(expr),
  }))
}

fn require_call(target: &str) -> Expr {
  Expr::Call(CallExpr {
    span: DUMMY_SP,
    ctxt: SyntaxContext::empty(),
    callee: Callee::Expr(Box::new(Expr::Ident(quote_ident("require")))),
    args: vec![ExprOrSpread {
      spread: None,
      expr: Box::new(Expr::Lit(Lit::Str(Str {
        span: DUMMY_SP,
        value: target.into(),
        raw: None,
      }))),
    }],
    type_args: None,
  })
}

fn helper_call(helper: &str, argument: Expr) -> Expr {
  Expr::Call(CallExpr {
    span: DUMMY_SP,
    ctxt: SyntaxContext::empty(),
    callee: Callee::Expr(Box::new(Expr::Ident(quote_ident(helper)))),
    args: vec![ExprOrSpread {
      spread: None,
      expr: Box::new(argument),
    }],
    type_args: None,
  })
}

fn is_ident_safe(name: &str) -> bool {
  let mut chars = name.chars();
  chars
    .next()
    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn export_name(name: &ModuleExportName) -> String {
  match name {
    ModuleExportName::Ident(ident) => ident.sym.to_string(),
    ModuleExportName::Str(value) => value.value.to_string(),
  }
}

fn export_prop_name(name: &ModuleExportName) -> PropName {
  let text = export_name(name);
  if is_ident_safe(&text) {
    PropName::Ident(IdentName::new(text.into(), DUMMY_SP))
  } else {
    PropName::Str(Str {
      span: DUMMY_SP,
      value: text.into(),
      raw: None,
    })
  }
}

fn member_prop(name: &str) -> MemberProp {
  if is_ident_safe(name) {
    MemberProp::Ident(IdentName::new(name.into(), DUMMY_SP))
  } else {
    MemberProp::Computed(ComputedPropName {
      span: DUMMY_SP,
      expr: Box::new(Expr::Lit(Lit::Str(Str {
        span: DUMMY_SP,
        value: name.into(),
        raw: None,
      }))),
    })
  }
}

fn member_of(object: Expr, name: &ModuleExportName) -> Expr {
  Expr::Member(MemberExpr {
    span: DUMMY_SP,
    obj: Box::new(object),
    prop: member_prop(&export_name(name)),
  })
}

/// `exports.<name> = <value>;`
fn export_assign(name: &str, value: Expr) -> Expr {
  Expr::Assign(AssignExpr {
    span: DUMMY_SP,
    op: AssignOp::Assign,
    left: AssignTarget::Simple(SimpleAssignTarget::Member(MemberExpr {
      span: DUMMY_SP,
      obj: Box::new(Expr::Ident(quote_ident("exports"))),
      prop: member_prop(name),
    })),
    right: Box::new(value),
  })
}

#[cfg(test)]
mod tests {
  use indexmap::IndexMap;
  use indoc::indoc;
  use pretty_assertions::assert_eq;
  use severed_swc_runner::{run_visit, syntax_for_id};
  use swc_core::ecma::visit::VisitMut;

  use super::*;

  fn lower(code: &str, resolutions: IndexMap<String, DepResolution>) -> String {
    struct Lower {
      resolutions: IndexMap<String, DepResolution>,
    }
    impl VisitMut for Lower {
      fn visit_mut_module(&mut self, module: &mut Module) {
        lower_to_cjs(module, &self.resolutions);
      }
    }

    run_visit(code, syntax_for_id("m.js"), |_| Lower { resolutions })
      .unwrap()
      .output_code
  }

  #[test]
  fn lowers_named_imports_to_destructured_requires() {
    let mut resolutions = IndexMap::new();
    resolutions.insert(
      "./theme.js".to_string(),
      DepResolution::Internal("/src/theme.js".to_string()),
    );

    let output = lower("import { theme as t } from './theme.js';\nuse(t);", resolutions);
    assert!(output.contains(r#"var { theme: t } = require("/src/theme.js");"#));
  }

  #[test]
  fn lowers_default_and_namespace_imports_with_interop() {
    let output = lower(
      "import chalk from 'chalk';\nimport * as all from 'chalk';\nuse(chalk, all);",
      IndexMap::new(),
    );
    assert!(output.contains(r#"var chalk = __severed_interop__(require("chalk"));"#));
    assert!(output.contains(r#"var all = __severed_star__(require("chalk"));"#));
  }

  #[test]
  fn lowers_exports_to_assignments() {
    let output = lower(
      indoc! {r#"
        export const __severed_css_0 = `a`;
        const local = 1;
        export { local as renamed };
        export default function named() {}
      "#},
      IndexMap::new(),
    );

    assert_eq!(
      output,
      indoc! {r#"
        exports.__esModule = true;
        const __severed_css_0 = `a`;
        exports.__severed_css_0 = __severed_css_0;
        const local = 1;
        exports.renamed = local;
        function named() {}
        exports.default = named;
      "#}
    );
  }

  #[test]
  fn lowers_re_exports_through_requires() {
    let mut resolutions = IndexMap::new();
    resolutions.insert(
      "./other.js".to_string(),
      DepResolution::Internal("/src/other.js".to_string()),
    );
    resolutions.insert(
      "./rest.js".to_string(),
      DepResolution::External("./rest.js".to_string()),
    );

    let output = lower(
      "export { a as b } from './other.js';\nexport * from './rest.js';",
      resolutions,
    );
    assert!(output.contains(r#"exports.b = require("/src/other.js").a;"#));
    assert!(output.contains(r#"__severed_export_star__(require("./rest.js"), exports);"#));
  }
}
