use severed_core::types::{CSS_TAG, EXPORT_PREFIX, ExtractionSite, SENTINEL, SiteKind};
use severed_swc_runner::{RunVisitResult, run_visit_const, syntax_for_id};
use swc_core::common::{BytePos, Spanned};
use swc_core::ecma::ast::{
  CallExpr, DefaultDecl, ExportAll, ExportDefaultDecl, ExportDefaultExpr, Module, ModuleDecl,
  NamedExport, TaggedTpl,
};
use swc_core::ecma::visit::{Visit, VisitWith};

use crate::extract::ExtractError;
use crate::text_editor::TextEditor;

/// Result of classifying one source file.
#[derive(Debug)]
pub struct Classification {
  /// Sites in source order, ascending by `start`, non-overlapping.
  pub sites: Vec<ExtractionSite>,
  /// The derivative program: sentinel-replaced sites, hoisted
  /// `__severed_css_<i>` exports, stripped exports, pure-annotated calls.
  pub derivative: String,
  pub has_dynamic: bool,
}

/// Walks a file and produces its extraction sites plus the derivative
/// program that computes their values.
pub fn classify(code: &str) -> Result<Classification, ExtractError> {
  let RunVisitResult { visitor, .. } =
    run_visit_const(code, syntax_for_id("file.js"), |context| {
      CssSiteCollector::new(code, context.file_start)
    })?;

  let CssSiteCollector {
    sites,
    hoists,
    edits,
    ..
  } = visitor;

  let mut editor = TextEditor::new(code);
  // Hoists go in first so they sort ahead of pure-call annotations logged at
  // the same top-level offset.
  for (offset, text) in hoists {
    editor.insert(offset, text);
  }
  for edit in edits {
    match edit {
      EditOp::Insert { offset, text } => editor.insert(offset, text),
      EditOp::Replace { start, end, text } => editor.replace(start..end, text),
    }
  }
  let derivative = editor.finish()?;
  let has_dynamic = sites.iter().any(|site| !site.is_static());

  Ok(Classification {
    sites,
    derivative,
    has_dynamic,
  })
}

#[derive(Debug)]
enum EditOp {
  Insert {
    offset: usize,
    text: String,
  },
  Replace {
    start: usize,
    end: usize,
    text: String,
  },
}

struct CssSiteCollector<'a> {
  code: &'a str,
  file_start: BytePos,
  /// Byte offset of the top-level statement currently being walked.
  top_level_start: usize,
  sites: Vec<ExtractionSite>,
  hoists: Vec<(usize, String)>,
  edits: Vec<EditOp>,
}

impl<'a> CssSiteCollector<'a> {
  fn new(code: &'a str, file_start: BytePos) -> Self {
    Self {
      code,
      file_start,
      top_level_start: 0,
      sites: Vec::new(),
      hoists: Vec::new(),
      edits: Vec::new(),
    }
  }

  fn byte(&self, pos: BytePos) -> usize {
    (pos.0 - self.file_start.0) as usize
  }

  fn remove_range(&mut self, start: usize, end: usize) {
    self.edits.push(EditOp::Replace {
      start,
      end,
      text: String::new(),
    });
  }

  fn is_css_tag(node: &TaggedTpl) -> bool {
    node
      .tag
      .as_ident()
      .is_some_and(|ident| ident.sym.as_ref() == CSS_TAG)
  }
}

impl Visit for CssSiteCollector<'_> {
  fn visit_module(&mut self, module: &Module) {
    for item in &module.body {
      self.top_level_start = self.byte(item.span_lo());
      item.visit_with(self);
    }
  }

  fn visit_module_decl(&mut self, decl: &ModuleDecl) {
    match decl {
      // `export const x = ...`: drop the keyword, keep the declaration, or
      // the declaration's free variables would pin otherwise shakeable code.
      ModuleDecl::ExportDecl(export) => {
        let start = self.byte(export.span.lo);
        let decl_start = self.byte(export.decl.span_lo());
        self.remove_range(start, decl_start);
        export.decl.visit_with(self);
      }
      // `export default function f() {}`: named declarations survive as
      // plain declarations, anonymous ones become discardable expressions.
      ModuleDecl::ExportDefaultDecl(export) => {
        let start = self.byte(export.span.lo);
        let decl_start = self.byte(default_decl_lo(export));
        if default_decl_is_named(export) {
          self.remove_range(start, decl_start);
        } else {
          self.edits.push(EditOp::Replace {
            start,
            end: decl_start,
            text: "void ".into(),
          });
        }
        export.decl.visit_with(self);
      }
      // `export default <expr>;`: keep the expression as a discardable
      // statement so any sites inside it still classify.
      ModuleDecl::ExportDefaultExpr(export) => {
        let start = self.byte(export.span.lo);
        let expr_start = self.byte(export.expr.span_lo());
        self.edits.push(EditOp::Replace {
          start,
          end: expr_start,
          text: "void ".into(),
        });
        export.expr.visit_with(self);
      }
      // `export { a, b }` and `export ... from`: remove entirely, and do not
      // re-enter what was just removed.
      ModuleDecl::ExportNamed(NamedExport { span, .. })
      | ModuleDecl::ExportAll(ExportAll { span, .. }) => {
        let start = self.byte(span.lo);
        let end = self.byte(span.hi);
        self.remove_range(start, end);
      }
      _ => decl.visit_children_with(self),
    }
  }

  fn visit_tagged_tpl(&mut self, node: &TaggedTpl) {
    if !Self::is_css_tag(node) {
      node.visit_children_with(self);
      return;
    }

    let start = self.byte(node.span.lo);
    let end = self.byte(node.span.hi);
    let index = self.sites.len();

    let kind = if node.tpl.exprs.is_empty() {
      let quasi = &node.tpl.quasis[0];
      let raw = quasi
        .cooked
        .as_ref()
        .map(|cooked| cooked.to_string())
        .unwrap_or_else(|| quasi.raw.to_string());
      SiteKind::Static { raw }
    } else {
      SiteKind::Dynamic
    };

    let template_start = self.byte(node.tpl.span.lo);
    let template_end = self.byte(node.tpl.span.hi);
    let template = &self.code[template_start..template_end];
    self.hoists.push((
      self.top_level_start,
      format!("export const {EXPORT_PREFIX}{index} = {template};\n"),
    ));
    self.edits.push(EditOp::Replace {
      start,
      end,
      text: format!("\"{SENTINEL}\""),
    });
    self.sites.push(ExtractionSite {
      start,
      end,
      index,
      kind,
      class_name: None,
    });
    // The site span was just overwritten; never re-enter it.
  }

  fn visit_call_expr(&mut self, node: &CallExpr) {
    // Promise the tree shaker it may discard this call when the result is
    // unused. Every call gets the annotation, not only suspicious ones.
    let offset = self.byte(node.span.lo);
    self.edits.push(EditOp::Insert {
      offset,
      text: "/* @__PURE__ */ ".into(),
    });
    node.visit_children_with(self);
  }
}

fn default_decl_lo(export: &ExportDefaultDecl) -> BytePos {
  match &export.decl {
    DefaultDecl::Fn(expr) => expr.function.span.lo,
    DefaultDecl::Class(expr) => expr.class.span.lo,
    DefaultDecl::TsInterfaceDecl(decl) => decl.span.lo,
  }
}

fn default_decl_is_named(export: &ExportDefaultDecl) -> bool {
  match &export.decl {
    DefaultDecl::Fn(expr) => expr.ident.is_some(),
    DefaultDecl::Class(expr) => expr.ident.is_some(),
    DefaultDecl::TsInterfaceDecl(_) => true,
  }
}

#[cfg(test)]
mod tests {
  use indoc::indoc;
  use pretty_assertions::assert_eq;
  use severed_core::types::SiteKind;

  use super::*;

  #[test]
  fn static_site_records_raw_template_text() {
    let code = "const a = css`one two three`;\n";
    let classification = classify(code).unwrap();

    assert_eq!(classification.sites.len(), 1);
    let site = &classification.sites[0];
    assert_eq!((site.start, site.end), (10, 28));
    assert_eq!(site.index, 0);
    assert_eq!(
      site.kind,
      SiteKind::Static {
        raw: "one two three".into()
      }
    );
    assert!(!classification.has_dynamic);
  }

  #[test]
  fn interpolated_site_is_dynamic() {
    let code = indoc! {r#"
      const color = 'purple'
      const a = css`
        background: ${color}
      `
    "#};
    let classification = classify(code).unwrap();

    assert_eq!(classification.sites.len(), 1);
    assert_eq!(classification.sites[0].kind, SiteKind::Dynamic);
    assert!(classification.has_dynamic);
    assert!(
      classification
        .derivative
        .contains("export const __severed_css_0 = `\n  background: ${color}\n`;")
    );
    assert!(classification.derivative.contains("const a = \"__severed__\""));
  }

  #[test]
  fn sites_are_ordered_and_non_overlapping() {
    let code = indoc! {r#"
      const a = css`one`;
      const b = css`two`;
      const c = css`${a}`;
    "#};
    let classification = classify(code).unwrap();

    let sites = &classification.sites;
    assert_eq!(sites.len(), 3);
    for (index, site) in sites.iter().enumerate() {
      assert_eq!(site.index, index);
    }
    for pair in sites.windows(2) {
      assert!(pair[0].end <= pair[1].start);
    }
  }

  #[test]
  fn hoists_nested_sites_before_their_top_level_statement() {
    let code = indoc! {r#"
      console.log(css`asdf`)
      { const foo = () => { if (h) return css`background: red`; } }
    "#};
    let classification = classify(code).unwrap();

    let derivative = &classification.derivative;
    assert_eq!(
      derivative,
      indoc! {r#"
        export const __severed_css_0 = `asdf`;
        /* @__PURE__ */ console.log("__severed__")
        export const __severed_css_1 = `background: red`;
        { const foo = () => { if (h) return "__severed__"; } }
      "#}
    );
  }

  #[test]
  fn strips_named_exports_and_re_exports() {
    let code = indoc! {r#"
      export * from './other';
      export { x };
      const x = css`one`;
    "#};
    let classification = classify(code).unwrap();

    let derivative = &classification.derivative;
    assert!(!derivative.contains("export *"));
    assert!(!derivative.contains("export { x }"));
    assert!(derivative.contains("export const __severed_css_0 = `one`;"));
    assert_eq!(classification.sites.len(), 1);
  }

  #[test]
  fn keeps_declarations_of_stripped_exports() {
    let code = indoc! {r#"
      export const theme = 'dark';
      export default function render() {}
      const a = css`${theme}`;
    "#};
    let classification = classify(code).unwrap();

    let derivative = &classification.derivative;
    assert!(derivative.contains("const theme = 'dark';"));
    assert!(!derivative.contains("export const theme"));
    assert!(derivative.contains("function render() {}"));
    assert!(!derivative.contains("export default function"));
  }

  #[test]
  fn anonymous_default_exports_become_discardable() {
    let code = indoc! {r#"
      export default function () { return css`a`; }
      const b = css`c`;
    "#};
    let classification = classify(code).unwrap();

    let derivative = &classification.derivative;
    assert!(derivative.contains("void function () { return \"__severed__\"; }"));
    assert_eq!(classification.sites.len(), 2);
  }

  #[test]
  fn annotates_every_call_expression() {
    let code = indoc! {r#"
      const foo = localStorage.getItem('blah');
      outer(inner(1));
    "#};
    let classification = classify(code).unwrap();

    assert_eq!(
      classification.derivative,
      indoc! {r#"
        const foo = /* @__PURE__ */ localStorage.getItem('blah');
        /* @__PURE__ */ outer(/* @__PURE__ */ inner(1));
      "#}
    );
  }

  #[test]
  fn no_sites_yields_empty_classification() {
    let classification = classify("const a = 1;\n").unwrap();
    assert!(classification.sites.is_empty());
    assert!(!classification.has_dynamic);
  }

  #[test]
  fn parse_errors_propagate() {
    assert!(matches!(
      classify("const = ;"),
      Err(ExtractError::Parse(_))
    ));
  }
}
