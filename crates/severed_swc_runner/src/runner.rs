use std::string::FromUtf8Error;

use swc_core::common::input::StringInput;
use swc_core::common::sync::Lrc;
use swc_core::common::{BytePos, FileName, GLOBALS, Globals, Mark, SourceMap};
use swc_core::ecma::ast::Module;
use swc_core::ecma::codegen::text_writer::JsWriter;
use swc_core::ecma::parser::lexer::Lexer;
use swc_core::ecma::parser::{EsSyntax, Parser, Syntax, TsSyntax};
use swc_core::ecma::transforms::base::resolver;
use swc_core::ecma::visit::{Visit, VisitMut, VisitMutWith, VisitWith};

pub struct RunContext {
  /// Source-map in use
  pub source_map: Lrc<SourceMap>,
  /// Global mark from the SWC resolver
  pub global_mark: Mark,
  /// Unresolved mark from the SWC resolver
  pub unresolved_mark: Mark,
  /// Position of the first byte of the file. Subtracting it from a span's
  /// `lo`/`hi` yields byte offsets into the original text.
  pub file_start: BytePos,
}

impl RunContext {
  pub fn byte_offset(&self, pos: BytePos) -> usize {
    (pos.0 - self.file_start.0) as usize
  }
}

pub struct RunVisitResult<V> {
  pub output_code: String,
  pub visitor: V,
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
  /// Parser syntax error, message preserved verbatim.
  #[error("{0}")]
  Parse(String),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("invalid utf-8 output: {0}")]
  InvalidUtf8Output(#[from] FromUtf8Error),
}

/// Parser syntax for a module id, by extension.
pub fn syntax_for_id(id: &str) -> Syntax {
  let path = id.split('?').next().unwrap_or(id);
  if path.ends_with(".ts") || path.ends_with(".tsx") || path.ends_with(".cts") {
    Syntax::Typescript(TsSyntax {
      tsx: path.ends_with(".tsx"),
      ..Default::default()
    })
  } else {
    Syntax::Es(EsSyntax {
      jsx: path.ends_with(".jsx"),
      ..Default::default()
    })
  }
}

/// Runner of SWC transformations
///
/// * Parse `code` with SWC
/// * Run a visitor over it
/// * Return the result
///
pub fn run_visit<V: VisitMut>(
  code: &str,
  syntax: Syntax,
  make_visit: impl FnOnce(&RunContext) -> V,
) -> Result<RunVisitResult<V>, RunnerError> {
  let (output_code, visitor) = run_with_module(code, syntax, |context, module| {
    let mut visit = make_visit(context);
    module.visit_mut_with(&mut visit);
    visit
  })?;
  Ok(RunVisitResult {
    output_code,
    visitor,
  })
}

/// Same as `run_visit` but for `Visit` instead of `VisitMut`
pub fn run_visit_const<V: Visit>(
  code: &str,
  syntax: Syntax,
  make_visit: impl FnOnce(&RunContext) -> V,
) -> Result<RunVisitResult<V>, RunnerError> {
  let (output_code, visitor) = run_with_module(code, syntax, |context, module| {
    let mut visit = make_visit(context);
    module.visit_with(&mut visit);
    visit
  })?;
  Ok(RunVisitResult {
    output_code,
    visitor,
  })
}

/// Parse code, run the resolver over it, hand the module to `transform`, then
/// codegen and return the printed module alongside the transform result.
///
/// Everything that touches SWC marks runs inside one `GLOBALS` scope.
pub fn run_with_module<R>(
  code: &str,
  syntax: Syntax,
  transform: impl FnOnce(&RunContext, &mut Module) -> R,
) -> Result<(String, R), RunnerError> {
  let source_map = Lrc::new(SourceMap::default());
  let source_file = source_map.new_source_file(Lrc::new(FileName::Anon), code.into());

  let lexer = Lexer::new(
    syntax,
    Default::default(),
    StringInput::from(&*source_file),
    None,
  );

  let mut parser = Parser::new_from(lexer);
  let mut module = parser
    .parse_module()
    .map_err(|error| RunnerError::Parse(error.kind().msg().into_owned()))?;

  GLOBALS.set(&Globals::new(), || -> Result<(String, R), RunnerError> {
    let global_mark = Mark::new();
    let unresolved_mark = Mark::new();
    module.visit_mut_with(&mut resolver(unresolved_mark, global_mark, false));

    let context = RunContext {
      source_map: source_map.clone(),
      global_mark,
      unresolved_mark,
      file_start: source_file.start_pos,
    };
    let result = transform(&context, &mut module);

    let mut output_buffer = vec![];
    let writer = JsWriter::new(source_map.clone(), "\n", &mut output_buffer, None);
    let mut emitter = swc_core::ecma::codegen::Emitter {
      cfg: Default::default(),
      cm: source_map.clone(),
      comments: None,
      wr: writer,
    };
    emitter.emit_module(&module)?;
    let output_code = String::from_utf8(output_buffer)?;

    Ok((output_code, result))
  })
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use swc_core::ecma::ast::{Lit, Str};
  use swc_core::ecma::visit::VisitMut;

  use super::*;

  #[test]
  fn runs_a_visitor_over_parsed_code() {
    struct Visitor;
    impl VisitMut for Visitor {
      fn visit_mut_lit(&mut self, n: &mut Lit) {
        *n = Lit::Str(Str::from("replacement"));
      }
    }

    let code = r#"console.log('test!')"#;
    let RunVisitResult { output_code, .. } =
      run_visit(code, syntax_for_id("file.js"), |_| Visitor).unwrap();
    assert_eq!(
      output_code,
      r#"console.log("replacement");
"#
    );
  }

  #[test]
  fn surfaces_parse_errors() {
    let result = run_visit("const = ;", syntax_for_id("file.js"), |_| NoopVisitor);
    assert!(matches!(result, Err(RunnerError::Parse(_))));
  }

  struct NoopVisitor;
  impl VisitMut for NoopVisitor {}

  #[test]
  fn selects_typescript_syntax_by_extension() {
    assert!(matches!(syntax_for_id("a.ts"), Syntax::Typescript(ts) if !ts.tsx));
    assert!(matches!(syntax_for_id("a.tsx?v=1"), Syntax::Typescript(ts) if ts.tsx));
    assert!(matches!(syntax_for_id("a.js"), Syntax::Es(es) if !es.jsx));
  }

  #[test]
  fn byte_offsets_are_relative_to_file_start() {
    use swc_core::common::Spanned;

    let code = "const a = 1;\nconst b = 2;\n";
    let (_, offsets) = run_with_module(code, syntax_for_id("file.js"), |context, module| {
      module
        .body
        .iter()
        .map(|item| context.byte_offset(item.span_lo()))
        .collect::<Vec<_>>()
    })
    .unwrap();
    assert_eq!(offsets, vec![0, 13]);
  }
}
