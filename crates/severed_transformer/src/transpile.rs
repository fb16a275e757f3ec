use severed_swc_runner::{RunnerError, syntax_for_id};
use swc_core::common::comments::{Comments, SingleThreadedComments};
use swc_core::common::input::StringInput;
use swc_core::common::sync::Lrc;
use swc_core::common::{FileName, GLOBALS, Globals, Mark, SourceMap};
use swc_core::ecma::ast::Program;
use swc_core::ecma::codegen::text_writer::JsWriter;
use swc_core::ecma::parser::lexer::Lexer;
use swc_core::ecma::parser::Parser;
use swc_core::ecma::transforms::base::resolver;
use swc_core::ecma::transforms::{react, typescript};

/// Lowers TypeScript/TSX source to plain JavaScript ahead of classification.
///
/// Classification, bundling and evaluation all operate on JavaScript; hosts
/// that pre-transpile can skip this and hand plain JS straight to the
/// coordinator.
pub fn transpile(code: &str, id: &str) -> Result<String, RunnerError> {
  let syntax = syntax_for_id(id);
  let tsx = severed_core::types::strip_query(id).ends_with(".tsx");

  let source_map = Lrc::new(SourceMap::default());
  let source_file = source_map.new_source_file(Lrc::new(FileName::Anon), code.into());
  let comments = SingleThreadedComments::default();

  let lexer = Lexer::new(
    syntax,
    Default::default(),
    StringInput::from(&*source_file),
    Some(&comments),
  );
  let mut parser = Parser::new_from(lexer);
  let module = parser
    .parse_module()
    .map_err(|error| RunnerError::Parse(error.kind().msg().into_owned()))?;

  GLOBALS.set(&Globals::new(), || -> Result<String, RunnerError> {
    let unresolved_mark = Mark::new();
    let top_level_mark = Mark::new();

    let mut program = Program::Module(module);
    program.mutate(resolver(unresolved_mark, top_level_mark, true));
    program.mutate(typescript::typescript(
      Default::default(),
      unresolved_mark,
      top_level_mark,
    ));
    if tsx {
      program.mutate(react::react(
        source_map.clone(),
        Some(comments.clone()),
        react::Options::default(),
        top_level_mark,
        unresolved_mark,
      ));
    }

    let mut output_buffer = vec![];
    let writer = JsWriter::new(source_map.clone(), "\n", &mut output_buffer, None);
    let mut emitter = swc_core::ecma::codegen::Emitter {
      cfg: Default::default(),
      cm: source_map.clone(),
      comments: Some(&comments as &dyn Comments),
      wr: writer,
    };
    match &program {
      Program::Module(module) => emitter.emit_module(module)?,
      Program::Script(script) => emitter.emit_script(script)?,
    }
    Ok(String::from_utf8(output_buffer)?)
  })
}
