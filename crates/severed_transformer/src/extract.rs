use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use severed_bundler::{BundleError, BundleRequest, bundle};
use severed_core::css_buffer::CssBuffer;
use severed_core::plugin::{CssEmitter, ModuleResolver};
use severed_core::types::{ExtractionSite, SiteKind, strip_query};
use severed_evaluator::{EvalError, NoRuntimeModules, RequireHook, evaluate_severed_exports};
use severed_swc_runner::RunnerError;
use thiserror::Error;

use crate::classifier::classify;
use crate::text_editor::{EditError, TextEditor};

/// Separator between CSS fragments of one file: two blank lines.
pub const FRAGMENT_SEPARATOR: &str = "\n\n\n";

#[derive(Debug, Error)]
pub enum ExtractError {
  /// Parser syntax error, propagated unchanged.
  #[error("{0}")]
  Parse(String),
  #[error(transparent)]
  Edit(#[from] EditError),
  #[error(transparent)]
  Bundle(#[from] BundleError),
  #[error(transparent)]
  Eval(#[from] EvalError),
  #[error("failed to emit css for `{id}`: {source}")]
  Emit {
    id: String,
    #[source]
    source: anyhow::Error,
  },
  #[error("no evaluated value for extraction site {index} of `{id}`")]
  MissingValue { id: String, index: usize },
  #[error(transparent)]
  Runner(RunnerError),
}

impl From<RunnerError> for ExtractError {
  fn from(error: RunnerError) -> Self {
    match error {
      RunnerError::Parse(message) => ExtractError::Parse(message),
      other => ExtractError::Runner(other),
    }
  }
}

pub struct ExtractOptions<'a> {
  /// Opaque id of the file being transformed, used for buffer keys, error
  /// messages and evaluator resolution context.
  pub source_id: &'a str,
  pub emitter: &'a dyn CssEmitter,
  /// Resolver for the sub-bundler; `None` leaves every import external.
  pub resolver: Option<&'a dyn ModuleResolver>,
  /// Runtime modules for bare requires that survive tree shaking.
  pub require_hook: Option<Arc<dyn RequireHook>>,
  pub buffer: &'a CssBuffer,
  /// Name-maker: `(source_id, accumulated_css) → import specifier`.
  pub asset_name: &'a (dyn Fn(&str, &str) -> String + Send + Sync),
  pub cancel: Option<&'a AtomicBool>,
}

pub struct ExtractOutput {
  pub code: String,
  pub map: sourcemap::SourceMap,
  /// Accumulated CSS, as stored in the buffer.
  pub css: String,
  /// Sites with their class names filled in.
  pub sites: Vec<ExtractionSite>,
}

/// Runs the whole per-file pipeline. Returns `None` when the file has no
/// extraction sites; the host keeps the file unchanged.
pub async fn extract_file(
  code: &str,
  options: ExtractOptions<'_>,
) -> Result<Option<ExtractOutput>, ExtractError> {
  if !code.contains("css`") {
    return Ok(None);
  }

  let buffer_key = strip_query(options.source_id).to_string();
  options.buffer.remove(&buffer_key);

  let classification = classify(code)?;
  if classification.sites.is_empty() {
    return Ok(None);
  }
  let mut sites = classification.sites;

  let mut values: Vec<Option<String>> = vec![None; sites.len()];
  if classification.has_dynamic {
    let script = bundle(BundleRequest {
      entry_code: &classification.derivative,
      source_id: options.source_id,
      resolver: options.resolver,
      cancel: options.cancel,
    })
    .await?;
    let hook = options
      .require_hook
      .clone()
      .unwrap_or_else(|| Arc::new(NoRuntimeModules));
    for (index, value) in evaluate_severed_exports(&script, options.source_id, hook)? {
      if let Some(slot) = values.get_mut(index) {
        *slot = Some(value);
      }
    }
  } else {
    // Static fast path: no bundling, no evaluation.
    for site in &sites {
      if let SiteKind::Static { raw } = &site.kind {
        values[site.index] = Some(raw.clone());
      }
    }
  }

  let mut editor = TextEditor::new(code);
  let mut fragments: Vec<String> = Vec::new();
  let mut seen_classes = HashSet::new();

  // Sites are in source order, so `emit` observes ascending byte starts.
  for site in &mut sites {
    let value = values[site.index]
      .take()
      .ok_or_else(|| ExtractError::MissingValue {
        id: options.source_id.to_string(),
        index: site.index,
      })?;
    let emitted = options
      .emitter
      .emit(&value)
      .await
      .map_err(|source| ExtractError::Emit {
        id: options.source_id.to_string(),
        source,
      })?;
    if seen_classes.insert(emitted.class_name.clone()) {
      fragments.push(emitted.css);
    }
    editor.replace(site.start..site.end, json_string(&emitted.class_name));
    site.class_name = Some(emitted.class_name);
  }

  let css = fragments.join(FRAGMENT_SEPARATOR);
  let import_specifier = (options.asset_name)(options.source_id, &css);
  editor.insert(0, format!("import {};\n", json_string(&import_specifier)));

  let (rewritten, map) = editor.finish_with_map(options.source_id)?;
  options.buffer.insert(&buffer_key, css.clone());
  tracing::debug!(
    id = options.source_id,
    sites = sites.len(),
    "extracted css"
  );

  Ok(Some(ExtractOutput {
    code: rewritten,
    map,
    css,
    sites,
  }))
}

fn json_string(value: &str) -> String {
  serde_json::Value::String(value.to_string()).to_string()
}
