use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

mod engine;

#[derive(Debug, Error)]
pub enum EvalError {
  #[error("Failed to evaluate `{id}` while extracting css: {cause}")]
  Evaluation { id: String, cause: String },
  #[error("expected css to evaluate to string")]
  NonString,
}

/// Source text for a module requested at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
  /// Resolved id; the loader caches modules under it.
  pub id: String,
  pub code: String,
}

/// Supplies runtime modules for bare specifiers that survived tree shaking.
///
/// `importer` is the id of the requiring module; the original file id for
/// top-level requires, so resolution happens from the correct location.
pub trait RequireHook: Debug + Send + Sync {
  fn require(&self, specifier: &str, importer: &str) -> Result<ResolvedSource, anyhow::Error>;
}

/// Default hook: extraction-time code must not depend on runtime modules.
#[derive(Debug, Default)]
pub struct NoRuntimeModules;

impl RequireHook for NoRuntimeModules {
  fn require(&self, specifier: &str, importer: &str) -> Result<ResolvedSource, anyhow::Error> {
    Err(anyhow::anyhow!(
      "cannot resolve module '{specifier}' (required by '{importer}') during css extraction"
    ))
  }
}

/// Executes a self-contained CommonJS-style script in-process and harvests
/// its `__severed_css_<i>` exports, keyed by site index.
///
/// Runs synchronously; the script's top level completes before this returns.
/// No sandboxing: code paths reaching evaluation are expected to be pure.
pub fn evaluate_severed_exports(
  script: &str,
  source_id: &str,
  hook: Arc<dyn RequireHook>,
) -> Result<BTreeMap<usize, String>, EvalError> {
  engine::run_and_harvest(script, source_id, hook)
}

#[cfg(test)]
mod tests {
  use indoc::indoc;
  use pretty_assertions::assert_eq;

  use super::*;

  fn evaluate(script: &str) -> Result<BTreeMap<usize, String>, EvalError> {
    evaluate_severed_exports(script, "/src/app.js", Arc::new(NoRuntimeModules))
  }

  #[test]
  fn harvests_prefixed_string_exports() {
    let values = evaluate(indoc! {r#"
      exports.__severed_css_0 = "color: red";
      exports.__severed_css_1 = ["color: ", "blue"].join("");
      exports.unrelated = 42;
    "#})
    .unwrap();

    assert_eq!(values.len(), 2);
    assert_eq!(values[&0], "color: red");
    assert_eq!(values[&1], "color: blue");
  }

  #[test]
  fn reassigned_module_exports_are_harvested() {
    let values = evaluate("module.exports = { __severed_css_0: 'a' };").unwrap();
    assert_eq!(values[&0], "a");
  }

  #[test]
  fn non_string_export_is_a_type_error() {
    let error = evaluate("exports.__severed_css_0 = 42;").unwrap_err();
    assert_eq!(error.to_string(), "expected css to evaluate to string");
  }

  #[test]
  fn thrown_errors_carry_the_prefixed_message() {
    let error = evaluate("throw new Error('boom');").unwrap_err();
    let message = error.to_string();
    assert!(
      message.starts_with("Failed to evaluate `/src/app.js` while extracting css:"),
      "unexpected message: {message}"
    );
    assert!(message.contains("boom"));
  }

  #[test]
  fn syntax_errors_carry_the_prefixed_message() {
    let error = evaluate("this is not javascript").unwrap_err();
    assert!(
      error
        .to_string()
        .starts_with("Failed to evaluate `/src/app.js` while extracting css:")
    );
  }

  #[test]
  fn undefined_references_surface_from_user_code() {
    let error = evaluate("exports.__severed_css_0 = `color: ${nope}`;").unwrap_err();
    assert!(error.to_string().contains("nope"));
  }

  #[test]
  fn default_hook_rejects_runtime_requires() {
    let error = evaluate("require('fs');").unwrap_err();
    let message = error.to_string();
    assert!(message.contains("cannot resolve module 'fs'"));
    assert!(message.contains("/src/app.js"));
  }

  #[test]
  fn hook_supplied_modules_are_loaded_and_cached() {
    #[derive(Debug)]
    struct Tokens;
    impl RequireHook for Tokens {
      fn require(
        &self,
        specifier: &str,
        _importer: &str,
      ) -> Result<ResolvedSource, anyhow::Error> {
        assert_eq!(specifier, "design-tokens");
        Ok(ResolvedSource {
          id: "design-tokens".into(),
          code: "exports.primary = 'purple'; globalThis.__loads = (globalThis.__loads || 0) + 1;"
            .into(),
        })
      }
    }

    let values = evaluate_severed_exports(
      indoc! {r#"
        var first = require("design-tokens");
        var second = require("design-tokens");
        if (globalThis.__loads !== 1) throw new Error("module loaded twice");
        exports.__severed_css_0 = "color: " + first.primary;
        exports.__severed_css_1 = "background: " + second.primary;
      "#},
      "/src/app.js",
      Arc::new(Tokens),
    )
    .unwrap();

    assert_eq!(values[&0], "color: purple");
    assert_eq!(values[&1], "background: purple");
  }
}
