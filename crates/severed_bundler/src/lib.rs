use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use severed_core::plugin::ModuleResolver;
use severed_core::types::ENTRY_ID;
use severed_swc_runner::{run_with_module, syntax_for_id};
use thiserror::Error;

pub mod cjs;
pub mod graph;
pub mod shake;

pub use self::graph::{DepResolution, ModuleGraph, ModuleSource};
pub use self::shake::Needed;

#[derive(Debug, Error)]
pub enum BundleError {
  #[error("failed to bundle `{id}`: {message}")]
  Failed { id: String, message: String },
  #[error("bundling of `{id}` was cancelled")]
  Cancelled { id: String },
}

impl BundleError {
  pub(crate) fn failed(id: &str, cause: impl std::fmt::Display) -> Self {
    BundleError::Failed {
      id: id.to_string(),
      message: cause.to_string(),
    }
  }
}

pub struct BundleRequest<'a> {
  /// The derivative program: the virtual entry's content.
  pub entry_code: &'a str,
  /// Id of the file being extracted; used as the entry's resolution context
  /// and in error messages.
  pub source_id: &'a str,
  pub resolver: Option<&'a dyn ModuleResolver>,
  /// Cooperative cancellation, checked between modules.
  pub cancel: Option<&'a AtomicBool>,
}

struct LoweredModule {
  code: String,
  shaken_for: Needed,
}

/// Bundles the derivative program into one self-contained CommonJS-style
/// script with named exports, tree-shaken down to what the entry's exports
/// need. External ids fall through to the ambient `require`.
pub async fn bundle(request: BundleRequest<'_>) -> Result<String, BundleError> {
  let graph = graph::build_graph(
    request.entry_code,
    request.source_id,
    request.resolver,
    request.cancel,
  )
  .await?;

  let mut needed: HashMap<String, Needed> = HashMap::from([(ENTRY_ID.to_string(), Needed::All)]);
  let mut lowered: HashMap<String, LoweredModule> = HashMap::new();

  // Needed-export sets only ever grow, so this converges; cycles just take
  // an extra pass.
  loop {
    if request
      .cancel
      .is_some_and(|flag| flag.load(Ordering::Relaxed))
    {
      return Err(BundleError::Cancelled {
        id: request.source_id.to_string(),
      });
    }

    let mut changed = false;
    for (id, source) in &graph.modules {
      let Some(need) = needed.get(id).cloned() else {
        continue;
      };
      let stale = lowered
        .get(id)
        .is_none_or(|module| module.shaken_for != need);
      if !stale {
        continue;
      }

      let (code, imports) = shake_and_lower(source, &need, request.source_id)?;
      lowered.insert(
        id.clone(),
        LoweredModule {
          code,
          shaken_for: need,
        },
      );

      for (specifier, demanded) in imports {
        if let Some(DepResolution::Internal(dep_id)) = source.resolutions.get(&specifier) {
          let entry = needed
            .entry(dep_id.clone())
            .or_insert_with(|| Needed::named(Vec::new()));
          changed |= entry.union_with(&demanded);
        }
      }
    }

    if !changed {
      break;
    }
  }

  let dropped = graph.modules.len() - lowered.len();
  if dropped > 0 {
    tracing::debug!(
      id = request.source_id,
      dropped,
      "tree shaking dropped unreferenced modules"
    );
  }

  Ok(emit_script(&graph, &lowered))
}

fn shake_and_lower(
  source: &ModuleSource,
  needed: &Needed,
  source_id: &str,
) -> Result<(String, IndexMap<String, Needed>), BundleError> {
  run_with_module(&source.code, syntax_for_id("module.js"), |_, module| {
    let imports = shake::shake_module(module, needed);
    cjs::lower_to_cjs(module, &source.resolutions);
    imports
  })
  .map_err(|error| BundleError::failed(source_id, error))
}

const RUNTIME: &str = r#"var __severed_cache__ = {};
function __severed_interop__(m) { return m && m.__esModule ? m["default"] : m; }
function __severed_star__(m) { if (m && m.__esModule) return m; var n = { "default": m }; for (var k in m) n[k] = m[k]; return n; }
function __severed_export_star__(from, to) { for (var k in from) if (k !== "default" && k !== "__esModule") to[k] = from[k]; return to; }
function __severed_require__(id) {
  if (!Object.prototype.hasOwnProperty.call(__severed_modules__, id)) return require(id);
  var cached = __severed_cache__[id];
  if (cached) return cached.exports;
  var mod = { exports: {} };
  __severed_cache__[id] = mod;
  __severed_modules__[id](mod, mod.exports, __severed_require__);
  return mod.exports;
}
"#;

fn emit_script(graph: &ModuleGraph, lowered: &HashMap<String, LoweredModule>) -> String {
  let mut script = String::new();
  script.push_str("var __severed_modules__ = {\n");
  for id in graph.modules.keys() {
    if let Some(module) = lowered.get(id) {
      script.push_str(&format!(
        "{}: function(module, exports, require) {{\n{}}},\n",
        json_string(id),
        module.code
      ));
    }
  }
  script.push_str("};\n");
  script.push_str(RUNTIME);
  script.push_str(&format!(
    "module.exports = __severed_require__({});\n",
    json_string(ENTRY_ID)
  ));
  script
}

fn json_string(value: &str) -> String {
  serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
  use indoc::indoc;
  use severed_core::plugin::{MockModuleResolver, Resolution, ResolvedModule};

  use super::*;

  async fn bundle_entry(
    entry_code: &str,
    resolver: Option<&dyn ModuleResolver>,
  ) -> Result<String, BundleError> {
    bundle(BundleRequest {
      entry_code,
      source_id: "/src/app.js",
      resolver,
      cancel: None,
    })
    .await
  }

  #[tokio::test]
  async fn emits_named_exports_for_the_entry() {
    let script = bundle_entry("export const __severed_css_0 = `color: red`;", None)
      .await
      .unwrap();

    assert!(script.contains("exports.__severed_css_0 = __severed_css_0"));
    assert!(script.contains("module.exports = __severed_require__("));
    assert!(script.contains("\\u0000severed:entry"));
  }

  #[tokio::test]
  async fn drops_unused_side_effecting_code() {
    let entry = indoc! {r#"
      const foo = /* @__PURE__ */ localStorage.getItem('blah');
      const color = 'purple';
      export const __severed_css_0 = `background: ${color}`;
    "#};

    let script = bundle_entry(entry, None).await.unwrap();
    assert!(!script.contains("localStorage"));
    assert!(script.contains("purple"));
  }

  #[tokio::test]
  async fn shakes_dependency_modules_down_to_demanded_exports() {
    let mut resolver = MockModuleResolver::new();
    resolver.expect_resolve().returning(|_, _| {
      Ok(Resolution::Resolved(ResolvedModule {
        id: "/src/theme.js".into(),
        code: Some(indoc! {r#"
          export const theme = 'dark';
          export const unused = makeConnection();
        "#}
        .into()),
      }))
    });

    let entry = indoc! {r#"
      import { theme } from './theme.js';
      export const __severed_css_0 = `color: ${theme}`;
    "#};

    let script = bundle_entry(entry, Some(&resolver)).await.unwrap();
    assert!(script.contains("'dark'"));
    assert!(!script.contains("makeConnection"));
    assert!(script.contains("/src/theme.js"));
  }

  #[tokio::test]
  async fn unreferenced_modules_are_not_emitted() {
    let mut resolver = MockModuleResolver::new();
    resolver.expect_resolve().returning(|specifier, _| {
      Ok(Resolution::Resolved(ResolvedModule {
        id: format!("/src/{}", specifier.trim_start_matches("./")),
        code: Some("export const dead = databaseConnection();".into()),
      }))
    });

    let entry = indoc! {r#"
      import { dead } from './dead.js';
      export const __severed_css_0 = `color: red`;
    "#};

    let script = bundle_entry(entry, Some(&resolver)).await.unwrap();
    assert!(!script.contains("databaseConnection"));
    assert!(!script.contains("/src/dead.js"));
  }

  #[tokio::test]
  async fn bare_specifiers_survive_as_runtime_requires() {
    let entry = indoc! {r#"
      import chalk from 'chalk';
      export const __severed_css_0 = `color: ${chalk.red}`;
    "#};

    let script = bundle_entry(entry, None).await.unwrap();
    assert!(script.contains(r#"require("chalk")"#));
  }

  #[tokio::test]
  async fn cancellation_surfaces_as_cancelled() {
    let cancel = AtomicBool::new(true);
    let result = bundle(BundleRequest {
      entry_code: "export const __severed_css_0 = `a`;",
      source_id: "/src/app.js",
      resolver: None,
      cancel: Some(&cancel),
    })
    .await;
    assert!(matches!(result, Err(BundleError::Cancelled { .. })));
  }

  #[tokio::test]
  async fn failures_carry_the_source_id() {
    let error = bundle_entry("const = ;", None).await.unwrap_err();
    assert!(error.to_string().contains("/src/app.js"));
  }
}
