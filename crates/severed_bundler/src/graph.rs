use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use severed_core::plugin::{ModuleResolver, Resolution};
use severed_core::types::{ENTRY_ID, strip_query};
use severed_swc_runner::{RunVisitResult, run_visit_const, syntax_for_id};
use swc_core::ecma::ast::{ExportAll, ImportDecl, NamedExport};
use swc_core::ecma::visit::{Visit, VisitWith};

use crate::BundleError;

/// Where a dependency edge points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepResolution {
  /// Resolved into the graph under this module id.
  Internal(String),
  /// Left as a runtime require of this id.
  External(String),
}

#[derive(Debug)]
pub struct ModuleSource {
  pub code: String,
  /// specifier → resolution, in declaration order.
  pub resolutions: IndexMap<String, DepResolution>,
}

/// Modules keyed by id: the virtual entry first, then breadth-first
/// discovery order. Iteration order is emission order.
#[derive(Debug, Default)]
pub struct ModuleGraph {
  pub modules: IndexMap<String, ModuleSource>,
}

pub async fn build_graph(
  entry_code: &str,
  source_id: &str,
  resolver: Option<&dyn ModuleResolver>,
  cancel: Option<&AtomicBool>,
) -> Result<ModuleGraph, BundleError> {
  let mut graph = ModuleGraph::default();
  let mut seen: HashSet<String> = HashSet::from([ENTRY_ID.to_string()]);
  // (module id, importer used for resolution, code)
  let mut queue: VecDeque<(String, String, String)> = VecDeque::new();
  queue.push_back((
    ENTRY_ID.to_string(),
    source_id.to_string(),
    entry_code.to_string(),
  ));

  while let Some((id, importer, code)) = queue.pop_front() {
    if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
      return Err(BundleError::Cancelled {
        id: source_id.to_string(),
      });
    }

    let specifiers =
      collect_specifiers(&code, &id).map_err(|error| BundleError::failed(source_id, error))?;

    let mut resolutions = IndexMap::new();
    for specifier in specifiers {
      match resolve_specifier(&specifier, &importer, resolver, source_id).await? {
        ResolvedDep::External(target) => {
          resolutions.insert(specifier, DepResolution::External(target));
        }
        ResolvedDep::Internal { id: dep_id, code } => {
          if seen.insert(dep_id.clone()) {
            queue.push_back((dep_id.clone(), dep_id.clone(), code));
          }
          resolutions.insert(specifier, DepResolution::Internal(dep_id));
        }
      }
    }

    graph.modules.insert(id, ModuleSource { code, resolutions });
  }

  Ok(graph)
}

enum ResolvedDep {
  External(String),
  Internal { id: String, code: String },
}

fn looks_pathlike(specifier: &str) -> bool {
  specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

fn is_css_id(id: &str) -> bool {
  strip_query(id).ends_with(".css")
}

async fn resolve_specifier(
  specifier: &str,
  importer: &str,
  resolver: Option<&dyn ModuleResolver>,
  source_id: &str,
) -> Result<ResolvedDep, BundleError> {
  let Some(resolver) = resolver else {
    if looks_pathlike(specifier) {
      tracing::warn!(specifier, importer, "no resolver for path-like import, leaving external");
    }
    return Ok(ResolvedDep::External(specifier.to_string()));
  };

  let resolution = resolver
    .resolve(specifier, importer)
    .await
    .map_err(|error| BundleError::failed(source_id, error))?;

  match resolution {
    Resolution::Unresolved => {
      // Non-fatal: bare specifiers stay runtime requires; path-like misses
      // only fail if evaluation actually reaches them.
      if looks_pathlike(specifier) {
        tracing::warn!(specifier, importer, "unresolved path-like import, leaving external");
      }
      Ok(ResolvedDep::External(specifier.to_string()))
    }
    Resolution::External => Ok(ResolvedDep::External(specifier.to_string())),
    Resolution::Resolved(module) => {
      if is_css_id(&module.id) {
        // CSS stays external and is never walked.
        return Ok(ResolvedDep::External(module.id));
      }
      let code = match module.code {
        Some(code) => code,
        None => resolver
          .load(&module.id)
          .await
          .map_err(|error| BundleError::failed(source_id, error))?
          .ok_or_else(|| {
            BundleError::failed(
              source_id,
              format!("resolved module `{}` has no loadable code", module.id),
            )
          })?,
      };
      Ok(ResolvedDep::Internal {
        id: module.id,
        code,
      })
    }
  }
}

fn collect_specifiers(code: &str, id: &str) -> Result<Vec<String>, severed_swc_runner::RunnerError> {
  let RunVisitResult { visitor, .. } =
    run_visit_const(code, syntax_for_id(id), |_| SpecifierCollector::default())?;
  Ok(visitor.specifiers)
}

#[derive(Default)]
struct SpecifierCollector {
  specifiers: Vec<String>,
}

impl SpecifierCollector {
  fn push(&mut self, specifier: &str) {
    if !self.specifiers.iter().any(|s| s == specifier) {
      self.specifiers.push(specifier.to_string());
    }
  }
}

impl Visit for SpecifierCollector {
  fn visit_import_decl(&mut self, import: &ImportDecl) {
    self.push(import.src.value.as_ref());
  }

  fn visit_named_export(&mut self, export: &NamedExport) {
    if let Some(src) = &export.src {
      self.push(src.value.as_ref());
    }
    export.visit_children_with(self);
  }

  fn visit_export_all(&mut self, export: &ExportAll) {
    self.push(export.src.value.as_ref());
  }
}
