use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::plugin::ModuleResolver;

/// Result of a `transform` hook that rewrote the file.
pub struct TransformOutput {
  pub code: String,
  pub map: Option<sourcemap::SourceMap>,
  /// Named assets for the host to write out (push mode).
  pub assets: Vec<EmittedAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedAsset {
  pub name: String,
  pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedId {
  pub id: String,
  /// External ids are left verbatim in the host's output instead of being
  /// resolved and walked.
  pub external: bool,
}

/// Host pipeline description passed to the `options` hook.
///
/// Carries the other plugins registered alongside this one, so the
/// sub-bundler can inherit the host's resolver and transformer chain.
#[derive(Clone, Default)]
pub struct HostOptions {
  pub plugins: Vec<Arc<dyn Plugin>>,
  pub resolver: Option<Arc<dyn ModuleResolver>>,
}

/// Universal plugin interface the host adapter implements.
///
/// One object per host pipeline; hosts call the hooks in the usual
/// options → resolve_id → load → transform order. Every hook may suspend.
#[async_trait]
pub trait Plugin: Debug + Send + Sync {
  fn name(&self) -> &'static str;

  /// Observe the host pipeline configuration before the build starts.
  async fn options(&self, _host: &HostOptions) -> Result<(), anyhow::Error> {
    Ok(())
  }

  /// Claim or externalise an id. `None` yields to the next plugin.
  async fn resolve_id(
    &self,
    _specifier: &str,
    _importer: Option<&str>,
  ) -> Result<Option<ResolvedId>, anyhow::Error> {
    Ok(None)
  }

  /// Serve the content of a claimed id. `None` yields to the next plugin.
  async fn load(&self, _id: &str) -> Result<Option<String>, anyhow::Error> {
    Ok(None)
  }

  /// Rewrite a module. `None` leaves the file unchanged.
  async fn transform(
    &self,
    _code: &str,
    _id: &str,
  ) -> Result<Option<TransformOutput>, anyhow::Error> {
    Ok(None)
  }
}
