use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use severed_core::css_buffer::CssBuffer;
use severed_core::hash;
use severed_core::plugin::{
  CssEmitter, EmittedAsset, HashedCssEmitter, HostOptions, ModuleResolver, Plugin, ResolvedId,
  ResolvedModule, Resolution, TransformOutput,
};
use severed_core::types::{
  CSS_ASSET_SUFFIX, QUERY_PARAM, SeveredOptions, is_source_id, strip_query,
};
use severed_transformer::{ExtractOptions, extract_file, transpile};

static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new("[^a-zA-Z0-9]+").unwrap());

/// The severed plugin object.
///
/// Pull mode (default): rewritten files import a virtual
/// `<id>?severed=<hash>&lang.css` id that `resolve_id`/`load` serve from the
/// in-memory buffer. Push mode (`writeCSSFiles`): each transform emits a
/// named `.severed.css` asset and the import is left external for a
/// downstream pipeline to satisfy.
#[derive(Debug)]
pub struct SeveredPlugin {
  options: SeveredOptions,
  emitter: Arc<dyn CssEmitter>,
  buffer: CssBuffer,
  /// Snapshot of the host pipeline, taken in `options`, so the sub-bundler
  /// resolves and transpiles the way the host does.
  resolver: RwLock<Option<Arc<dyn ModuleResolver>>>,
  cwd: PathBuf,
}

impl SeveredPlugin {
  pub fn new(options: SeveredOptions) -> Self {
    Self {
      options,
      emitter: Arc::new(HashedCssEmitter::default()),
      buffer: CssBuffer::global().clone(),
      resolver: RwLock::new(None),
      cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
  }

  pub fn with_emitter(mut self, emitter: Arc<dyn CssEmitter>) -> Self {
    self.emitter = emitter;
    self
  }

  pub fn with_buffer(mut self, buffer: CssBuffer) -> Self {
    self.buffer = buffer;
    self
  }

  pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
    self.cwd = cwd.into();
    self
  }

  pub fn with_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
    *self.resolver.get_mut() = Some(resolver);
    self
  }

  /// Flattened, cwd-relative stem for push-mode asset paths.
  fn asset_stem(&self, source_id: &str) -> String {
    let path = strip_query(source_id);
    let relative = Path::new(path)
      .strip_prefix(&self.cwd)
      .map(|relative| relative.to_string_lossy().into_owned())
      .unwrap_or_else(|_| path.to_string());
    NON_ALPHANUMERIC
      .replace_all(&relative, "-")
      .trim_matches('-')
      .to_string()
  }

  fn push_asset_path(&self, source_id: &str) -> String {
    format!("{}{CSS_ASSET_SUFFIX}", self.asset_stem(source_id))
  }

  /// `<source-id>?severed=<5-hex>&lang.css`; the hash busts id-keyed caches
  /// whenever the CSS content changes.
  fn pull_virtual_id(source_id: &str, css: &str) -> String {
    format!(
      "{source_id}?{QUERY_PARAM}={}&lang.css",
      hash::short_hash(css)
    )
  }
}

fn has_severed_query(id: &str) -> bool {
  id.split_once('?').is_some_and(|(_, query)| {
    query.split('&').any(|pair| {
      pair
        .strip_prefix(QUERY_PARAM)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('='))
    })
  })
}

#[async_trait]
impl Plugin for SeveredPlugin {
  fn name(&self) -> &'static str {
    "severed"
  }

  async fn options(&self, host: &HostOptions) -> Result<(), anyhow::Error> {
    let plugins: Vec<Arc<dyn Plugin>> = host
      .plugins
      .iter()
      .filter(|plugin| plugin.name() != self.name())
      .cloned()
      .collect();
    if plugins.is_empty() && host.resolver.is_none() {
      return Ok(());
    }
    tracing::debug!(plugins = plugins.len(), "snapshotted host pipeline for the sub-bundler");
    *self.resolver.write() = Some(Arc::new(PluginChainResolver {
      plugins,
      base: host.resolver.clone(),
    }));
    Ok(())
  }

  async fn resolve_id(
    &self,
    specifier: &str,
    _importer: Option<&str>,
  ) -> Result<Option<ResolvedId>, anyhow::Error> {
    if self.options.write_css_files {
      // The emitted asset import is someone else's to fulfil.
      if strip_query(specifier).ends_with(CSS_ASSET_SUFFIX) {
        return Ok(Some(ResolvedId {
          id: specifier.to_string(),
          external: true,
        }));
      }
    } else if has_severed_query(specifier) {
      return Ok(Some(ResolvedId {
        id: specifier.to_string(),
        external: false,
      }));
    }
    Ok(None)
  }

  async fn load(&self, id: &str) -> Result<Option<String>, anyhow::Error> {
    if !self.options.write_css_files && has_severed_query(id) {
      return Ok(self.buffer.get(strip_query(id)));
    }
    Ok(None)
  }

  async fn transform(
    &self,
    code: &str,
    id: &str,
  ) -> Result<Option<TransformOutput>, anyhow::Error> {
    if !is_source_id(id) {
      return Ok(None);
    }

    let path = strip_query(id);
    let transpiled;
    let source = if path.ends_with(".ts") || path.ends_with(".tsx") {
      transpiled = transpile(code, id)?;
      transpiled.as_str()
    } else {
      code
    };

    let resolver = self.resolver.read().clone();
    let write_css_files = self.options.write_css_files;
    let push_path = self.push_asset_path(id);
    let asset_name = {
      let push_path = push_path.clone();
      move |source_id: &str, css: &str| {
        if write_css_files {
          push_path.clone()
        } else {
          Self::pull_virtual_id(source_id, css)
        }
      }
    };

    let Some(output) = extract_file(
      source,
      ExtractOptions {
        source_id: id,
        emitter: self.emitter.as_ref(),
        resolver: resolver.as_deref(),
        require_hook: None,
        buffer: &self.buffer,
        asset_name: &asset_name,
        cancel: None,
      },
    )
    .await?
    else {
      return Ok(None);
    };

    let assets = if write_css_files {
      vec![EmittedAsset {
        name: push_path,
        source: output.css.clone(),
      }]
    } else {
      Vec::new()
    };

    Ok(Some(TransformOutput {
      code: output.code,
      map: Some(output.map),
      assets,
    }))
  }
}

/// Resolver that runs specifiers through the snapshotted host pipeline:
/// resolve through each plugin, then load and transform the winner.
#[derive(Debug)]
struct PluginChainResolver {
  plugins: Vec<Arc<dyn Plugin>>,
  base: Option<Arc<dyn ModuleResolver>>,
}

impl PluginChainResolver {
  async fn load_and_transform(&self, id: &str) -> Result<Option<String>, anyhow::Error> {
    for plugin in &self.plugins {
      if let Some(loaded) = plugin.load(id).await? {
        let mut code = loaded;
        for plugin in &self.plugins {
          if let Some(output) = plugin.transform(&code, id).await? {
            code = output.code;
          }
        }
        return Ok(Some(code));
      }
    }
    match &self.base {
      Some(base) => base.load(id).await,
      None => Ok(None),
    }
  }
}

#[async_trait]
impl ModuleResolver for PluginChainResolver {
  async fn resolve(
    &self,
    specifier: &str,
    importer: &str,
  ) -> Result<Resolution, anyhow::Error> {
    for plugin in &self.plugins {
      if let Some(resolved) = plugin.resolve_id(specifier, Some(importer)).await? {
        if resolved.external {
          return Ok(Resolution::External);
        }
        let code = self.load_and_transform(&resolved.id).await?;
        return Ok(Resolution::Resolved(ResolvedModule {
          id: resolved.id,
          code,
        }));
      }
    }
    match &self.base {
      Some(base) => base.resolve(specifier, importer).await,
      None => Ok(Resolution::Unresolved),
    }
  }

  async fn load(&self, id: &str) -> Result<Option<String>, anyhow::Error> {
    self.load_and_transform(id).await
  }
}
