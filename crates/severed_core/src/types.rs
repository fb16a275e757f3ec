use serde::Deserialize;

/// Tag identifier recognised on tagged template literals.
///
/// Recognition is textual: a local binding shadowing `css` still matches.
pub const CSS_TAG: &str = "css";

/// Prefix of the per-site export names in the derivative program.
pub const EXPORT_PREFIX: &str = "__severed_css_";

/// Fixed string literal written over each extraction site in the derivative
/// program.
pub const SENTINEL: &str = "__severed__";

/// Virtual entry id fed to the sub-bundler. NUL-prefixed so it can never
/// collide with a real filesystem path.
pub const ENTRY_ID: &str = "\0severed:entry";

/// Suffix of push-mode asset paths.
pub const CSS_ASSET_SUFFIX: &str = ".severed.css";

/// Query parameter carried by pull-mode virtual ids.
pub const QUERY_PARAM: &str = "severed";

/// File extensions eligible for `transform`.
pub const SOURCE_EXTENSIONS: &[&str] = &["js", "ts", "tsx"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteKind {
  /// Template with zero interpolations; `raw` is the cooked text of the sole
  /// template chunk.
  Static { raw: String },
  Dynamic,
}

/// One `css`…`` occurrence marked for replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionSite {
  /// Byte range `[start, end)` of the whole tag-plus-template span in the
  /// original text.
  pub start: usize,
  pub end: usize,
  /// Zero-based ordinal of the site within its file, in source order.
  pub index: usize,
  pub kind: SiteKind,
  /// Filled in once the site's CSS has been emitted.
  pub class_name: Option<String>,
}

impl ExtractionSite {
  pub fn is_static(&self) -> bool {
    matches!(self.kind, SiteKind::Static { .. })
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SeveredOptions {
  /// Emit a named CSS asset per source file (push mode) instead of serving
  /// virtual modules from the in-memory buffer (pull mode).
  #[serde(rename = "writeCSSFiles")]
  pub write_css_files: bool,
}

/// Strips a `?query` suffix from a module id.
pub fn strip_query(id: &str) -> &str {
  id.split('?').next().unwrap_or(id)
}

/// Whether an id (query stripped) is in the source-dialect whitelist.
pub fn is_source_id(id: &str) -> bool {
  let path = strip_query(id);
  path
    .rsplit('.')
    .next()
    .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext) && ext.len() < path.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strips_query_suffix() {
    assert_eq!(strip_query("/app/src/a.ts?severed=abc12&lang.css"), "/app/src/a.ts");
    assert_eq!(strip_query("/app/src/a.ts"), "/app/src/a.ts");
  }

  #[test]
  fn whitelists_source_extensions() {
    assert!(is_source_id("/app/src/a.js"));
    assert!(is_source_id("/app/src/a.ts?v=2"));
    assert!(is_source_id("/app/src/a.tsx"));
    assert!(!is_source_id("/app/src/a.jsx"));
    assert!(!is_source_id("/app/src/a.css"));
    assert!(!is_source_id("/app/src/tsx"));
  }

  #[test]
  fn options_deserialize_from_camel_case() {
    let options: SeveredOptions = serde_json::from_str(r#"{ "writeCSSFiles": true }"#).unwrap();
    assert!(options.write_css_files);

    let options: SeveredOptions = serde_json::from_str("{}").unwrap();
    assert!(!options.write_css_files);
  }
}
