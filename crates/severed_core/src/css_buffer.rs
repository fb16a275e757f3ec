use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

static GLOBAL: Lazy<CssBuffer> = Lazy::new(CssBuffer::new);

/// Process-wide map of `source id → accumulated CSS text`.
///
/// The file coordinator writes entries during `transform` (removing the old
/// entry first, writing the new one only on success). Pull-mode `load` reads
/// entries under the query-stripped id. Entries are overwritten, never
/// appended, on re-transform of the same id.
#[derive(Debug, Clone, Default)]
pub struct CssBuffer {
  inner: Arc<RwLock<HashMap<String, String>>>,
}

impl CssBuffer {
  pub fn new() -> Self {
    Self::default()
  }

  /// The buffer shared by every plugin instance in this process.
  pub fn global() -> &'static CssBuffer {
    &GLOBAL
  }

  /// Insert or overwrite the CSS for a source id. Returns the old value.
  pub fn insert(&self, source_id: &str, css: String) -> Option<String> {
    self.inner.write().insert(source_id.to_string(), css)
  }

  pub fn get(&self, source_id: &str) -> Option<String> {
    self.inner.read().get(source_id).cloned()
  }

  pub fn remove(&self, source_id: &str) -> Option<String> {
    self.inner.write().remove(source_id)
  }

  pub fn contains(&self, source_id: &str) -> bool {
    self.inner.read().contains_key(source_id)
  }

  pub fn clear(&self) {
    self.inner.write().clear();
  }

  pub fn len(&self) -> usize {
    self.inner.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn insert_and_get() {
    let buffer = CssBuffer::new();
    buffer.insert("/src/app.ts", ".a { color: red }".into());
    assert_eq!(buffer.get("/src/app.ts"), Some(".a { color: red }".into()));
  }

  #[test]
  fn get_missing() {
    let buffer = CssBuffer::new();
    assert_eq!(buffer.get("/src/missing.ts"), None);
  }

  #[test]
  fn overwrite_replaces() {
    let buffer = CssBuffer::new();
    buffer.insert("/src/app.ts", "old".into());
    let previous = buffer.insert("/src/app.ts", "new".into());
    assert_eq!(previous, Some("old".into()));
    assert_eq!(buffer.get("/src/app.ts"), Some("new".into()));
    assert_eq!(buffer.len(), 1);
  }

  #[test]
  fn remove_returns_entry() {
    let buffer = CssBuffer::new();
    buffer.insert("/src/app.ts", "css".into());
    assert_eq!(buffer.remove("/src/app.ts"), Some("css".into()));
    assert!(buffer.is_empty());
  }

  #[test]
  fn clones_share_storage() {
    let buffer = CssBuffer::new();
    let handle = buffer.clone();
    handle.insert("/src/app.ts", "shared".into());
    assert_eq!(buffer.get("/src/app.ts"), Some("shared".into()));
  }

  #[test]
  fn usable_across_threads() {
    let buffer = CssBuffer::new();
    let handle = buffer.clone();
    std::thread::spawn(move || {
      handle.insert("/src/thread.ts", "data".into());
    })
    .join()
    .unwrap();
    assert_eq!(buffer.get("/src/thread.ts"), Some("data".into()));
  }
}
