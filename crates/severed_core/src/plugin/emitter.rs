use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::hash;

/// What one `emit` call produced: the class name the host associated with the
/// raw CSS, and the final CSS fragment to accumulate for the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedCss {
  pub class_name: String,
  pub css: String,
}

/// Transforms a wrapped CSS rule before it is accumulated.
///
/// Seam for selector hashing, autoprefixing or pretty-printing; the identity
/// implementation is the default.
pub trait CssPostProcessor: Debug + Send + Sync {
  fn process(&self, class_name: &str, css: &str) -> Result<String, anyhow::Error>;
}

#[derive(Debug, Default)]
pub struct IdentityPostProcessor;

impl CssPostProcessor for IdentityPostProcessor {
  fn process(&self, _class_name: &str, css: &str) -> Result<String, anyhow::Error> {
    Ok(css.to_string())
  }
}

/// Turns raw CSS text into a class name and a final fragment.
///
/// This is the only place where raw CSS becomes final CSS.
#[async_trait]
pub trait CssEmitter: Debug + Send + Sync {
  async fn emit(&self, raw_css: &str) -> Result<EmittedCss, anyhow::Error>;
}

/// Default emitter: content-hashed class name, `.<class> { <raw> }` rule,
/// post-processor pass.
#[derive(Debug)]
pub struct HashedCssEmitter {
  post_processor: Arc<dyn CssPostProcessor>,
}

impl HashedCssEmitter {
  pub fn new(post_processor: Arc<dyn CssPostProcessor>) -> Self {
    Self { post_processor }
  }
}

impl Default for HashedCssEmitter {
  fn default() -> Self {
    Self::new(Arc::new(IdentityPostProcessor))
  }
}

#[async_trait]
impl CssEmitter for HashedCssEmitter {
  async fn emit(&self, raw_css: &str) -> Result<EmittedCss, anyhow::Error> {
    let class_name = hash::class_name(raw_css);
    let rule = format!(".{class_name} {{ {raw_css} }}");
    let css = self.post_processor.process(&class_name, &rule)?;
    Ok(EmittedCss { class_name, css })
  }
}
