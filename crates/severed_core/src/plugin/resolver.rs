use std::fmt::Debug;

use async_trait::async_trait;
use mockall::automock;

/// A module the host resolver located for the sub-bundler.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedModule {
  /// Absolute id of the resolved module.
  pub id: String,
  /// In-memory code. When absent the driver asks [`ModuleResolver::load`].
  pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
  /// The resolver does not know the specifier.
  Unresolved,
  /// The specifier must stay a runtime require.
  External,
  Resolved(ResolvedModule),
}

/// Resolves dependency specifiers for the sub-bundler.
///
/// Supplied by the host adapter so bare specifiers resolve the same way at
/// extraction time as at bundle time. Implementations must not assume any
/// particular module resolution algorithm is available.
#[automock]
#[async_trait]
pub trait ModuleResolver: Debug + Send + Sync {
  /// Determines what `specifier`, imported from `importer`, resolves to.
  async fn resolve(&self, specifier: &str, importer: &str)
    -> Result<Resolution, anyhow::Error>;

  /// Loads the code of a previously resolved id.
  async fn load(&self, _id: &str) -> Result<Option<String>, anyhow::Error> {
    Ok(None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn mock_resolver_round_trips() {
    let mut resolver = MockModuleResolver::new();
    resolver.expect_resolve().returning(|specifier, _| {
      Ok(Resolution::Resolved(ResolvedModule {
        id: format!("/app/{specifier}"),
        code: Some("export {}".into()),
      }))
    });

    let resolution = resolver.resolve("./theme.js", "/app/entry.js").await.unwrap();
    assert_eq!(
      resolution,
      Resolution::Resolved(ResolvedModule {
        id: "/app/./theme.js".into(),
        code: Some("export {}".into()),
      })
    );
  }
}
