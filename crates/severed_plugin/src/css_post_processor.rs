use anyhow::anyhow;
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{ParserOptions, StyleSheet};
use severed_core::plugin::CssPostProcessor;

/// Post-processor that validates fragments and prints them normalised.
///
/// Rejecting malformed CSS here surfaces template mistakes at build time
/// instead of shipping them to the browser.
#[derive(Debug, Default)]
pub struct LightningCssProcessor {
  pub minify: bool,
}

impl CssPostProcessor for LightningCssProcessor {
  fn process(&self, _class_name: &str, css: &str) -> Result<String, anyhow::Error> {
    // lightningcss errors borrow the input, so they are rendered eagerly.
    let stylesheet = StyleSheet::parse(css, ParserOptions::default())
      .map_err(|error| anyhow!("invalid css fragment: {error}"))?;
    let output = stylesheet
      .to_css(PrinterOptions {
        minify: self.minify,
        ..Default::default()
      })
      .map_err(|error| anyhow!("failed to print css fragment: {error}"))?;
    Ok(output.code)
  }
}
