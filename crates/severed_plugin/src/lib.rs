pub mod css_post_processor;
pub mod plugin;

pub use self::css_post_processor::LightningCssProcessor;
pub use self::plugin::SeveredPlugin;
