pub mod css_buffer;
pub mod hash;
pub mod plugin;
pub mod types;

pub use self::css_buffer::CssBuffer;
pub use self::types::*;
