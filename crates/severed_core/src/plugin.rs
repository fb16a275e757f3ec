pub use emitter::*;
pub use host_plugin::*;
pub use resolver::*;

mod emitter;
mod host_plugin;
mod resolver;
