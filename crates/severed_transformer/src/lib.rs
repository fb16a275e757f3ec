pub mod classifier;
pub mod extract;
pub mod text_editor;
pub mod transpile;

pub use self::classifier::{Classification, classify};
pub use self::extract::{ExtractError, ExtractOptions, ExtractOutput, extract_file};
pub use self::text_editor::{EditError, TextEditor};
pub use self::transpile::transpile;
