pub mod display;
pub mod generation;
pub mod prompt;
pub mod selection;

pub use display::*;
pub use generation::*;
pub use prompt::*;
pub use selection::*;
