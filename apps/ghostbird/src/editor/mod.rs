//! Documents a session can be attached to.

mod file;
mod indicator;
mod port;

pub use file::FileEditor;
pub use indicator::LogIndicator;
pub use port::{ComposeDetails, ComposeWindow, PortEditor};
