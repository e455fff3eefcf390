pub mod clipboard;
pub mod manager;
pub mod timeline;
pub mod undo;

pub use clipboard::*;
pub use manager::*;
pub use timeline::*;
pub use undo::*;
