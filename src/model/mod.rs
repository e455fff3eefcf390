pub mod fact;
pub mod group;

pub use fact::*;
pub use group::*;
