pub mod handle;
pub mod inspector;

pub use handle::*;
pub use inspector::load;
