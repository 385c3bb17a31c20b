pub mod field;
pub mod registry;

pub use field::*;
pub use registry::*;
