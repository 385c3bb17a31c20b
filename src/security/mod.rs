pub mod permission_guard;
pub mod policy;

pub use permission_guard::*;
pub use policy::*;
