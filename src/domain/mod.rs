pub mod policy;
pub mod transitions;

pub use policy::*;
pub use transitions::*;
