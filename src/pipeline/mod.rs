pub mod escape;
pub mod pack;
pub mod wrapper;

pub use escape::*;
pub use pack::*;
pub use wrapper::*;
