pub mod bvh;
pub mod index;

pub use bvh::*;
pub use index::*;
