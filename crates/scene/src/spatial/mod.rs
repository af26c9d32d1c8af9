pub mod octree;

pub use octree::*;
