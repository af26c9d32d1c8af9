pub mod mat;
pub mod precision;
pub mod ray;
pub mod vec;

pub use mat::*;
pub use precision::*;
pub use ray::*;
pub use vec::*;
