pub mod camera;
pub mod clustering;
pub mod frustum;
pub mod icon;
pub mod picking;
pub mod spatial;

pub use camera::*;
pub use clustering::*;
pub use frustum::*;
pub use icon::*;
pub use picking::*;
pub use spatial::*;
