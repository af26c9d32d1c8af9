pub mod collection;
pub mod config;
pub mod entity;
pub mod error;
pub mod facade;

pub use collection::*;
pub use config::*;
pub use entity::*;
pub use error::*;
pub use facade::*;
