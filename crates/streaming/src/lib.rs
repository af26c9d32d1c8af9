pub mod cache;
pub mod downloads;
pub mod preload;
pub mod protocol;
pub mod provider;
pub mod request;
pub mod residency;

pub use cache::*;
pub use downloads::*;
pub use preload::*;
pub use protocol::*;
pub use provider::*;
pub use request::*;
pub use residency::*;
