pub mod frame;
pub mod sequencer;

pub use frame::*;
pub use sequencer::*;
