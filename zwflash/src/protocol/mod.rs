//! SerialAPI protocol layers.

pub mod command;
pub mod frame;
pub mod link;

// Re-export common types
pub use command::{FunctionId, NvmCommand};
pub use frame::{Frame, FrameType};
pub use link::{Link, LinkConfig, SendState};
