//! Command implementations.
//!
//! Each action is implemented in its own module for clean separation.

pub(crate) mod lifeline;
pub(crate) mod ports;
pub(crate) mod update;
