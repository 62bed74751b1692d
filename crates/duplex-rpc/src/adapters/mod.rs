//! Transport adapters implementing the outbound port.

pub mod channel;
pub mod memory;

pub use channel::{ChannelSink, Outbound, DEFAULT_OUTBOUND_CAPACITY};
