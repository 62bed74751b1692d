//! Ports for the RPC layer.

pub mod outbound;

pub use outbound::FrameSink;
