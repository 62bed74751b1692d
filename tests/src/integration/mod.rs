//! Cross-component flows: codec, processor, typed adapter and transports together.

pub mod loopback;
pub mod websocket;
