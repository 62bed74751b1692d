//! # Duplex-RPC Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/integration/   # Cross-component flows
//! │   ├── loopback.rs    # Two processors over the in-memory transport
//! │   └── websocket.rs   # Acceptor + initiator over real sockets
//! │
//! └── benches/           # Codec and round-trip benchmarks
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p duplex-rpc-tests
//!
//! # By transport
//! cargo test -p duplex-rpc-tests integration::loopback::
//! cargo test -p duplex-rpc-tests integration::websocket::
//!
//! # Benchmarks
//! cargo bench -p duplex-rpc-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod integration;
