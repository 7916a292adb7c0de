//! Testing utilities and mock implementations
//!
//! Lets the HTTP layer be exercised without an MQTT broker.

pub mod mocks;

pub use mocks::*;
