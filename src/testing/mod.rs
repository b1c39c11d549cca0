//! Testing utilities and mock implementations
//!
//! Lets the connection manager, dispatcher and lifecycle run without a
//! broker or GPIO hardware.

pub mod mocks;

pub use mocks::*;
