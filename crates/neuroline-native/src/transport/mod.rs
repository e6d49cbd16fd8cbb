//! Physical transport shims
//!
//! Each transport exposes the minimal operation set its drivers need;
//! everything protocol-shaped lives in the drivers themselves. The serial
//! shim is trait-backed so acquisition logic can run against scripted
//! byte streams in tests.

#[cfg(feature = "serial")]
pub mod serial;

#[cfg(feature = "vendor")]
pub mod library;

#[cfg(feature = "vendor")]
pub mod bt_classic;
