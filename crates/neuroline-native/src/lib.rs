//! Neuroline Native - transports, drivers, sessions and streamers
//!
//! This crate turns the building blocks in `neuroline-core` into running
//! acquisition sessions: a [`board::BoardDriver`] contract with a shared
//! [`board::SessionCore`], concrete drivers for every supported amplifier
//! family, sample streamers, and the [`registry::DeviceRegistry`] that
//! multiplexes sessions inside one process.
//!
//! # Modules
//!
//! - [`board`]: driver contract, session state, first-frame gate
//! - [`drivers`]: one module per board family
//! - [`registry`]: board id -> session table
//! - [`streamer`]: file and multicast sample sinks
//! - [`transport`]: serial, vendor-library and Bluetooth Classic shims
//!
//! # Features
//!
//! - `serial`: serialport-backed transports (DawnEEG family)
//! - `ble`: btleplug-backed BLE transport (Ganglion)
//! - `vendor`: runtime-loaded vendor SDKs (gForce Pro, ANT Neuro)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod board;
pub mod drivers;
pub mod registry;
pub mod streamer;
pub mod transport;

// Re-export the surface most embedders need
pub use board::{BoardData, BoardDriver, SessionCore};
pub use registry::{build_driver, DeviceRegistry};
pub use streamer::Streamer;
