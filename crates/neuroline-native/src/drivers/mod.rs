//! Concrete device drivers
//!
//! One module per board family. Every driver composes a
//! [`SessionCore`](crate::board::SessionCore) and implements
//! [`BoardDriver`](crate::board::BoardDriver); the transports they sit on
//! are feature-gated so headless builds can drop the BLE and vendor-SDK
//! stacks.

pub mod cyton_wifi;
pub mod gforce;
pub mod synthetic;

#[cfg(feature = "serial")]
pub mod dawn_eeg;

#[cfg(feature = "ble")]
pub mod ganglion;

#[cfg(feature = "vendor")]
pub mod ant_neuro;

#[cfg(feature = "vendor")]
pub mod enophone;

pub use cyton_wifi::CytonWifiDriver;
pub use gforce::GforceDriver;
pub use synthetic::SyntheticDriver;

#[cfg(feature = "serial")]
pub use dawn_eeg::DawnEegDriver;

#[cfg(feature = "ble")]
pub use ganglion::GanglionDriver;

#[cfg(feature = "vendor")]
pub use ant_neuro::AntNeuroDriver;

#[cfg(feature = "vendor")]
pub use enophone::EnophoneDriver;
