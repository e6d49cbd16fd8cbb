//! Connection parameters supplied at session creation
//!
//! One flat struct covers every transport family; each driver reads the
//! fields that apply to it and validates them during `prepare_session`.

use serde::{Deserialize, Serialize};

/// Serial timeout bounds in milliseconds.
pub const TIMEOUT_MIN_MS: u64 = 1;
/// Upper serial timeout bound in milliseconds.
pub const TIMEOUT_MAX_MS: u64 = 6_000;
/// Timeout applied when the caller leaves it unset or out of range.
pub const TIMEOUT_DEFAULT_MS: u64 = 100;

/// Caller-supplied connection parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardParams {
    /// Serial device path, e.g. `/dev/ttyUSB0` or `COM3`
    #[serde(default)]
    pub serial_port: String,
    /// Bluetooth MAC address; empty requests autodiscovery
    #[serde(default)]
    pub mac_address: String,
    /// IP address for networked boards
    #[serde(default)]
    pub ip_address: String,
    /// UDP/TCP port, or RFCOMM channel for Bluetooth Classic
    #[serde(default)]
    pub ip_port: u16,
    /// Transport timeout in milliseconds; clamped to the supported range
    #[serde(default)]
    pub timeout: u64,
    /// Device serial number used during discovery
    #[serde(default)]
    pub serial_number: String,
    /// Path argument for file-backed or SDK-backed boards
    #[serde(default)]
    pub file: String,
    /// Free-form per-family extras
    #[serde(default)]
    pub other_info: String,
}

impl BoardParams {
    /// Timeout in milliseconds, clamped to `1..=6000` with the default for
    /// unset or out-of-range values.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        if (TIMEOUT_MIN_MS..=TIMEOUT_MAX_MS).contains(&self.timeout) {
            self.timeout
        } else {
            TIMEOUT_DEFAULT_MS
        }
    }

    /// Timeout used for discovery scans in seconds (minimum one second).
    #[must_use]
    pub fn discovery_timeout_secs(&self) -> u64 {
        if self.timeout >= 1 {
            self.timeout
        } else {
            5
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_clamping() {
        let mut params = BoardParams::default();
        assert_eq!(params.timeout_ms(), TIMEOUT_DEFAULT_MS);
        params.timeout = 7_000;
        assert_eq!(params.timeout_ms(), TIMEOUT_DEFAULT_MS);
        params.timeout = 250;
        assert_eq!(params.timeout_ms(), 250);
        params.timeout = 1;
        assert_eq!(params.timeout_ms(), 1);
    }

    #[test]
    fn test_params_deserialize_with_defaults() {
        let params: BoardParams =
            serde_json::from_str(r#"{"serial_port": "/dev/ttyUSB0"}"#).unwrap();
        assert_eq!(params.serial_port, "/dev/ttyUSB0");
        assert_eq!(params.mac_address, "");
        assert_eq!(params.ip_port, 0);
    }
}
