//! Host timestamps and device clock synchronization
//!
//! Drivers with an on-device monotonic clock run a round-trip exchange at
//! session setup: host send time T1, device receive time T2, device reply
//! time T3, host receive time T4. [`ClockSync`] keeps the offset from the
//! exchange with the minimum round-trip time seen, the NTP-style trick that
//! approximates the least-congested path.

use std::time::{SystemTime, UNIX_EPOCH};

use super::protocol::FrameError;

/// Bytes in a clock-sync exchange in either direction.
pub const SYNC_EXCHANGE_LEN: usize = 14;

/// Request sent to the device: `<123456123456<`.
pub const SYNC_REQUEST: &[u8; SYNC_EXCHANGE_LEN] = b"<123456123456<";

/// Byte bounding both ends of the device reply.
pub const SYNC_RESPONSE_DELIMITER: u8 = b'>';

/// Current host time as seconds since the Unix epoch.
///
/// Computed by integer division first: converting nanoseconds straight to
/// f64 loses precision for large timestamps because f64 has 53 mantissa
/// bits.
#[must_use]
pub fn timestamp() -> f64 {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let nanos = since_epoch.as_nanos();
    const NS_PER_S: u128 = 1_000_000_000;
    let secs = nanos / NS_PER_S;
    let rem = nanos % NS_PER_S;
    secs as f64 + rem as f64 / NS_PER_S as f64
}

/// Offset state accumulated across repeated sync exchanges.
#[derive(Copy, Clone, Debug)]
pub struct ClockSync {
    half_rtt: f64,
    time_correction: f64,
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSync {
    /// Fresh state: no exchange recorded yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { half_rtt: f64::MAX, time_correction: 0.0 }
    }

    /// Feed one four-timestamp exchange.
    ///
    /// `half_rtt = ((t4 - t1) - (t3 - t2)) / 2` estimates one-way latency;
    /// the correction `((t4 + t1) - (t3 + t2)) / 2` is retained only when
    /// this exchange's latency beats every previous one. Returns whether
    /// the correction was updated.
    pub fn update(&mut self, t1: f64, t2: f64, t3: f64, t4: f64) -> bool {
        let half_rtt = ((t4 - t1) - (t3 - t2)) / 2.0;
        if half_rtt < self.half_rtt {
            self.half_rtt = half_rtt;
            self.time_correction = ((t4 + t1) - (t3 + t2)) / 2.0;
            true
        } else {
            false
        }
    }

    /// Best one-way latency estimate so far.
    #[must_use]
    pub const fn half_rtt(&self) -> f64 {
        self.half_rtt
    }

    /// Map a device timestamp onto the host clock.
    #[must_use]
    pub fn correct(&self, device_timestamp: f64) -> f64 {
        device_timestamp + self.time_correction
    }
}

/// Extract the device timestamps T2 and T3 from a sync reply.
///
/// The reply is 14 bytes bounded by `>` on both ends; each embedded
/// timestamp packs two sub-millisecond bytes followed by a 32-bit
/// big-endian millisecond counter, the same layout the stream aux block
/// uses.
///
/// # Errors
///
/// [`FrameError::ShortFrame`] for truncated replies,
/// [`FrameError::BadFooter`] when either delimiter is missing.
pub fn parse_sync_response(reply: &[u8]) -> Result<(f64, f64), FrameError> {
    if reply.len() < SYNC_EXCHANGE_LEN {
        return Err(FrameError::ShortFrame { got: reply.len(), need: SYNC_EXCHANGE_LEN });
    }
    if reply[0] != SYNC_RESPONSE_DELIMITER || reply[SYNC_EXCHANGE_LEN - 1] != SYNC_RESPONSE_DELIMITER
    {
        return Err(FrameError::BadFooter(reply[SYNC_EXCHANGE_LEN - 1]));
    }
    Ok((decode_device_time(&reply[1..7]), decode_device_time(&reply[7..13])))
}

fn decode_device_time(bytes: &[u8]) -> f64 {
    let sub_us = (u32::from(bytes[0] & 0x03) << 8) | u32::from(bytes[1]);
    let ms = (u32::from(bytes[2]) << 24)
        | (u32::from(bytes[3]) << 16)
        | (u32::from(bytes[4]) << 8)
        | u32::from(bytes[5]);
    f64::from(ms) / 1_000.0 + f64::from(sub_us) / 1_000_000.0
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_sane_and_monotonicish() {
        let a = timestamp();
        let b = timestamp();
        assert!(a > 1_600_000_000.0); // after Sep 2020
        assert!(b >= a);
    }

    #[test]
    fn test_sync_math() {
        let mut sync = ClockSync::new();
        let updated = sync.update(0.000, 0.050, 0.060, 0.020);
        assert!(updated);
        assert!((sync.half_rtt() - 0.005).abs() < 1e-12);
        // correction is -0.045; device 1.000 maps to host 0.955
        assert!((sync.correct(1.000) - 0.955).abs() < 1e-12);
    }

    #[test]
    fn test_minimum_rtt_retained() {
        let mut sync = ClockSync::new();
        sync.update(0.0, 0.050, 0.060, 0.020);
        // worse exchange: rtt 0.04, must not replace the correction
        let updated = sync.update(10.0, 10.1, 10.11, 10.06);
        assert!(!updated);
        assert!((sync.correct(0.0) - (-0.045)).abs() < 1e-12);
        // better exchange replaces it
        assert!(sync.update(20.0, 20.002, 20.003, 20.007));
    }

    #[test]
    fn test_parse_sync_response() {
        let mut reply = [0u8; SYNC_EXCHANGE_LEN];
        reply[0] = b'>';
        reply[13] = b'>';
        // T2: 2000 ms, 100 us
        reply[1] = 0x00;
        reply[2] = 0x64; // sub_us = 100
        reply[3..7].copy_from_slice(&2000u32.to_be_bytes());
        // T3: 2010 ms
        reply[7] = 0x00;
        reply[8] = 0x00;
        reply[9..13].copy_from_slice(&2010u32.to_be_bytes());
        let (t2, t3) = parse_sync_response(&reply).unwrap();
        assert!((t2 - 2.0001).abs() < 1e-9);
        assert!((t3 - 2.010).abs() < 1e-9);
    }

    #[test]
    fn test_parse_sync_response_rejects_bad_delimiters() {
        let reply = [0u8; SYNC_EXCHANGE_LEN];
        assert!(parse_sync_response(&reply).is_err());
        assert!(parse_sync_response(&reply[..4]).is_err());
    }
}
