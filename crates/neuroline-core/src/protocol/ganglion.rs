//! Ganglion BLE notification codec
//!
//! Every GATT notification is 20 bytes. Byte 0 selects the packet kind:
//!
//! | byte 0    | payload |
//! |-----------|---------|
//! | 0         | uncompressed reference: four 24-bit samples |
//! | 1..=100   | 18-bit delta compression, two samples of four channels, one accelerometer byte |
//! | 101..=200 | 19-bit delta compression, two samples of four channels |
//! | 201..=205 | ASCII impedance value terminated by `Z` |
//!
//! Delta packets carry differences against the previous reconstructed pair,
//! so the decoder is stateful; [`GanglionDecoder::reset`] must run before
//! each stream start.

use super::{cast_24bit_to_i32, FrameError};

/// Notification payload size.
pub const NOTIFICATION_LEN: usize = 20;

/// Microvolts per count for the Ganglion front end (1.2 V reference, gain
/// 51, 1.5 attenuation over a 24-bit range).
pub const EEG_SCALE: f64 = 1.2 * 1_000_000.0 / (8_388_607.0 * 1.5 * 51.0);

/// G per count for the accelerometer byte.
pub const ACCEL_SCALE: f64 = 0.032;

/// One decoded outcome of a notification.
#[derive(Clone, Debug, PartialEq)]
pub enum GanglionEvent {
    /// A reconstructed sample: four raw EEG counts plus the latched
    /// accelerometer state.
    Sample {
        /// Packet kind byte carried as the package number
        package_num: u8,
        /// Raw counts for EEG channels 1..=4
        raw_eeg: [f64; 4],
        /// Latched accelerometer values in g (x, y, z)
        accel: [f64; 3],
    },
    /// A completed impedance report for all five electrodes.
    Impedance {
        /// Packet kind byte carried as the package number
        package_num: u8,
        /// Ohms for electrodes 1..=4 and the reference, in that order
        resistance: [f64; 5],
    },
}

/// Stateful decoder for the notification stream.
#[derive(Debug)]
pub struct GanglionDecoder {
    /// Previous and current sample pair, four channels each
    last_data: [f64; 8],
    accel: [f64; 3],
    resistance: [f64; 5],
}

impl Default for GanglionDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl GanglionDecoder {
    /// Fresh decoder with zeroed reference state.
    #[must_use]
    pub fn new() -> Self {
        Self { last_data: [0.0; 8], accel: [0.0; 3], resistance: [0.0; 5] }
    }

    /// Clear reference state; call before every stream start.
    pub fn reset(&mut self) {
        self.last_data = [0.0; 8];
        self.accel = [0.0; 3];
        self.resistance = [0.0; 5];
    }

    /// Decode one notification into zero, one or two events.
    ///
    /// # Errors
    ///
    /// [`FrameError::ShortFrame`] for truncated payloads,
    /// [`FrameError::UnknownPacketKind`] for selector bytes outside every
    /// known range, [`FrameError::MalformedAscii`] for unparseable
    /// impedance text.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<GanglionEvent>, FrameError> {
        if data.len() < 2 {
            return Err(FrameError::ShortFrame { got: data.len(), need: 2 });
        }
        let kind = data[0];
        match kind {
            0 => {
                self.require_full(data)?;
                self.decode_uncompressed(data);
                Ok(vec![self.sample_event(kind, 4)])
            }
            1..=100 => {
                self.require_full(data)?;
                // one accelerometer axis rides along every 18-bit packet;
                // x/z are swapped and z negated to compensate a firmware bug
                match kind % 10 {
                    0 => self.accel[2] = -ACCEL_SCALE * f64::from(data[19] as i8),
                    1 => self.accel[1] = ACCEL_SCALE * f64::from(data[19] as i8),
                    2 => self.accel[0] = ACCEL_SCALE * f64::from(data[19] as i8),
                    _ => {}
                }
                self.apply_deltas(data, 18);
                Ok(vec![self.sample_event(kind, 0), self.sample_event(kind, 4)])
            }
            101..=200 => {
                self.require_full(data)?;
                self.apply_deltas(data, 19);
                Ok(vec![self.sample_event(kind, 0), self.sample_event(kind, 4)])
            }
            201..=205 => {
                let value = Self::parse_impedance_ascii(&data[1..])?;
                match kind % 10 {
                    1 => self.resistance[0] = value,
                    2 => self.resistance[1] = value,
                    3 => self.resistance[2] = value,
                    4 => self.resistance[3] = value,
                    5 => self.resistance[4] = value,
                    _ => {}
                }
                Ok(vec![GanglionEvent::Impedance {
                    package_num: kind,
                    resistance: self.resistance,
                }])
            }
            other => Err(FrameError::UnknownPacketKind(other)),
        }
    }

    fn require_full(&self, data: &[u8]) -> Result<(), FrameError> {
        if data.len() < NOTIFICATION_LEN {
            Err(FrameError::ShortFrame { got: data.len(), need: NOTIFICATION_LEN })
        } else {
            Ok(())
        }
    }

    fn sample_event(&self, package_num: u8, offset: usize) -> GanglionEvent {
        GanglionEvent::Sample {
            package_num,
            raw_eeg: [
                self.last_data[offset],
                self.last_data[offset + 1],
                self.last_data[offset + 2],
                self.last_data[offset + 3],
            ],
            accel: self.accel,
        }
    }

    fn decode_uncompressed(&mut self, data: &[u8]) {
        // shift the previous pair out, latch the new reference
        for i in 0..4 {
            self.last_data[i] = self.last_data[i + 4];
        }
        for (i, chunk) in [1usize, 4, 7, 10].iter().enumerate() {
            self.last_data[i + 4] = f64::from(cast_24bit_to_i32(&data[*chunk..chunk + 3]));
        }
    }

    fn apply_deltas(&mut self, data: &[u8], bits_per_num: usize) {
        let mut bits = [0u8; NOTIFICATION_LEN * 8];
        for (i, &byte) in data.iter().enumerate() {
            for bit in 0..8 {
                bits[i * 8 + bit] = (byte >> (7 - bit)) & 1;
            }
        }
        let mut delta = [0.0f64; 8];
        let mut pos = 8;
        for slot in &mut delta {
            *slot = f64::from(bits_to_i32(&bits[pos..pos + bits_per_num]));
            pos += bits_per_num;
        }
        // first delta reconstructs against the previous pair, second against
        // the sample just reconstructed
        for i in 0..4 {
            self.last_data[i] = self.last_data[i + 4] - delta[i];
        }
        for i in 4..8 {
            self.last_data[i] = self.last_data[i - 4] - delta[i];
        }
    }

    fn parse_impedance_ascii(payload: &[u8]) -> Result<f64, FrameError> {
        let end = payload.iter().position(|&b| b == b'Z').unwrap_or(payload.len());
        let text = std::str::from_utf8(&payload[..end])
            .map_err(|_| FrameError::MalformedAscii("non-utf8 impedance".to_string()))?;
        text.trim()
            .parse::<f64>()
            .map_err(|_| FrameError::MalformedAscii(text.to_string()))
    }
}

/// Interpret `bits` (MSB first) as a two's complement integer.
fn bits_to_i32(bits: &[u8]) -> i32 {
    let mut value: i32 = 0;
    for &bit in bits {
        value = (value << 1) | i32::from(bit);
    }
    if bits[0] == 1 {
        value -= 1 << bits.len();
    }
    value
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncompressed_notification() {
        let mut decoder = GanglionDecoder::new();
        let data: [u8; 20] = [
            0x00, // kind: uncompressed
            0x00, 0x00, 0x01, // channel 1 = 1
            0x00, 0x00, 0x02, // channel 2 = 2
            0x00, 0x00, 0x03, // channel 3 = 3
            0x00, 0x00, 0x04, // channel 4 = 4
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        let events = decoder.decode(&data).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            GanglionEvent::Sample { package_num, raw_eeg, .. } => {
                assert_eq!(*package_num, 0);
                assert_eq!(*raw_eeg, [1.0, 2.0, 3.0, 4.0]);
                // scaled values are EEG_SCALE * {1, 2, 3, 4}
                let scaled: Vec<f64> = raw_eeg.iter().map(|r| EEG_SCALE * r).collect();
                assert!((scaled[3] - 4.0 * EEG_SCALE).abs() < 1e-12);
            }
            other => panic!("expected sample, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_deltas_repeat_reference() {
        let mut decoder = GanglionDecoder::new();
        let mut reference = [0u8; 20];
        reference[0] = 0;
        reference[3] = 5; // channel 1 = 5
        decoder.decode(&reference).unwrap();

        // 19-bit packet with all-zero deltas: both samples equal the reference
        let mut delta_packet = [0u8; 20];
        delta_packet[0] = 101;
        let events = decoder.decode(&delta_packet).unwrap();
        assert_eq!(events.len(), 2);
        for event in events {
            match event {
                GanglionEvent::Sample { raw_eeg, .. } => assert_eq!(raw_eeg[0], 5.0),
                other => panic!("expected sample, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_negative_delta_reconstruction() {
        let mut decoder = GanglionDecoder::new();
        // reference pair at zero; encode delta[0] = -1 in 19 bits
        // (two's complement all-ones), rest zero
        let mut data = [0u8; 20];
        data[0] = 101;
        // bits 8..27 set to 1
        data[1] = 0xFF; // bits 8..16
        data[2] = 0xFF; // bits 16..24
        data[3] = 0xE0; // bits 24..27
        let events = decoder.decode(&data).unwrap();
        match &events[0] {
            GanglionEvent::Sample { raw_eeg, .. } => {
                // last_data[0] = last_data[4] - (-1) = 1
                assert_eq!(raw_eeg[0], 1.0);
            }
            other => panic!("expected sample, got {other:?}"),
        }
    }

    #[test]
    fn test_accel_axis_swap_and_sign() {
        let mut decoder = GanglionDecoder::new();
        let mut data = [0u8; 20];
        data[0] = 10; // kind % 10 == 0 -> z axis, negated
        data[19] = 2i8 as u8;
        decoder.decode(&data).unwrap();
        let mut data_y = [0u8; 20];
        data_y[0] = 11; // y axis
        data_y[19] = (-3i8) as u8;
        let events = decoder.decode(&data_y).unwrap();
        match &events[0] {
            GanglionEvent::Sample { accel, .. } => {
                assert!((accel[2] + 2.0 * ACCEL_SCALE).abs() < 1e-12);
                assert!((accel[1] + 3.0 * ACCEL_SCALE).abs() < 1e-12);
            }
            other => panic!("expected sample, got {other:?}"),
        }
    }

    #[test]
    fn test_impedance_packet() {
        let mut decoder = GanglionDecoder::new();
        let mut data = [0u8; 20];
        data[0] = 201; // electrode 1
        data[1..6].copy_from_slice(b"8230Z");
        let events = decoder.decode(&data).unwrap();
        match &events[0] {
            GanglionEvent::Impedance { package_num, resistance } => {
                assert_eq!(*package_num, 201);
                assert_eq!(resistance[0], 8230.0);
            }
            other => panic!("expected impedance, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_impedance_is_error() {
        let mut decoder = GanglionDecoder::new();
        let mut data = [0u8; 20];
        data[0] = 202;
        data[1..4].copy_from_slice(b"xyZ");
        assert!(matches!(decoder.decode(&data), Err(FrameError::MalformedAscii(_))));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut decoder = GanglionDecoder::new();
        let data = [210u8; 20];
        assert!(matches!(
            decoder.decode(&data),
            Err(FrameError::UnknownPacketKind(210))
        ));
    }

    #[test]
    fn test_short_notification_rejected() {
        let mut decoder = GanglionDecoder::new();
        assert!(decoder.decode(&[0x00]).is_err());
        assert!(decoder.decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_bits_to_i32_sign() {
        assert_eq!(bits_to_i32(&[0, 0, 1]), 1);
        assert_eq!(bits_to_i32(&[1, 1, 1]), -1);
        assert_eq!(bits_to_i32(&[1, 0, 0]), -4);
    }
}
