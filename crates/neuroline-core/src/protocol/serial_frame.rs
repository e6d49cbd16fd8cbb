//! Serial stream framing for the DawnEEG and Cyton Wi-Fi families
//!
//! One frame decodes into one sample row:
//!
//! ```text
//! 0xA0 | seq (u8) | N x 3-byte BE signed sample | aux bytes | footer
//! ```
//!
//! The DawnEEG serial family carries 7 aux bytes and a fixed `0xC0` footer;
//! the aux block packs a device timestamp (millisecond + sub-millisecond
//! parts), a 4-bit marker, two trigger bits and one interleaved telemetry
//! byte. The Cyton Wi-Fi family carries 6 aux bytes and a `0xC0..=0xC6`
//! footer whose value selects how the aux block is interpreted (standard
//! accelerometer, analog inputs, raw modes).

use super::{cast_16bit_to_i32, cast_24bit_to_i32, FrameError};

/// Stream header byte preceding every frame.
pub const STREAM_HEADER: u8 = 0xA0;

/// Footer for the DawnEEG serial family.
pub const FOOTER_STANDARD: u8 = 0xC0;

/// Footer selecting analog aux interpretation (Cyton Wi-Fi).
pub const FOOTER_ANALOG: u8 = 0xC1;

/// Highest accepted footer in the Cyton Wi-Fi family.
pub const FOOTER_MAX: u8 = 0xC6;

/// Accelerometer scale for the Cyton family: +-4 g over 16-bit counts.
pub const CYTON_ACCEL_SCALE: f64 = 0.002 / 16.0;

/// Geometry of one serial frame family.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameFormat {
    /// EEG channels per frame
    pub num_eeg_channels: usize,
    /// Aux bytes between the last sample and the footer
    pub aux_len: usize,
    /// Lowest accepted footer byte
    pub footer_min: u8,
    /// Highest accepted footer byte
    pub footer_max: u8,
}

impl FrameFormat {
    /// DawnEEG layout: 7 aux bytes, fixed footer.
    #[must_use]
    pub const fn dawn(num_eeg_channels: usize) -> Self {
        Self {
            num_eeg_channels,
            aux_len: 7,
            footer_min: FOOTER_STANDARD,
            footer_max: FOOTER_STANDARD,
        }
    }

    /// Cyton Wi-Fi layout: 6 aux bytes, footer range encodes the aux mode.
    #[must_use]
    pub const fn cyton(num_eeg_channels: usize) -> Self {
        Self {
            num_eeg_channels,
            aux_len: 6,
            footer_min: FOOTER_STANDARD,
            footer_max: FOOTER_MAX,
        }
    }

    /// Frame length after the header byte: seq + samples + aux + footer.
    #[must_use]
    pub const fn body_len(&self) -> usize {
        1 + 3 * self.num_eeg_channels + self.aux_len + 1
    }

    /// Decode the frame body (everything after the `0xA0` header).
    ///
    /// # Errors
    ///
    /// [`FrameError::ShortFrame`] when `body` is shorter than
    /// [`body_len`](Self::body_len); [`FrameError::BadFooter`] when the
    /// trailing byte is outside the accepted range.
    pub fn decode<'a>(&self, body: &'a [u8]) -> Result<SerialFrame<'a>, FrameError> {
        let need = self.body_len();
        if body.len() < need {
            return Err(FrameError::ShortFrame { got: body.len(), need });
        }
        let footer = body[need - 1];
        if footer < self.footer_min || footer > self.footer_max {
            return Err(FrameError::BadFooter(footer));
        }
        Ok(SerialFrame {
            package_num: body[0],
            samples: &body[1..1 + 3 * self.num_eeg_channels],
            aux: &body[need - 1 - self.aux_len..need - 1],
            footer,
        })
    }
}

/// One decoded frame, borrowing the raw buffer.
#[derive(Debug)]
pub struct SerialFrame<'a> {
    /// Device package counter
    pub package_num: u8,
    /// Raw 3-byte sample groups
    samples: &'a [u8],
    /// Aux bytes (without the footer)
    pub aux: &'a [u8],
    /// Trailing byte; encodes the aux mode for the Wi-Fi family
    pub footer: u8,
}

impl SerialFrame<'_> {
    /// Raw ADC count for a 0-based EEG channel.
    #[must_use]
    pub fn raw_sample(&self, channel: usize) -> i32 {
        cast_24bit_to_i32(&self.samples[3 * channel..3 * channel + 3])
    }
}

// ============================================================================
// DawnEEG aux block
// ============================================================================

/// Decoded DawnEEG aux block.
///
/// Byte layout, front to back: telemetry byte, flag byte
/// (`marker:4 | trigger2:1 | trigger1:1 | ts_sub_ms_hi:2`), sub-millisecond
/// low byte, 32-bit big-endian millisecond counter.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DawnAux {
    /// On-device monotonic timestamp in seconds
    pub device_timestamp: f64,
    /// 4-bit hardware marker value
    pub marker: u8,
    /// Digital trigger input 1
    pub trigger1: u8,
    /// Digital trigger input 2
    pub trigger2: u8,
    /// Telemetry byte, interleaved across packages (temperature and battery
    /// MSB/LSB on successive package numbers mod 8)
    pub telemetry: u8,
}

impl DawnAux {
    /// Decode the 7-byte aux block of a DawnEEG frame.
    #[must_use]
    pub fn decode(aux: &[u8]) -> Self {
        debug_assert!(aux.len() >= 7);
        let ms = (u32::from(aux[3]) << 24)
            | (u32::from(aux[4]) << 16)
            | (u32::from(aux[5]) << 8)
            | u32::from(aux[6]);
        let sub_us = (u32::from(aux[1] & 0x03) << 8) | u32::from(aux[2]);
        Self {
            device_timestamp: f64::from(ms) / 1_000.0 + f64::from(sub_us) / 1_000_000.0,
            marker: (aux[1] >> 4) & 0x0F,
            trigger1: (aux[1] >> 2) & 0x01,
            trigger2: (aux[1] >> 3) & 0x01,
            telemetry: aux[0],
        }
    }
}

/// Telemetry accumulator for the DawnEEG auxiliary preset.
///
/// Temperature and battery voltage arrive one byte per package: temperature
/// MSB at package % 8 == 0, LSB at 1, battery MSB at 2, LSB at 3. One
/// auxiliary row is complete per eight packages.
#[derive(Debug, Default)]
pub struct TelemetryAccumulator {
    temperature_raw: f64,
    battery_raw: f64,
}

/// A completed telemetry reading.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TelemetryUpdate {
    /// Temperature reading completed (raw device units)
    Temperature(f64),
    /// Battery reading completed (volts); emit the auxiliary row now
    Battery(f64),
}

impl TelemetryAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the telemetry byte of one frame.
    ///
    /// Returns a completed reading on the packages that carry LSBs.
    pub fn feed(&mut self, package_num: u8, telemetry: u8) -> Option<TelemetryUpdate> {
        match package_num % 8 {
            0 => {
                self.temperature_raw = f64::from(telemetry) * 256.0;
                None
            }
            1 => {
                self.temperature_raw += f64::from(telemetry);
                Some(TelemetryUpdate::Temperature(self.temperature_raw))
            }
            2 => {
                self.battery_raw = f64::from(telemetry) * 256.0;
                None
            }
            3 => {
                self.battery_raw += f64::from(telemetry);
                Some(TelemetryUpdate::Battery(self.battery_raw / 1_000.0))
            }
            _ => None,
        }
    }
}

// ============================================================================
// Cyton Wi-Fi aux block
// ============================================================================

/// Aux interpretation of a Cyton Wi-Fi frame, selected by the footer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CytonAux {
    /// Standard mode: accelerometer counts for x, y, z
    Accel([i32; 3]),
    /// Analog mode: three 16-bit analog readings
    Analog([i32; 3]),
    /// Other footer codes: aux bytes left uninterpreted
    Raw,
}

impl CytonAux {
    /// Interpret the 6-byte aux block according to the footer code.
    #[must_use]
    pub fn decode(footer: u8, aux: &[u8]) -> Self {
        debug_assert!(aux.len() >= 6);
        let triplet = [
            cast_16bit_to_i32(&aux[0..2]),
            cast_16bit_to_i32(&aux[2..4]),
            cast_16bit_to_i32(&aux[4..6]),
        ];
        match footer {
            FOOTER_STANDARD => Self::Accel(triplet),
            FOOTER_ANALOG => Self::Analog(triplet),
            _ => Self::Raw,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
