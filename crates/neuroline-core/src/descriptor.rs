//! Static board descriptors
//!
//! A descriptor assigns a semantic role to every row of a board's sample
//! matrix: which row carries the package number, where each EEG channel
//! lands, where the marker and timestamp are stamped. Descriptors are
//! read-only tables keyed by [`BoardId`] and [`Preset`]; drivers and the
//! session core consult them instead of hard-coding row indices.

use serde::{Deserialize, Serialize};

// ============================================================================
// Presets
// ============================================================================

/// A parallel data stream produced by one device.
///
/// Every board supports `Default`; boards with interleaved telemetry expose
/// an `Auxiliary` stream at a lower effective rate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Preset {
    /// Primary signal stream (EEG/EMG at the device rate)
    Default = 0,
    /// Telemetry stream (battery, temperature)
    Auxiliary = 1,
    /// Additional device-specific stream
    Ancillary = 2,
}

impl Preset {
    /// All presets in declaration order.
    pub const ALL: [Preset; 3] = [Preset::Default, Preset::Auxiliary, Preset::Ancillary];

    /// Lowercase name used in logs and descriptor tables.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Auxiliary => "auxiliary",
            Self::Ancillary => "ancillary",
        }
    }

    /// Convert from the integer form used at the binding boundary.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Default),
            1 => Some(Self::Auxiliary),
            2 => Some(Self::Ancillary),
            _ => None,
        }
    }
}

// ============================================================================
// Board Ids
// ============================================================================

/// Supported board families.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum BoardId {
    /// Software signal generator, no hardware required
    Synthetic = -1,
    /// OpenBCI Cyton over the Wi-Fi shield (UDP data path)
    CytonWifi = 0,
    /// OpenBCI Ganglion over BLE GATT
    Ganglion = 1,
    /// gForce Pro EMG armband (vendor SDK)
    GforcePro = 2,
    /// ANT Neuro eego amplifier (vendor SDK)
    AntNeuro = 3,
    /// DawnEEG 4-channel serial amplifier
    DawnEeg4 = 4,
    /// DawnEEG 8-channel serial amplifier
    DawnEeg8 = 5,
    /// DawnEEG 16-channel serial amplifier
    DawnEeg16 = 6,
    /// DawnEEG 32-channel serial amplifier
    DawnEeg32 = 7,
    /// Enophone headset over Bluetooth Classic RFCOMM
    Enophone = 8,
}

impl BoardId {
    /// Convert from the integer form used at the binding boundary.
    #[must_use]
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            -1 => Some(Self::Synthetic),
            0 => Some(Self::CytonWifi),
            1 => Some(Self::Ganglion),
            2 => Some(Self::GforcePro),
            3 => Some(Self::AntNeuro),
            4 => Some(Self::DawnEeg4),
            5 => Some(Self::DawnEeg8),
            6 => Some(Self::DawnEeg16),
            7 => Some(Self::DawnEeg32),
            8 => Some(Self::Enophone),
            _ => None,
        }
    }

    /// Human-readable board name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Synthetic => "Synthetic",
            Self::CytonWifi => "Cyton WiFi",
            Self::Ganglion => "Ganglion",
            Self::GforcePro => "gForce Pro",
            Self::AntNeuro => "ANT Neuro eego",
            Self::DawnEeg4 => "DawnEEG4",
            Self::DawnEeg8 => "DawnEEG8",
            Self::DawnEeg16 => "DawnEEG16",
            Self::DawnEeg32 => "DawnEEG32",
            Self::Enophone => "Enophone",
        }
    }

    /// Number of EEG (or EMG for gForce) signal channels on the default
    /// preset.
    #[must_use]
    pub const fn signal_channel_count(self) -> usize {
        match self {
            Self::Synthetic => 8,
            Self::CytonWifi => 8,
            Self::Ganglion => 4,
            Self::GforcePro => 8,
            Self::AntNeuro => 32,
            Self::DawnEeg4 => 4,
            Self::DawnEeg8 => 8,
            Self::DawnEeg16 => 16,
            Self::DawnEeg32 => 32,
            Self::Enophone => 4,
        }
    }

    /// Build the descriptor for this board.
    #[must_use]
    pub fn descriptor(self) -> BoardDescriptor {
        match self {
            Self::Synthetic => BoardDescriptor::synthetic(),
            Self::CytonWifi => BoardDescriptor::cyton_wifi(),
            Self::Ganglion => BoardDescriptor::ganglion(),
            Self::GforcePro => BoardDescriptor::gforce_pro(),
            Self::AntNeuro => BoardDescriptor::ant_neuro(),
            Self::DawnEeg4 | Self::DawnEeg8 | Self::DawnEeg16 | Self::DawnEeg32 => {
                BoardDescriptor::dawn_eeg(self)
            }
            Self::Enophone => BoardDescriptor::enophone(),
        }
    }
}

// ============================================================================
// Preset Descriptor
// ============================================================================

/// Row schema for one preset of one board.
///
/// Row indices are 0-based positions in the sample matrix. Optional arrays
/// are empty when the board has no channels of that kind.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PresetDescriptor {
    /// Board display name
    pub name: String,
    /// Total rows in the sample matrix
    pub num_rows: usize,
    /// Nominal device sample rate in Hz
    pub sampling_rate: f64,
    /// Row carrying the device package counter
    pub package_num_channel: usize,
    /// Row carrying the timestamp
    pub timestamp_channel: usize,
    /// Row carrying event markers
    pub marker_channel: usize,
    /// EEG rows
    #[serde(default)]
    pub eeg_channels: Vec<usize>,
    /// EMG rows
    #[serde(default)]
    pub emg_channels: Vec<usize>,
    /// Accelerometer rows (x, y, z)
    #[serde(default)]
    pub accel_channels: Vec<usize>,
    /// Analog input rows
    #[serde(default)]
    pub analog_channels: Vec<usize>,
    /// Electrode impedance rows
    #[serde(default)]
    pub resistance_channels: Vec<usize>,
    /// Temperature rows
    #[serde(default)]
    pub temperature_channels: Vec<usize>,
    /// Battery level row
    #[serde(default)]
    pub battery_channel: Option<usize>,
    /// Digital trigger rows
    #[serde(default)]
    pub trigger_channels: Vec<usize>,
    /// Uninterpreted rows (raw aux bytes, footer codes, vendor extras)
    #[serde(default)]
    pub other_channels: Vec<usize>,
}

// ============================================================================
// Board Descriptor
// ============================================================================

/// Complete schema for a board: one descriptor per supported preset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoardDescriptor {
    /// Schema for the primary stream
    pub default: PresetDescriptor,
    /// Schema for the telemetry stream, if the board has one
    #[serde(default)]
    pub auxiliary: Option<PresetDescriptor>,
    /// Schema for an additional stream, if the board has one
    #[serde(default)]
    pub ancillary: Option<PresetDescriptor>,
}

impl BoardDescriptor {
    /// Look up the schema for a preset.
    #[must_use]
    pub fn preset(&self, preset: Preset) -> Option<&PresetDescriptor> {
        match preset {
            Preset::Default => Some(&self.default),
            Preset::Auxiliary => self.auxiliary.as_ref(),
            Preset::Ancillary => self.ancillary.as_ref(),
        }
    }

    /// Presets this board actually exposes.
    #[must_use]
    pub fn presets(&self) -> Vec<Preset> {
        let mut out = vec![Preset::Default];
        if self.auxiliary.is_some() {
            out.push(Preset::Auxiliary);
        }
        if self.ancillary.is_some() {
            out.push(Preset::Ancillary);
        }
        out
    }

    /// DawnEEG serial family.
    ///
    /// Default rows: package, N EEG channels, two triggers, marker,
    /// timestamp. Auxiliary rows: package, temperature, battery, marker,
    /// timestamp (one auxiliary row per eight device packages).
    #[must_use]
    pub fn dawn_eeg(board_id: BoardId) -> Self {
        let n = board_id.signal_channel_count();
        let default = PresetDescriptor {
            name: board_id.name().to_string(),
            num_rows: n + 5,
            sampling_rate: 250.0,
            package_num_channel: 0,
            eeg_channels: (1..=n).collect(),
            trigger_channels: vec![n + 1, n + 2],
            marker_channel: n + 3,
            timestamp_channel: n + 4,
            ..Default::default()
        };
        let auxiliary = PresetDescriptor {
            name: board_id.name().to_string(),
            num_rows: 5,
            sampling_rate: 250.0 / 8.0,
            package_num_channel: 0,
            temperature_channels: vec![1],
            battery_channel: Some(2),
            marker_channel: 3,
            timestamp_channel: 4,
            ..Default::default()
        };
        Self { default, auxiliary: Some(auxiliary), ancillary: None }
    }

    /// OpenBCI Cyton behind the Wi-Fi shield.
    ///
    /// Rows: package, 8 EEG, accel xyz, 3 analog, 7 raw aux/footer rows,
    /// marker, timestamp.
    #[must_use]
    pub fn cyton_wifi() -> Self {
        let default = PresetDescriptor {
            name: BoardId::CytonWifi.name().to_string(),
            num_rows: 24,
            sampling_rate: 250.0,
            package_num_channel: 0,
            eeg_channels: (1..=8).collect(),
            accel_channels: vec![9, 10, 11],
            analog_channels: vec![12, 13, 14],
            other_channels: (15..=21).collect(),
            marker_channel: 22,
            timestamp_channel: 23,
            ..Default::default()
        };
        Self { default, auxiliary: None, ancillary: None }
    }

    /// OpenBCI Ganglion over BLE.
    ///
    /// Rows: package, 4 EEG, accel xyz, 5 impedance values (four electrodes
    /// plus reference), marker, timestamp.
    #[must_use]
    pub fn ganglion() -> Self {
        let default = PresetDescriptor {
            name: BoardId::Ganglion.name().to_string(),
            num_rows: 15,
            sampling_rate: 200.0,
            package_num_channel: 0,
            eeg_channels: (1..=4).collect(),
            accel_channels: vec![5, 6, 7],
            resistance_channels: (8..=12).collect(),
            marker_channel: 13,
            timestamp_channel: 14,
            ..Default::default()
        };
        Self { default, auxiliary: None, ancillary: None }
    }

    /// gForce Pro EMG armband.
    #[must_use]
    pub fn gforce_pro() -> Self {
        let default = PresetDescriptor {
            name: BoardId::GforcePro.name().to_string(),
            num_rows: 11,
            sampling_rate: 500.0,
            package_num_channel: 0,
            emg_channels: (1..=8).collect(),
            marker_channel: 9,
            timestamp_channel: 10,
            ..Default::default()
        };
        Self { default, auxiliary: None, ancillary: None }
    }

    /// ANT Neuro eego amplifier.
    ///
    /// Rows: package, 32 referential EEG, 6 bipolar EMG, one trigger row,
    /// marker, timestamp.
    #[must_use]
    pub fn ant_neuro() -> Self {
        let default = PresetDescriptor {
            name: BoardId::AntNeuro.name().to_string(),
            num_rows: 42,
            sampling_rate: 2000.0,
            package_num_channel: 0,
            eeg_channels: (1..=32).collect(),
            emg_channels: (33..=38).collect(),
            other_channels: vec![39],
            marker_channel: 40,
            timestamp_channel: 41,
            ..Default::default()
        };
        Self { default, auxiliary: None, ancillary: None }
    }

    /// Enophone headset: four mastoid/vertex EEG channels over Bluetooth
    /// Classic.
    #[must_use]
    pub fn enophone() -> Self {
        let default = PresetDescriptor {
            name: BoardId::Enophone.name().to_string(),
            num_rows: 7,
            sampling_rate: 250.0,
            package_num_channel: 0,
            eeg_channels: (1..=4).collect(),
            marker_channel: 5,
            timestamp_channel: 6,
            ..Default::default()
        };
        Self { default, auxiliary: None, ancillary: None }
    }

    /// Software signal generator.
    #[must_use]
    pub fn synthetic() -> Self {
        let default = PresetDescriptor {
            name: BoardId::Synthetic.name().to_string(),
            num_rows: 16,
            sampling_rate: 250.0,
            package_num_channel: 0,
            eeg_channels: (1..=8).collect(),
            accel_channels: vec![9, 10, 11],
            battery_channel: Some(12),
            temperature_channels: vec![13],
            marker_channel: 14,
            timestamp_channel: 15,
            ..Default::default()
        };
        Self { default, auxiliary: None, ancillary: None }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_roundtrip() {
        for preset in Preset::ALL {
            assert_eq!(Preset::from_i32(preset as i32), Some(preset));
        }
        assert_eq!(Preset::from_i32(3), None);
    }

    #[test]
    fn test_board_id_roundtrip() {
        for id in [
            BoardId::Synthetic,
            BoardId::CytonWifi,
            BoardId::Ganglion,
            BoardId::GforcePro,
            BoardId::AntNeuro,
            BoardId::DawnEeg8,
            BoardId::DawnEeg32,
        ] {
            assert_eq!(BoardId::from_i32(id as i32), Some(id));
        }
        assert_eq!(BoardId::from_i32(99), None);
    }

    #[test]
    fn test_rows_are_disjoint_and_in_range() {
        for id in [
            BoardId::Synthetic,
            BoardId::CytonWifi,
            BoardId::Ganglion,
            BoardId::GforcePro,
            BoardId::AntNeuro,
            BoardId::DawnEeg4,
            BoardId::DawnEeg8,
            BoardId::DawnEeg16,
            BoardId::DawnEeg32,
            BoardId::Enophone,
        ] {
            let descr = id.descriptor();
            for preset in descr.presets() {
                let pd = descr.preset(preset).unwrap();
                let mut seen = vec![false; pd.num_rows];
                let mut claim = |row: usize| {
                    assert!(row < pd.num_rows, "{}: row {} out of range", pd.name, row);
                    assert!(!seen[row], "{}: row {} claimed twice", pd.name, row);
                    seen[row] = true;
                };
                claim(pd.package_num_channel);
                claim(pd.timestamp_channel);
                claim(pd.marker_channel);
                for &row in pd
                    .eeg_channels
                    .iter()
                    .chain(&pd.emg_channels)
                    .chain(&pd.accel_channels)
                    .chain(&pd.analog_channels)
                    .chain(&pd.resistance_channels)
                    .chain(&pd.temperature_channels)
                    .chain(&pd.trigger_channels)
                    .chain(&pd.other_channels)
                {
                    claim(row);
                }
                if let Some(row) = pd.battery_channel {
                    claim(row);
                }
                assert!(seen.iter().all(|&s| s), "{}: unassigned row", pd.name);
            }
        }
    }

    #[test]
    fn test_dawn_family_scales_with_channel_count() {
        let d8 = BoardId::DawnEeg8.descriptor();
        let d32 = BoardId::DawnEeg32.descriptor();
        assert_eq!(d8.default.num_rows, 13);
        assert_eq!(d32.default.num_rows, 37);
        assert_eq!(d8.default.eeg_channels.len(), 8);
        assert_eq!(d32.default.eeg_channels.len(), 32);
        assert!(d8.auxiliary.is_some());
    }

    #[test]
    fn test_descriptor_serializes() {
        let descr = BoardId::Ganglion.descriptor();
        let json = serde_json::to_string(&descr).unwrap();
        assert!(json.contains("resistance_channels"));
        let back: BoardDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default.num_rows, 15);
    }
}
