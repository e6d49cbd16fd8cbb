//! Device configuration command grammar and gain tracking
//!
//! The serial amplifier families accept terse ASCII control strings. The
//! ones that matter to decoding are channel-programming commands, because
//! they change the per-channel amplifier gain that feeds the sample scale
//! factor. [`GainTracker`] validates commands before any bytes reach the
//! device and keeps the previous gain set so a device-side failure can be
//! rolled back.
//!
//! Grammar handled here:
//! - `d` resets every channel to the default gain
//! - `x <channel> <power> <gain> <input> <bias> <srb2> <srb1> X` programs
//!   one channel (commands may be concatenated)
//! - `z <channel> <power> <mode> Z` toggles impedance measurement
//! - `~<code>`, `o..`/`O..` set sampling rate and on/off state
//!
//! Only `d` and `x..X` touch gains; the rest validate but leave the tracker
//! untouched.

use serde::{Deserialize, Serialize};

/// Default amplifier gain after reset.
pub const DEFAULT_GAIN: i32 = 24;

/// Maximum channels addressable by the command grammar.
pub const MAX_CHANNELS: usize = 32;

/// Gain values selected by command gain codes 0..=6.
pub const GAIN_VALUES: [i32; 7] = [1, 2, 4, 6, 8, 12, 24];

/// Channel selector letters for channels 1..=32.
const CHANNEL_LETTERS: [char; MAX_CHANNELS] = [
    '1', '2', '3', '4', '5', '6', '7', '8', // channels 1-8
    'Q', 'W', 'E', 'R', 'T', 'Y', 'U', 'I', // channels 9-16
    'A', 'S', 'D', 'F', 'G', 'H', 'J', 'K', // channels 17-24
    'Z', 'X', 'C', 'V', 'B', 'N', 'M', 'L', // channels 25-32
];

const CHANNEL_COMMAND_LEN: usize = 9;
const IMPEDANCE_COMMAND_LEN: usize = 5;

/// Classification of a configuration string.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// Well-formed but does not program channels (rate, on/off, vendor)
    NotChannelCommand,
    /// Well-formed channel or reset command, tracker state updated
    ValidCommand,
    /// Malformed; must not be written to the device
    InvalidCommand,
}

/// Tracks the current and previous per-channel gains.
#[derive(Clone, Debug)]
pub struct GainTracker {
    current_gains: [i32; MAX_CHANNELS],
    old_gains: [i32; MAX_CHANNELS],
}

impl Default for GainTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl GainTracker {
    /// Tracker with every channel at [`DEFAULT_GAIN`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            current_gains: [DEFAULT_GAIN; MAX_CHANNELS],
            old_gains: [DEFAULT_GAIN; MAX_CHANNELS],
        }
    }

    /// Gain currently programmed for a 0-based channel index.
    ///
    /// Out-of-range indices report gain 1 so a misconfigured descriptor can
    /// never divide by zero in the scale computation.
    #[must_use]
    pub fn gain_for_channel(&self, channel: usize) -> i32 {
        self.current_gains.get(channel).copied().unwrap_or(1)
    }

    /// Validate a configuration string and apply any gain changes.
    ///
    /// Returns [`CommandOutcome::InvalidCommand`] without touching state
    /// when any embedded channel command is malformed; device I/O must be
    /// skipped in that case. On success the previous gain set is retained
    /// for [`revert`](Self::revert).
    pub fn apply_config(&mut self, config: &str) -> CommandOutcome {
        let chars: Vec<char> = config.chars().collect();

        if chars.len() == 1 && chars[0] == 'd' {
            self.old_gains = self.current_gains;
            self.current_gains = [DEFAULT_GAIN; MAX_CHANNELS];
            return CommandOutcome::ValidCommand;
        }

        let mut outcome = CommandOutcome::NotChannelCommand;
        let mut staged = self.current_gains;
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                'x' if chars.len() >= i + CHANNEL_COMMAND_LEN
                    && chars[i + CHANNEL_COMMAND_LEN - 1] == 'X' =>
                {
                    match Self::apply_channel_command(
                        &chars[i..i + CHANNEL_COMMAND_LEN],
                        &mut staged,
                    ) {
                        CommandOutcome::ValidCommand => {
                            outcome = CommandOutcome::ValidCommand;
                            i += CHANNEL_COMMAND_LEN;
                        }
                        other => return other,
                    }
                }
                'z' if chars.len() >= i + IMPEDANCE_COMMAND_LEN
                    && chars[i + IMPEDANCE_COMMAND_LEN - 1] == 'Z' =>
                {
                    if Self::validate_impedance_command(&chars[i..i + IMPEDANCE_COMMAND_LEN]) {
                        i += IMPEDANCE_COMMAND_LEN;
                    } else {
                        return CommandOutcome::InvalidCommand;
                    }
                }
                _ => i += 1,
            }
        }

        if outcome == CommandOutcome::ValidCommand {
            self.old_gains = self.current_gains;
            self.current_gains = staged;
        }
        outcome
    }

    /// Roll back to the gain set before the last successful
    /// [`apply_config`](Self::apply_config).
    pub fn revert(&mut self) {
        self.current_gains = self.old_gains;
    }

    fn channel_index(letter: char) -> Option<usize> {
        CHANNEL_LETTERS.iter().position(|&c| c == letter)
    }

    fn apply_channel_command(cmd: &[char], gains: &mut [i32; MAX_CHANNELS]) -> CommandOutcome {
        debug_assert_eq!(cmd.len(), CHANNEL_COMMAND_LEN);
        if cmd[0] != 'x' || cmd[CHANNEL_COMMAND_LEN - 1] != 'X' {
            return CommandOutcome::NotChannelCommand;
        }
        // bias, srb2, srb1 flags
        for &flag in &cmd[5..8] {
            if flag != '0' && flag != '1' {
                return CommandOutcome::InvalidCommand;
            }
        }
        // input source 0..=7
        if !('0'..='7').contains(&cmd[4]) {
            return CommandOutcome::InvalidCommand;
        }
        // gain code 0..=6
        if !('0'..='6').contains(&cmd[3]) {
            return CommandOutcome::InvalidCommand;
        }
        // power flag
        if cmd[2] != '0' && cmd[2] != '1' {
            return CommandOutcome::InvalidCommand;
        }
        let Some(index) = Self::channel_index(cmd[1]) else {
            return CommandOutcome::InvalidCommand;
        };
        let gain_code = cmd[3] as usize - '0' as usize;
        gains[index] = GAIN_VALUES[gain_code];
        CommandOutcome::ValidCommand
    }

    fn validate_impedance_command(cmd: &[char]) -> bool {
        debug_assert_eq!(cmd.len(), IMPEDANCE_COMMAND_LEN);
        Self::channel_index(cmd[1]).is_some()
            && (cmd[2] == '0' || cmd[2] == '1')
            && (cmd[3] == '0' || cmd[3] == '1')
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_gain_everywhere() {
        let tracker = GainTracker::new();
        for ch in 0..MAX_CHANNELS {
            assert_eq!(tracker.gain_for_channel(ch), DEFAULT_GAIN);
        }
        // out of range never panics and never yields zero
        assert_eq!(tracker.gain_for_channel(MAX_CHANNELS), 1);
    }

    #[test]
    fn test_channel_command_sets_gain() {
        let mut tracker = GainTracker::new();
        // channel 2, gain code 6 => 24; then gain code 0 => 1
        assert_eq!(tracker.apply_config("x2060110X"), CommandOutcome::ValidCommand);
        assert_eq!(tracker.gain_for_channel(1), 24);
        assert_eq!(tracker.apply_config("x2000110X"), CommandOutcome::ValidCommand);
        assert_eq!(tracker.gain_for_channel(1), 1);
    }

    #[test]
    fn test_revert_restores_previous_gains() {
        let mut tracker = GainTracker::new();
        assert_eq!(tracker.apply_config("x1030110X"), CommandOutcome::ValidCommand);
        assert_eq!(tracker.gain_for_channel(0), 6);
        tracker.revert();
        assert_eq!(tracker.gain_for_channel(0), DEFAULT_GAIN);
    }

    #[test]
    fn test_upper_channel_letters() {
        let mut tracker = GainTracker::new();
        // 'Q' addresses channel 9 (index 8), 'L' addresses channel 32
        assert_eq!(tracker.apply_config("xQ010110X"), CommandOutcome::ValidCommand);
        assert_eq!(tracker.gain_for_channel(8), 2);
        assert_eq!(tracker.apply_config("xL050110X"), CommandOutcome::ValidCommand);
        assert_eq!(tracker.gain_for_channel(31), 12);
    }

    #[test]
    fn test_concatenated_commands_apply_atomically() {
        let mut tracker = GainTracker::new();
        assert_eq!(
            tracker.apply_config("x1060110Xx2060110X"),
            CommandOutcome::ValidCommand
        );
        assert_eq!(tracker.gain_for_channel(0), 24);
        assert_eq!(tracker.gain_for_channel(1), 24);
        // one bad command in a batch rejects the whole string
        tracker.revert();
        assert_eq!(
            tracker.apply_config("x1000110Xx1090110X"),
            CommandOutcome::InvalidCommand
        );
        assert_eq!(tracker.gain_for_channel(0), DEFAULT_GAIN);
    }

    #[test]
    fn test_invalid_fields_rejected() {
        let mut tracker = GainTracker::new();
        assert_eq!(tracker.apply_config("x1070110X"), CommandOutcome::InvalidCommand); // gain 7
        assert_eq!(tracker.apply_config("x1038110X"), CommandOutcome::InvalidCommand); // input 8
        assert_eq!(tracker.apply_config("x1030112X"), CommandOutcome::InvalidCommand); // srb1 2
        assert_eq!(tracker.apply_config("x9030110X"), CommandOutcome::InvalidCommand); // channel 9
    }

    #[test]
    fn test_reset_command() {
        let mut tracker = GainTracker::new();
        tracker.apply_config("x1000110X");
        assert_eq!(tracker.apply_config("d"), CommandOutcome::ValidCommand);
        assert_eq!(tracker.gain_for_channel(0), DEFAULT_GAIN);
        tracker.revert();
        assert_eq!(tracker.gain_for_channel(0), 1);
    }

    #[test]
    fn test_non_channel_commands_pass_through() {
        let mut tracker = GainTracker::new();
        assert_eq!(tracker.apply_config("~6"), CommandOutcome::NotChannelCommand);
        assert_eq!(tracker.apply_config("b"), CommandOutcome::NotChannelCommand);
        assert_eq!(tracker.apply_config("z101Z"), CommandOutcome::NotChannelCommand);
        assert_eq!(tracker.apply_config("z191Z"), CommandOutcome::InvalidCommand);
        assert_eq!(tracker.gain_for_channel(0), DEFAULT_GAIN);
    }
}
