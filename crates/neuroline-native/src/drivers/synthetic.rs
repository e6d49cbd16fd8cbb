//! Synthetic board: a software signal generator
//!
//! Produces an alpha-plus-beta sine mix with seeded noise on eight EEG
//! rows at the descriptor rate, with slow accelerometer drift and static
//! battery/temperature telemetry. Exercises the full acquisition pipeline
//! (buffers, markers, streamers, retrieval) without hardware; the CLI and
//! the integration tests run against it.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use neuroline_core::clock;
use neuroline_core::descriptor::{BoardId, Preset};
use neuroline_core::error::{BoardError, BoardResult};
use neuroline_core::params::BoardParams;

use crate::board::{BoardDriver, SessionCore};

/// Driver for the software signal generator.
pub struct SyntheticDriver {
    core: Arc<SessionCore>,
    params: BoardParams,
    keep_alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    initialized: bool,
    is_streaming: bool,
}

impl SyntheticDriver {
    /// Create the driver. `params.other_info` may carry a numeric RNG seed
    /// for reproducible output.
    #[must_use]
    pub fn new(params: BoardParams) -> Self {
        Self {
            core: Arc::new(SessionCore::new(BoardId::Synthetic)),
            params,
            keep_alive: Arc::new(AtomicBool::new(false)),
            thread: None,
            initialized: false,
            is_streaming: false,
        }
    }

    fn generator_loop(core: &SessionCore, keep_alive: &AtomicBool, seed: Option<u64>) {
        let schema = &core.descriptor().default;
        let period = Duration::from_secs_f64(1.0 / schema.sampling_rate);
        let mut rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut row = vec![0.0; schema.num_rows];
        let mut package_num = 0u8;
        let started = Instant::now();
        let mut next_deadline = started;

        while keep_alive.load(Ordering::Acquire) {
            let t = started.elapsed().as_secs_f64();
            row[schema.package_num_channel] = f64::from(package_num);
            for (ch, &index) in schema.eeg_channels.iter().enumerate() {
                let phase = ch as f64 * 0.5;
                // alpha (10 Hz) + beta (20 Hz) + noise, in microvolts
                row[index] = 10.0 * (TAU * 10.0 * t + phase).sin()
                    + 5.0 * (TAU * 20.0 * t + 2.0 * phase).sin()
                    + rng.gen_range(-2.0..2.0);
            }
            for (axis, &index) in schema.accel_channels.iter().enumerate() {
                row[index] = 0.05 * (TAU * 0.2 * t + axis as f64).sin();
            }
            if let Some(index) = schema.battery_channel {
                row[index] = 95.0;
            }
            if let Some(&index) = schema.temperature_channels.first() {
                row[index] = 36.5;
            }
            row[schema.timestamp_channel] = clock::timestamp();
            core.push_package(&mut row, Preset::Default);
            package_num = package_num.wrapping_add(1);

            next_deadline += period;
            let now = Instant::now();
            if next_deadline > now {
                std::thread::sleep(next_deadline - now);
            }
        }
    }
}

impl BoardDriver for SyntheticDriver {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        if self.initialized {
            tracing::info!("session is already prepared");
            return Ok(());
        }
        self.initialized = true;
        Ok(())
    }

    fn start_stream(&mut self, buffer_size: usize, streamer_params: &str) -> BoardResult<()> {
        if !self.initialized {
            return Err(BoardError::BoardNotCreated(self.board_id() as i32));
        }
        if self.is_streaming {
            return Err(BoardError::StreamAlreadyRun);
        }
        self.core.prepare_for_acquisition(buffer_size, streamer_params)?;

        let seed = self.params.other_info.parse::<u64>().ok();
        self.keep_alive.store(true, Ordering::Release);
        let core = Arc::clone(&self.core);
        let keep_alive = Arc::clone(&self.keep_alive);
        let thread = std::thread::Builder::new()
            .name("neuroline-synthetic".to_string())
            .spawn(move || Self::generator_loop(&core, &keep_alive, seed))
            .map_err(|e| {
                self.core.free_packages();
                BoardError::StreamThread(e.to_string())
            })?;
        self.thread = Some(thread);
        self.is_streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) -> BoardResult<()> {
        if !self.is_streaming {
            return Err(BoardError::StreamThreadNotRunning);
        }
        self.keep_alive.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        self.is_streaming = false;
        Ok(())
    }

    fn release_session(&mut self) -> BoardResult<()> {
        if self.initialized {
            if self.is_streaming {
                let _ = self.stop_stream();
            }
            self.core.free_packages();
            self.initialized = false;
        }
        Ok(())
    }

    fn config_board(&mut self, command: &str) -> BoardResult<String> {
        if !self.initialized {
            return Err(BoardError::BoardNotCreated(self.board_id() as i32));
        }
        tracing::debug!(command, "synthetic board ignores configuration");
        Ok(String::new())
    }
}

impl Drop for SyntheticDriver {
    fn drop(&mut self) {
        let _ = self.release_session();
    }
}

// ============================================================================
// Tests
// ============================================================================
