//! Enophone headset over Bluetooth Classic RFCOMM
//!
//! The headset pairs as a classic Bluetooth audio device and streams the
//! same `0xA0 ... 0xC0` framing as the serial family, four channels wide,
//! through the loadable RFCOMM shim. When the caller provides no MAC
//! address the shim's autodiscovery is asked for a device whose name
//! matches the headset; per-platform discovery support varies and maps to
//! distinct status codes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use neuroline_core::clock;
use neuroline_core::descriptor::{BoardId, Preset};
use neuroline_core::error::{BoardError, BoardResult};
use neuroline_core::params::BoardParams;
use neuroline_core::protocol::eeg_scale_uv;
use neuroline_core::protocol::serial_frame::{FrameFormat, STREAM_HEADER};

use crate::board::{BoardDriver, FirstFrameGate, SessionCore, FIRST_FRAME_TIMEOUT_SECS};
use crate::transport::bt_classic::BtClassicTransport;

const CMD_START_STREAM: &[u8] = b"b";
const CMD_STOP_STREAM: &[u8] = b"s";

/// Substring matched against discovered device names.
const NAME_SELECTOR: &str = "nophone";

/// Fixed amplifier gain of the headset front end.
const ENOPHONE_GAIN: i32 = 24;

/// Bounded attempts when draining the link after a stop command.
const STOP_DRAIN_MAX_ATTEMPTS: usize = 400_000;

/// Driver for the Enophone headset.
pub struct EnophoneDriver {
    core: Arc<SessionCore>,
    params: BoardParams,
    transport: Option<Arc<BtClassicTransport>>,
    keep_alive: Arc<AtomicBool>,
    gate: Arc<FirstFrameGate>,
    thread: Option<JoinHandle<()>>,
    initialized: bool,
    is_streaming: bool,
}

impl EnophoneDriver {
    /// Create the driver; discovery runs when `params.mac_address` is
    /// empty.
    #[must_use]
    pub fn new(params: BoardParams) -> Self {
        Self {
            core: Arc::new(SessionCore::new(BoardId::Enophone)),
            params,
            transport: None,
            keep_alive: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(FirstFrameGate::new()),
            thread: None,
            initialized: false,
            is_streaming: false,
        }
    }

    fn transport(&self) -> BoardResult<&Arc<BtClassicTransport>> {
        self.transport
            .as_ref()
            .ok_or(BoardError::BoardNotCreated(BoardId::Enophone as i32))
    }

    fn read_loop(
        core: &SessionCore,
        transport: &BtClassicTransport,
        keep_alive: &AtomicBool,
        gate: &FirstFrameGate,
    ) {
        let schema = &core.descriptor().default;
        let format = FrameFormat::dawn(schema.eeg_channels.len());
        let body_len = format.body_len();
        let mut pending: Vec<u8> = Vec::with_capacity(4 * (body_len + 1));
        let mut chunk = [0u8; 256];
        let mut row = vec![0.0; schema.num_rows];
        let scale = eeg_scale_uv(ENOPHONE_GAIN);
        let mut first_frame_seen = false;

        while keep_alive.load(Ordering::Acquire) {
            match transport.read(&mut chunk) {
                Ok(0) => {
                    std::thread::sleep(Duration::from_millis(1));
                    continue;
                }
                Ok(n) => pending.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    tracing::debug!(error = %e, "bluetooth read failed");
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }
            }

            // resynchronize on the header byte, then consume whole frames
            loop {
                let Some(start) = pending.iter().position(|&b| b == STREAM_HEADER) else {
                    pending.clear();
                    break;
                };
                if start > 0 {
                    pending.drain(..start);
                }
                if pending.len() < 1 + body_len {
                    break;
                }
                match format.decode(&pending[1..=body_len]) {
                    Ok(frame) => {
                        if !first_frame_seen {
                            first_frame_seen = true;
                            tracing::info!("received first package, streaming is started");
                            gate.open();
                        }
                        row[schema.package_num_channel] = f64::from(frame.package_num);
                        for (ch, &index) in schema.eeg_channels.iter().enumerate() {
                            row[index] = scale * f64::from(frame.raw_sample(ch));
                        }
                        row[schema.timestamp_channel] = clock::timestamp();
                        core.push_package(&mut row, Preset::Default);
                        pending.drain(..=body_len);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping malformed frame");
                        // skip the bad header and rescan
                        pending.drain(..1);
                    }
                }
            }
        }
        tracing::debug!("acquisition loop stopped");
    }
}

impl BoardDriver for EnophoneDriver {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        if self.initialized {
            tracing::info!("session is already prepared");
            return Ok(());
        }
        let mut transport =
            BtClassicTransport::load(&self.params.mac_address, self.params.ip_port)?;
        if self.params.mac_address.is_empty() {
            tracing::warn!("mac address not provided, trying to autodiscover the headset");
            transport.discover(NAME_SELECTOR)?;
        }
        transport.open()?;
        self.transport = Some(Arc::new(transport));
        self.initialized = true;
        Ok(())
    }

    fn start_stream(&mut self, buffer_size: usize, streamer_params: &str) -> BoardResult<()> {
        if !self.initialized {
            return Err(BoardError::BoardNotCreated(BoardId::Enophone as i32));
        }
        if self.is_streaming {
            return Err(BoardError::StreamAlreadyRun);
        }
        self.core.prepare_for_acquisition(buffer_size, streamer_params)?;
        self.transport()?.write(CMD_START_STREAM)?;

        self.keep_alive.store(true, Ordering::Release);
        self.gate.reset();
        let core = Arc::clone(&self.core);
        let transport = Arc::clone(self.transport()?);
        let keep_alive = Arc::clone(&self.keep_alive);
        let gate = Arc::clone(&self.gate);
        let thread = std::thread::Builder::new()
            .name("neuroline-enophone".to_string())
            .spawn(move || Self::read_loop(&core, &transport, &keep_alive, &gate))
            .map_err(|e| {
                self.keep_alive.store(false, Ordering::Release);
                self.core.free_packages();
                BoardError::StreamThread(e.to_string())
            })?;
        self.thread = Some(thread);

        if self.gate.wait(Duration::from_secs(FIRST_FRAME_TIMEOUT_SECS)) {
            self.is_streaming = true;
            Ok(())
        } else {
            tracing::error!("no data received in 3s, stopping thread");
            self.is_streaming = true;
            let _ = self.stop_stream();
            Err(BoardError::SyncTimeout(FIRST_FRAME_TIMEOUT_SECS))
        }
    }

    fn stop_stream(&mut self) -> BoardResult<()> {
        if !self.is_streaming {
            return Err(BoardError::StreamThreadNotRunning);
        }
        self.keep_alive.store(false, Ordering::Release);
        self.is_streaming = false;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let transport = self.transport()?.clone();
        transport.write(CMD_STOP_STREAM)?;

        let mut byte = [0u8; 1];
        for _ in 0..STOP_DRAIN_MAX_ATTEMPTS {
            match transport.read(&mut byte) {
                Ok(1) => {}
                _ => return Ok(()),
            }
        }
        tracing::error!("stop command sent but the headset is still streaming");
        Err(BoardError::BoardWrite(
            "device kept streaming after the stop command".to_string(),
        ))
    }

    fn release_session(&mut self) -> BoardResult<()> {
        if self.initialized {
            if self.is_streaming {
                let _ = self.stop_stream();
            }
            self.core.free_packages();
            self.initialized = false;
        }
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                tracing::debug!(error = %e, "close failed during teardown");
            }
        }
        Ok(())
    }

    fn config_board(&mut self, command: &str) -> BoardResult<String> {
        if !self.initialized {
            return Err(BoardError::BoardNotCreated(BoardId::Enophone as i32));
        }
        self.transport()?.write(command.as_bytes())?;
        Ok(String::new())
    }
}

impl Drop for EnophoneDriver {
    fn drop(&mut self) {
        let _ = self.release_session();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_before_prepare() {
        let mut driver = EnophoneDriver::new(BoardParams::default());
        assert!(matches!(
            driver.start_stream(1_024, ""),
            Err(BoardError::BoardNotCreated(_))
        ));
        assert!(matches!(
            driver.stop_stream(),
            Err(BoardError::StreamThreadNotRunning)
        ));
        assert!(matches!(
            driver.config_board("b"),
            Err(BoardError::BoardNotCreated(_))
        ));
        driver.release_session().unwrap();
    }

    #[test]
    fn test_prepare_without_shim_is_clean_error() {
        // the RFCOMM shim does not ship with the test binary
        let mut driver = EnophoneDriver::new(BoardParams {
            mac_address: "AA:BB:CC:DD:EE:FF".to_string(),
            ..Default::default()
        });
        assert!(driver.prepare_session().is_err());
        assert!(!driver.initialized);
    }
}
