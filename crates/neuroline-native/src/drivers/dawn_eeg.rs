//! DawnEEG serial amplifier family
//!
//! The amplifiers stream framed binary at a custom 2 Mbaud rate:
//! `0xA0 | seq | N x 24-bit samples | 7 aux bytes | 0xC0`. Session setup
//! soft-resets the device, matches the banner against the board name, runs
//! twenty clock-sync exchanges and applies the default configuration.
//! Telemetry bytes interleaved across eight consecutive packages are
//! re-assembled into auxiliary-preset rows.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use neuroline_core::clock::{self, parse_sync_response, ClockSync, SYNC_EXCHANGE_LEN, SYNC_REQUEST};
use neuroline_core::config::{CommandOutcome, GainTracker};
use neuroline_core::descriptor::{BoardId, Preset};
use neuroline_core::error::{BoardError, BoardResult};
use neuroline_core::params::BoardParams;
use neuroline_core::protocol::serial_frame::{
    DawnAux, FrameFormat, TelemetryAccumulator, TelemetryUpdate, STREAM_HEADER,
};
use neuroline_core::protocol::eeg_scale_uv;

use crate::board::{BoardDriver, FirstFrameGate, SessionCore, FIRST_FRAME_TIMEOUT_SECS};
use crate::transport::serial::{SerialIo, SerialTransport};

const CMD_SOFT_RESET: &[u8] = b"v";
const CMD_DEFAULT: &str = "d";
const CMD_START_STREAM: &[u8] = b"b";
const CMD_STOP_STREAM: &[u8] = b"s";
const CMD_PROMPT: &str = "$$$";

const BAUD_RATE: u32 = 2_000_000;
const RESPONSE_LIMIT: usize = 4_096;
const SYNC_REPETITIONS: usize = 20;

/// Bounded attempts when draining the kernel buffer after a stop command.
const STOP_DRAIN_MAX_ATTEMPTS: usize = 400_000;

type SharedSerial = Arc<Mutex<Box<dyn SerialIo>>>;

/// Driver for the DawnEEG serial family.
pub struct DawnEegDriver {
    core: Arc<SessionCore>,
    params: BoardParams,
    serial: Option<SharedSerial>,
    tracker: Arc<Mutex<GainTracker>>,
    clock: ClockSync,
    keep_alive: Arc<AtomicBool>,
    gate: Arc<FirstFrameGate>,
    thread: Option<JoinHandle<()>>,
    initialized: bool,
    is_streaming: bool,
}

impl DawnEegDriver {
    /// Create a driver for one of the DawnEEG board ids.
    #[must_use]
    pub fn new(board_id: BoardId, params: BoardParams) -> Self {
        debug_assert!(matches!(
            board_id,
            BoardId::DawnEeg4 | BoardId::DawnEeg8 | BoardId::DawnEeg16 | BoardId::DawnEeg32
        ));
        Self {
            core: Arc::new(SessionCore::new(board_id)),
            params,
            serial: None,
            tracker: Arc::new(Mutex::new(GainTracker::new())),
            clock: ClockSync::new(),
            keep_alive: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(FirstFrameGate::new()),
            thread: None,
            initialized: false,
            is_streaming: false,
        }
    }

    /// Create a driver over an already-open transport. Used by tests and by
    /// callers that manage ports themselves; `prepare_session` skips the
    /// open step.
    #[must_use]
    pub fn with_transport(
        board_id: BoardId,
        params: BoardParams,
        transport: Box<dyn SerialIo>,
    ) -> Self {
        let mut driver = Self::new(board_id, params);
        driver.serial = Some(Arc::new(Mutex::new(transport)));
        driver
    }

    fn serial(&self) -> BoardResult<&SharedSerial> {
        self.serial
            .as_ref()
            .ok_or(BoardError::BoardNotCreated(self.core.board_id() as i32))
    }

    fn lock_serial(serial: &SharedSerial) -> std::sync::MutexGuard<'_, Box<dyn SerialIo>> {
        serial.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, msg: &[u8]) -> BoardResult<()> {
        let serial = self.serial()?;
        let mut port = Self::lock_serial(serial);
        tracing::debug!(msg = %String::from_utf8_lossy(msg), "sending to board");
        port.write_all(msg)
            .map_err(|e| BoardError::BoardWrite(e.to_string()))
    }

    /// Send and collect the response: bytes until the port goes quiet,
    /// bounded at 4096.
    fn send_receive(&self, msg: &[u8]) -> BoardResult<String> {
        let serial = self.serial()?;
        let mut port = Self::lock_serial(serial);
        port.write_all(msg)
            .map_err(|e| BoardError::BoardWrite(e.to_string()))?;
        let mut response = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        while response.len() < RESPONSE_LIMIT {
            match port.read(&mut byte) {
                Ok(1) => response.push(byte[0]),
                _ => break,
            }
        }
        let response = String::from_utf8_lossy(&response).into_owned();
        tracing::debug!(response = %response, "board response");
        Ok(response)
    }

    fn init_board(&mut self) -> BoardResult<()> {
        // the device may still be streaming from a previous crashed host:
        // stop, settle, flush, then reset
        self.send(CMD_STOP_STREAM)?;
        std::thread::sleep(Duration::from_secs(1));
        Self::lock_serial(self.serial()?).flush_input();
        self.soft_reset()
    }

    fn soft_reset(&mut self) -> BoardResult<()> {
        let response = self.send_receive(CMD_SOFT_RESET)?;
        if !response.contains(CMD_PROMPT) {
            tracing::error!(response = %response, "board did not send the welcome prompt");
            return Err(BoardError::InitialMsg(response));
        }
        let expected = self.core.board_id().name();
        if !response.contains(expected) {
            tracing::error!(response = %response, expected, "board banner mismatch");
            return Err(BoardError::InitialMsg(response));
        }
        tracing::info!(board = expected, "board detected");
        Ok(())
    }

    fn default_config(&mut self) -> BoardResult<()> {
        let response = self.config_board(CMD_DEFAULT)?;
        if response.starts_with("Failure") {
            tracing::error!(response = %response, "default configuration rejected");
            return Err(BoardError::BoardNotReady(response));
        }
        Ok(())
    }

    /// One round-trip clock exchange; retains the minimum-RTT offset.
    fn time_sync(&mut self) -> BoardResult<()> {
        let serial = self.serial()?.clone();
        let mut port = Self::lock_serial(&serial);
        let t1 = clock::timestamp();
        port.write_all(SYNC_REQUEST)
            .map_err(|e| BoardError::BoardWrite(e.to_string()))?;

        let mut reply = [0u8; SYNC_EXCHANGE_LEN];
        let mut filled = 0;
        while filled < SYNC_EXCHANGE_LEN {
            match port.read(&mut reply[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => return Err(BoardError::BoardWrite(e.to_string())),
            }
        }
        let t4 = clock::timestamp();
        drop(port);

        if filled != SYNC_EXCHANGE_LEN {
            tracing::warn!(received = filled, "short clock-sync reply");
            return Err(BoardError::BoardWrite(format!(
                "clock sync reply was {filled} bytes"
            )));
        }
        let (t2, t3) = parse_sync_response(&reply)
            .map_err(|e| BoardError::IncomingMsg(e.to_string()))?;
        if self.clock.update(t1, t2, t3, t4) {
            tracing::debug!(
                half_rtt = self.clock.half_rtt(),
                "clock correction updated from exchange"
            );
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn read_loop(
        core: &SessionCore,
        serial: &SharedSerial,
        tracker: &Mutex<GainTracker>,
        keep_alive: &AtomicBool,
        gate: &FirstFrameGate,
        clock_sync: ClockSync,
    ) {
        let schema = &core.descriptor().default;
        let aux_schema = core.descriptor().auxiliary.as_ref();
        let format = FrameFormat::dawn(schema.eeg_channels.len());
        let mut body = vec![0u8; format.body_len()];
        let mut row = vec![0.0; schema.num_rows];
        let mut aux_row = vec![0.0; aux_schema.map_or(0, |s| s.num_rows)];
        let mut telemetry = TelemetryAccumulator::new();
        let mut first_frame_seen = false;

        while keep_alive.load(Ordering::Acquire) {
            {
                let mut port = Self::lock_serial(serial);
                let mut header = [0u8; 1];
                match port.read(&mut header) {
                    Ok(1) => {}
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::debug!(error = %e, "serial read failed");
                        std::thread::sleep(Duration::from_millis(100));
                        continue;
                    }
                }
                if header[0] != STREAM_HEADER {
                    continue;
                }
                let mut filled = 0;
                while filled < body.len() && keep_alive.load(Ordering::Acquire) {
                    match port.read(&mut body[filled..]) {
                        Ok(n) => filled += n,
                        Err(e) => {
                            tracing::debug!(error = %e, "serial read failed mid-frame");
                            break;
                        }
                    }
                }
                if filled < body.len() {
                    continue;
                }
            }

            let frame = match format.decode(&body) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed frame");
                    continue;
                }
            };
            if !first_frame_seen {
                first_frame_seen = true;
                tracing::info!("received first package, streaming is started");
                gate.open();
            }

            let package_num = frame.package_num;
            row[schema.package_num_channel] = f64::from(package_num);
            {
                let gains = tracker.lock().unwrap_or_else(PoisonError::into_inner);
                for (ch, &index) in schema.eeg_channels.iter().enumerate() {
                    let scale = eeg_scale_uv(gains.gain_for_channel(ch));
                    row[index] = scale * f64::from(frame.raw_sample(ch));
                }
            }
            let aux = DawnAux::decode(frame.aux);
            let host_timestamp = clock_sync.correct(aux.device_timestamp);
            row[schema.timestamp_channel] = host_timestamp;
            row[schema.trigger_channels[0]] = f64::from(aux.trigger1);
            row[schema.trigger_channels[1]] = f64::from(aux.trigger2);
            core.push_package(&mut row, Preset::Default);

            // telemetry bytes interleave across packages; one auxiliary row
            // completes per eight default rows
            if let Some(aux_schema) = aux_schema {
                if package_num % 8 == 0 {
                    aux_row[aux_schema.package_num_channel] = f64::from(package_num / 8);
                    aux_row[aux_schema.timestamp_channel] = host_timestamp;
                }
                match telemetry.feed(package_num, aux.telemetry) {
                    Some(TelemetryUpdate::Temperature(value)) => {
                        aux_row[aux_schema.temperature_channels[0]] = value;
                    }
                    Some(TelemetryUpdate::Battery(volts)) => {
                        if let Some(index) = aux_schema.battery_channel {
                            aux_row[index] = volts;
                        }
                        core.push_package(&mut aux_row, Preset::Auxiliary);
                    }
                    None => {}
                }
            }
        }
        tracing::debug!("acquisition loop stopped");
    }
}

impl BoardDriver for DawnEegDriver {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        if self.initialized {
            tracing::info!("session is already prepared");
            return Ok(());
        }
        if self.serial.is_none() {
            if self.params.serial_port.is_empty() {
                return Err(BoardError::InvalidArguments(
                    "serial port is not specified".to_string(),
                ));
            }
            let transport: Box<dyn SerialIo> = Box::new(SerialTransport::open(
                &self.params.serial_port,
                BAUD_RATE,
                self.params.timeout_ms(),
            )?);
            self.serial = Some(Arc::new(Mutex::new(transport)));
        }

        let result = (|| {
            self.init_board()?;
            for _ in 0..SYNC_REPETITIONS {
                self.time_sync()?;
            }
            self.initialized = true;
            self.default_config()
        })();

        if let Err(e) = result {
            self.serial = None;
            self.initialized = false;
            return Err(e);
        }
        Ok(())
    }

    fn start_stream(&mut self, buffer_size: usize, streamer_params: &str) -> BoardResult<()> {
        if !self.initialized {
            return Err(BoardError::BoardNotCreated(self.core.board_id() as i32));
        }
        if self.is_streaming {
            return Err(BoardError::StreamAlreadyRun);
        }
        self.core.prepare_for_acquisition(buffer_size, streamer_params)?;
        self.send(CMD_START_STREAM)?;

        self.keep_alive.store(true, Ordering::Release);
        self.gate.reset();
        let core = Arc::clone(&self.core);
        let serial = self.serial()?.clone();
        let tracker = Arc::clone(&self.tracker);
        let keep_alive = Arc::clone(&self.keep_alive);
        let gate = Arc::clone(&self.gate);
        let clock_sync = self.clock;
        let thread = std::thread::Builder::new()
            .name("neuroline-dawneeg".to_string())
            .spawn(move || {
                Self::read_loop(&core, &serial, &tracker, &keep_alive, &gate, clock_sync);
            })
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
        self.send(CMD_STOP_STREAM)?;

        // free the kernel buffer; bounded so a device that ignores the stop
        // command cannot wedge the caller
        let serial = self.serial()?.clone();
        let mut port = Self::lock_serial(&serial);
        let mut byte = [0u8; 1];
        for _ in 0..STOP_DRAIN_MAX_ATTEMPTS {
            match port.read(&mut byte) {
                Ok(1) => {}
                _ => return Ok(()),
            }
        }
        tracing::error!("stop command sent but the device is still streaming");
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
        self.serial = None;
        Ok(())
    }

    fn config_board(&mut self, command: &str) -> BoardResult<String> {
        if self.serial.is_none() {
            return Err(BoardError::BoardNotCreated(self.core.board_id() as i32));
        }
        {
            let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
            if tracker.apply_config(command) == CommandOutcome::InvalidCommand {
                tracing::warn!(command, "invalid configuration command");
                return Err(BoardError::InvalidArguments(format!(
                    "invalid configuration command {command:?}"
                )));
            }
        }
        if !self.initialized {
            return Err(BoardError::BoardNotReady(
                "prepare_session must complete before config_board".to_string(),
            ));
        }

        let result = if self.is_streaming {
            tracing::warn!(
                "changing board parameters during streaming may desynchronize \
                 the acquisition thread and the device"
            );
            self.send(command.as_bytes()).map(|()| String::new())
        } else {
            self.send_receive(command.as_bytes())
        };

        if result.is_err() {
            let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
            tracker.revert();
        }
        result
    }
}

impl Drop for DawnEegDriver {
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
    use std::collections::VecDeque;

    /// Scripted serial endpoint: canned responses per command byte, frame
    /// emission between start and stop.
    struct ScriptedSerial {
        inbox: VecDeque<u8>,
        banner: String,
        streaming: bool,
        ignore_stop: bool,
        frame_budget: usize,
        package_num: u8,
    }

    impl ScriptedSerial {
        fn new(banner: &str) -> Self {
            Self {
                inbox: VecDeque::new(),
                banner: banner.to_string(),
                streaming: false,
                ignore_stop: false,
                frame_budget: 64,
                package_num: 0,
            }
        }

        fn queue_frame(&mut self) {
            let format = FrameFormat::dawn(8);
            self.inbox.push_back(STREAM_HEADER);
            let mut body = vec![self.package_num];
            for _ in 0..8 {
                body.extend_from_slice(&[0xFF, 0xFF, 0xFF]); // -1 counts
            }
            // telemetry byte, flags (marker 0, triggers 0, sub-ms 0),
            // sub-ms low, 4-byte ms counter
            let ms = u32::from(self.package_num) * 4;
            body.push(0x10);
            body.push(0x00);
            body.push(0x00);
            body.extend_from_slice(&ms.to_be_bytes());
            body.push(0xC0);
            debug_assert_eq!(body.len(), format.body_len());
            self.inbox.extend(body);
            self.package_num = self.package_num.wrapping_add(1);
        }

        fn queue_sync_reply(&mut self) {
            let mut reply = [0u8; SYNC_EXCHANGE_LEN];
            reply[0] = b'>';
            reply[13] = b'>';
            reply[3..7].copy_from_slice(&100u32.to_be_bytes()); // T2 = 0.1
            reply[9..13].copy_from_slice(&102u32.to_be_bytes()); // T3 = 0.102
            self.inbox.extend(reply);
        }
    }

    impl SerialIo for ScriptedSerial {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.inbox.is_empty() && self.streaming && self.frame_budget > 0 {
                self.frame_budget -= 1;
                self.queue_frame();
            }
            let mut n = 0;
            while n < buf.len() {
                match self.inbox.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }

        fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
            if buf == b"v" {
                let banner = format!("{}: firmware v3 $$$", self.banner);
                self.inbox.extend(banner.into_bytes());
            } else if buf == b"b" {
                self.streaming = true;
            } else if buf == b"s" {
                if self.ignore_stop {
                    self.frame_budget = usize::MAX;
                    self.streaming = true;
                } else {
                    self.streaming = false;
                }
            } else if buf == b"d" {
                self.inbox.extend(b"Success: default$$$".iter().copied());
            } else if buf == SYNC_REQUEST {
                self.queue_sync_reply();
            } else {
                self.inbox.extend(b"Success$$$".iter().copied());
            }
            Ok(())
        }

        fn set_timeout(&mut self, _timeout: Duration) -> std::io::Result<()> {
            Ok(())
        }

        fn flush_input(&mut self) {
            self.inbox.clear();
        }
    }

    fn driver_with(banner: &str) -> DawnEegDriver {
        DawnEegDriver::with_transport(
            BoardId::DawnEeg8,
            BoardParams::default(),
            Box::new(ScriptedSerial::new(banner)),
        )
    }

    #[test]
    fn test_full_lifecycle_decodes_frames() {
        let mut driver = driver_with("DawnEEG8");
        driver.prepare_session().unwrap();
        driver.start_stream(1_024, "").unwrap();

        // the scripted device emits 64 frames then dries up
        std::thread::sleep(Duration::from_millis(100));
        let count = driver.get_board_data_count(Preset::Default).unwrap();
        assert!(count > 0);
        let data = driver.get_board_data(count, Preset::Default).unwrap();
        let schema = &driver.core().descriptor().default;
        // all-ones samples at default gain 24: -1 count * scale(24)
        let expected = -eeg_scale_uv(24);
        for &index in &schema.eeg_channels {
            for &value in data.row(index) {
                assert!((value - expected).abs() < 1e-9, "got {value}");
            }
        }
        // auxiliary telemetry rows appear once per 8 packages
        let aux_count = driver.get_board_data_count(Preset::Auxiliary).unwrap();
        assert!(aux_count >= 7, "expected aux rows, got {aux_count}");
        let aux = driver.get_board_data(aux_count, Preset::Auxiliary).unwrap();
        let aux_schema = driver.core().descriptor().auxiliary.clone().unwrap();
        // telemetry byte 0x10 everywhere: temperature = 0x10*256 + 0x10
        let temperature = aux.row(aux_schema.temperature_channels[0]);
        assert!(temperature.iter().all(|&t| (t - 4112.0).abs() < 1e-9));
        let battery = aux.row(aux_schema.battery_channel.unwrap());
        assert!(battery.iter().all(|&b| (b - 4.112).abs() < 1e-9));

        driver.stop_stream().unwrap();
        driver.release_session().unwrap();
    }

    #[test]
    fn test_banner_mismatch_is_initial_msg_error() {
        let mut driver = driver_with("OtherAmp");
        let err = driver.prepare_session().unwrap_err();
        assert!(matches!(err, BoardError::InitialMsg(_)));
    }

    #[test]
    fn test_config_revert_on_write_failure() {
        struct FailingWrites(ScriptedSerial);
        impl SerialIo for FailingWrites {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                self.0.read(buf)
            }
            fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
                if buf.starts_with(b"x") {
                    return Err(std::io::Error::new(std::io::ErrorKind::Other, "wire broke"));
                }
                self.0.write_all(buf)
            }
            fn set_timeout(&mut self, t: Duration) -> std::io::Result<()> {
                self.0.set_timeout(t)
            }
            fn flush_input(&mut self) {
                self.0.flush_input();
            }
        }

        let mut driver = DawnEegDriver::with_transport(
            BoardId::DawnEeg8,
            BoardParams::default(),
            Box::new(FailingWrites(ScriptedSerial::new("DawnEEG8"))),
        );
        driver.prepare_session().unwrap();

        // the command would drop channel 2 to gain 1, but the wire write
        // fails; the tracker must report the pre-command gain
        let err = driver.config_board("x2000110X").unwrap_err();
        assert!(matches!(err, BoardError::BoardWrite(_)));
        let tracker = driver.tracker.lock().unwrap();
        assert_eq!(tracker.gain_for_channel(1), 24);
    }

    #[test]
    fn test_config_invalid_command_short_circuits() {
        let mut driver = driver_with("DawnEEG8");
        driver.prepare_session().unwrap();
        let err = driver.config_board("x1090110X").unwrap_err();
        assert!(matches!(err, BoardError::InvalidArguments(_)));
    }

    #[test]
    fn test_stop_drain_bound_reports_write_error() {
        let mut scripted = ScriptedSerial::new("DawnEEG8");
        scripted.ignore_stop = true;
        let mut driver = DawnEegDriver::with_transport(
            BoardId::DawnEeg8,
            BoardParams::default(),
            Box::new(scripted),
        );
        driver.prepare_session().unwrap();
        driver.start_stream(1_024, "").unwrap();
        let err = driver.stop_stream().unwrap_err();
        assert!(matches!(err, BoardError::BoardWrite(_)));
    }

    #[test]
    fn test_sync_timeout_when_device_never_streams() {
        struct SilentAfterStart(ScriptedSerial);
        impl SerialIo for SilentAfterStart {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                self.0.read(buf)
            }
            fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
                if buf == b"b" {
                    return Ok(()); // swallow the start command
                }
                self.0.write_all(buf)
            }
            fn set_timeout(&mut self, t: Duration) -> std::io::Result<()> {
                self.0.set_timeout(t)
            }
            fn flush_input(&mut self) {
                self.0.flush_input();
            }
        }

        let mut driver = DawnEegDriver::with_transport(
            BoardId::DawnEeg8,
            BoardParams::default(),
            Box::new(SilentAfterStart(ScriptedSerial::new("DawnEEG8"))),
        );
        driver.prepare_session().unwrap();
        let err = driver.start_stream(1_024, "").unwrap_err();
        assert!(matches!(err, BoardError::SyncTimeout(_)));
        // a clean retry is possible afterwards
        assert!(matches!(
            driver.stop_stream(),
            Err(BoardError::StreamThreadNotRunning)
        ));
    }

    #[test]
    fn test_prepare_without_port_is_invalid_arguments() {
        let mut driver = DawnEegDriver::new(BoardId::DawnEeg8, BoardParams::default());
        let err = driver.prepare_session().unwrap_err();
        assert!(matches!(err, BoardError::InvalidArguments(_)));
    }
}
