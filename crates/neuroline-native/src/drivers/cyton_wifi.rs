//! OpenBCI Cyton behind the Wi-Fi shield
//!
//! The shield pushes 33-byte packets over UDP: `0xA0` header plus the
//! serial frame body (sequence, eight 24-bit samples, six aux bytes and a
//! `0xC0..=0xC6` footer whose value selects the aux interpretation).
//! Control strings travel over a line-oriented TCP connection to the
//! shield.

use std::io::Write;
use std::net::{TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use neuroline_core::clock;
use neuroline_core::config::{CommandOutcome, GainTracker};
use neuroline_core::descriptor::{BoardId, Preset};
use neuroline_core::error::{BoardError, BoardResult};
use neuroline_core::params::BoardParams;
use neuroline_core::protocol::eeg_scale_uv;
use neuroline_core::protocol::serial_frame::{
    CytonAux, FrameFormat, CYTON_ACCEL_SCALE, STREAM_HEADER,
};

use crate::board::{BoardDriver, FirstFrameGate, SessionCore, FIRST_FRAME_TIMEOUT_SECS};

const CMD_DEFAULT: &str = "d";
const CMD_START_STREAM: &str = "b";
const CMD_STOP_STREAM: &str = "s";

/// Datagram size: header byte plus the frame body.
const PACKET_SIZE: usize = 33;

/// Driver for the Cyton board behind the Wi-Fi shield.
pub struct CytonWifiDriver {
    core: Arc<SessionCore>,
    params: BoardParams,
    control: Option<TcpStream>,
    data_socket: Option<Arc<UdpSocket>>,
    tracker: Arc<Mutex<GainTracker>>,
    keep_alive: Arc<AtomicBool>,
    gate: Arc<FirstFrameGate>,
    thread: Option<JoinHandle<()>>,
    initialized: bool,
    is_streaming: bool,
}

impl CytonWifiDriver {
    /// Create the driver; `params.ip_address`/`ip_port` locate the shield.
    #[must_use]
    pub fn new(params: BoardParams) -> Self {
        Self {
            core: Arc::new(SessionCore::new(BoardId::CytonWifi)),
            params,
            control: None,
            data_socket: None,
            tracker: Arc::new(Mutex::new(GainTracker::new())),
            keep_alive: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(FirstFrameGate::new()),
            thread: None,
            initialized: false,
            is_streaming: false,
        }
    }

    fn send_control(&mut self, command: &str) -> BoardResult<()> {
        let Some(control) = self.control.as_mut() else {
            return Err(BoardError::BoardNotCreated(BoardId::CytonWifi as i32));
        };
        tracing::debug!(command, "sending to shield");
        control
            .write_all(format!("{command}\n").as_bytes())
            .map_err(|e| BoardError::BoardWrite(e.to_string()))
    }

    fn read_loop(
        core: &SessionCore,
        socket: &UdpSocket,
        tracker: &Mutex<GainTracker>,
        keep_alive: &AtomicBool,
        gate: &FirstFrameGate,
    ) {
        let schema = &core.descriptor().default;
        let format = FrameFormat::cyton(schema.eeg_channels.len());
        let mut packet = [0u8; PACKET_SIZE];
        let mut row = vec![0.0; schema.num_rows];
        // accelerometer values latch between standard frames; the shield
        // sends zeros while the sensor warms up
        let mut accel = [0.0f64; 3];
        let mut first_frame_seen = false;

        while keep_alive.load(Ordering::Acquire) {
            let received = match socket.recv(&mut packet) {
                Ok(n) => n,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "udp receive failed");
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }
            };
            if received != PACKET_SIZE || packet[0] != STREAM_HEADER {
                continue;
            }
            let frame = match format.decode(&packet[1..]) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed packet");
                    continue;
                }
            };
            if !first_frame_seen {
                first_frame_seen = true;
                tracing::info!("received first package, streaming is started");
                gate.open();
            }

            row[schema.package_num_channel] = f64::from(frame.package_num);
            {
                let gains = tracker.lock().unwrap_or_else(PoisonError::into_inner);
                for (ch, &index) in schema.eeg_channels.iter().enumerate() {
                    let scale = eeg_scale_uv(gains.gain_for_channel(ch));
                    row[index] = scale * f64::from(frame.raw_sample(ch));
                }
            }
            // raw aux bytes and the footer code are always mirrored
            row[schema.other_channels[0]] = f64::from(frame.footer);
            for (i, &byte) in frame.aux.iter().enumerate() {
                row[schema.other_channels[1 + i]] = f64::from(byte);
            }
            match CytonAux::decode(frame.footer, frame.aux) {
                CytonAux::Accel(counts) => {
                    if counts[0] != 0 {
                        for (axis, &count) in counts.iter().enumerate() {
                            accel[axis] = CYTON_ACCEL_SCALE * f64::from(count);
                        }
                    }
                    for (axis, &index) in schema.accel_channels.iter().enumerate() {
                        row[index] = accel[axis];
                    }
                }
                CytonAux::Analog(values) => {
                    for (i, &index) in schema.analog_channels.iter().enumerate() {
                        row[index] = f64::from(values[i]);
                    }
                }
                CytonAux::Raw => {}
            }
            row[schema.timestamp_channel] = clock::timestamp();
            core.push_package(&mut row, Preset::Default);
        }
        tracing::debug!("acquisition loop stopped");
    }
}

impl BoardDriver for CytonWifiDriver {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        if self.initialized {
            tracing::info!("session is already prepared");
            return Ok(());
        }
        if self.params.ip_address.is_empty() || self.params.ip_port == 0 {
            return Err(BoardError::InvalidArguments(
                "ip_address and ip_port are required for the wifi shield".to_string(),
            ));
        }
        let address = (self.params.ip_address.as_str(), self.params.ip_port);
        let control = TcpStream::connect_timeout(
            &std::net::ToSocketAddrs::to_socket_addrs(&address)
                .map_err(|e| BoardError::InvalidArguments(e.to_string()))?
                .next()
                .ok_or_else(|| {
                    BoardError::InvalidArguments(format!(
                        "cannot resolve {}:{}",
                        self.params.ip_address, self.params.ip_port
                    ))
                })?,
            Duration::from_millis(self.params.timeout_ms().max(1_000)),
        )
        .map_err(|e| {
            BoardError::BoardNotReady(format!(
                "cannot reach shield at {}:{}: {e}",
                self.params.ip_address, self.params.ip_port
            ))
        })?;
        self.control = Some(control);

        let data_socket = UdpSocket::bind(("0.0.0.0", self.params.ip_port)).map_err(|e| {
            BoardError::UnableToOpenPort {
                port: format!("udp:{}", self.params.ip_port),
                reason: e.to_string(),
            }
        })?;
        data_socket
            .set_read_timeout(Some(Duration::from_millis(self.params.timeout_ms())))
            .map_err(|e| BoardError::SetPort(e.to_string()))?;
        self.data_socket = Some(Arc::new(data_socket));

        self.initialized = true;
        // load default channel settings so the gain tracker and device agree
        if let Err(e) = self.config_board(CMD_DEFAULT) {
            self.control = None;
            self.data_socket = None;
            self.initialized = false;
            return Err(e);
        }
        Ok(())
    }

    fn start_stream(&mut self, buffer_size: usize, streamer_params: &str) -> BoardResult<()> {
        if !self.initialized {
            return Err(BoardError::BoardNotCreated(BoardId::CytonWifi as i32));
        }
        if self.is_streaming {
            return Err(BoardError::StreamAlreadyRun);
        }
        self.core.prepare_for_acquisition(buffer_size, streamer_params)?;
        self.send_control(CMD_START_STREAM)?;

        self.keep_alive.store(true, Ordering::Release);
        self.gate.reset();
        let core = Arc::clone(&self.core);
        let socket = Arc::clone(self.data_socket.as_ref().expect("socket bound in prepare"));
        let tracker = Arc::clone(&self.tracker);
        let keep_alive = Arc::clone(&self.keep_alive);
        let gate = Arc::clone(&self.gate);
        let thread = std::thread::Builder::new()
            .name("neuroline-cyton-wifi".to_string())
            .spawn(move || Self::read_loop(&core, &socket, &tracker, &keep_alive, &gate))
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
        self.send_control(CMD_STOP_STREAM)
    }

    fn release_session(&mut self) -> BoardResult<()> {
        if self.initialized {
            if self.is_streaming {
                let _ = self.stop_stream();
            }
            self.core.free_packages();
            self.initialized = false;
        }
        self.control = None;
        self.data_socket = None;
        Ok(())
    }

    fn config_board(&mut self, command: &str) -> BoardResult<String> {
        if self.control.is_none() {
            return Err(BoardError::BoardNotCreated(BoardId::CytonWifi as i32));
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
        let result = self.send_control(command);
        if result.is_err() {
            let mut tracker = self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
            tracker.revert();
        }
        result.map(|()| String::new())
    }
}

impl Drop for CytonWifiDriver {
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
    use std::io::Read;
    use std::net::TcpListener;

    /// Minimal shield stand-in: accepts the control connection and replays
    /// packets over UDP when asked to start.
    struct FakeShield {
        listener: TcpListener,
        port: u16,
    }

    impl FakeShield {
        fn start() -> Self {
            // bind the control listener on an ephemeral port; the driver
            // binds its UDP data socket on the same number
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            Self { listener, port }
        }

        fn run(self, packets: usize) -> std::thread::JoinHandle<Vec<String>> {
            std::thread::spawn(move || {
                let (mut control, peer) = self.listener.accept().unwrap();
                control.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
                let data = UdpSocket::bind("127.0.0.1:0").unwrap();
                let dest = (peer.ip(), self.port);
                let mut commands = Vec::new();
                let mut buf = [0u8; 256];
                loop {
                    let n = match control.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    for line in String::from_utf8_lossy(&buf[..n]).lines() {
                        commands.push(line.to_string());
                        if line == "b" {
                            for seq in 0..packets {
                                data.send_to(&make_packet(seq as u8), dest).unwrap();
                            }
                        }
                        if line == "s" {
                            return commands;
                        }
                    }
                }
                commands
            })
        }
    }

    fn make_packet(seq: u8) -> [u8; PACKET_SIZE] {
        let mut packet = [0u8; PACKET_SIZE];
        packet[0] = STREAM_HEADER;
        packet[1] = seq;
        for ch in 0..8 {
            packet[2 + 3 * ch] = 0x00;
            packet[3 + 3 * ch] = 0x00;
            packet[4 + 3 * ch] = 0x10; // 16 counts
        }
        // aux: accel x=256 counts, y=0, z=0
        packet[26] = 0x01;
        packet[32] = 0xC0;
        packet
    }

    #[test]
    fn test_wifi_lifecycle_decodes_packets() {
        let shield = FakeShield::start();
        let port = shield.port;
        let shield_thread = shield.run(40);

        let mut driver = CytonWifiDriver::new(BoardParams {
            ip_address: "127.0.0.1".to_string(),
            ip_port: port,
            timeout: 100,
            ..Default::default()
        });
        driver.prepare_session().unwrap();
        driver.start_stream(1_024, "").unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let count = driver.get_board_data_count(Preset::Default).unwrap();
        assert!(count > 0, "no packets decoded");
        let data = driver.get_board_data(count, Preset::Default).unwrap();
        let schema = &driver.core().descriptor().default;
        // 16 counts at default gain 24
        let expected = 16.0 * eeg_scale_uv(24);
        for &value in data.row(schema.eeg_channels[0]) {
            assert!((value - expected).abs() < 1e-9);
        }
        // footer code mirrored into the first other row
        assert!(data.row(schema.other_channels[0]).iter().all(|&v| v == 192.0));
        // accel x = 256 counts * scale
        let accel_x = data.row(schema.accel_channels[0]);
        assert!(accel_x.iter().all(|&v| (v - 256.0 * CYTON_ACCEL_SCALE).abs() < 1e-12));

        driver.stop_stream().unwrap();
        driver.release_session().unwrap();

        let commands = shield_thread.join().unwrap();
        assert_eq!(commands, vec!["d", "b", "s"]);
    }

    #[test]
    fn test_prepare_requires_address() {
        let mut driver = CytonWifiDriver::new(BoardParams::default());
        assert!(matches!(
            driver.prepare_session(),
            Err(BoardError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_prepare_unreachable_shield_is_not_ready() {
        let mut driver = CytonWifiDriver::new(BoardParams {
            ip_address: "127.0.0.1".to_string(),
            ip_port: 1, // nothing listens here
            timeout: 100,
            ..Default::default()
        });
        assert!(matches!(
            driver.prepare_session(),
            Err(BoardError::BoardNotReady(_))
        ));
    }
}
