//! OpenBCI Ganglion over BLE GATT
//!
//! The board exposes a write characteristic for single-letter commands and
//! a notify characteristic delivering 20-byte packets decoded by
//! [`GanglionDecoder`]. Discovery matches on the caller's MAC address or
//! serial number when given, otherwise on the advertised name (the
//! firmware announces itself as either `Ganglion` or `Simblee`).
//!
//! Impedance measurement is a mode switch: `z` swaps the start/stop
//! command pair to the impedance variants and restarts streaming when it
//! was running, `Z` swaps back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use tokio::runtime::Runtime;
use tokio_stream::StreamExt;
use uuid::Uuid;

use neuroline_core::clock;
use neuroline_core::descriptor::{BoardId, Preset};
use neuroline_core::error::{BoardError, BoardResult};
use neuroline_core::params::BoardParams;
use neuroline_core::protocol::ganglion::{GanglionDecoder, GanglionEvent, EEG_SCALE};

use crate::board::{BoardDriver, SessionCore};

/// Command characteristic (write without response).
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x2d30c083_f39f_4ce6_923f_3484ea480596);

/// Data characteristic (notify).
pub const NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x2d30c082_f39f_4ce6_923f_3484ea480596);

const CMD_START_STREAM: &str = "b";
const CMD_STOP_STREAM: &str = "s";
const CMD_START_IMPEDANCE: &str = "z";
const CMD_STOP_IMPEDANCE: &str = "Z";

const NAME_SELECTORS: [&str; 2] = ["Ganglion", "Simblee"];

/// Driver for the Ganglion board.
pub struct GanglionDriver {
    core: Arc<SessionCore>,
    params: BoardParams,
    runtime: Option<Runtime>,
    peripheral: Option<Peripheral>,
    write_char: Option<Characteristic>,
    notify_task: Option<tokio::task::JoinHandle<()>>,
    keep_alive: Arc<AtomicBool>,
    decoder: Arc<Mutex<GanglionDecoder>>,
    start_command: String,
    stop_command: String,
    initialized: bool,
    is_streaming: bool,
}

impl GanglionDriver {
    /// Create the driver; discovery honours `params.mac_address` and
    /// `params.serial_number` when set.
    #[must_use]
    pub fn new(params: BoardParams) -> Self {
        Self {
            core: Arc::new(SessionCore::new(BoardId::Ganglion)),
            params,
            runtime: None,
            peripheral: None,
            write_char: None,
            notify_task: None,
            keep_alive: Arc::new(AtomicBool::new(false)),
            decoder: Arc::new(Mutex::new(GanglionDecoder::new())),
            start_command: CMD_START_STREAM.to_string(),
            stop_command: CMD_STOP_STREAM.to_string(),
            initialized: false,
            is_streaming: false,
        }
    }

    async fn matches_selectors(params: &BoardParams, peripheral: &Peripheral) -> bool {
        let address = peripheral.address().to_string();
        if !params.mac_address.is_empty() {
            return address.eq_ignore_ascii_case(&params.mac_address);
        }
        let Ok(Some(properties)) = peripheral.properties().await else {
            return false;
        };
        let Some(name) = properties.local_name else {
            return false;
        };
        if !params.serial_number.is_empty() {
            return name == params.serial_number;
        }
        NAME_SELECTORS.iter().any(|prefix| name.starts_with(prefix))
    }

    async fn discover_and_connect(params: &BoardParams) -> BoardResult<Peripheral> {
        let manager = Manager::new()
            .await
            .map_err(|e| BoardError::General(format!("bluetooth manager unavailable: {e}")))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| BoardError::General(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                BoardError::UnableToOpenPort {
                    port: "ble".to_string(),
                    reason: "no bluetooth adapter found".to_string(),
                }
            })?;

        tracing::info!("starting BLE scan for Ganglion devices");
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| BoardError::General(format!("scan failed: {e}")))?;

        let deadline =
            std::time::Instant::now() + Duration::from_secs(params.discovery_timeout_secs());
        let found = loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            let peripherals = adapter
                .peripherals()
                .await
                .map_err(|e| BoardError::General(e.to_string()))?;
            let mut matched = None;
            for peripheral in peripherals {
                if Self::matches_selectors(params, &peripheral).await {
                    matched = Some(peripheral);
                    break;
                }
            }
            if let Some(peripheral) = matched {
                break Some(peripheral);
            }
            if std::time::Instant::now() >= deadline {
                break None;
            }
        };
        let _ = adapter.stop_scan().await;

        let peripheral = found.ok_or_else(|| {
            BoardError::BoardNotReady("failed to find a Ganglion device".to_string())
        })?;
        peripheral
            .connect()
            .await
            .map_err(|e| BoardError::BoardNotReady(format!("failed to connect: {e}")))?;
        tracing::info!(address = %peripheral.address(), "connected to Ganglion");
        Ok(peripheral)
    }

    async fn find_characteristics(
        peripheral: &Peripheral,
    ) -> BoardResult<(Characteristic, Characteristic)> {
        peripheral
            .discover_services()
            .await
            .map_err(|e| BoardError::BoardNotReady(format!("service discovery failed: {e}")))?;
        let mut write_char = None;
        let mut notify_char = None;
        for service in peripheral.services() {
            for characteristic in &service.characteristics {
                if characteristic.uuid == WRITE_CHAR_UUID {
                    write_char = Some(characteristic.clone());
                } else if characteristic.uuid == NOTIFY_CHAR_UUID {
                    notify_char = Some(characteristic.clone());
                }
            }
        }
        match (write_char, notify_char) {
            (Some(write), Some(notify)) => Ok((write, notify)),
            _ => Err(BoardError::BoardNotReady(
                "device is missing the expected characteristics".to_string(),
            )),
        }
    }

    fn send_command(&self, command: &str) -> BoardResult<()> {
        let (Some(runtime), Some(peripheral), Some(write_char)) =
            (&self.runtime, &self.peripheral, &self.write_char)
        else {
            return Err(BoardError::BoardNotCreated(BoardId::Ganglion as i32));
        };
        if command.is_empty() {
            return Err(BoardError::InvalidArguments("empty command".to_string()));
        }
        runtime
            .block_on(peripheral.write(
                write_char,
                command.as_bytes(),
                WriteType::WithoutResponse,
            ))
            .map_err(|e| {
                tracing::error!(command, error = %e, "failed to send command to device");
                BoardError::BoardWrite(e.to_string())
            })
    }

    fn push_events(core: &SessionCore, events: Vec<GanglionEvent>) {
        let schema = &core.descriptor().default;
        let mut row = vec![0.0; schema.num_rows];
        for event in events {
            match event {
                GanglionEvent::Sample { package_num, raw_eeg, accel } => {
                    row[schema.package_num_channel] = f64::from(package_num);
                    for (ch, &index) in schema.eeg_channels.iter().enumerate() {
                        row[index] = EEG_SCALE * raw_eeg[ch];
                    }
                    for (axis, &index) in schema.accel_channels.iter().enumerate() {
                        row[index] = accel[axis];
                    }
                    for &index in &schema.resistance_channels {
                        row[index] = 0.0;
                    }
                }
                GanglionEvent::Impedance { package_num, resistance } => {
                    row[schema.package_num_channel] = f64::from(package_num);
                    for &index in &schema.eeg_channels {
                        row[index] = 0.0;
                    }
                    for (i, &index) in schema.resistance_channels.iter().enumerate() {
                        row[index] = resistance[i];
                    }
                }
            }
            row[schema.timestamp_channel] = clock::timestamp();
            core.push_package(&mut row, Preset::Default);
        }
    }
}

impl BoardDriver for GanglionDriver {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        if self.initialized {
            tracing::info!("session is already prepared");
            return Ok(());
        }
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .thread_name("neuroline-ganglion")
            .build()
            .map_err(|e| BoardError::General(format!("failed to start runtime: {e}")))?;

        let result: BoardResult<(Peripheral, Characteristic, Characteristic)> =
            runtime.block_on(async {
                let peripheral = Self::discover_and_connect(&self.params).await?;
                let (write_char, notify_char) = Self::find_characteristics(&peripheral).await?;
                peripheral.subscribe(&notify_char).await.map_err(|e| {
                    BoardError::BoardNotReady(format!("failed to subscribe: {e}"))
                })?;
                Ok((peripheral, write_char, notify_char))
            });

        match result {
            Ok((peripheral, write_char, _notify_char)) => {
                // drain notifications for the life of the session; decoding
                // only happens while keep_alive is set
                let core = Arc::clone(&self.core);
                let keep_alive = Arc::clone(&self.keep_alive);
                let decoder = Arc::clone(&self.decoder);
                let notify_peripheral = peripheral.clone();
                let task = runtime.spawn(async move {
                    let mut stream = match notify_peripheral.notifications().await {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to open notification stream");
                            return;
                        }
                    };
                    while let Some(notification) = stream.next().await {
                        if notification.uuid != NOTIFY_CHAR_UUID
                            || !keep_alive.load(Ordering::Acquire)
                        {
                            continue;
                        }
                        let events = {
                            let mut decoder =
                                decoder.lock().unwrap_or_else(PoisonError::into_inner);
                            decoder.decode(&notification.value)
                        };
                        match events {
                            Ok(events) => Self::push_events(&core, events),
                            Err(e) => {
                                tracing::warn!(error = %e, "dropping malformed notification");
                            }
                        }
                    }
                    tracing::debug!("notification stream ended");
                });

                self.runtime = Some(runtime);
                self.peripheral = Some(peripheral);
                self.write_char = Some(write_char);
                self.notify_task = Some(task);
                self.initialized = true;
                Ok(())
            }
            Err(e) => {
                drop(runtime);
                Err(e)
            }
        }
    }

    fn start_stream(&mut self, buffer_size: usize, streamer_params: &str) -> BoardResult<()> {
        if !self.initialized {
            return Err(BoardError::BoardNotCreated(BoardId::Ganglion as i32));
        }
        if self.is_streaming {
            return Err(BoardError::StreamAlreadyRun);
        }
        // reset the delta reference before every stream start
        self.decoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        self.core.prepare_for_acquisition(buffer_size, streamer_params)?;
        self.keep_alive.store(true, Ordering::Release);
        let command = self.start_command.clone();
        if let Err(e) = self.send_command(&command) {
            self.keep_alive.store(false, Ordering::Release);
            self.core.free_packages();
            return Err(e);
        }
        self.is_streaming = true;
        Ok(())
    }

    fn stop_stream(&mut self) -> BoardResult<()> {
        if self.peripheral.is_none() {
            return Err(BoardError::BoardNotCreated(BoardId::Ganglion as i32));
        }
        let result = if self.is_streaming {
            let command = self.stop_command.clone();
            self.send_command(&command)
        } else {
            Err(BoardError::StreamThreadNotRunning)
        };
        self.keep_alive.store(false, Ordering::Release);
        self.is_streaming = false;
        result
    }

    fn release_session(&mut self) -> BoardResult<()> {
        if self.initialized {
            if self.is_streaming {
                let _ = self.stop_stream();
            }
            self.core.free_packages();
            self.initialized = false;
        }
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if let (Some(runtime), Some(peripheral)) = (&self.runtime, self.peripheral.take()) {
            runtime.block_on(async {
                if peripheral.is_connected().await.unwrap_or(false) {
                    if let Err(e) = peripheral.disconnect().await {
                        tracing::debug!(error = %e, "disconnect failed during teardown");
                    }
                }
            });
        }
        self.write_char = None;
        self.runtime = None;
        Ok(())
    }

    fn config_board(&mut self, command: &str) -> BoardResult<String> {
        if !self.initialized {
            return Err(BoardError::BoardNotCreated(BoardId::Ganglion as i32));
        }
        if command.is_empty() {
            return Err(BoardError::InvalidArguments("empty command".to_string()));
        }
        if let Some((start, stop)) = impedance_command_swap(command) {
            let was_streaming = self.is_streaming;
            if was_streaming {
                tracing::debug!(stop = %self.stop_command, "pausing stream to switch mode");
                let stop_cmd = self.stop_command.clone();
                self.send_command(&stop_cmd)?;
                self.is_streaming = false;
            }
            self.start_command = start.to_string();
            self.stop_command = stop.to_string();
            if was_streaming {
                tracing::debug!(start = %self.start_command, "resuming stream in new mode");
                let start_cmd = self.start_command.clone();
                self.send_command(&start_cmd)?;
                self.is_streaming = true;
            }
            Ok(String::new())
        } else {
            self.send_command(command).map(|()| String::new())
        }
    }
}

impl Drop for GanglionDriver {
    fn drop(&mut self) {
        let _ = self.release_session();
    }
}

/// Start/stop command pair selected by an impedance mode switch, or `None`
/// for ordinary commands.
fn impedance_command_swap(command: &str) -> Option<(&'static str, &'static str)> {
    match command.chars().next() {
        Some('z') => Some((CMD_START_IMPEDANCE, CMD_STOP_IMPEDANCE)),
        Some('Z') => Some((CMD_START_STREAM, CMD_STOP_STREAM)),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
