//! ANT Neuro eego amplifier (vendor SDK)
//!
//! The eego SDK ships as a shared library next to the executable; a
//! factory call enumerates connected amplifiers. Stream channels carry
//! type metadata, and each physical channel is classified into the sample
//! row by that type: referential channels are EEG, bipolar channels EMG,
//! the sample counter feeds the package-number row and trigger channels
//! land in the `other` rows. The sampling rate is configurable through
//! `config_board("sampling_rate:<hz>")`, validated against the rates the
//! amplifier reports.

use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use neuroline_core::clock;
use neuroline_core::descriptor::{BoardId, Preset};
use neuroline_core::error::{BoardError, BoardResult};
use neuroline_core::params::BoardParams;

use crate::board::{BoardDriver, SessionCore};
use crate::transport::library::{sibling_library_path, TransportLibrary};

const SDK_LIBRARY_STEM: &str = "eego-SDK";

/// Channel types reported by the SDK.
const CHANNEL_REFERENCE: c_int = 0;
const CHANNEL_BIPOLAR: c_int = 1;
const CHANNEL_SAMPLE_COUNTER: c_int = 2;
const CHANNEL_TRIGGER: c_int = 3;

type AmplifierOpenFn = unsafe extern "C" fn() -> c_int;
type AmplifierCloseFn = unsafe extern "C" fn(c_int) -> c_int;
type SamplingRatesFn = unsafe extern "C" fn(c_int, *mut c_int, c_int) -> c_int;
type StreamOpenFn = unsafe extern "C" fn(c_int, c_int) -> c_int;
type StreamCloseFn = unsafe extern "C" fn(c_int) -> c_int;
type ChannelCountFn = unsafe extern "C" fn(c_int) -> c_int;
type ChannelTypeFn = unsafe extern "C" fn(c_int, c_int) -> c_int;
type GetDataFn = unsafe extern "C" fn(c_int, *mut f64, c_int) -> c_int;

/// Copied-out SDK entry points; the owning [`TransportLibrary`] stays
/// loaded for the driver's lifetime.
#[derive(Clone, Copy)]
struct VendorApi {
    amplifier_close: AmplifierCloseFn,
    sampling_rates: SamplingRatesFn,
    stream_open: StreamOpenFn,
    stream_close: StreamCloseFn,
    channel_count: ChannelCountFn,
    channel_type: ChannelTypeFn,
    get_data: GetDataFn,
}

/// Driver for eego amplifiers.
pub struct AntNeuroDriver {
    core: Arc<SessionCore>,
    #[allow(dead_code)]
    params: BoardParams,
    library: Option<TransportLibrary>,
    api: Option<VendorApi>,
    amplifier: Option<c_int>,
    stream: Option<c_int>,
    sampling_rate: c_int,
    keep_alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    initialized: bool,
}

impl AntNeuroDriver {
    /// Create the driver; no SDK call happens until `prepare_session`.
    #[must_use]
    pub fn new(params: BoardParams) -> Self {
        let core = Arc::new(SessionCore::new(BoardId::AntNeuro));
        let sampling_rate = core.descriptor().default.sampling_rate as c_int;
        Self {
            core,
            params,
            library: None,
            api: None,
            amplifier: None,
            stream: None,
            sampling_rate,
            keep_alive: Arc::new(AtomicBool::new(false)),
            thread: None,
            initialized: false,
        }
    }

    fn read_loop(
        core: &SessionCore,
        api: VendorApi,
        stream: c_int,
        keep_alive: &AtomicBool,
    ) {
        let schema = &core.descriptor().default;
        let channel_count = unsafe { (api.channel_count)(stream) };
        if channel_count <= 0 {
            tracing::error!(channel_count, "stream reports no channels");
            return;
        }
        let channel_types: Vec<c_int> = (0..channel_count)
            .map(|i| unsafe { (api.channel_type)(stream, i) })
            .collect();
        let channels = usize::try_from(channel_count).unwrap_or(0);
        // up to 64 samples per poll
        let mut buffer = vec![0.0f64; channels * 64];
        let mut row = vec![0.0; schema.num_rows];

        while keep_alive.load(Ordering::Acquire) {
            let filled = unsafe {
                (api.get_data)(
                    stream,
                    buffer.as_mut_ptr(),
                    c_int::try_from(buffer.len()).unwrap_or(0),
                )
            };
            if filled < 0 {
                tracing::error!(code = filled, "amplifier read failed");
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
            let samples = usize::try_from(filled).unwrap_or(0) / channels;
            for sample in 0..samples {
                let frame = &buffer[sample * channels..(sample + 1) * channels];
                let mut eeg_cursor = 0;
                let mut emg_cursor = 0;
                let mut other_cursor = 0;
                for (index, &kind) in channel_types.iter().enumerate() {
                    let value = frame[index];
                    match kind {
                        CHANNEL_REFERENCE if eeg_cursor < schema.eeg_channels.len() => {
                            row[schema.eeg_channels[eeg_cursor]] = value;
                            eeg_cursor += 1;
                        }
                        CHANNEL_BIPOLAR if emg_cursor < schema.emg_channels.len() => {
                            row[schema.emg_channels[emg_cursor]] = value;
                            emg_cursor += 1;
                        }
                        CHANNEL_SAMPLE_COUNTER => {
                            row[schema.package_num_channel] = value;
                        }
                        CHANNEL_TRIGGER if other_cursor < schema.other_channels.len() => {
                            row[schema.other_channels[other_cursor]] = value;
                            other_cursor += 1;
                        }
                        _ => {}
                    }
                }
                row[schema.timestamp_channel] = clock::timestamp();
                core.push_package(&mut row, Preset::Default);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn supported_rates(&self) -> Vec<c_int> {
        let (Some(api), Some(amplifier)) = (self.api, self.amplifier) else {
            return Vec::new();
        };
        let mut rates = [0 as c_int; 16];
        let count = unsafe {
            (api.sampling_rates)(
                amplifier,
                rates.as_mut_ptr(),
                c_int::try_from(rates.len()).unwrap_or(0),
            )
        };
        rates
            .into_iter()
            .take(usize::try_from(count).unwrap_or(0))
            .collect()
    }
}

impl BoardDriver for AntNeuroDriver {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        if self.initialized {
            tracing::info!("session is already prepared");
            return Ok(());
        }
        let library = TransportLibrary::load(&sibling_library_path(SDK_LIBRARY_STEM))?;
        let (api, amplifier) = unsafe {
            let amplifier_open = *library.symbol::<AmplifierOpenFn>("eego_amplifier_open")?;
            let api = VendorApi {
                amplifier_close: *library.symbol::<AmplifierCloseFn>("eego_amplifier_close")?,
                sampling_rates: *library.symbol::<SamplingRatesFn>("eego_sampling_rates")?,
                stream_open: *library.symbol::<StreamOpenFn>("eego_stream_open")?,
                stream_close: *library.symbol::<StreamCloseFn>("eego_stream_close")?,
                channel_count: *library.symbol::<ChannelCountFn>("eego_channel_count")?,
                channel_type: *library.symbol::<ChannelTypeFn>("eego_channel_type")?,
                get_data: *library.symbol::<GetDataFn>("eego_get_data")?,
            };
            let amplifier = amplifier_open();
            (api, amplifier)
        };
        if amplifier < 0 {
            tracing::error!(code = amplifier, "no amplifier found");
            return Err(BoardError::BoardNotReady(
                "no eego amplifier connected".to_string(),
            ));
        }
        self.library = Some(library);
        self.api = Some(api);
        self.amplifier = Some(amplifier);
        self.initialized = true;
        Ok(())
    }

    fn start_stream(&mut self, buffer_size: usize, streamer_params: &str) -> BoardResult<()> {
        if self.stream.is_some() {
            return Err(BoardError::StreamAlreadyRun);
        }
        let (Some(api), Some(amplifier)) = (self.api, self.amplifier) else {
            return Err(BoardError::BoardNotReady("amplifier is not created".to_string()));
        };
        self.core.prepare_for_acquisition(buffer_size, streamer_params)?;

        let stream = unsafe { (api.stream_open)(amplifier, self.sampling_rate) };
        if stream < 0 {
            self.core.free_packages();
            return Err(BoardError::StreamThread(format!(
                "failed to open the eeg stream, code {stream}"
            )));
        }
        self.stream = Some(stream);
        self.keep_alive.store(true, Ordering::Release);
        let core = Arc::clone(&self.core);
        let keep_alive = Arc::clone(&self.keep_alive);
        let thread = std::thread::Builder::new()
            .name("neuroline-ant-neuro".to_string())
            .spawn(move || Self::read_loop(&core, api, stream, &keep_alive))
            .map_err(|e| {
                self.keep_alive.store(false, Ordering::Release);
                self.core.free_packages();
                BoardError::StreamThread(e.to_string())
            })?;
        self.thread = Some(thread);
        Ok(())
    }

    fn stop_stream(&mut self) -> BoardResult<()> {
        let Some(stream) = self.stream.take() else {
            return Err(BoardError::StreamThreadNotRunning);
        };
        self.keep_alive.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        if let Some(api) = self.api {
            unsafe {
                let _ = (api.stream_close)(stream);
            }
        }
        Ok(())
    }

    fn release_session(&mut self) -> BoardResult<()> {
        if self.initialized {
            if self.stream.is_some() {
                let _ = self.stop_stream();
            }
            self.core.free_packages();
            self.initialized = false;
        }
        if let (Some(api), Some(amplifier)) = (self.api.take(), self.amplifier.take()) {
            unsafe {
                let _ = (api.amplifier_close)(amplifier);
            }
        }
        self.library = None;
        Ok(())
    }

    fn config_board(&mut self, command: &str) -> BoardResult<String> {
        if self.amplifier.is_none() {
            return Err(BoardError::BoardNotReady("amplifier is not created".to_string()));
        }
        let Some(rate) = parse_sampling_rate_command(command) else {
            return Err(BoardError::InvalidArguments(
                "format is 'sampling_rate:<hz>'".to_string(),
            ));
        };
        let supported = self.supported_rates();
        if supported.contains(&rate) {
            self.sampling_rate = rate;
            Ok(String::new())
        } else {
            tracing::error!(rate, ?supported, "unsupported sampling rate");
            Err(BoardError::InvalidArguments(format!(
                "sampling rate {rate} is not supported by the amplifier"
            )))
        }
    }
}

impl Drop for AntNeuroDriver {
    fn drop(&mut self) {
        let _ = self.release_session();
    }
}

/// Parse a `sampling_rate:<hz>` control string.
fn parse_sampling_rate_command(command: &str) -> Option<c_int> {
    command
        .strip_prefix("sampling_rate:")
        .and_then(|value| value.trim().parse::<c_int>().ok())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sampling_rate_command() {
        assert_eq!(parse_sampling_rate_command("sampling_rate:512"), Some(512));
        assert_eq!(parse_sampling_rate_command("sampling_rate: 2000"), Some(2000));
        assert_eq!(parse_sampling_rate_command("sampling_rate:fast"), None);
        assert_eq!(parse_sampling_rate_command("rate:512"), None);
    }

    #[test]
    fn test_prepare_without_sdk_is_clean_error() {
        // the eego library does not ship with the test binary
        let mut driver = AntNeuroDriver::new(BoardParams::default());
        assert!(driver.prepare_session().is_err());
        // lifecycle calls before prepare stay well-behaved
        assert!(matches!(
            driver.start_stream(1_024, ""),
            Err(BoardError::BoardNotReady(_))
        ));
        assert!(matches!(
            driver.stop_stream(),
            Err(BoardError::StreamThreadNotRunning)
        ));
        assert!(matches!(
            driver.config_board("sampling_rate:512"),
            Err(BoardError::BoardNotReady(_))
        ));
        driver.release_session().unwrap();
    }
}
