//! gForce Pro EMG armband (vendor SDK)
//!
//! The vendor SDK ships as a shared library next to the executable and
//! tolerates exactly one active instance per process; a process-wide
//! counter enforces the limit before any SDK call is made. The SDK is
//! Windows-only; other platforms report `UNSUPPORTED_BOARD_ERROR` from
//! every lifecycle entry point.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use neuroline_core::descriptor::BoardId;
use neuroline_core::error::{BoardError, BoardResult};
use neuroline_core::params::BoardParams;

use crate::board::{BoardDriver, SessionCore};

/// Live driver instances in this process.
static ACTIVE_INSTANCES: AtomicUsize = AtomicUsize::new(0);

/// Driver for the gForce Pro armband.
pub struct GforceDriver {
    core: Arc<SessionCore>,
    #[cfg_attr(not(all(windows, feature = "vendor")), allow(dead_code))]
    params: BoardParams,
    /// False when another instance already held the SDK at construction.
    is_valid: bool,
    #[cfg(all(windows, feature = "vendor"))]
    state: windows_impl::SdkState,
}

impl GforceDriver {
    /// Create the driver, claiming the process-wide SDK slot.
    #[must_use]
    pub fn new(params: BoardParams) -> Self {
        let previous = ACTIVE_INSTANCES.fetch_add(1, Ordering::SeqCst);
        Self {
            core: Arc::new(SessionCore::new(BoardId::GforcePro)),
            params,
            is_valid: previous == 0,
            #[cfg(all(windows, feature = "vendor"))]
            state: windows_impl::SdkState::default(),
        }
    }

    fn claim(&self) -> BoardResult<()> {
        if self.is_valid {
            Ok(())
        } else {
            tracing::info!("only one gForce SDK instance per process is allowed");
            Err(BoardError::AnotherBoardIsCreated)
        }
    }
}

impl Drop for GforceDriver {
    fn drop(&mut self) {
        let _ = self.release_session();
        ACTIVE_INSTANCES.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(all(windows, feature = "vendor"))]
mod windows_impl {
    //! SDK bindings used on the supported platform.

    use std::os::raw::c_int;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Duration;

    use neuroline_core::clock;
    use neuroline_core::descriptor::Preset;
    use neuroline_core::error::{BoardError, BoardResult};

    use crate::board::SessionCore;
    use crate::transport::library::{sibling_library_path, TransportLibrary};

    const SDK_LIBRARY_STEM: &str = "gForceSDKWrapper";
    const SDK_OK: c_int = 0;

    type InitFn = unsafe extern "C" fn() -> c_int;
    type DeinitFn = unsafe extern "C" fn() -> c_int;
    type StartFn = unsafe extern "C" fn() -> c_int;
    type StopFn = unsafe extern "C" fn() -> c_int;
    type PollFn = unsafe extern "C" fn(*mut f64, c_int) -> c_int;

    #[derive(Clone, Copy)]
    pub(super) struct Api {
        init: InitFn,
        deinit: DeinitFn,
        start: StartFn,
        stop: StopFn,
        poll: PollFn,
    }

    #[derive(Default)]
    pub(super) struct SdkState {
        library: Option<TransportLibrary>,
        api: Option<Api>,
        keep_alive: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
        pub(super) initialized: bool,
        pub(super) is_streaming: bool,
    }

    impl SdkState {
        pub(super) fn prepare(&mut self) -> BoardResult<()> {
            if self.initialized {
                tracing::info!("session is already prepared");
                return Ok(());
            }
            let library = TransportLibrary::load(&sibling_library_path(SDK_LIBRARY_STEM))?;
            let api = unsafe {
                Api {
                    init: *library.symbol::<InitFn>("gforce_initialize")?,
                    deinit: *library.symbol::<DeinitFn>("gforce_deinitialize")?,
                    start: *library.symbol::<StartFn>("gforce_start_streaming")?,
                    stop: *library.symbol::<StopFn>("gforce_stop_streaming")?,
                    poll: *library.symbol::<PollFn>("gforce_poll_emg")?,
                }
            };
            let res = unsafe { (api.init)() };
            if res != SDK_OK {
                return Err(BoardError::BoardNotReady(format!(
                    "gForce SDK initialization failed with code {res}"
                )));
            }
            self.library = Some(library);
            self.api = Some(api);
            self.initialized = true;
            Ok(())
        }

        pub(super) fn start(&mut self, core: Arc<SessionCore>) -> BoardResult<()> {
            let api = self.api.expect("prepared before start");
            let res = unsafe { (api.start)() };
            if res != SDK_OK {
                return Err(BoardError::StreamThread(format!(
                    "gForce start failed with code {res}"
                )));
            }
            self.keep_alive.store(true, Ordering::Release);
            let keep_alive = Arc::clone(&self.keep_alive);
            let thread = std::thread::Builder::new()
                .name("neuroline-gforce".to_string())
                .spawn(move || Self::poll_loop(&core, api, &keep_alive))
                .map_err(|e| BoardError::StreamThread(e.to_string()))?;
            self.thread = Some(thread);
            self.is_streaming = true;
            Ok(())
        }

        fn poll_loop(core: &SessionCore, api: Api, keep_alive: &AtomicBool) {
            let schema = &core.descriptor().default;
            let emg_count = schema.emg_channels.len();
            let mut samples = vec![0.0f64; emg_count];
            let mut row = vec![0.0; schema.num_rows];
            let mut package_num = 0u8;
            while keep_alive.load(Ordering::Acquire) {
                let filled = unsafe {
                    (api.poll)(samples.as_mut_ptr(), c_int::try_from(emg_count).unwrap_or(0))
                };
                if filled == c_int::try_from(emg_count).unwrap_or(0) {
                    row[schema.package_num_channel] = f64::from(package_num);
                    for (ch, &index) in schema.emg_channels.iter().enumerate() {
                        row[index] = samples[ch];
                    }
                    row[schema.timestamp_channel] = clock::timestamp();
                    core.push_package(&mut row, Preset::Default);
                    package_num = package_num.wrapping_add(1);
                    std::thread::sleep(Duration::from_millis(1));
                } else {
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        pub(super) fn stop(&mut self) -> BoardResult<()> {
            self.keep_alive.store(false, Ordering::Release);
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
            self.is_streaming = false;
            if let Some(api) = self.api {
                let res = unsafe { (api.stop)() };
                if res != SDK_OK {
                    return Err(BoardError::BoardWrite(format!(
                        "gForce stop failed with code {res}"
                    )));
                }
            }
            Ok(())
        }

        pub(super) fn release(&mut self) {
            if let Some(api) = self.api.take() {
                unsafe {
                    let _ = (api.deinit)();
                }
            }
            self.library = None;
            self.initialized = false;
        }
    }
}

#[cfg(all(windows, feature = "vendor"))]
impl BoardDriver for GforceDriver {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        self.claim()?;
        self.state.prepare()
    }

    fn start_stream(&mut self, buffer_size: usize, streamer_params: &str) -> BoardResult<()> {
        if !self.state.initialized {
            return Err(BoardError::BoardNotCreated(BoardId::GforcePro as i32));
        }
        if self.state.is_streaming {
            return Err(BoardError::StreamAlreadyRun);
        }
        self.core.prepare_for_acquisition(buffer_size, streamer_params)?;
        self.state.start(Arc::clone(&self.core))
    }

    fn stop_stream(&mut self) -> BoardResult<()> {
        if !self.state.is_streaming {
            return Err(BoardError::StreamThreadNotRunning);
        }
        self.state.stop()
    }

    fn release_session(&mut self) -> BoardResult<()> {
        if self.state.initialized {
            if self.state.is_streaming {
                let _ = self.state.stop();
            }
            self.core.free_packages();
            self.state.release();
        }
        Ok(())
    }

    fn config_board(&mut self, _command: &str) -> BoardResult<String> {
        if !self.state.initialized {
            return Err(BoardError::BoardNotCreated(BoardId::GforcePro as i32));
        }
        // armband configuration happens through the vendor tooling
        Ok(String::new())
    }
}

#[cfg(not(all(windows, feature = "vendor")))]
impl BoardDriver for GforceDriver {
    fn core(&self) -> &Arc<SessionCore> {
        &self.core
    }

    fn prepare_session(&mut self) -> BoardResult<()> {
        self.claim()?;
        tracing::error!("the gForce SDK is only available on Windows");
        Err(BoardError::UnsupportedBoard)
    }

    fn start_stream(&mut self, _buffer_size: usize, _streamer_params: &str) -> BoardResult<()> {
        Err(BoardError::UnsupportedBoard)
    }

    fn stop_stream(&mut self) -> BoardResult<()> {
        Err(BoardError::UnsupportedBoard)
    }

    fn release_session(&mut self) -> BoardResult<()> {
        Ok(())
    }

    fn config_board(&mut self, _command: &str) -> BoardResult<String> {
        Err(BoardError::UnsupportedBoard)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // instance-counter tests share process-wide state
    static COUNTER_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_second_instance_is_rejected() {
        let _guard = COUNTER_LOCK.lock().unwrap();
        let first = GforceDriver::new(BoardParams::default());
        let mut second = GforceDriver::new(BoardParams::default());
        assert!(first.is_valid);
        assert!(!second.is_valid);
        let err = second.prepare_session().unwrap_err();
        assert!(matches!(err, BoardError::AnotherBoardIsCreated));
        drop(first);
        drop(second);
        // the slot frees up once both are gone
        let third = GforceDriver::new(BoardParams::default());
        assert!(third.is_valid);
    }

    #[cfg(not(all(windows, feature = "vendor")))]
    #[test]
    fn test_unsupported_platform() {
        let _guard = COUNTER_LOCK.lock().unwrap();
        let mut driver = GforceDriver::new(BoardParams::default());
        assert!(driver.is_valid);
        assert!(matches!(
            driver.prepare_session(),
            Err(BoardError::UnsupportedBoard)
        ));
        assert!(matches!(
            driver.config_board("anything"),
            Err(BoardError::UnsupportedBoard)
        ));
    }
}
