//! Session registry
//!
//! Maps board ids to live driver sessions so one process can multiplex
//! several devices. Every entry point resolves the session by board id;
//! calls against an id with no session report `BOARD_NOT_CREATED_ERROR`.
//! The registry is plain state: process-wide ownership (and teardown at
//! exit) belongs to the embedding layer.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use neuroline_core::descriptor::{BoardId, Preset};
use neuroline_core::error::{BoardError, BoardResult};
use neuroline_core::params::BoardParams;

use crate::board::{BoardData, BoardDriver};
use crate::drivers::{CytonWifiDriver, GforceDriver, SyntheticDriver};

/// Construct the driver for a board id.
///
/// # Errors
///
/// `UnsupportedBoard` when the required transport feature is compiled out.
pub fn build_driver(board_id: BoardId, params: BoardParams) -> BoardResult<Box<dyn BoardDriver>> {
    match board_id {
        BoardId::Synthetic => Ok(Box::new(SyntheticDriver::new(params))),
        BoardId::CytonWifi => Ok(Box::new(CytonWifiDriver::new(params))),
        BoardId::GforcePro => Ok(Box::new(GforceDriver::new(params))),
        BoardId::Ganglion => {
            #[cfg(feature = "ble")]
            {
                Ok(Box::new(crate::drivers::GanglionDriver::new(params)))
            }
            #[cfg(not(feature = "ble"))]
            {
                Err(BoardError::UnsupportedBoard)
            }
        }
        BoardId::AntNeuro => {
            #[cfg(feature = "vendor")]
            {
                Ok(Box::new(crate::drivers::AntNeuroDriver::new(params)))
            }
            #[cfg(not(feature = "vendor"))]
            {
                Err(BoardError::UnsupportedBoard)
            }
        }
        BoardId::DawnEeg4 | BoardId::DawnEeg8 | BoardId::DawnEeg16 | BoardId::DawnEeg32 => {
            #[cfg(feature = "serial")]
            {
                Ok(Box::new(crate::drivers::DawnEegDriver::new(board_id, params)))
            }
            #[cfg(not(feature = "serial"))]
            {
                Err(BoardError::UnsupportedBoard)
            }
        }
        BoardId::Enophone => {
            #[cfg(feature = "vendor")]
            {
                Ok(Box::new(crate::drivers::EnophoneDriver::new(params)))
            }
            #[cfg(not(feature = "vendor"))]
            {
                Err(BoardError::UnsupportedBoard)
            }
        }
    }
}

/// Process-level table of active sessions.
#[derive(Default)]
pub struct DeviceRegistry {
    sessions: Mutex<HashMap<i32, Box<dyn BoardDriver>>>,
}

impl DeviceRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i32, Box<dyn BoardDriver>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<T>(
        &self,
        board_id: BoardId,
        f: impl FnOnce(&mut Box<dyn BoardDriver>) -> BoardResult<T>,
    ) -> BoardResult<T> {
        let mut sessions = self.lock();
        let driver = sessions
            .get_mut(&(board_id as i32))
            .ok_or(BoardError::BoardNotCreated(board_id as i32))?;
        f(driver)
    }

    /// Construct the driver and prepare its session. Re-preparing an
    /// existing session is allowed and idempotent.
    ///
    /// # Errors
    ///
    /// Construction and `prepare_session` errors; a driver that fails to
    /// prepare is not retained.
    pub fn prepare_session(&self, board_id: BoardId, params: BoardParams) -> BoardResult<()> {
        let mut sessions = self.lock();
        if let Some(driver) = sessions.get_mut(&(board_id as i32)) {
            return driver.prepare_session();
        }
        let mut driver = build_driver(board_id, params)?;
        driver.prepare_session()?;
        sessions.insert(board_id as i32, driver);
        Ok(())
    }

    /// Start streaming on an existing session.
    ///
    /// # Errors
    ///
    /// `BoardNotCreated` for unknown ids plus the driver's own errors.
    pub fn start_stream(
        &self,
        board_id: BoardId,
        buffer_size: usize,
        streamer_params: &str,
    ) -> BoardResult<()> {
        self.with_session(board_id, |driver| driver.start_stream(buffer_size, streamer_params))
    }

    /// Stop streaming on an existing session.
    ///
    /// # Errors
    ///
    /// `BoardNotCreated` for unknown ids plus the driver's own errors.
    pub fn stop_stream(&self, board_id: BoardId) -> BoardResult<()> {
        self.with_session(board_id, |driver| driver.stop_stream())
    }

    /// Release a session and drop it from the table.
    ///
    /// # Errors
    ///
    /// `BoardNotCreated` for unknown ids plus the driver's own errors.
    pub fn release_session(&self, board_id: BoardId) -> BoardResult<()> {
        let mut sessions = self.lock();
        let mut driver = sessions
            .remove(&(board_id as i32))
            .ok_or(BoardError::BoardNotCreated(board_id as i32))?;
        driver.release_session()
    }

    /// Release every session, suppressing individual errors.
    pub fn release_all(&self) {
        let mut sessions = self.lock();
        for (_, mut driver) in sessions.drain() {
            if let Err(e) = driver.release_session() {
                tracing::debug!(error = %e, "error during registry teardown");
            }
        }
    }

    /// Send a control command to the device.
    ///
    /// # Errors
    ///
    /// `BoardNotCreated` for unknown ids plus the driver's own errors.
    pub fn config_board(&self, board_id: BoardId, command: &str) -> BoardResult<String> {
        self.with_session(board_id, |driver| driver.config_board(command))
    }

    /// Enqueue an event marker.
    ///
    /// # Errors
    ///
    /// `BoardNotCreated` for unknown ids plus the driver's own errors.
    pub fn insert_marker(&self, board_id: BoardId, value: f64, preset: Preset) -> BoardResult<()> {
        self.with_session(board_id, |driver| driver.insert_marker(value, preset))
    }

    /// Attach a streamer.
    ///
    /// # Errors
    ///
    /// `BoardNotCreated` for unknown ids plus the driver's own errors.
    pub fn add_streamer(&self, board_id: BoardId, uri: &str, preset: Preset) -> BoardResult<()> {
        self.with_session(board_id, |driver| driver.add_streamer(uri, preset))
    }

    /// Detach a streamer.
    ///
    /// # Errors
    ///
    /// `BoardNotCreated` for unknown ids plus the driver's own errors.
    pub fn delete_streamer(&self, board_id: BoardId, uri: &str, preset: Preset) -> BoardResult<()> {
        self.with_session(board_id, |driver| driver.delete_streamer(uri, preset))
    }

    /// Buffered sample count.
    ///
    /// # Errors
    ///
    /// `BoardNotCreated` for unknown ids plus the driver's own errors.
    pub fn get_board_data_count(&self, board_id: BoardId, preset: Preset) -> BoardResult<usize> {
        self.with_session(board_id, |driver| driver.get_board_data_count(preset))
    }

    /// Drain the oldest samples, column-major.
    ///
    /// # Errors
    ///
    /// `BoardNotCreated` for unknown ids plus the driver's own errors.
    pub fn get_board_data(
        &self,
        board_id: BoardId,
        max_samples: usize,
        preset: Preset,
    ) -> BoardResult<BoardData> {
        self.with_session(board_id, |driver| driver.get_board_data(max_samples, preset))
    }

    /// Peek the newest samples, column-major.
    ///
    /// # Errors
    ///
    /// `BoardNotCreated` for unknown ids plus the driver's own errors.
    pub fn get_current_board_data(
        &self,
        board_id: BoardId,
        max_samples: usize,
        preset: Preset,
    ) -> BoardResult<BoardData> {
        self.with_session(board_id, |driver| {
            driver.get_current_board_data(max_samples, preset)
        })
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use neuroline_core::error::ExitCode;
    use std::time::Duration;

    #[test]
    fn test_missing_session_reports_board_not_created() {
        let registry = DeviceRegistry::new();
        let err = registry.start_stream(BoardId::Synthetic, 100, "").unwrap_err();
        assert_eq!(err.code(), ExitCode::BoardNotCreatedError);
        let err = registry
            .get_board_data_count(BoardId::Synthetic, Preset::Default)
            .unwrap_err();
        assert_eq!(err.code(), ExitCode::BoardNotCreatedError);
        let err = registry.release_session(BoardId::Synthetic).unwrap_err();
        assert_eq!(err.code(), ExitCode::BoardNotCreatedError);
    }

    #[test]
    fn test_synthetic_end_to_end() {
        let registry = DeviceRegistry::new();
        let params = BoardParams { other_info: "7".to_string(), ..Default::default() };
        registry.prepare_session(BoardId::Synthetic, params.clone()).unwrap();
        // preparing again is idempotent
        registry.prepare_session(BoardId::Synthetic, params).unwrap();

        let out = {
            let mut path = std::env::temp_dir();
            path.push(format!("neuroline-e2e-{}.csv", std::process::id()));
            path.to_string_lossy().into_owned()
        };
        registry
            .start_stream(BoardId::Synthetic, 4_096, &format!("file://{out}:w"))
            .unwrap();
        registry
            .insert_marker(BoardId::Synthetic, 3.25, Preset::Default)
            .unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let count = registry
            .get_board_data_count(BoardId::Synthetic, Preset::Default)
            .unwrap();
        assert!(count > 10);
        let peek = registry
            .get_current_board_data(BoardId::Synthetic, 4, Preset::Default)
            .unwrap();
        assert_eq!(peek.num_samples, 4);
        let data = registry
            .get_board_data(BoardId::Synthetic, count, Preset::Default)
            .unwrap();
        assert_eq!(data.num_samples, count);
        let descr = BoardId::Synthetic.descriptor();
        let markers = data.row(descr.default.marker_channel);
        assert_eq!(markers.iter().filter(|&&m| m == 3.25).count(), 1);

        registry.stop_stream(BoardId::Synthetic).unwrap();
        registry.release_session(BoardId::Synthetic).unwrap();
        // the session is gone from the table
        assert!(registry.stop_stream(BoardId::Synthetic).is_err());

        // the file streamer captured rows
        let contents = std::fs::read_to_string(&out).unwrap();
        assert!(contents.lines().count() > 10);
        std::fs::remove_file(&out).ok();
    }

    #[test]
    fn test_release_all_is_quiet() {
        let registry = DeviceRegistry::new();
        registry
            .prepare_session(BoardId::Synthetic, BoardParams::default())
            .unwrap();
        registry.release_all();
        assert!(registry.stop_stream(BoardId::Synthetic).is_err());
    }
}
