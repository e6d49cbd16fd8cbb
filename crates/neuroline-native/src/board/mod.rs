//! Driver contract and per-session acquisition state
//!
//! [`SessionCore`] owns what every driver has in common: the board
//! descriptor and, per preset, a ring buffer, a marker queue and the
//! attached streamers. Drivers push decoded rows through
//! [`SessionCore::push_package`]; API callers pull reshaped matrices back
//! out. One mutex serializes marker dequeue, row push with streamer
//! fan-out, and streamer-list mutation; it is held only for row assembly,
//! never across transport I/O.
//!
//! [`BoardDriver`] is the contract the registry consumes: the five
//! lifecycle methods are device-specific, the data-plane methods are
//! provided and forward to the session core.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use neuroline_core::buffer::{RingBuffer, MAX_CAPTURE_SAMPLES};
use neuroline_core::descriptor::{BoardDescriptor, BoardId, Preset};
use neuroline_core::error::{BoardError, BoardResult};
use neuroline_core::marker::MarkerQueue;

use crate::streamer::{create_streamer, parse_streamer_uri, Streamer};

// ============================================================================
// Retrieved data
// ============================================================================

/// A column-major sample matrix returned to API callers.
///
/// Value of row `j` at sample `i` sits at `values[j * num_samples + i]`.
#[derive(Debug, Default, serde::Serialize)]
pub struct BoardData {
    /// Rows in the matrix
    pub num_rows: usize,
    /// Samples in the matrix
    pub num_samples: usize,
    /// Column-major payload, `num_rows * num_samples` doubles
    pub values: Vec<f64>,
}

impl BoardData {
    /// All samples of one row.
    #[must_use]
    pub fn row(&self, index: usize) -> &[f64] {
        &self.values[index * self.num_samples..(index + 1) * self.num_samples]
    }
}

// ============================================================================
// Session core
// ============================================================================

/// State for one preset. The streamer list and marker queue live for the
/// whole session; the buffer exists only between stream start and release.
struct PresetSlot {
    buffer: Option<RingBuffer>,
    markers: MarkerQueue,
    streamers: Vec<Box<dyn Streamer>>,
}

impl PresetSlot {
    fn new() -> Self {
        Self { buffer: None, markers: MarkerQueue::new(), streamers: Vec::new() }
    }
}

/// Shared per-session state composed into every driver.
pub struct SessionCore {
    board_id: BoardId,
    descriptor: BoardDescriptor,
    presets: Mutex<[Option<PresetSlot>; 3]>,
}

impl SessionCore {
    /// Create the session state for a board.
    #[must_use]
    pub fn new(board_id: BoardId) -> Self {
        let descriptor = board_id.descriptor();
        let mut slots = [None, None, None];
        for preset in descriptor.presets() {
            slots[preset as usize] = Some(PresetSlot::new());
        }
        Self { board_id, descriptor, presets: Mutex::new(slots) }
    }

    /// Board this session belongs to.
    #[must_use]
    pub const fn board_id(&self) -> BoardId {
        self.board_id
    }

    /// Row schemas for this board.
    #[must_use]
    pub const fn descriptor(&self) -> &BoardDescriptor {
        &self.descriptor
    }

    /// Allocate the per-preset buffers and optionally attach a
    /// default-preset streamer. Called by drivers at stream start.
    ///
    /// # Errors
    ///
    /// `InvalidBufferSize` for out-of-range capacities; streamer
    /// construction errors are propagated with all session resources torn
    /// back down.
    pub fn prepare_for_acquisition(
        &self,
        buffer_size: usize,
        streamer_params: &str,
    ) -> BoardResult<()> {
        if buffer_size == 0 || buffer_size > MAX_CAPTURE_SAMPLES {
            return Err(BoardError::InvalidBufferSize(buffer_size as i64));
        }
        {
            let mut slots = self.lock_presets();
            for preset in self.descriptor.presets() {
                let schema = self
                    .descriptor
                    .preset(preset)
                    .expect("descriptor listed the preset");
                let slot = slots[preset as usize]
                    .as_mut()
                    .expect("slot created for every descriptor preset");
                slot.buffer = Some(RingBuffer::new(schema.num_rows, buffer_size)?);
                slot.markers.clear();
            }
        }
        if !streamer_params.is_empty() {
            if let Err(e) = self.add_streamer(streamer_params, Preset::Default) {
                self.free_packages();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Destroy buffers, pending markers and streamers for every preset.
    pub fn free_packages(&self) {
        let mut slots = self.lock_presets();
        for slot in slots.iter_mut().flatten() {
            slot.buffer = None;
            slot.markers.clear();
            slot.streamers.clear();
        }
    }

    /// Stamp the pending marker and deliver one row to the preset's ring
    /// buffer and every attached streamer.
    ///
    /// Rows for unknown presets or pushed before buffers exist are dropped
    /// with a log line; the acquisition loop never sees an error.
    pub fn push_package(&self, row: &mut [f64], preset: Preset) {
        let Some(schema) = self.descriptor.preset(preset) else {
            tracing::error!(preset = preset.name(), "push for preset missing from descriptor");
            return;
        };
        let marker_channel = schema.marker_channel;
        let mut slots = self.lock_presets();
        let Some(slot) = slots[preset as usize].as_mut() else {
            return;
        };
        let Some(buffer) = slot.buffer.as_mut() else {
            tracing::debug!(preset = preset.name(), "push before buffers allocated, dropping row");
            return;
        };
        if let Some(cell) = row.get_mut(marker_channel) {
            *cell = slot.markers.take();
        }
        buffer.push(row);
        for streamer in &mut slot.streamers {
            streamer.stream(row);
        }
    }

    /// Enqueue a marker for the next pushed row of `preset`.
    ///
    /// # Errors
    ///
    /// `InvalidArguments` for the reserved 0.0 value or an unknown preset,
    /// `EmptyBuffer` before the stream was started.
    pub fn insert_marker(&self, value: f64, preset: Preset) -> BoardResult<()> {
        let mut slots = self.lock_presets();
        let slot = Self::known_slot(&mut slots, preset)?;
        if slot.buffer.is_none() {
            return Err(BoardError::EmptyBuffer(preset.name()));
        }
        slot.markers.insert(value)
    }

    /// Attach a streamer described by `uri` to `preset`. Works before and
    /// during streaming.
    ///
    /// # Errors
    ///
    /// URI and construction errors from [`create_streamer`]; unknown
    /// presets report `InvalidArguments`.
    pub fn add_streamer(&self, uri: &str, preset: Preset) -> BoardResult<()> {
        let Some(schema) = self.descriptor.preset(preset) else {
            return Err(BoardError::InvalidArguments(format!(
                "board has no preset {}",
                preset.name()
            )));
        };
        // construct outside the lock so a slow sink never blocks a push
        let streamer = create_streamer(uri, schema.num_rows)?;
        let mut slots = self.lock_presets();
        let slot = Self::known_slot(&mut slots, preset)?;
        slot.streamers.push(streamer);
        Ok(())
    }

    /// Detach the first streamer matching `uri` from `preset`.
    ///
    /// # Errors
    ///
    /// `InvalidArguments` when no attached streamer matches.
    pub fn delete_streamer(&self, uri: &str, preset: Preset) -> BoardResult<()> {
        let (kind, dest, mods) = parse_streamer_uri(uri)?;
        let mut slots = self.lock_presets();
        let slot = Self::known_slot(&mut slots, preset)?;
        let position = slot
            .streamers
            .iter()
            .position(|s| s.matches(&kind, &dest, &mods));
        match position {
            Some(index) => {
                slot.streamers.remove(index);
                tracing::info!(uri, "streamer removed");
                Ok(())
            }
            None => Err(BoardError::InvalidArguments(format!(
                "no attached streamer matches {uri:?}"
            ))),
        }
    }

    /// Samples currently buffered for `preset`.
    ///
    /// # Errors
    ///
    /// `EmptyBuffer` before buffers are allocated, `InvalidArguments` for
    /// unknown presets.
    pub fn get_board_data_count(&self, preset: Preset) -> BoardResult<usize> {
        let mut slots = self.lock_presets();
        let slot = Self::known_slot(&mut slots, preset)?;
        slot.buffer
            .as_ref()
            .map(RingBuffer::count)
            .ok_or(BoardError::EmptyBuffer(preset.name()))
    }

    /// Drain up to `max_samples` of the oldest rows, column-major.
    ///
    /// # Errors
    ///
    /// Same conditions as [`get_board_data_count`](Self::get_board_data_count).
    pub fn get_board_data(&self, max_samples: usize, preset: Preset) -> BoardResult<BoardData> {
        self.retrieve(max_samples, preset, true)
    }

    /// Copy up to `max_samples` of the newest rows without removal,
    /// column-major.
    ///
    /// # Errors
    ///
    /// Same conditions as [`get_board_data_count`](Self::get_board_data_count).
    pub fn get_current_board_data(
        &self,
        max_samples: usize,
        preset: Preset,
    ) -> BoardResult<BoardData> {
        self.retrieve(max_samples, preset, false)
    }

    fn retrieve(&self, max_samples: usize, preset: Preset, drain: bool) -> BoardResult<BoardData> {
        let mut slots = self.lock_presets();
        let slot = Self::known_slot(&mut slots, preset)?;
        let Some(buffer) = slot.buffer.as_mut() else {
            return Err(BoardError::EmptyBuffer(preset.name()));
        };
        let num_rows = buffer.num_rows();
        let mut row_major = vec![0.0; max_samples * num_rows];
        let returned = if drain {
            buffer.get_data(max_samples, &mut row_major)
        } else {
            buffer.get_current(max_samples, &mut row_major)
        };
        drop(slots);
        Ok(reshape_to_columns(&row_major, returned, num_rows))
    }

    fn known_slot<'a>(
        slots: &'a mut MutexGuard<'_, [Option<PresetSlot>; 3]>,
        preset: Preset,
    ) -> BoardResult<&'a mut PresetSlot> {
        slots[preset as usize]
            .as_mut()
            .ok_or_else(|| {
                BoardError::InvalidArguments(format!("board has no preset {}", preset.name()))
            })
    }

    fn lock_presets(&self) -> MutexGuard<'_, [Option<PresetSlot>; 3]> {
        // a panicked holder cannot leave the slot table half-written in a
        // way readers cannot tolerate, so recover instead of poisoning the
        // whole session
        self.presets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn attach_raw_streamer(&self, streamer: Box<dyn Streamer>, preset: Preset) {
        let mut slots = self.lock_presets();
        slots[preset as usize].as_mut().unwrap().streamers.push(streamer);
    }

    #[cfg(test)]
    fn pending_markers(&self, preset: Preset) -> usize {
        let slots = self.lock_presets();
        slots[preset as usize].as_ref().unwrap().markers.pending()
    }
}

/// Transpose row-major sample data into the column-major output layout.
fn reshape_to_columns(row_major: &[f64], num_samples: usize, num_rows: usize) -> BoardData {
    let mut values = vec![0.0; num_samples * num_rows];
    for i in 0..num_samples {
        for j in 0..num_rows {
            values[j * num_samples + i] = row_major[i * num_rows + j];
        }
    }
    BoardData { num_rows, num_samples, values }
}

// ============================================================================
// First-frame gate
// ============================================================================

/// Condvar gate a driver's acquisition thread opens on its first valid
/// frame; `start_stream` blocks on it with a timeout.
#[derive(Default)]
pub struct FirstFrameGate {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl FirstFrameGate {
    /// Gate in the unopened state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to unopened before a new stream start.
    pub fn reset(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        *ready = false;
    }

    /// Signal that the first valid frame was decoded.
    pub fn open(&self) {
        let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        *ready = true;
        drop(ready);
        self.cv.notify_all();
    }

    /// Block until the gate opens or `timeout` elapses. Returns whether the
    /// gate opened.
    #[must_use]
    pub fn wait(&self, timeout: Duration) -> bool {
        let ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
        let (ready, _) = self
            .cv
            .wait_timeout_while(ready, timeout, |opened| !*opened)
            .unwrap_or_else(PoisonError::into_inner);
        *ready
    }
}

// ============================================================================
// Driver contract
// ============================================================================

/// Seconds `start_stream` waits for the first decoded frame.
pub const FIRST_FRAME_TIMEOUT_SECS: u64 = 3;

/// The contract every concrete driver implements.
///
/// Lifecycle methods are device-specific; data-plane methods forward to the
/// shared [`SessionCore`] and rarely need overriding.
pub trait BoardDriver: Send {
    /// Shared session state composed into the driver.
    fn core(&self) -> &Arc<SessionCore>;

    /// Acquire the transport, detect the device, load initial
    /// configuration. Idempotent.
    fn prepare_session(&mut self) -> BoardResult<()>;

    /// Allocate buffers, send the device start command and spawn the
    /// acquisition thread.
    fn start_stream(&mut self, buffer_size: usize, streamer_params: &str) -> BoardResult<()>;

    /// Stop the acquisition thread and quiesce the device.
    fn stop_stream(&mut self) -> BoardResult<()>;

    /// Stop if streaming and destroy all session resources. Idempotent.
    fn release_session(&mut self) -> BoardResult<()>;

    /// Send a device-specific control string; returns the device response
    /// when one is read.
    fn config_board(&mut self, command: &str) -> BoardResult<String>;

    /// Board this driver serves.
    fn board_id(&self) -> BoardId {
        self.core().board_id()
    }

    /// Enqueue an event marker for the next pushed row.
    fn insert_marker(&self, value: f64, preset: Preset) -> BoardResult<()> {
        self.core().insert_marker(value, preset)
    }

    /// Attach a streamer to a preset.
    fn add_streamer(&self, uri: &str, preset: Preset) -> BoardResult<()> {
        self.core().add_streamer(uri, preset)
    }

    /// Detach a previously attached streamer.
    fn delete_streamer(&self, uri: &str, preset: Preset) -> BoardResult<()> {
        self.core().delete_streamer(uri, preset)
    }

    /// Buffered sample count for a preset.
    fn get_board_data_count(&self, preset: Preset) -> BoardResult<usize> {
        self.core().get_board_data_count(preset)
    }

    /// Drain the oldest samples, column-major.
    fn get_board_data(&self, max_samples: usize, preset: Preset) -> BoardResult<BoardData> {
        self.core().get_board_data(max_samples, preset)
    }

    /// Peek the newest samples, column-major.
    fn get_current_board_data(&self, max_samples: usize, preset: Preset) -> BoardResult<BoardData> {
        self.core().get_current_board_data(max_samples, preset)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use neuroline_core::error::ExitCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn core() -> SessionCore {
        SessionCore::new(BoardId::Synthetic)
    }

    fn default_rows(core: &SessionCore) -> usize {
        core.descriptor().default.num_rows
    }

    #[test]
    fn test_prepare_rejects_bad_buffer_size() {
        let core = core();
        let err = core.prepare_for_acquisition(0, "").unwrap_err();
        assert_eq!(err.code(), ExitCode::InvalidBufferSizeError);
        let err = core
            .prepare_for_acquisition(MAX_CAPTURE_SAMPLES + 1, "")
            .unwrap_err();
        assert_eq!(err.code(), ExitCode::InvalidBufferSizeError);
    }

    #[test]
    fn test_marker_stamping_order_with_gaps() {
        let core = core();
        core.prepare_for_acquisition(64, "").unwrap();
        let num_rows = default_rows(&core);
        let marker_channel = core.descriptor().default.marker_channel;

        let mut row = vec![0.0; num_rows];
        core.push_package(&mut row, Preset::Default); // no marker pending
        core.insert_marker(5.0, Preset::Default).unwrap();
        core.insert_marker(6.0, Preset::Default).unwrap();
        core.push_package(&mut row, Preset::Default); // 5.0
        core.push_package(&mut row, Preset::Default); // 6.0
        core.push_package(&mut row, Preset::Default); // gap again

        let data = core.get_board_data(4, Preset::Default).unwrap();
        assert_eq!(data.num_samples, 4);
        assert_eq!(data.row(marker_channel), &[0.0, 5.0, 6.0, 0.0]);
    }

    #[test]
    fn test_insert_zero_marker_is_invalid() {
        let core = core();
        core.prepare_for_acquisition(16, "").unwrap();
        let err = core.insert_marker(0.0, Preset::Default).unwrap_err();
        assert_eq!(err.code(), ExitCode::InvalidArgumentsError);
    }

    #[test]
    fn test_unknown_preset_rejected() {
        let core = core();
        core.prepare_for_acquisition(16, "").unwrap();
        let err = core.insert_marker(1.0, Preset::Ancillary).unwrap_err();
        assert_eq!(err.code(), ExitCode::InvalidArgumentsError);
        assert!(core.get_board_data_count(Preset::Auxiliary).is_err());
    }

    #[test]
    fn test_count_before_prepare_is_empty_buffer() {
        let core = core();
        let err = core.get_board_data_count(Preset::Default).unwrap_err();
        assert_eq!(err.code(), ExitCode::EmptyBufferError);
    }

    #[test]
    fn test_streamer_attachable_before_buffers() {
        let core = core();
        let path = {
            let mut p = std::env::temp_dir();
            p.push(format!("neuroline-pre-{}.csv", std::process::id()));
            p.to_string_lossy().into_owned()
        };
        let uri = format!("file://{path}:w");
        // between prepare_session and start_stream buffers do not exist yet
        core.add_streamer(&uri, Preset::Default).unwrap();
        core.delete_streamer(&uri, Preset::Default).unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_reshape_round_trip() {
        // row-major (n=2, w=3) -> column-major (3, 2) -> transpose back
        let row_major = [1.0, 2.0, 3.0, 10.0, 20.0, 30.0];
        let data = reshape_to_columns(&row_major, 2, 3);
        assert_eq!(data.values, vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
        let mut back = vec![0.0; 6];
        for i in 0..2 {
            for j in 0..3 {
                back[i * 3 + j] = data.values[j * 2 + i];
            }
        }
        assert_eq!(back.as_slice(), row_major.as_slice());
    }

    #[test]
    fn test_retrieval_transposes_and_drains() {
        let core = core();
        core.prepare_for_acquisition(8, "").unwrap();
        let num_rows = default_rows(&core);
        for i in 0..3 {
            let mut row: Vec<f64> = (0..num_rows).map(|j| (i * 100 + j) as f64).collect();
            core.push_package(&mut row, Preset::Default);
        }
        let data = core.get_board_data(3, Preset::Default).unwrap();
        assert_eq!(data.num_samples, 3);
        // row 0 across samples
        assert_eq!(data.row(0), &[0.0, 100.0, 200.0]);
        // drained
        assert_eq!(core.get_board_data_count(Preset::Default).unwrap(), 0);
    }

    #[test]
    fn test_get_current_leaves_data() {
        let core = core();
        core.prepare_for_acquisition(8, "").unwrap();
        let num_rows = default_rows(&core);
        let mut row = vec![1.0; num_rows];
        core.push_package(&mut row, Preset::Default);
        let data = core.get_current_board_data(4, Preset::Default).unwrap();
        assert_eq!(data.num_samples, 1);
        assert_eq!(core.get_board_data_count(Preset::Default).unwrap(), 1);
    }

    #[test]
    fn test_streamer_fanout_receives_every_row() {
        #[derive(Debug)]
        struct CountingStreamer(Arc<AtomicUsize>);
        impl Streamer for CountingStreamer {
            fn stream(&mut self, _row: &[f64]) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
            fn matches(&self, _: &str, _: &str, _: &str) -> bool {
                false
            }
        }

        let core = core();
        core.prepare_for_acquisition(8, "").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        core.attach_raw_streamer(
            Box::new(CountingStreamer(Arc::clone(&counter))),
            Preset::Default,
        );
        let num_rows = default_rows(&core);
        let mut row = vec![0.0; num_rows];
        for _ in 0..5 {
            core.push_package(&mut row, Preset::Default);
        }
        assert_eq!(counter.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_delete_streamer_identity() {
        let core = core();
        core.prepare_for_acquisition(8, "").unwrap();
        let path = {
            let mut p = std::env::temp_dir();
            p.push(format!("neuroline-del-{}.csv", std::process::id()));
            p.to_string_lossy().into_owned()
        };
        let uri = format!("file://{path}:w");
        core.add_streamer(&uri, Preset::Default).unwrap();
        // wrong mods does not match
        let err = core
            .delete_streamer(&format!("file://{path}:a"), Preset::Default)
            .unwrap_err();
        assert_eq!(err.code(), ExitCode::InvalidArgumentsError);
        core.delete_streamer(&uri, Preset::Default).unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_marker_push_interleaving_across_threads() {
        // markers are never lost, never double-stamped, never zero where an
        // insertion preceded the corresponding push
        let core = Arc::new(SessionCore::new(BoardId::Synthetic));
        const PUSHES: usize = 800_000;
        const MARKERS: usize = 200_000;
        // capacity covers every push including the post-join flush, so no
        // stamped marker can be overwritten before the final readback
        core.prepare_for_acquisition(PUSHES + MARKERS, "").unwrap();
        let num_rows = default_rows(&core);
        let marker_channel = core.descriptor().default.marker_channel;

        let pusher = {
            let core = Arc::clone(&core);
            std::thread::spawn(move || {
                let mut row = vec![0.0; num_rows];
                for _ in 0..PUSHES {
                    core.push_package(&mut row, Preset::Default);
                }
            })
        };
        let marker = {
            let core = Arc::clone(&core);
            std::thread::spawn(move || {
                for i in 1..=MARKERS {
                    core.insert_marker(i as f64, Preset::Default).unwrap();
                }
            })
        };
        pusher.join().unwrap();
        marker.join().unwrap();

        // flush any markers still queued after the pusher finished
        let mut row = vec![0.0; num_rows];
        while core.pending_markers(Preset::Default) > 0 {
            core.push_package(&mut row, Preset::Default);
        }

        let total = core.get_board_data_count(Preset::Default).unwrap();
        let data = core.get_board_data(total, Preset::Default).unwrap();
        let stamped: Vec<f64> = data
            .row(marker_channel)
            .iter()
            .copied()
            .filter(|&v| v != 0.0)
            .collect();
        // every marker exactly once, in insertion order
        assert_eq!(stamped.len(), MARKERS);
        for (i, &value) in stamped.iter().enumerate() {
            assert_eq!(value, (i + 1) as f64);
        }
    }

    #[test]
    fn test_first_frame_gate() {
        let gate = Arc::new(FirstFrameGate::new());
        assert!(!gate.wait(Duration::from_millis(10)));
        let opener = {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                gate.open();
            })
        };
        assert!(gate.wait(Duration::from_secs(2)));
        opener.join().unwrap();
        gate.reset();
        assert!(!gate.wait(Duration::from_millis(5)));
    }
}
