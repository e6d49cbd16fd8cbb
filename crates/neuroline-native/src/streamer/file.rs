//! File streamer: one CSV line per sample row

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};

use neuroline_core::error::{BoardError, BoardResult};

use super::Streamer;

/// Writes rows to a file, one comma-separated line per row.
///
/// Mods select the file mode: `w` truncates, `a` appends. Writes go
/// through a `BufWriter`; a write failure is logged once and the streamer
/// goes quiet rather than disturbing acquisition.
#[derive(Debug)]
pub struct FileStreamer {
    writer: Option<BufWriter<File>>,
    path: String,
    mode: String,
    num_rows: usize,
    line: String,
}

impl FileStreamer {
    /// Open the target file according to the mode mods.
    ///
    /// # Errors
    ///
    /// `InvalidArguments` for an unknown mode, `GeneralError` when the file
    /// cannot be opened.
    pub fn new(path: &str, mods: &str, num_rows: usize) -> BoardResult<Self> {
        let mut options = OpenOptions::new();
        match mods {
            "w" | "" => options.write(true).create(true).truncate(true),
            "a" => options.append(true).create(true),
            other => {
                return Err(BoardError::InvalidArguments(format!(
                    "file streamer mode must be 'w' or 'a', got {other:?}"
                )))
            }
        };
        let file = options
            .open(path)
            .map_err(|e| BoardError::General(format!("failed to open {path}: {e}")))?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            path: path.to_string(),
            mode: mods.to_string(),
            num_rows,
            line: String::new(),
        })
    }
}

impl Streamer for FileStreamer {
    fn stream(&mut self, row: &[f64]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        self.line.clear();
        for (i, value) in row.iter().take(self.num_rows).enumerate() {
            if i > 0 {
                self.line.push(',');
            }
            self.line.push_str(&format!("{value:.6}"));
        }
        self.line.push('\n');
        if let Err(e) = writer.write_all(self.line.as_bytes()) {
            tracing::warn!(path = %self.path, error = %e, "file streamer write failed, disabling");
            self.writer = None;
        }
    }

    fn matches(&self, kind: &str, dest: &str, mods: &str) -> bool {
        kind == "file" && dest == self.path && (mods == self.mode || (mods == "w" && self.mode.is_empty()))
    }
}

impl Drop for FileStreamer {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
