//! Serial port shim
//!
//! Wraps the `serialport` crate behind the [`SerialIo`] trait: blocking
//! reads with a port timeout, full writes, input-buffer drains. Timeouts
//! surface as `Ok(0)` so acquisition loops treat "no data yet" and "short
//! read" identically.

use std::io::Read;
use std::time::Duration;

use neuroline_core::error::{BoardError, BoardResult};

/// Byte-level serial operations the drivers consume.
pub trait SerialIo: Send {
    /// Read into `buf`, returning the bytes read; 0 means the timeout
    /// elapsed with nothing available.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Replace the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> std::io::Result<()>;

    /// Discard anything pending in the input buffer.
    fn flush_input(&mut self);
}

/// `serialport`-backed implementation.
#[derive(Debug)]
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
    path: String,
}

impl SerialTransport {
    /// Open `path` at `baud_rate` with 8N1 framing, no flow control and the
    /// given read timeout.
    ///
    /// # Errors
    ///
    /// `UnableToOpenPort` when the port cannot be opened, `SetPort` when
    /// the timeout cannot be applied.
    pub fn open(path: &str, baud_rate: u32, timeout_ms: u64) -> BoardResult<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(timeout_ms))
            .open()
            .map_err(|e| BoardError::UnableToOpenPort {
                port: path.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!(path, baud_rate, timeout_ms, "serial port open");
        Ok(Self { port, path: path.to_string() })
    }

    /// Port path this transport was opened on.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Enumerate serial ports present on the host.
    #[must_use]
    pub fn available_ports() -> Vec<String> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .unwrap_or_default()
    }
}

impl SerialIo for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        std::io::Write::write_all(&mut self.port, buf)?;
        self.port.flush()
    }

    fn set_timeout(&mut self, timeout: Duration) -> std::io::Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    }

    fn flush_input(&mut self) {
        let _ = self.port.clear(serialport::ClearBuffer::Input);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use neuroline_core::error::ExitCode;

    #[test]
    fn test_open_missing_port_reports_unable_to_open() {
        let err = SerialTransport::open("/dev/neuroline-no-such-port", 115_200, 100).unwrap_err();
        assert_eq!(err.code(), ExitCode::UnableToOpenPortError);
        assert!(err.to_string().contains("neuroline-no-such-port"));
    }

    #[test]
    fn test_available_ports_does_not_panic() {
        let _ = SerialTransport::available_ports();
    }
}
