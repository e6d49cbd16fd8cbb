//! Multicast/UDP streamer
//!
//! The acquisition thread only pushes rows into an internal ring; a worker
//! thread drains the ring and emits one datagram per batch, a contiguous
//! block of `batch * num_rows` little-endian doubles. A slow or absent
//! receiver therefore never backpressures sample capture.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use neuroline_core::buffer::RingBuffer;
use neuroline_core::error::{BoardError, BoardResult};

use super::Streamer;

/// Capacity of the internal hand-off ring in samples.
const HANDOFF_CAPACITY: usize = 1_000;

/// Environment variable overriding the rows-per-datagram batch size.
const BATCH_SIZE_ENV: &str = "NEUROLINE_BATCH_SIZE";

/// Default rows per datagram.
const BATCH_SIZE_DEFAULT: usize = 16;

/// Sleep while the ring holds less than one batch.
const STARVED_SLEEP: Duration = Duration::from_micros(100);

fn batch_size() -> usize {
    std::env::var(BATCH_SIZE_ENV)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n >= 1 && n <= HANDOFF_CAPACITY)
        .unwrap_or(BATCH_SIZE_DEFAULT)
}

/// Emits batches of rows as UDP datagrams to a multicast group.
#[derive(Debug)]
pub struct MulticastStreamer {
    ring: Arc<Mutex<RingBuffer>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    dest: String,
    port: u16,
}

impl MulticastStreamer {
    /// Bind the socket and start the draining worker.
    ///
    /// # Errors
    ///
    /// `GeneralError` when the socket cannot be created or connected;
    /// buffer-size errors cannot occur for the fixed internal capacity.
    pub fn new(addr: &str, port: u16, num_rows: usize) -> BoardResult<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| BoardError::General(format!("multicast socket bind failed: {e}")))?;
        socket
            .set_multicast_ttl_v4(1)
            .map_err(|e| BoardError::General(format!("multicast ttl failed: {e}")))?;
        socket
            .connect((addr, port))
            .map_err(|e| BoardError::General(format!("multicast connect {addr}:{port} failed: {e}")))?;

        let ring = Arc::new(Mutex::new(RingBuffer::new(num_rows, HANDOFF_CAPACITY)?));
        let running = Arc::new(AtomicBool::new(true));

        let worker_ring = Arc::clone(&ring);
        let worker_running = Arc::clone(&running);
        let worker = std::thread::Builder::new()
            .name("neuroline-multicast".to_string())
            .spawn(move || Self::worker_loop(&worker_ring, &worker_running, &socket, num_rows))
            .map_err(|e| BoardError::General(format!("failed to spawn multicast worker: {e}")))?;

        Ok(Self {
            ring,
            running,
            worker: Some(worker),
            dest: addr.to_string(),
            port,
        })
    }

    fn worker_loop(
        ring: &Mutex<RingBuffer>,
        running: &AtomicBool,
        socket: &UdpSocket,
        num_rows: usize,
    ) {
        let batch = batch_size();
        let mut transaction = vec![0.0f64; batch * num_rows];
        let mut datagram = vec![0u8; batch * num_rows * 8];
        while running.load(Ordering::Acquire) {
            let drained = {
                let mut guard = match ring.lock() {
                    Ok(g) => g,
                    Err(_) => break,
                };
                if guard.count() >= batch {
                    guard.get_data(batch, &mut transaction)
                } else {
                    0
                }
            };
            if drained == batch {
                for (chunk, value) in datagram.chunks_exact_mut(8).zip(&transaction) {
                    chunk.copy_from_slice(&value.to_le_bytes());
                }
                if let Err(e) = socket.send(&datagram) {
                    tracing::debug!(error = %e, "multicast send failed");
                }
            } else {
                std::thread::sleep(STARVED_SLEEP);
            }
        }
    }
}

impl Streamer for MulticastStreamer {
    fn stream(&mut self, row: &[f64]) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.push(row);
        }
    }

    fn matches(&self, kind: &str, dest: &str, mods: &str) -> bool {
        kind == "streaming_board" && dest == self.dest && mods == self.port.to_string()
    }
}

impl Drop for MulticastStreamer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_emits_batched_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let num_rows = 3;
        let mut streamer = MulticastStreamer::new("127.0.0.1", port, num_rows).unwrap();
        let batch = batch_size();
        for i in 0..batch {
            let row = vec![i as f64; num_rows];
            streamer.stream(&row);
        }

        let mut buf = vec![0u8; batch * num_rows * 8];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(n, batch * num_rows * 8);
        // first row is all zeros, second all ones
        let second = f64::from_le_bytes(buf[num_rows * 8..num_rows * 8 + 8].try_into().unwrap());
        assert!((second - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_stream_never_blocks_without_receiver() {
        let mut streamer = MulticastStreamer::new("127.0.0.1", 4, 2).unwrap();
        let started = Instant::now();
        for i in 0..5_000 {
            streamer.stream(&[i as f64, 0.0]);
        }
        // pushing 5k rows into the hand-off ring must be near-instant
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_matches_identity() {
        let streamer = MulticastStreamer::new("127.0.0.1", 6677, 2).unwrap();
        assert!(streamer.matches("streaming_board", "127.0.0.1", "6677"));
        assert!(!streamer.matches("streaming_board", "127.0.0.1", "6678"));
        assert!(!streamer.matches("file", "127.0.0.1", "6677"));
    }
}
