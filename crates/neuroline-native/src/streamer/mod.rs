//! Pluggable sinks for outgoing sample rows
//!
//! A streamer receives every row pushed into its preset, in addition to the
//! ring buffer. Streamers must never stall acquisition: the file streamer
//! writes through a buffered handle, the multicast streamer hands rows to a
//! background worker through an internal ring.
//!
//! Streamers are described by URI-like strings `type://dest:mods` where
//! `dest` is everything between `://` and the *last* `:`. New sink types
//! are added by implementing [`Streamer`] and extending
//! [`create_streamer`].

mod file;
mod multicast;

pub use file::FileStreamer;
pub use multicast::MulticastStreamer;

use neuroline_core::error::{BoardError, BoardResult};

/// Sink for sample rows attached to one preset.
pub trait Streamer: Send + std::fmt::Debug {
    /// Deliver one row. Must not block on I/O.
    fn stream(&mut self, row: &[f64]);

    /// Identity check used by streamer deletion.
    fn matches(&self, kind: &str, dest: &str, mods: &str) -> bool;
}

/// Split `type://dest:mods` into its three parts.
///
/// `dest` runs from after `://` to the last `:`; `mods` is the tail. A
/// string without `://`, without a `:` after the scheme, or with an empty
/// type is malformed.
///
/// # Errors
///
/// `InvalidArguments` for malformed strings.
pub fn parse_streamer_uri(uri: &str) -> BoardResult<(String, String, String)> {
    let malformed =
        || BoardError::InvalidArguments(format!("streamer format is type://dest:mods, got {uri:?}"));
    if uri.is_empty() {
        return Err(malformed());
    }
    let scheme_end = uri.find("://").ok_or_else(malformed)?;
    let mods_sep = uri.rfind(':').ok_or_else(malformed)?;
    if scheme_end == 0 || mods_sep == scheme_end {
        return Err(malformed());
    }
    Ok((
        uri[..scheme_end].to_string(),
        uri[scheme_end + 3..mods_sep].to_string(),
        uri[mods_sep + 1..].to_string(),
    ))
}

/// Construct and initialize a streamer for rows of `num_rows` doubles.
///
/// # Errors
///
/// `InvalidArguments` for malformed URIs or unsupported types; errors from
/// the concrete streamer's initialization otherwise.
pub fn create_streamer(uri: &str, num_rows: usize) -> BoardResult<Box<dyn Streamer>> {
    let (kind, dest, mods) = parse_streamer_uri(uri)?;
    match kind.as_str() {
        "file" => {
            tracing::debug!(file = %dest, mods = %mods, "creating file streamer");
            Ok(Box::new(FileStreamer::new(&dest, &mods, num_rows)?))
        }
        "streaming_board" => {
            let port: u16 = mods.parse().map_err(|_| {
                BoardError::InvalidArguments(format!("multicast port must be numeric, got {mods:?}"))
            })?;
            tracing::debug!(addr = %dest, port, "creating multicast streamer");
            Ok(Box::new(MulticastStreamer::new(&dest, port, num_rows)?))
        }
        other => Err(BoardError::InvalidArguments(format!(
            "unsupported streamer type {other:?}"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
