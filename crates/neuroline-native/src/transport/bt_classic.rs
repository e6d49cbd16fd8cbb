//! Bluetooth Classic RFCOMM shim
//!
//! Classic Bluetooth has no portable Rust stack, so the transport lives in
//! a shared library shipped next to the executable; this module loads it
//! and exposes typed wrappers over its C symbols. Autodiscovery runs when
//! the caller provides no MAC address.

use std::os::raw::{c_char, c_int};

use neuroline_core::error::{BoardError, BoardResult};

use super::library::{sibling_library_path, TransportLibrary};

/// Library stem of the Bluetooth shim.
pub const BT_LIBRARY_STEM: &str = "neurolinebt";

// Return codes shared with the transport library.
const BT_STATUS_OK: c_int = 0;
const BT_UNIMPLEMENTED: c_int = -1;
const BT_NOT_DISCOVERABLE: c_int = -2;

type OpenFn = unsafe extern "C" fn(c_int, *const c_char) -> c_int;
type CloseFn = unsafe extern "C" fn(*const c_char) -> c_int;
type WriteFn = unsafe extern "C" fn(*const c_char, c_int, *const c_char) -> c_int;
type ReadFn = unsafe extern "C" fn(*mut c_char, c_int, *const c_char) -> c_int;
type DiscoverFn = unsafe extern "C" fn(*const c_char, *mut c_char, *mut c_int) -> c_int;

/// RFCOMM connection to one device through the loadable shim.
#[derive(Debug)]
pub struct BtClassicTransport {
    library: TransportLibrary,
    mac_address: String,
    channel: u16,
}

impl BtClassicTransport {
    /// Load the shim library; no connection is made yet.
    ///
    /// # Errors
    ///
    /// `GeneralError` when the library cannot be loaded.
    pub fn load(mac_address: &str, channel: u16) -> BoardResult<Self> {
        let library = TransportLibrary::load(&sibling_library_path(BT_LIBRARY_STEM))?;
        Ok(Self {
            library,
            mac_address: mac_address.to_string(),
            channel: if channel == 0 { 1 } else { channel },
        })
    }

    /// MAC address in use (set by discovery when the caller gave none).
    #[must_use]
    pub fn mac_address(&self) -> &str {
        &self.mac_address
    }

    /// Discover a device whose name starts with `name_selector` and record
    /// its MAC address.
    ///
    /// # Errors
    ///
    /// `InvalidArguments` when the platform shim has no discovery support,
    /// `BoardNotReady` when nothing pairable answers, `GeneralError` for
    /// other shim failures.
    pub fn discover(&mut self, name_selector: &str) -> BoardResult<()> {
        let selector = make_cstring(name_selector)?;
        let mut mac_buf = [0 as c_char; 64];
        let mut len: c_int = 0;
        let res = unsafe {
            let discover: libloading::Symbol<'_, DiscoverFn> =
                self.library.symbol("bluetooth_discover_device")?;
            discover(selector.as_ptr(), mac_buf.as_mut_ptr(), std::ptr::addr_of_mut!(len))
        };
        match res {
            BT_STATUS_OK => {
                let bytes: Vec<u8> = mac_buf[..len.max(0) as usize]
                    .iter()
                    .map(|&c| c as u8)
                    .collect();
                self.mac_address = String::from_utf8_lossy(&bytes).into_owned();
                tracing::info!(mac = %self.mac_address, "discovered device");
                Ok(())
            }
            BT_UNIMPLEMENTED => Err(BoardError::InvalidArguments(
                "bluetooth autodiscovery is not supported on this platform".to_string(),
            )),
            BT_NOT_DISCOVERABLE => Err(BoardError::BoardNotReady(
                "device is not discoverable, check that it is paired and powered".to_string(),
            )),
            other => Err(BoardError::General(format!(
                "bluetooth discovery failed with code {other}"
            ))),
        }
    }

    /// Open the RFCOMM channel.
    ///
    /// # Errors
    ///
    /// `BoardNotReady` when the shim cannot connect.
    pub fn open(&self) -> BoardResult<()> {
        let mac = make_cstring(&self.mac_address)?;
        let res = unsafe {
            let open: libloading::Symbol<'_, OpenFn> =
                self.library.symbol("bluetooth_open_device")?;
            open(c_int::from(self.channel), mac.as_ptr())
        };
        if res == BT_STATUS_OK {
            Ok(())
        } else {
            Err(BoardError::BoardNotReady(format!(
                "failed to open bluetooth connection, code {res}"
            )))
        }
    }

    /// Close the RFCOMM channel.
    ///
    /// # Errors
    ///
    /// `BoardWrite` when the shim reports a close failure.
    pub fn close(&self) -> BoardResult<()> {
        let mac = make_cstring(&self.mac_address)?;
        let res = unsafe {
            let close: libloading::Symbol<'_, CloseFn> =
                self.library.symbol("bluetooth_close_device")?;
            close(mac.as_ptr())
        };
        if res == BT_STATUS_OK {
            Ok(())
        } else {
            Err(BoardError::BoardWrite(format!(
                "failed to close bluetooth connection, code {res}"
            )))
        }
    }

    /// Write `data`, returning the bytes accepted by the shim.
    ///
    /// # Errors
    ///
    /// `BoardWrite` when fewer bytes than requested were written.
    pub fn write(&self, data: &[u8]) -> BoardResult<usize> {
        let mac = make_cstring(&self.mac_address)?;
        let written = unsafe {
            let write: libloading::Symbol<'_, WriteFn> =
                self.library.symbol("bluetooth_write_data")?;
            write(
                data.as_ptr().cast::<c_char>(),
                c_int::try_from(data.len()).unwrap_or(c_int::MAX),
                mac.as_ptr(),
            )
        };
        if written == c_int::try_from(data.len()).unwrap_or(c_int::MAX) {
            Ok(data.len())
        } else {
            Err(BoardError::BoardWrite(format!(
                "bluetooth write accepted {written} of {} bytes",
                data.len()
            )))
        }
    }

    /// Read into `buf`, returning the bytes received (possibly 0).
    ///
    /// # Errors
    ///
    /// `GeneralError` when the shim reports a negative count.
    pub fn read(&self, buf: &mut [u8]) -> BoardResult<usize> {
        let mac = make_cstring(&self.mac_address)?;
        let received = unsafe {
            let read: libloading::Symbol<'_, ReadFn> =
                self.library.symbol("bluetooth_get_data")?;
            read(
                buf.as_mut_ptr().cast::<c_char>(),
                c_int::try_from(buf.len()).unwrap_or(c_int::MAX),
                mac.as_ptr(),
            )
        };
        usize::try_from(received)
            .map_err(|_| BoardError::General(format!("bluetooth read failed with code {received}")))
    }
}

fn make_cstring(s: &str) -> BoardResult<std::ffi::CString> {
    std::ffi::CString::new(s)
        .map_err(|_| BoardError::InvalidArguments(format!("string contains NUL: {s:?}")))
}

// ============================================================================
// Tests
// ============================================================================
