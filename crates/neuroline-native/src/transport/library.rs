//! Runtime loading of vendor shared libraries
//!
//! Vendor SDKs and the Bluetooth Classic shim ship as shared libraries
//! placed next to the executable. [`TransportLibrary`] wraps loading and
//! symbol lookup; each driver family keeps its own explicit symbol table
//! rather than reflecting over the library.

use std::path::{Path, PathBuf};

use neuroline_core::error::{BoardError, BoardResult};

/// A shared library loaded for the lifetime of a session.
#[derive(Debug)]
pub struct TransportLibrary {
    library: libloading::Library,
    path: PathBuf,
}

impl TransportLibrary {
    /// Load the library at `path`.
    ///
    /// # Errors
    ///
    /// `GeneralError` when the library cannot be loaded.
    pub fn load(path: &Path) -> BoardResult<Self> {
        tracing::debug!(path = %path.display(), "loading dynamic library");
        // SAFETY: loading runs arbitrary library initialization; the vendor
        // libraries are shipped alongside the executable and trusted.
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            BoardError::General(format!("failed to load {}: {e}", path.display()))
        })?;
        Ok(Self { library, path: path.to_path_buf() })
    }

    /// Resolve a function pointer by name.
    ///
    /// # Errors
    ///
    /// `GeneralError` when the symbol is missing.
    ///
    /// # Safety
    ///
    /// The caller must spell the correct C signature for `T`.
    pub unsafe fn symbol<T>(&self, name: &str) -> BoardResult<libloading::Symbol<'_, T>> {
        self.library.get(name.as_bytes()).map_err(|e| {
            BoardError::General(format!(
                "symbol {name} missing from {}: {e}",
                self.path.display()
            ))
        })
    }

    /// Path the library was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Platform file name for a library stem, e.g. `foo` ->
/// `libfoo.so` / `libfoo.dylib` / `foo.dll`.
#[must_use]
pub fn platform_library_name(stem: &str) -> String {
    #[cfg(target_os = "windows")]
    {
        format!("{stem}.dll")
    }
    #[cfg(target_os = "macos")]
    {
        format!("lib{stem}.dylib")
    }
    #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
    {
        format!("lib{stem}.so")
    }
}

/// Expected location of a vendor library: sibling of the running
/// executable, falling back to the bare name (resolved by the loader search
/// path) when the executable path is unavailable.
#[must_use]
pub fn sibling_library_path(stem: &str) -> PathBuf {
    let name = platform_library_name(stem);
    match std::env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map_or_else(|| PathBuf::from(&name), |dir| dir.join(&name)),
        Err(_) => PathBuf::from(name),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_library_name() {
        let name = platform_library_name("neurolinebt");
        assert!(name.contains("neurolinebt"));
        #[cfg(target_os = "linux")]
        assert_eq!(name, "libneurolinebt.so");
    }

    #[test]
    fn test_sibling_path_is_next_to_executable() {
        let path = sibling_library_path("neurolinebt");
        let exe_dir = std::env::current_exe().unwrap();
        assert_eq!(path.parent(), exe_dir.parent());
    }

    #[test]
    fn test_load_missing_library_is_error() {
        let err = TransportLibrary::load(Path::new("/nonexistent/libneuroline-missing.so"))
            .unwrap_err();
        assert!(err.to_string().contains("failed to load"));
    }
}
