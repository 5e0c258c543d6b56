//! Entry point resolution.

use std::ffi::{CStr, c_void};

use crate::abi::{GetProcAddressFn, RawProc};

/// Resolves engine entry points by name.
///
/// The engine hands the extension one resolver at load time; tests substitute
/// an in-process implementation.
pub trait ProcLoader: Send + Sync {
    fn load(&self, name: &CStr) -> Option<RawProc>;

    /// Library token passed back to class registration calls.
    fn library(&self) -> *mut c_void {
        std::ptr::null_mut()
    }
}

/// [`ProcLoader`] backed by the resolver the engine passed at load time.
pub struct GetProcAddress {
    get: GetProcAddressFn,
    library: usize,
}

impl GetProcAddress {
    /// # Safety
    ///
    /// `get` must be the resolver provided by the engine and `library` the
    /// token it passed alongside; both must stay valid while the loader lives.
    pub unsafe fn new(get: GetProcAddressFn, library: *mut c_void) -> Self {
        Self {
            get,
            library: library as usize,
        }
    }
}

impl ProcLoader for GetProcAddress {
    fn load(&self, name: &CStr) -> Option<RawProc> {
        // SAFETY: upheld by the contract of `GetProcAddress::new`.
        unsafe { (self.get)(name.as_ptr()) }
    }

    fn library(&self) -> *mut c_void {
        self.library as *mut c_void
    }
}

impl std::fmt::Debug for GetProcAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetProcAddress")
            .field("library", &format_args!("{:#x}", self.library))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::c_char;

    unsafe extern "C" fn noop() {}

    unsafe extern "C" fn resolve(name: *const c_char) -> Option<RawProc> {
        let name = unsafe { CStr::from_ptr(name) };
        (name == c"noop").then_some(noop as RawProc)
    }

    #[test]
    fn resolves_through_function_pointer() {
        let loader = unsafe { GetProcAddress::new(resolve, 0x40 as *mut c_void) };
        assert!(loader.load(c"noop").is_some());
        assert!(loader.load(c"missing").is_none());
        assert_eq!(loader.library() as usize, 0x40);
    }
}
