use std::ffi::CStr;
use std::os::raw::c_int;

use lmdb_sys as ffi;

use crate::types::Version;

/// Obtains the engine library version triple.
pub fn version() -> Version {
    let mut major: c_int = 0;
    let mut minor: c_int = 0;
    let mut patch: c_int = 0;
    unsafe {
        ffi::mdb_version(&mut major, &mut minor, &mut patch);
    }
    Version {
        major,
        minor,
        patch,
    }
}

/// Engine version in `major.minor.patch` form.
pub fn version_string() -> String {
    version().to_string()
}

/// Fetches the engine's description of a result code.
///
/// The mapper already folds every known code into a typed [`crate::Error`];
/// this is for troubleshooting and for the unrecognized-code fallback.
pub fn describe(code: c_int) -> String {
    unsafe { CStr::from_ptr(ffi::mdb_strerror(code)) }
        .to_string_lossy()
        .into_owned()
}
