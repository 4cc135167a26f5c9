use std::ffi::NulError;
use std::os::raw::c_int;
use std::result;

use thiserror::Error;

use crate::meta;

/// Custom result type for engine operations
pub type Result<T> = result::Result<T, Error>;

/// Errors raised by the accessor layer.
///
/// The first group mirrors the engine's closed set of result codes; the
/// second group is detected locally before any native call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Key/data pair already exists
    #[error("Key/data pair already exists")]
    KeyExist,
    /// No matching key/data pair found
    #[error("No matching key/data pair found")]
    NotFound,
    /// Requested page not found
    #[error("Requested page not found")]
    PageNotFound,
    /// Database file is corrupted
    #[error("Database file is corrupted")]
    Corrupted,
    /// Update of meta page failed
    #[error("Update of meta page failed")]
    Panic,
    /// Database version mismatch
    #[error("Database version mismatch")]
    VersionMismatch,
    /// File is not a valid database file
    #[error("File is not a valid database file")]
    Invalid,
    /// Environment mapsize limit reached
    #[error("Environment mapsize limit reached")]
    MapFull,
    /// Environment maxdbs limit reached
    #[error("Environment maxdbs limit reached")]
    DbsFull,
    /// Environment maxreaders limit reached
    #[error("Environment maxreaders limit reached")]
    ReadersFull,
    /// Thread-local storage keys full
    #[error("Thread-local storage keys full")]
    TlsFull,
    /// Transaction has too many dirty pages
    #[error("Transaction has too many dirty pages")]
    TxnFull,
    /// Too many open cursors
    #[error("Too many open cursors")]
    CursorFull,
    /// Page has not enough space
    #[error("Page has not enough space")]
    PageFull,
    /// Database contents grew beyond environment mapsize
    #[error("Database contents grew beyond environment mapsize")]
    MapResized,
    /// Operation and DB incompatible
    #[error("Operation and DB incompatible")]
    Incompatible,
    /// Invalid reuse of reader locktable slot
    #[error("Invalid reuse of reader locktable slot")]
    BadRslot,
    /// Transaction must abort, has a child, or is invalid
    #[error("Transaction must abort, has a child, or is invalid")]
    BadTxn,
    /// Unsupported size of key/DB name/data, or wrong DUPFIXED size
    #[error("Unsupported size of key/DB name/data, or wrong DUPFIXED size")]
    BadValSize,
    /// The specified DBI was changed unexpectedly
    #[error("The specified DBI was changed unexpectedly")]
    BadDbi,
    /// Unrecognized engine result code, with the engine's own description
    #[error("Unknown result code {code}: {description}")]
    Other { code: c_int, description: String },

    /// Environment is already open
    #[error("Environment is already open")]
    EnvAlreadyOpen,
    /// Environment has not been opened yet
    #[error("Environment has not been opened yet")]
    EnvNotOpen,
    /// Environment is closed
    #[error("Environment is closed")]
    EnvClosed,
    /// Environment path is invalid
    #[error("Environment path is invalid")]
    InvalidPath,
    /// Environment flags cannot be modified after open
    #[error("Environment flags cannot be modified after open")]
    EnvFlagsImmutable,
    /// Transaction has already been committed or aborted
    #[error("Transaction has already been committed or aborted")]
    TxnTerminated,
    /// Transaction has already been reset
    #[error("Transaction has already been reset")]
    TxnAlreadyReset,
    /// Transaction has not been reset
    #[error("Transaction has not been reset")]
    TxnNotReset,
    /// Invalid transaction state
    #[error("Invalid transaction state")]
    TxnInvalid,
    /// A read-only transaction is required
    #[error("A read-only transaction is required")]
    TxnReadOnlyRequired,
    /// A read-write transaction is required
    #[error("A read-write transaction is required")]
    TxnReadWriteRequired,
    /// Parent transaction is not usable for nesting
    #[error("Parent transaction is not usable for nesting")]
    IncompatibleParent,
    /// Cursor is closed
    #[error("Cursor is closed")]
    CursorClosed,
}

impl From<c_int> for Error {
    fn from(err: c_int) -> Error {
        match err {
            -30799 => Error::KeyExist,
            -30798 => Error::NotFound,
            -30797 => Error::PageNotFound,
            -30796 => Error::Corrupted,
            -30795 => Error::Panic,
            -30794 => Error::VersionMismatch,
            -30793 => Error::Invalid,
            -30792 => Error::MapFull,
            -30791 => Error::DbsFull,
            -30790 => Error::ReadersFull,
            -30789 => Error::TlsFull,
            -30788 => Error::TxnFull,
            -30787 => Error::CursorFull,
            -30786 => Error::PageFull,
            -30785 => Error::MapResized,
            -30784 => Error::Incompatible,
            -30783 => Error::BadRslot,
            -30782 => Error::BadTxn,
            -30781 => Error::BadValSize,
            -30780 => Error::BadDbi,
            code => Error::Other {
                code,
                description: meta::describe(code),
            },
        }
    }
}

impl From<NulError> for Error {
    fn from(_: NulError) -> Error {
        Error::InvalidPath
    }
}

/// Helper trait for converting engine result codes to Results
pub(crate) trait IntoResult {
    fn into_result(self) -> Result<()>;
}

impl IntoResult for c_int {
    fn into_result(self) -> Result<()> {
        if self == 0 {
            Ok(())
        } else {
            Err(Error::from(self))
        }
    }
}
