use std::ffi::{CStr, CString};
use std::mem;
use std::os::raw::{c_char, c_int, c_uint};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use lazy_static::lazy_static;
use lmdb_sys as ffi;
use log::debug;

use crate::buffer::BufferProxy;
use crate::constants::{CopyFlags, DbFlags, EnvFlags};
use crate::database::Database;
use crate::error::{Error, IntoResult, Result};
use crate::transaction::Transaction;
use crate::types::{EnvInfo, Stat};

lazy_static! {
    static ref CHANGEABLE: EnvFlags =
        EnvFlags::NOSYNC | EnvFlags::NOMETASYNC | EnvFlags::MAPASYNC | EnvFlags::NOMEMINIT;
}

/// Handle to a storage environment.
///
/// Lifecycle is create, configure, open, close. Configuration setters are
/// only legal between creation and `open`; `close` is idempotent and also
/// runs on drop. One environment may hold many named databases and hands
/// out all transactions.
#[derive(Debug)]
pub struct Environment {
    /// Native environment handle
    ptr: *mut ffi::MDB_env,
    /// Environment has been opened
    open: AtomicBool,
    /// Environment has been closed
    closed: AtomicBool,
    /// Buffer strategy used by every transaction of this environment
    proxy: BufferProxy,
}

// The native environment handle is safe for concurrent use; transactions
// themselves stay thread-bound.
unsafe impl Send for Environment {}
unsafe impl Sync for Environment {}

impl Environment {
    /// Create a new environment with the optimal buffer strategy.
    pub fn new() -> Result<Self> {
        Self::with_proxy(BufferProxy::optimal())
    }

    /// Create a new environment with an explicit buffer strategy.
    pub fn with_proxy(proxy: BufferProxy) -> Result<Self> {
        let mut env: *mut ffi::MDB_env = ptr::null_mut();
        unsafe { ffi::mdb_env_create(&mut env) }.into_result()?;
        Ok(Environment {
            ptr: env,
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            proxy,
        })
    }

    /// The buffer strategy this environment was created with.
    pub fn proxy(&self) -> BufferProxy {
        self.proxy
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // Configuration is only legal after creation and before open.
    fn check_config_allowed(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::EnvClosed);
        }
        if self.is_open() {
            return Err(Error::EnvAlreadyOpen);
        }
        Ok(())
    }

    // Operational calls need an open, not-yet-closed environment.
    fn check_usable(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::EnvClosed);
        }
        if !self.is_open() {
            return Err(Error::EnvNotOpen);
        }
        Ok(())
    }

    /// Set the size of the memory map
    pub fn set_map_size(&self, size: usize) -> Result<()> {
        self.check_config_allowed()?;
        unsafe { ffi::mdb_env_set_mapsize(self.ptr, size) }.into_result()
    }

    /// Set the maximum number of named databases
    pub fn set_max_dbs(&self, dbs: u32) -> Result<()> {
        self.check_config_allowed()?;
        unsafe { ffi::mdb_env_set_maxdbs(self.ptr, dbs) }.into_result()
    }

    /// Set the maximum number of reader slots
    pub fn set_max_readers(&self, readers: u32) -> Result<()> {
        self.check_config_allowed()?;
        unsafe { ffi::mdb_env_set_maxreaders(self.ptr, readers) }.into_result()
    }

    /// Open the environment at a filesystem path.
    ///
    /// `mode` carries the POSIX permissions for files the engine creates.
    /// Without `EnvFlags::NOSUBDIR` the path must be an existing directory.
    pub fn open<P: AsRef<Path>>(&self, path: P, flags: EnvFlags, mode: u32) -> Result<()> {
        if self.is_closed() {
            return Err(Error::EnvClosed);
        }
        if self.is_open() {
            return Err(Error::EnvAlreadyOpen);
        }

        let path = path.as_ref();
        let cpath = CString::new(path.as_os_str().as_bytes())?;
        unsafe {
            ffi::mdb_env_open(
                self.ptr,
                cpath.as_ptr(),
                flags.bits() as c_uint,
                mode as libc::mode_t,
            )
        }
        .into_result()?;

        self.open.store(true, Ordering::SeqCst);
        debug!("environment opened at {}", path.display());
        Ok(())
    }

    /// Close the environment and release the native handle.
    ///
    /// Silently returns if already closed or never opened. All
    /// transactions and cursors must already be finished.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.is_open() {
            return;
        }
        unsafe { ffi::mdb_env_close(self.ptr) };
        debug!("environment closed");
    }

    /// Set environment flags after open.
    ///
    /// Only the small changeable subset may be toggled once the
    /// environment is open.
    pub fn set_flags(&self, flags: EnvFlags, onoff: bool) -> Result<()> {
        self.check_usable()?;
        if !CHANGEABLE.contains(flags) {
            return Err(Error::EnvFlagsImmutable);
        }
        unsafe { ffi::mdb_env_set_flags(self.ptr, flags.bits() as c_uint, onoff as c_int) }
            .into_result()
    }

    /// Get the flags currently set in the environment.
    pub fn get_flags(&self) -> Result<EnvFlags> {
        self.check_usable()?;
        let mut raw: c_uint = 0;
        unsafe { ffi::mdb_env_get_flags(self.ptr, &mut raw) }.into_result()?;
        Ok(EnvFlags::from_bits_truncate(raw as u32))
    }

    /// Get the path that was used in `open`.
    pub fn get_path(&self) -> Result<PathBuf> {
        self.check_usable()?;
        let mut raw: *const c_char = ptr::null();
        unsafe { ffi::mdb_env_get_path(self.ptr, &mut raw) }.into_result()?;
        let bytes = unsafe { CStr::from_ptr(raw) }.to_bytes();
        Ok(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
    }

    /// Get the file descriptor of the main data file.
    pub fn get_fd(&self) -> Result<i32> {
        self.check_usable()?;
        let mut fd: libc::c_int = 0;
        unsafe { ffi::mdb_env_get_fd(self.ptr, &mut fd) }.into_result()?;
        Ok(fd as i32)
    }

    /// Get the maximum number of reader slots
    pub fn get_max_readers(&self) -> Result<u32> {
        if self.is_closed() {
            return Err(Error::EnvClosed);
        }
        let mut readers: c_uint = 0;
        unsafe { ffi::mdb_env_get_maxreaders(self.ptr, &mut readers) }.into_result()?;
        Ok(readers as u32)
    }

    /// Get the maximum size of keys the engine accepts
    pub fn get_max_key_size(&self) -> Result<u32> {
        if self.is_closed() {
            return Err(Error::EnvClosed);
        }
        Ok(unsafe { ffi::mdb_env_get_maxkeysize(self.ptr) } as u32)
    }

    /// Flush the data buffers to disk.
    ///
    /// Data is written at commit, but the operating system may keep it
    /// buffered; `force` requests a synchronous flush. Not valid for
    /// read-only environments.
    pub fn sync(&self, force: bool) -> Result<()> {
        self.check_usable()?;
        if self.get_flags()?.contains(EnvFlags::RDONLY) {
            return Err(Error::TxnReadWriteRequired);
        }
        unsafe { ffi::mdb_env_sync(self.ptr, force as c_int) }.into_result()
    }

    /// Copy the environment to an empty destination path.
    ///
    /// May be used as a backup of a live environment; the engine takes a
    /// read snapshot internally. No lock file is copied.
    pub fn copy<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.check_usable()?;
        let cpath = CString::new(path.as_ref().as_os_str().as_bytes())?;
        unsafe { ffi::mdb_env_copy(self.ptr, cpath.as_ptr()) }.into_result()
    }

    /// Copy the environment with options, e.g. compaction.
    pub fn copy2<P: AsRef<Path>>(&self, path: P, flags: CopyFlags) -> Result<()> {
        self.check_usable()?;
        let cpath = CString::new(path.as_ref().as_os_str().as_bytes())?;
        unsafe { ffi::mdb_env_copy2(self.ptr, cpath.as_ptr(), flags.bits() as c_uint) }
            .into_result()
    }

    /// Copy the environment to an already-open writable file descriptor.
    pub fn copy_fd(&self, fd: i32) -> Result<()> {
        self.check_usable()?;
        unsafe { ffi::mdb_env_copyfd(self.ptr, fd as libc::c_int) }.into_result()
    }

    /// Get environment statistics
    pub fn stat(&self) -> Result<Stat> {
        self.check_usable()?;
        let mut stat: ffi::MDB_stat = unsafe { mem::zeroed() };
        unsafe { ffi::mdb_env_stat(self.ptr, &mut stat) }.into_result()?;
        Ok(Stat {
            psize: stat.ms_psize as u32,
            depth: stat.ms_depth as u32,
            branch_pages: stat.ms_branch_pages as usize,
            leaf_pages: stat.ms_leaf_pages as usize,
            overflow_pages: stat.ms_overflow_pages as usize,
            entries: stat.ms_entries as usize,
        })
    }

    /// Get environment information
    pub fn info(&self) -> Result<EnvInfo> {
        self.check_usable()?;
        let mut info: ffi::MDB_envinfo = unsafe { mem::zeroed() };
        unsafe { ffi::mdb_env_info(self.ptr, &mut info) }.into_result()?;
        Ok(EnvInfo {
            mapaddr: info.me_mapaddr,
            mapsize: info.me_mapsize as usize,
            last_pgno: info.me_last_pgno as usize,
            last_txnid: info.me_last_txnid as usize,
            max_readers: info.me_maxreaders as u32,
            num_readers: info.me_numreaders as u32,
        })
    }

    /// Check for stale readers and release their slots.
    ///
    /// Returns the number of reader slots that were cleared.
    pub fn reader_check(&self) -> Result<usize> {
        self.check_usable()?;
        let mut dead: c_int = 0;
        unsafe { ffi::mdb_reader_check(self.ptr, &mut dead) }.into_result()?;
        Ok(dead as usize)
    }

    /// Begin a new read-write transaction
    pub fn begin_txn(&self) -> Result<Transaction<'_>> {
        Transaction::new(self, None, false)
    }

    /// Begin a new read-only transaction
    pub fn begin_ro_txn(&self) -> Result<Transaction<'_>> {
        Transaction::new(self, None, true)
    }

    /// Open a named database, creating the handle inside a transaction
    /// that is committed as part of the call.
    ///
    /// Uses a write transaction unless the environment itself is
    /// read-only. Pass `None` for the unnamed database.
    pub fn open_db(&self, name: Option<&str>, flags: DbFlags) -> Result<Database> {
        self.check_usable()?;
        let read_only = self.get_flags()?.contains(EnvFlags::RDONLY);
        let mut txn = Transaction::new(self, None, read_only)?;
        let db = Database::open(&txn, name, flags)?;
        txn.commit()?;
        Ok(db)
    }

    pub(crate) fn env_ptr(&self) -> *mut ffi::MDB_env {
        self.ptr
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.close();
    }
}
