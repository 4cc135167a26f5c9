//! Buffer strategy bridging engine memory and caller-visible buffers.
//!
//! Two interchangeable strategies exist: a raw path that hands out
//! zero-copy views aliasing engine pages, and a checked path that
//! validates every reference and copies it into a pooled, owned buffer.
//! The raw path is preferred; a one-shot startup probe decides whether it
//! is usable, and the decision holds for the process lifetime.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::env;
use std::mem;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use lmdb_sys::MDB_val;
use log::warn;
use once_cell::sync::Lazy;

use crate::error::Result;
use crate::value::{self, RawVal, Val};

/// Environment variable that forces the checked strategy process-wide,
/// for diagnosis or restricted runtimes.
pub const FORCE_CHECKED_VAR: &str = "OXMDB_FORCE_CHECKED";

static FORCE_CHECKED: Lazy<AtomicBool> =
    Lazy::new(|| AtomicBool::new(env::var_os(FORCE_CHECKED_VAR).is_some()));

// The probe runs once; a failure demotes every later environment to the
// checked strategy.
static RAW_VIEW_USABLE: Lazy<bool> = Lazy::new(probe_raw_view);

static PROBE_BYTES: [u8; 8] = [0x6f, 0x78, 0x6d, 0x64, 0x62, 0x2d, 0x30, 0x31];

fn probe_raw_view() -> bool {
    let mdb = value::mdb_val_from(&PROBE_BYTES);
    let raw = RawVal::from_mdb(&mdb);
    if raw.check().is_err() {
        warn!("raw view probe rejected its own reference; using checked buffers");
        return false;
    }
    let view = unsafe { Val::new(raw) };
    let usable = view.as_slice() == &PROBE_BYTES[..];
    if !usable {
        warn!("raw view probe read back wrong bytes; using checked buffers");
    }
    usable
}

/// Forces (or releases) the checked strategy for environments created
/// afterwards. Equivalent to setting [`FORCE_CHECKED_VAR`].
pub fn force_checked(on: bool) {
    FORCE_CHECKED.store(on, Ordering::SeqCst);
}

thread_local! {
    // Per-thread pool of retired buffers. Buffers never cross threads.
    static POOL: RefCell<VecDeque<Vec<u8>>> = RefCell::new(VecDeque::with_capacity(16));
}

/// Takes a pooled buffer if one is available, otherwise a fresh empty one.
/// Never returns storage the caller must null-check.
pub(crate) fn allocate() -> Vec<u8> {
    POOL.with(|pool| pool.borrow_mut().pop_front()).unwrap_or_default()
}

/// Returns a buffer to the calling thread's pool. Contents are kept as-is.
pub(crate) fn deallocate(buf: Vec<u8>) {
    POOL.with(|pool| pool.borrow_mut().push_back(buf));
}

/// The buffer translation strategy, selected once per environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferProxy {
    /// Zero-copy views aliasing engine pages directly.
    Raw,
    /// Validated copies into pooled owned buffers.
    Checked,
}

impl BufferProxy {
    /// The fastest strategy usable on this platform. Falls back to
    /// [`BufferProxy::Checked`] permanently if the raw probe failed or the
    /// checked strategy has been forced.
    pub fn optimal() -> BufferProxy {
        if FORCE_CHECKED.load(Ordering::SeqCst) || !*RAW_VIEW_USABLE {
            BufferProxy::Checked
        } else {
            BufferProxy::Raw
        }
    }

    /// "in" direction: caller buffer to engine reference.
    pub(crate) fn in_val(self, bytes: &[u8]) -> MDB_val {
        value::mdb_val_from(bytes)
    }

    /// "in" with an explicit logical length, for reserve-style writes
    /// where the engine allocates the region itself.
    pub(crate) fn in_val_sized(self, len: usize) -> MDB_val {
        value::mdb_val_sized(len)
    }

    /// "out" direction: engine reference to caller buffer.
    ///
    /// Callers must guarantee `raw` names engine memory valid for `'txn`.
    /// The raw strategy aliases it; the checked strategy validates the
    /// reference and copies it into a pooled buffer, leaving nothing
    /// aliased on failure.
    pub(crate) unsafe fn out_val<'txn>(self, raw: RawVal) -> Result<ValBuf<'txn>> {
        match self {
            BufferProxy::Raw => Ok(ValBuf::Direct(Val::new(raw))),
            BufferProxy::Checked => {
                raw.check()?;
                let mut buf = allocate();
                buf.clear();
                buf.extend_from_slice(raw.as_slice());
                Ok(ValBuf::Pooled(PoolBuf { buf }))
            }
        }
    }
}

/// An owned buffer borrowed from the thread-local pool; returns itself to
/// the pool on drop.
#[derive(Debug)]
pub struct PoolBuf {
    buf: Vec<u8>,
}

impl Drop for PoolBuf {
    fn drop(&mut self) {
        deallocate(mem::take(&mut self.buf));
    }
}

impl Deref for PoolBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

/// A buffer produced by the "out" direction. Both variants expose the same
/// bytes; which one you get depends on the environment's strategy.
#[derive(Debug)]
pub enum ValBuf<'txn> {
    Direct(Val<'txn>),
    Pooled(PoolBuf),
}

impl ValBuf<'_> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            ValBuf::Direct(val) => val.as_slice(),
            ValBuf::Pooled(buf) => buf,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl Deref for ValBuf<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ValBuf<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}
