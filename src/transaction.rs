use std::cell::Cell;
use std::rc::Rc;

use lmdb_sys as ffi;
use log::trace;

use crate::buffer::ValBuf;
use crate::constants::EnvFlags;
use crate::env::Environment;
use crate::error::{Error, IntoResult, Result};
use crate::value::RawVal;

/// Transaction lifecycle states.
///
/// `Reset` is reachable only by read-only transactions and leads back to
/// `Active` through `renew`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committed,
    Aborted,
    Reset,
}

/// Shared transaction core. Cursors hold a reference to this so every
/// access can be checked against the current state at runtime, which is
/// what lets a read-only cursor outlive its transaction until `renew`.
#[derive(Debug)]
pub(crate) struct TxnInner {
    pub(crate) ptr: *mut ffi::MDB_txn,
    pub(crate) read_only: bool,
    pub(crate) state: Cell<TxnState>,
    pub(crate) has_child: Cell<bool>,
    pub(crate) proxy: crate::buffer::BufferProxy,
    // Current key/value references, overwritten by every data-returning
    // operation on this transaction or its cursors.
    key: Cell<RawVal>,
    val: Cell<RawVal>,
}

impl TxnInner {
    pub(crate) fn check_active(&self) -> Result<()> {
        match self.state.get() {
            TxnState::Active => Ok(()),
            TxnState::Reset => Err(Error::TxnInvalid),
            TxnState::Committed | TxnState::Aborted => Err(Error::TxnTerminated),
        }
    }

    pub(crate) fn check_writable(&self) -> Result<()> {
        self.check_active()?;
        if self.read_only {
            return Err(Error::TxnReadWriteRequired);
        }
        Ok(())
    }

    pub(crate) fn refresh(&self, key: RawVal, val: RawVal) {
        self.key.set(key);
        self.val.set(val);
    }

    pub(crate) fn refresh_val(&self, val: RawVal) {
        self.val.set(val);
    }

    pub(crate) fn key_raw(&self) -> RawVal {
        self.key.get()
    }

    pub(crate) fn val_raw(&self) -> RawVal {
        self.val.get()
    }
}

/// A unit of atomic, isolated work against an environment.
///
/// Read-only transactions observe the snapshot current at creation (or
/// last `renew`); a write transaction additionally observes its own
/// uncommitted writes. The engine serializes write transactions itself;
/// beginning a second one while another is active blocks the caller.
#[derive(Debug)]
pub struct Transaction<'env> {
    /// Owning environment
    env: &'env Environment,
    /// Shared state, also held by cursors bound to this transaction
    inner: Rc<TxnInner>,
    /// Parent state for nested transactions
    parent: Option<Rc<TxnInner>>,
}

impl<'env> Transaction<'env> {
    /// Begin a transaction, optionally nested under a parent.
    ///
    /// The environment must be open. A parent must be an active,
    /// childless write transaction of the same mode as the child.
    pub(crate) fn new(
        env: &'env Environment,
        parent: Option<&Transaction<'env>>,
        read_only: bool,
    ) -> Result<Self> {
        if env.is_closed() {
            return Err(Error::EnvClosed);
        }
        if !env.is_open() {
            return Err(Error::EnvNotOpen);
        }

        // Validate parent transaction state if present. The engine only
        // nests write transactions, and permits one live child at a time.
        let parent_ptr = match parent {
            Some(p) => {
                if p.inner.state.get() != TxnState::Active {
                    return Err(Error::IncompatibleParent);
                }
                if p.inner.read_only || read_only {
                    return Err(Error::IncompatibleParent);
                }
                if p.inner.has_child.get() {
                    return Err(Error::IncompatibleParent);
                }
                p.inner.ptr
            }
            None => std::ptr::null_mut(),
        };

        let flags = if read_only {
            EnvFlags::RDONLY.bits()
        } else {
            0
        };
        let mut ptr: *mut ffi::MDB_txn = std::ptr::null_mut();
        unsafe { ffi::mdb_txn_begin(env.env_ptr(), parent_ptr, flags, &mut ptr) }
            .into_result()?;

        let parent_inner = parent.map(|p| {
            p.inner.has_child.set(true);
            Rc::clone(&p.inner)
        });
        trace!("transaction begun (read_only: {})", read_only);

        Ok(Transaction {
            env,
            inner: Rc::new(TxnInner {
                ptr,
                read_only,
                state: Cell::new(TxnState::Active),
                has_child: Cell::new(false),
                proxy: env.proxy(),
                key: Cell::new(RawVal::empty()),
                val: Cell::new(RawVal::empty()),
            }),
            parent: parent_inner,
        })
    }

    /// Begin a nested transaction under this one.
    ///
    /// Only write transactions nest, and only one child may be live at a
    /// time; siblings share nothing.
    pub fn begin_nested(&self) -> Result<Transaction<'env>> {
        Transaction::new(self.env, Some(self), self.inner.read_only)
    }

    /// Get reference to the owning environment
    pub fn env(&self) -> &Environment {
        self.env
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxnState {
        self.inner.state.get()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state(), TxnState::Committed | TxnState::Aborted)
    }

    /// The transaction's engine-assigned identifier.
    pub fn id(&self) -> Result<usize> {
        self.inner.check_active()?;
        Ok(unsafe { ffi::mdb_txn_id(self.inner.ptr) })
    }

    /// Commit the transaction.
    ///
    /// Legal only while active; a second commit fails with
    /// [`Error::TxnTerminated`]. The native handle is consumed either way.
    pub fn commit(&mut self) -> Result<()> {
        self.inner.check_active()?;
        let rc = unsafe { ffi::mdb_txn_commit(self.inner.ptr) };
        self.finish(if rc == 0 {
            TxnState::Committed
        } else {
            TxnState::Aborted
        });
        rc.into_result()
    }

    /// Abort the transaction, discarding its writes.
    ///
    /// Rejects transactions that already committed or aborted; use
    /// [`Transaction::close`] for state-tolerant cleanup.
    pub fn abort(&mut self) -> Result<()> {
        match self.state() {
            TxnState::Committed | TxnState::Aborted => Err(Error::TxnTerminated),
            TxnState::Active | TxnState::Reset => {
                unsafe { ffi::mdb_txn_abort(self.inner.ptr) };
                self.finish(TxnState::Aborted);
                Ok(())
            }
        }
    }

    /// Close the transaction by aborting unless already finished.
    ///
    /// Always safe to call, any number of times, in any state.
    pub fn close(&mut self) {
        match self.state() {
            TxnState::Committed | TxnState::Aborted => {}
            TxnState::Active | TxnState::Reset => {
                unsafe { ffi::mdb_txn_abort(self.inner.ptr) };
                self.finish(TxnState::Aborted);
            }
        }
    }

    /// Release this read-only transaction's reader slot, keeping the
    /// handle for a later [`Transaction::renew`].
    pub fn reset(&mut self) -> Result<()> {
        if !self.inner.read_only {
            return Err(Error::TxnReadOnlyRequired);
        }
        match self.state() {
            TxnState::Reset => Err(Error::TxnAlreadyReset),
            TxnState::Committed | TxnState::Aborted => Err(Error::TxnTerminated),
            TxnState::Active => {
                unsafe { ffi::mdb_txn_reset(self.inner.ptr) };
                self.inner.state.set(TxnState::Reset);
                trace!("transaction reset");
                Ok(())
            }
        }
    }

    /// Reacquire a reader slot on a previously reset transaction.
    ///
    /// The same native handle is reused; reads afterwards observe the
    /// snapshot current at renew time.
    pub fn renew(&mut self) -> Result<()> {
        if self.state() != TxnState::Reset {
            return Err(Error::TxnNotReset);
        }
        unsafe { ffi::mdb_txn_renew(self.inner.ptr) }.into_result()?;
        self.inner.state.set(TxnState::Active);
        trace!("transaction renewed");
        Ok(())
    }

    /// The key reference last returned by a data operation on this
    /// transaction or one of its cursors.
    ///
    /// Valid until the next data operation or the end of the transaction;
    /// copy the bytes out if they are needed beyond that.
    pub fn key(&self) -> Result<ValBuf<'_>> {
        self.inner.check_active()?;
        unsafe { self.inner.proxy.out_val(self.inner.key.get()) }
    }

    /// The value reference last returned by a data operation; same
    /// validity window as [`Transaction::key`].
    pub fn val(&self) -> Result<ValBuf<'_>> {
        self.inner.check_active()?;
        unsafe { self.inner.proxy.out_val(self.inner.val.get()) }
    }

    fn finish(&mut self, state: TxnState) {
        self.inner.state.set(state);
        if let Some(parent) = &self.parent {
            parent.has_child.set(false);
        }
        trace!("transaction finished: {:?}", state);
    }

    pub(crate) fn inner(&self) -> &Rc<TxnInner> {
        &self.inner
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
