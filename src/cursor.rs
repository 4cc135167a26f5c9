use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::ptr;
use std::rc::Rc;

use lmdb_sys as ffi;

use crate::buffer::ValBuf;
use crate::constants::WriteFlags;
use crate::env::Environment;
use crate::error::{Error, IntoResult, Result};
use crate::transaction::{Transaction, TxnInner, TxnState};
use crate::types::{GetOp, SeekOp};
use crate::value::{self, RawVal};

/// A stateful position within one database's sorted key space.
///
/// A cursor is bound to exactly one transaction at a time. One created
/// under a write transaction dies with that transaction; one created
/// under a read-only transaction survives it and can be rebound to a
/// later read-only transaction with [`Cursor::renew`]. The position
/// itself lives engine-side; nothing is cached here.
#[derive(Debug)]
pub struct Cursor<'env> {
    /// Native cursor handle
    ptr: *mut ffi::MDB_cursor,
    /// The transaction this cursor is currently bound to
    txn: RefCell<Rc<TxnInner>>,
    /// Cursor has been explicitly closed
    closed: Cell<bool>,
    /// Mode of the transaction the cursor was created under
    read_only: bool,
    _marker: PhantomData<&'env Environment>,
}

impl<'env> Cursor<'env> {
    pub(crate) fn new(txn: &Transaction<'env>, dbi: ffi::MDB_dbi) -> Result<Cursor<'env>> {
        txn.inner().check_active()?;
        let mut ptr: *mut ffi::MDB_cursor = ptr::null_mut();
        unsafe { ffi::mdb_cursor_open(txn.inner().ptr, dbi, &mut ptr) }.into_result()?;
        Ok(Cursor {
            ptr,
            txn: RefCell::new(Rc::clone(txn.inner())),
            closed: Cell::new(false),
            read_only: txn.is_read_only(),
            _marker: PhantomData,
        })
    }

    // Every operation needs an open cursor bound to a live transaction.
    fn usable_txn(&self) -> Result<Rc<TxnInner>> {
        if self.closed.get() {
            return Err(Error::CursorClosed);
        }
        let txn = Rc::clone(&self.txn.borrow());
        txn.check_active()?;
        Ok(txn)
    }

    /// Position the cursor without a key.
    ///
    /// Returns whether a key/data pair was found there; running off the
    /// end of the key space is a result, not an error. On success the
    /// transaction's current key/value buffers are refreshed.
    pub fn seek(&self, op: SeekOp) -> Result<bool> {
        let txn = self.usable_txn()?;
        let mut k = value::mdb_val_empty();
        let mut v = value::mdb_val_empty();
        let rc =
            unsafe { ffi::mdb_cursor_get(self.ptr, &mut k, &mut v, op.code() as ffi::MDB_cursor_op) };
        match rc {
            0 => {
                txn.refresh(RawVal::from_mdb(&k), RawVal::from_mdb(&v));
                Ok(true)
            }
            // No pair at the requested position
            -30798 => Ok(false),
            rc => Err(Error::from(rc)),
        }
    }

    /// Position the cursor at (or near) a caller-supplied key.
    ///
    /// Same found/not-found contract as [`Cursor::seek`].
    pub fn get(&self, key: &[u8], op: GetOp) -> Result<bool> {
        let txn = self.usable_txn()?;
        let mut k = txn.proxy.in_val(key);
        let mut v = value::mdb_val_empty();
        let rc =
            unsafe { ffi::mdb_cursor_get(self.ptr, &mut k, &mut v, op.code() as ffi::MDB_cursor_op) };
        match rc {
            0 => {
                txn.refresh(RawVal::from_mdb(&k), RawVal::from_mdb(&v));
                Ok(true)
            }
            -30798 => Ok(false),
            rc => Err(Error::from(rc)),
        }
    }

    /// The key at the cursor's position, as refreshed by the last
    /// successful operation. Same validity window as
    /// [`Transaction::key`].
    pub fn key(&self) -> Result<ValBuf<'_>> {
        let txn = self.usable_txn()?;
        unsafe { txn.proxy.out_val(txn.key_raw()) }
    }

    /// The value at the cursor's position; see [`Cursor::key`].
    pub fn val(&self) -> Result<ValBuf<'_>> {
        let txn = self.usable_txn()?;
        unsafe { txn.proxy.out_val(txn.val_raw()) }
    }

    /// Store a key/value pair at the appropriate position.
    ///
    /// Requires a write transaction.
    pub fn put(&self, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        let txn = self.usable_txn()?;
        txn.check_writable()?;
        let mut k = txn.proxy.in_val(key);
        let mut v = txn.proxy.in_val(data);
        unsafe { ffi::mdb_cursor_put(self.ptr, &mut k, &mut v, flags.bits()) }.into_result()
    }

    /// Delete the key/value pair the cursor currently refers to.
    pub fn delete(&self) -> Result<()> {
        let txn = self.usable_txn()?;
        txn.check_writable()?;
        unsafe { ffi::mdb_cursor_del(self.ptr, 0) }.into_result()
    }

    /// Count the values stored under the current key.
    ///
    /// Only meaningful for databases opened with `DbFlags::DUPSORT`.
    pub fn count(&self) -> Result<usize> {
        self.usable_txn()?;
        let mut count: usize = 0;
        unsafe { ffi::mdb_cursor_count(self.ptr, &mut count) }.into_result()?;
        Ok(count)
    }

    /// Close the cursor.
    ///
    /// Idempotent. A cursor belonging to a write transaction that has
    /// already ended was released by the engine together with the
    /// transaction, so closing it here is a state error rather than a
    /// no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.get() {
            return Ok(());
        }
        let txn = Rc::clone(&self.txn.borrow());
        if !txn.read_only && txn.state.get() != TxnState::Active {
            return Err(Error::TxnTerminated);
        }
        unsafe { ffi::mdb_cursor_close(self.ptr) };
        self.closed.set(true);
        Ok(())
    }

    /// Rebind the cursor to another read-only transaction.
    ///
    /// Only cursors created under a read-only transaction can be renewed,
    /// and only onto an active read-only transaction. The cursor keeps
    /// its database but loses its position.
    pub fn renew(&self, txn: &Transaction<'env>) -> Result<()> {
        if self.closed.get() {
            return Err(Error::CursorClosed);
        }
        if !self.read_only || !txn.is_read_only() {
            return Err(Error::TxnReadOnlyRequired);
        }
        txn.inner().check_active()?;
        unsafe { ffi::mdb_cursor_renew(txn.inner().ptr, self.ptr) }.into_result()?;
        *self.txn.borrow_mut() = Rc::clone(txn.inner());
        Ok(())
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        if self.closed.get() {
            return;
        }
        let txn = self.txn.borrow();
        // Read-only cursors always need an explicit native close; write
        // cursors only while their transaction is still live.
        if txn.read_only || txn.state.get() == TxnState::Active {
            unsafe { ffi::mdb_cursor_close(self.ptr) };
        }
        self.closed.set(true);
    }
}
