use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::ptr;

use lmdb_sys as ffi;

use crate::buffer::ValBuf;
use crate::constants::{DbFlags, WriteFlags};
use crate::cursor::Cursor;
use crate::error::{Error, IntoResult, Result};
use crate::transaction::Transaction;
use crate::types::Stat;
use crate::value::{self, RawVal, ValMut};

/// Handle to a named sub-database: an independently sorted key space
/// within one environment.
///
/// The handle is a plain identifier scoped to the environment that opened
/// it and stays valid across transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Database {
    /// Database identifier
    dbi: ffi::MDB_dbi,
}

impl Database {
    /// Open a database inside the given transaction.
    ///
    /// Pass `None` for the unnamed database. `DbFlags::CREATE` requires a
    /// write transaction. The handle becomes visible to other
    /// transactions once this one commits.
    pub fn open(txn: &Transaction, name: Option<&str>, flags: DbFlags) -> Result<Self> {
        txn.inner().check_active()?;
        if flags.contains(DbFlags::CREATE) {
            txn.inner().check_writable()?;
        }

        let name_cstr = match name {
            Some(n) => Some(CString::new(n)?),
            None => None,
        };
        let name_ptr: *const c_char = name_cstr
            .as_ref()
            .map_or(ptr::null(), |n| n.as_ptr());

        let mut dbi: ffi::MDB_dbi = 0;
        unsafe { ffi::mdb_dbi_open(txn.inner().ptr, name_ptr, flags.bits(), &mut dbi) }
            .into_result()?;

        Ok(Database { dbi })
    }

    /// The raw database identifier.
    pub fn dbi(&self) -> u32 {
        self.dbi
    }

    /// Get a value by key.
    ///
    /// Returns `None` when the key is absent; that is a result, not an
    /// error. For sorted-duplicate databases the first value of the key
    /// is returned. The view also refreshes the transaction's current
    /// key/value buffers.
    pub fn get<'txn>(&self, txn: &'txn Transaction, key: &[u8]) -> Result<Option<ValBuf<'txn>>> {
        txn.inner().check_active()?;
        let proxy = txn.inner().proxy;
        let mut k = proxy.in_val(key);
        let mut v = value::mdb_val_empty();

        let rc = unsafe { ffi::mdb_get(txn.inner().ptr, self.dbi, &mut k, &mut v) };
        match rc {
            0 => {
                let key_raw = RawVal::from_mdb(&k);
                let val_raw = RawVal::from_mdb(&v);
                txn.inner().refresh(key_raw, val_raw);
                let buf = unsafe { proxy.out_val(val_raw) }?;
                Ok(Some(buf))
            }
            // Key not found
            -30798 => Ok(None),
            rc => Err(Error::from(rc)),
        }
    }

    /// Put a key/value pair.
    ///
    /// Requires a write transaction. For reserve-style writes use
    /// [`Database::reserve`] instead of `WriteFlags::RESERVE`.
    pub fn put(&self, txn: &Transaction, key: &[u8], data: &[u8], flags: WriteFlags) -> Result<()> {
        txn.inner().check_writable()?;
        let proxy = txn.inner().proxy;
        let mut k = proxy.in_val(key);
        let mut v = proxy.in_val(data);
        unsafe { ffi::mdb_put(txn.inner().ptr, self.dbi, &mut k, &mut v, flags.bits()) }
            .into_result()
    }

    /// Reserve space for a value and return a writable view over it.
    ///
    /// The engine allocates `len` bytes for the key; the caller fills the
    /// view before the transaction commits. Useful when the value is
    /// produced directly into engine memory, skipping a staging buffer.
    pub fn reserve<'txn>(
        &self,
        txn: &'txn Transaction,
        key: &[u8],
        len: usize,
    ) -> Result<ValMut<'txn>> {
        txn.inner().check_writable()?;
        let proxy = txn.inner().proxy;
        let mut k = proxy.in_val(key);
        let mut v = proxy.in_val_sized(len);
        unsafe {
            ffi::mdb_put(
                txn.inner().ptr,
                self.dbi,
                &mut k,
                &mut v,
                WriteFlags::RESERVE.bits(),
            )
        }
        .into_result()?;
        txn.inner().refresh_val(RawVal::from_mdb(&v));
        Ok(unsafe { ValMut::new(&v) })
    }

    /// Delete a key, or a single value of a key.
    ///
    /// With `data` set on a sorted-duplicate database only the matching
    /// value is removed; otherwise every value of the key goes. Deleting
    /// an absent key fails with [`Error::NotFound`].
    pub fn del(&self, txn: &Transaction, key: &[u8], data: Option<&[u8]>) -> Result<()> {
        txn.inner().check_writable()?;
        let proxy = txn.inner().proxy;
        let mut k = proxy.in_val(key);
        match data {
            Some(d) => {
                let mut v = proxy.in_val(d);
                unsafe { ffi::mdb_del(txn.inner().ptr, self.dbi, &mut k, &mut v) }.into_result()
            }
            None => {
                unsafe { ffi::mdb_del(txn.inner().ptr, self.dbi, &mut k, ptr::null_mut()) }
                    .into_result()
            }
        }
    }

    /// Get database statistics
    pub fn stat(&self, txn: &Transaction) -> Result<Stat> {
        txn.inner().check_active()?;
        let mut stat: ffi::MDB_stat = unsafe { std::mem::zeroed() };
        unsafe { ffi::mdb_stat(txn.inner().ptr, self.dbi, &mut stat) }.into_result()?;
        Ok(Stat {
            psize: stat.ms_psize as u32,
            depth: stat.ms_depth as u32,
            branch_pages: stat.ms_branch_pages as usize,
            leaf_pages: stat.ms_leaf_pages as usize,
            overflow_pages: stat.ms_overflow_pages as usize,
            entries: stat.ms_entries as usize,
        })
    }

    /// Get the flags this database was opened with
    pub fn flags(&self, txn: &Transaction) -> Result<DbFlags> {
        txn.inner().check_active()?;
        let mut raw: u32 = 0;
        unsafe { ffi::mdb_dbi_flags(txn.inner().ptr, self.dbi, &mut raw) }.into_result()?;
        Ok(DbFlags::from_bits_truncate(raw))
    }

    /// Empty the database, or delete it from the environment entirely.
    pub fn drop(&self, txn: &Transaction, delete: bool) -> Result<()> {
        txn.inner().check_writable()?;
        unsafe { ffi::mdb_drop(txn.inner().ptr, self.dbi, delete as c_int) }.into_result()
    }

    /// Create a cursor over this database bound to the transaction.
    ///
    /// The cursor may outlive the transaction object itself when that
    /// transaction is read-only; see [`Cursor::renew`].
    pub fn cursor<'env>(&self, txn: &Transaction<'env>) -> Result<Cursor<'env>> {
        Cursor::new(txn, self.dbi)
    }
}
