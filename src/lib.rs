//! Safe, typed accessor layer over the LMDB memory-mapped storage engine.
//!
//! An [`Environment`] owns the storage file and hands out
//! [`Transaction`]s; a [`Transaction`] (or its [`Database`]) opens
//! [`Cursor`]s. Every byte exchanged with the engine passes through the
//! selected [`BufferProxy`] strategy, which either aliases engine pages
//! zero-copy or copies them into pooled owned buffers.

mod buffer;
mod constants;
mod cursor;
mod database;
mod env;
mod error;
mod meta;
mod transaction;
mod types;
mod value;

pub use buffer::{force_checked, BufferProxy, PoolBuf, ValBuf, FORCE_CHECKED_VAR};
pub use constants::{CopyFlags, DbFlags, EnvFlags, WriteFlags, DEFAULT_OPEN_MODE};
pub use cursor::Cursor;
pub use database::Database;
pub use env::Environment;
pub use error::{Error, Result};
pub use meta::{describe, version, version_string};
pub use transaction::{Transaction, TxnState};
pub use types::{EnvInfo, GetOp, SeekOp, Stat, Version};
pub use value::{Val, ValMut};
