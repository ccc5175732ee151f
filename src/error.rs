//! Error and Result types shared across every collection in this crate.
//!
//! Every fallible call in this crate returns [`Result`]. Variants are kept
//! coarse-grained and carry a `(location, message)` pair so that a caller
//! printing the error gets both "what" and "where" without needing a
//! backtrace-capable allocator.

use std::{fmt, result, sync::mpsc};

/// Crate-wide result alias.
pub type Result<T> = result::Result<T, Error>;

/// Every distinct, user-visible failure this crate can report.
///
/// `SchemaMismatch` deliberately has no variant here: a revision mismatch
/// between a persisted indexer/aggregator and its compile-time revision is
/// handled internally by triggering a rebuild, never surfaced to callers.
#[derive(Debug)]
pub enum Error {
    /// Propagated from the underlying ordered key-value engine.
    KvBackend(String, String),
    /// A caller dereferenced a document or map entry that does not exist.
    RecordNotFound(String, String),
    /// Unique-index enforcement found a live conflicting value.
    ///
    /// Carries the collection id, the offending (already-encoded) index
    /// key, the document id already owning that key, and the document id
    /// that tried to claim it.
    DuplicateKey(u8, Vec<u8>, u64, u64),
    /// Unique-index lock manager detected a cross-batch conflict on an
    /// in-flight key.
    DeadlockKey(u8, Vec<u8>, u64),
    /// `chkref`-style integrity check found a dangling document reference.
    ReferencedDocumentNotFound(String, String),
    /// The keyspace registry ran out of one-byte collection ids.
    TooManyCollections(String, String),
    /// A collection is already open for writing under a conflicting handle.
    TableAlreadyOpen(String, String),
    /// A decoder hit a discriminator or length it cannot account for.
    CorruptRow(String, String),
    /// Caller passed arguments that violate an API precondition.
    InvalidInput(String, String),
    /// A background worker thread could not be joined or panicked.
    ThreadFail(String, String),
    /// An internal invariant was violated; these are implementation bugs.
    Fatal(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::KvBackend(p, m) => write!(f, "{} KvBackend: {}", p, m),
            Error::RecordNotFound(p, m) => write!(f, "{} RecordNotFound: {}", p, m),
            Error::DuplicateKey(kid, key, owner, claimant) => write!(
                f,
                "DuplicateKey: collection {} key {:?} owned by doc {} claimed by doc {}",
                kid, key, owner, claimant
            ),
            Error::DeadlockKey(kid, key, revision) => write!(
                f,
                "DeadlockKey: collection {} key {:?} locked by in-flight revision {}",
                kid, key, revision
            ),
            Error::ReferencedDocumentNotFound(p, m) => {
                write!(f, "{} ReferencedDocumentNotFound: {}", p, m)
            }
            Error::TooManyCollections(p, m) => write!(f, "{} TooManyCollections: {}", p, m),
            Error::TableAlreadyOpen(p, m) => write!(f, "{} TableAlreadyOpen: {}", p, m),
            Error::CorruptRow(p, m) => write!(f, "{} CorruptRow: {}", p, m),
            Error::InvalidInput(p, m) => write!(f, "{} InvalidInput: {}", p, m),
            Error::ThreadFail(p, m) => write!(f, "{} ThreadFail: {}", p, m),
            Error::Fatal(p, m) => write!(f, "{} Fatal: {}", p, m),
        }
    }
}

impl std::error::Error for Error {}

impl<T> From<mpsc::SendError<T>> for Error {
    fn from(err: mpsc::SendError<T>) -> Error {
        Error::ThreadFail("mpsc".to_string(), err.to_string())
    }
}

impl From<mpsc::RecvError> for Error {
    fn from(err: mpsc::RecvError) -> Error {
        Error::ThreadFail("mpsc".to_string(), err.to_string())
    }
}

/// Build an [`Error`] (or propagate one from a `Result`), stamping in the
/// call site as the error's location.
///
/// ```ignore
/// err_at!(InvalidInput, msg: "bad kid {}", kid)?;
/// err_at!(Fatal, some_fallible_call())?;
/// ```
#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let p = format!("{}:{}", file!(), line!());
        Err($crate::Error::$v(p, format!($($arg),+)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let p = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(p, err.to_string()))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let p = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(p, format!("{}: {}", format!($($arg),+), err)))
            }
        }
    }};
}
