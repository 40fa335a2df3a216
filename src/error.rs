//! Crate-wide error type.
//!
//! Every layer returns `Result<T, Error>` (or a plain `Option<T>` where the
//! historical C code just returned a sentinel) and never unwinds across a
//! layer boundary: the inode/FAT layer rolls back its own partial chains on
//! failure, and the fault handler is the single place a resource-exhaustion
//! error turns into a killed process.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No free cluster, swap slot, or frame was available.
    NoSpace,
    /// A user-supplied argument violated a precondition (bad VA, stdin/stdout
    /// passed to mmap, unaligned offset, ...). The caller kills the process.
    InvalidArgument,
    /// The underlying block device reported a read/write failure.
    Io,
    /// A symlink chain exceeded `param::MAX_SYMLINK_FOLLOW`.
    SymlinkLoop,
    /// The entry already exists (duplicate SPT insert, name collision, ...).
    AlreadyExists,
    /// The entry does not exist (SPT miss treated as an error at this layer).
    NotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NoSpace => "no space left",
            Error::InvalidArgument => "invalid argument",
            Error::Io => "I/O error",
            Error::SymlinkLoop => "too many levels of symbolic links",
            Error::AlreadyExists => "already exists",
            Error::NotFound => "not found",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
