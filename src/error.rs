//! Kernel-wide error codes.
//!
//! One errno namespace shared by the scheduler, process, VM and VFS layers,
//! used at every fallible entry point and surfaced directly at the syscall
//! boundary.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// Operation interrupted (cancellable sleep woken by cancellation).
    EINTR,
    /// No child processes (waitpid on a pid that names no child).
    ECHILD,
    /// Bad file descriptor.
    EBADF,
    /// Too many open files (fd table full).
    EMFILE,
    /// No such file or directory.
    ENOENT,
    /// Not a directory.
    ENOTDIR,
    /// Is a directory.
    EISDIR,
    /// File exists.
    EEXIST,
    /// Invalid argument.
    EINVAL,
    /// Out of memory.
    ENOMEM,
    /// Bad address (unresolvable page fault).
    EFAULT,
    /// No such device or address.
    ENXIO,
    /// Operation not supported.
    ENOTSUP,
    /// Filename too long.
    ENAMETOOLONG,
    /// Directory not empty.
    ENOTEMPTY,
    /// No space left on device.
    ENOSPC,
    /// Operation not permitted.
    EPERM,
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Errno::EINTR => "interrupted",
            Errno::ECHILD => "no child processes",
            Errno::EBADF => "bad file descriptor",
            Errno::EMFILE => "too many open files",
            Errno::ENOENT => "no such file or directory",
            Errno::ENOTDIR => "not a directory",
            Errno::EISDIR => "is a directory",
            Errno::EEXIST => "file exists",
            Errno::EINVAL => "invalid argument",
            Errno::ENOMEM => "out of memory",
            Errno::EFAULT => "bad address",
            Errno::ENXIO => "no such device or address",
            Errno::ENOTSUP => "operation not supported",
            Errno::ENAMETOOLONG => "filename too long",
            Errno::ENOTEMPTY => "directory not empty",
            Errno::ENOSPC => "no space left on device",
            Errno::EPERM => "operation not permitted",
        };
        write!(f, "{}", msg)
    }
}

pub type KResult<T> = Result<T, Errno>;
