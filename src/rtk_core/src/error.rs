//! Error taxonomy (§7).
use core::fmt;

/// The flat, exhaustive error enumeration from §7.
///
/// Every narrow, per-operation error type in `rtk_kernel` converts into this
/// one via `From`, so generic error handling (logging, a panic handler) can
/// treat every kernel call uniformly while the typed call sites still only
/// see the outcomes they can actually produce.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(i8)]
pub enum ErrorKind {
    Ok = 0,
    Generic = -1,
    Timeout = -2,
    OutOfMemory = -3,
    InvalidParam = -4,
    Busy = -5,
    Deadlock = -6,
    StackOverflow = -7,
    MemoryCorruption = -8,
    NotImplemented = -9,
    Deleted = -10,
    NotFound = -11,
    AlreadyExists = -12,
    Corrupted = -13,
    InvalidContext = -14,
    Overflow = -15,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Generic => "generic error",
            Self::Timeout => "operation timed out",
            Self::OutOfMemory => "out of memory",
            Self::InvalidParam => "invalid parameter",
            Self::Busy => "object busy",
            Self::Deadlock => "deadlock would occur",
            Self::StackOverflow => "stack overflow detected",
            Self::MemoryCorruption => "memory corruption detected",
            Self::NotImplemented => "not implemented",
            Self::Deleted => "object deleted",
            Self::NotFound => "object not found",
            Self::AlreadyExists => "object already exists",
            Self::Corrupted => "object state corrupted",
            Self::InvalidContext => "invalid calling context",
            Self::Overflow => "value would overflow",
        };
        f.write_str(s)
    }
}

/// A thin newtype so `rtk_kernel` can attach `core::error::Error` (once
/// stabilized for `no_std`) without re-deriving it on every narrow error.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Error(pub ErrorKind);

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Declares a narrow per-operation error type (§4.J) that only admits a
/// subset of [`ErrorKind`], plus a lossless `From<Narrow> for ErrorKind`.
///
/// ```ignore
/// narrow_error! {
///     /// Returned by `Mutex::lock`.
///     pub enum LockMutexTimeoutError {
///         Timeout,
///         Deleted,
///         InvalidContext,
///     }
/// }
/// ```
#[macro_export]
macro_rules! narrow_error {
    (
        $( #[$meta:meta] )*
        $vis:vis enum $Name:ident {
            $( $Variant:ident ),* $(,)?
        }
    ) => {
        $( #[$meta] )*
        #[derive(Clone, Copy, PartialEq, Eq, Debug)]
        $vis enum $Name {
            $( $Variant ),*
        }

        impl From<$Name> for $crate::error::ErrorKind {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant ),*
                }
            }
        }

        impl core::fmt::Display for $Name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                $crate::error::ErrorKind::from(*self).fmt(f)
            }
        }
    };
}
