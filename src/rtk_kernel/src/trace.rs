//! Scheduler tracing, gated behind the `trace` feature (§4.I).
//!
//! [`ktrace!`] forwards to [`log::trace!`] when the feature is on and
//! compiles to nothing otherwise, so a size-constrained build that never
//! enables `trace` doesn't pay for the format strings or the call sites.
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {
        #[cfg(feature = "trace")]
        log::trace!($($arg)*);
    };
}
