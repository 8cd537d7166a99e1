//! Public API surface of the `rtk` real-time kernel.
//!
//! This crate defines the types a caller constructs requests with —
//! durations and instants (§3 "Monotonic clock"), task/object parameters
//! (§4.F, §6.1), and the error taxonomy (§7) — independent of any particular
//! kernel instantiation or hardware port. `rtk_kernel` consumes these types;
//! it does not redefine them.
#![no_std]

pub mod allocator;
pub mod error;
pub mod name;
pub mod params;
pub mod priority;
pub mod time;

pub use allocator::Allocator;
pub use error::{Error, ErrorKind};
pub use name::ObjectName;
pub use priority::Priority;
pub use time::{Duration, Instant, Timeout};
