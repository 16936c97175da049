//! Registered memory.

mod buffer;
mod perm;

pub use self::buffer::*;
pub use self::perm::*;

/// Size of the registered buffer: 10 MiB.
pub const MSG_SIZE: usize = 10 * 1024 * 1024;
