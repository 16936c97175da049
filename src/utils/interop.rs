use std::io;

#[cfg(feature = "ibverbs")]
use super::select::*;

/// Converts a C return value to a Rust `Result`.
#[cfg(feature = "ibverbs")]
#[inline(always)]
pub(crate) fn from_c_ret(ret: i32) -> io::Result<()> {
    (ret == 0).select(|| Ok(()), || from_c_err(ret))
}

/// Converts a C return value to a Rust `Result`, attaching a human-readable
/// explanation for known error codes.
#[cfg(feature = "ibverbs")]
#[inline(always)]
pub(crate) fn from_c_ret_explained(
    ret: i32,
    f: impl FnOnce(i32) -> Option<&'static str>,
) -> io::Result<()> {
    if ret == 0 {
        return Ok(());
    }
    match f(ret) {
        Some(msg) => Err(io::Error::new(
            io::Error::from_raw_os_error(ret).kind(),
            msg,
        )),
        None => from_c_err(ret),
    }
}

/// Converts a non-zero C return value to a Rust `Result`.
///
/// libibverbs reports errors either as a positive errno or as its negation,
/// depending on the entry point.
#[inline(always)]
pub(crate) fn from_c_err<T>(code: i32) -> io::Result<T> {
    Err(io::Error::from_raw_os_error(code.abs()))
}
