/// Boilerplate trait implementations for raw libibverbs handle wrappers.
#[cfg(feature = "ibverbs")]
#[macro_use]
pub(crate) mod boilerplate;

/// Provide interoperability with C return values.
pub(crate) mod interop;

/// Provide a `select` method for [`bool`] and [`Option`].
pub(crate) mod select;
