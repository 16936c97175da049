//! Provide a `select` method for [`bool`] and [`Option`].

/// Implements a `select` method for primitive types that consumes two inputs
/// and returns one of them based on the value of the selector.
// Carbon language seems good at expressing this kind of thing :)
// so let's just borrow this from it!
pub(crate) trait Select {
    /// Selects one of two values based on the value of the selector.
    fn select_val<T>(&self, a: T, b: T) -> T;

    /// Selects one of two values, lazily evaluated, based on the value of the
    /// selector.
    #[cfg(feature = "ibverbs")]
    fn select<T>(&self, a: impl FnOnce() -> T, b: impl FnOnce() -> T) -> T;
}

impl Select for bool {
    #[inline(always)]
    fn select_val<T>(&self, a: T, b: T) -> T {
        if *self {
            a
        } else {
            b
        }
    }

    #[cfg(feature = "ibverbs")]
    #[inline(always)]
    fn select<T>(&self, a: impl FnOnce() -> T, b: impl FnOnce() -> T) -> T {
        if *self {
            a()
        } else {
            b()
        }
    }
}

impl<T> Select for Option<T> {
    #[inline(always)]
    fn select_val<U>(&self, a: U, b: U) -> U {
        self.is_some().select_val(a, b)
    }

    #[cfg(feature = "ibverbs")]
    #[inline(always)]
    fn select<U>(&self, a: impl FnOnce() -> U, b: impl FnOnce() -> U) -> U {
        self.is_some().select(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_val_follows_selector() {
        assert_eq!(true.select_val(1, 2), 1);
        assert_eq!(None::<u8>.select_val("some", "none"), "none");
    }

    #[cfg(feature = "ibverbs")]
    #[test]
    fn select_is_lazy() {
        let picked = true.select(|| 1, || unreachable!());
        assert_eq!(picked, 1);
    }
}
