use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::{fmt, io, slice};

/// A zero-initialized, page-aligned byte buffer to register as a memory
/// region.
///
/// The buffer never moves, so its address can be advertised to the peer.
pub struct Buffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the buffer exclusively owns its allocation.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    const ALIGN: usize = 4096;

    /// Allocate a zeroed buffer of `len` bytes.
    pub fn zeroed(len: usize) -> io::Result<Self> {
        let layout = Layout::from_size_align(len.max(1), Self::ALIGN)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        // SAFETY: `layout` has non-zero size.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;
        Ok(Self { ptr, layout })
    }

    /// Get the start address of the buffer.
    #[inline]
    pub fn addr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Get the length of the buffer.
    #[allow(clippy::len_without_is_empty)]
    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// View the buffer contents.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the allocation is valid and initialized for `len` bytes.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len()) }
    }

    /// Mutably view the buffer contents.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the allocation is valid and initialized for `len` bytes.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len()) }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with the same layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer<{:p}, {}B>", self.ptr, self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_and_aligned() {
        let mut buf = Buffer::zeroed(8192).unwrap();
        assert_eq!(buf.len(), 8192);
        assert_eq!(buf.addr() as usize % 4096, 0);
        assert!(buf.as_slice().iter().all(|&b| b == 0));

        buf.as_mut_slice()[..3].copy_from_slice(b"abc");
        assert_eq!(&buf.as_slice()[..4], b"abc\0");
    }
}
