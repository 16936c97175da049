//! RDMA provider capability.
//!
//! [`Verbs`] is everything the connection core asks of an RDMA provider.
//! Two providers exist: [`Ibverbs`] over libibverbs (feature `ibverbs`),
//! and [`SoftVerbs`], an in-process fabric that behaves like a pair of
//! RC-capable NICs and keeps resource accounting.

use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::{fmt, io, ptr};

use crate::error::Resource;
use crate::rdma::cq::Wc;
use crate::rdma::gid::Gid;
use crate::rdma::mr::Permission;
use crate::rdma::nic::PortAttr;
use crate::rdma::qp::{QpAttr, QpInitAttr};
use crate::rdma::type_alias::*;
use crate::rdma::wr::{RecvWr, SendWr};

#[cfg(feature = "ibverbs")]
mod ibverbs;
mod soft;

#[cfg(feature = "ibverbs")]
pub use self::ibverbs::Ibverbs;
pub use self::soft::*;

/// An RDMA verbs provider.
///
/// Handles returned by the provider are plain values; releasing them is the
/// caller's business. [`Owned`] ties a handle to its release function.
pub trait Verbs: Clone {
    type Device;
    type DeviceList: Deref<Target = [Self::Device]>;
    type Context;
    type Pd;
    type Cq;
    type Mr;
    type Qp;

    /// Enumerate RDMA devices. The list is freed on drop.
    fn device_list(&self) -> io::Result<Self::DeviceList>;

    /// Get the name of a device.
    fn device_name(&self, dev: &Self::Device) -> io::Result<String>;

    /// Open a device.
    fn open_device(&self, dev: &Self::Device) -> io::Result<Self::Context>;

    /// Close a device.
    fn close_device(&self, ctx: Self::Context) -> io::Result<()>;

    /// Query the attributes of a physical port.
    fn query_port(&self, ctx: &Self::Context, port: PortNum) -> io::Result<PortAttr>;

    /// Query one entry of a port's GID table.
    fn query_gid(&self, ctx: &Self::Context, port: PortNum, index: GidIndex) -> io::Result<Gid>;

    fn alloc_pd(&self, ctx: &Self::Context) -> io::Result<Self::Pd>;

    fn dealloc_pd(&self, pd: Self::Pd) -> io::Result<()>;

    /// Create a completion queue with at least `cqe` entries.
    fn create_cq(&self, ctx: &Self::Context, cqe: u32) -> io::Result<Self::Cq>;

    fn destroy_cq(&self, cq: Self::Cq) -> io::Result<()>;

    /// Register `len` bytes at `addr` as a memory region.
    ///
    /// # Safety
    ///
    /// The memory must stay valid and must not move until the region is
    /// deregistered.
    unsafe fn reg_mr(
        &self,
        pd: &Self::Pd,
        addr: *mut u8,
        len: usize,
        perm: Permission,
    ) -> io::Result<Self::Mr>;

    fn dereg_mr(&self, mr: Self::Mr) -> io::Result<()>;

    /// Get the local and remote keys of a memory region.
    fn mr_keys(&self, mr: &Self::Mr) -> (LKey, RKey);

    fn create_qp(
        &self,
        pd: &Self::Pd,
        send_cq: &Self::Cq,
        recv_cq: &Self::Cq,
        attr: &QpInitAttr,
    ) -> io::Result<Self::Qp>;

    fn destroy_qp(&self, qp: Self::Qp) -> io::Result<()>;

    fn qp_num(&self, qp: &Self::Qp) -> Qpn;

    /// Modify the fields of `attr` selected by `attr.mask`.
    fn modify_qp(&self, qp: &Self::Qp, attr: &QpAttr) -> io::Result<()>;

    fn post_send(&self, qp: &Self::Qp, wr: &SendWr) -> io::Result<()>;

    fn post_recv(&self, qp: &Self::Qp, wr: &RecvWr) -> io::Result<()>;

    /// Non-blockingly poll one work completion.
    fn poll_cq(&self, cq: &Self::Cq) -> io::Result<Option<Wc>>;
}

/// A provider handle that is released exactly once: either explicitly with
/// [`Owned::release`], or on drop, where failures are only logged.
pub(crate) struct Owned<V, T> {
    verbs: V,
    handle: ManuallyDrop<T>,
    resource: Resource,
    release: fn(&V, T) -> io::Result<()>,
}

impl<V, T> Owned<V, T> {
    pub fn new(verbs: V, handle: T, resource: Resource, release: fn(&V, T) -> io::Result<()>) -> Self {
        Self {
            verbs,
            handle: ManuallyDrop::new(handle),
            resource,
            release,
        }
    }

    /// Release the handle and report the outcome.
    pub fn release(self) -> io::Result<()> {
        let mut this = ManuallyDrop::new(self);

        // SAFETY: `this` is never dropped, so each field is moved out once.
        let (verbs, handle) = unsafe {
            (
                ptr::read(&this.verbs),
                ManuallyDrop::take(&mut this.handle),
            )
        };
        (this.release)(&verbs, handle)
    }
}

impl<V, T> Deref for Owned<V, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.handle
    }
}

impl<V, T> Drop for Owned<V, T> {
    fn drop(&mut self) {
        // SAFETY: drop runs once, and the handle is not touched afterwards.
        let handle = unsafe { ManuallyDrop::take(&mut self.handle) };
        if let Err(e) = (self.release)(&self.verbs, handle) {
            log::error!("failed to release {} on drop: {}", self.resource, e);
        }
    }
}

impl<V, T: fmt::Debug> fmt::Debug for Owned<V, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&*self.handle).finish()
    }
}
