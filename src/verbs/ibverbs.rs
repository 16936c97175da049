//! Provider backed by `libibverbs`.

use std::ffi::CStr;
use std::mem::{self, MaybeUninit};
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::{io, slice};

use super::Verbs;
use crate::bindings::*;
use crate::rdma::cq::{Wc, WcOpcode, WcStatus};
use crate::rdma::gid::Gid;
use crate::rdma::mr::Permission;
use crate::rdma::nic::{PortAttr, PortLinkLayer, PortMtu, PortState};
use crate::rdma::qp::{QpAttr, QpInitAttr};
use crate::rdma::type_alias::*;
use crate::rdma::wr::{RecvWr, SendWr, Sge};
use crate::utils::interop::*;

/// Wrapper for `*mut ibv_device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct IbvDevice(NonNull<ibv_device>);

impl_ibv_wrapper_traits!(ibv_device, IbvDevice);

/// Wrapper for `*mut *mut ibv_device`, freed on drop.
pub struct IbvDeviceList {
    list: NonNull<*mut ibv_device>,
    len: usize,
}

impl IbvDeviceList {
    fn new() -> io::Result<Self> {
        let mut n = 0i32;

        // SAFETY: FFI.
        let list = unsafe { ibv_get_device_list(&mut n) };
        let list = NonNull::new(list).ok_or_else(io::Error::last_os_error)?;
        Ok(Self {
            list,
            len: n.max(0) as usize,
        })
    }
}

impl Deref for IbvDeviceList {
    type Target = [IbvDevice];

    fn deref(&self) -> &[IbvDevice] {
        // SAFETY:
        // - `IbvDevice` is a transparent wrapper of `NonNull<ibv_device>`.
        // - `ibv_get_device_list` returns `len` non-null device pointers.
        unsafe { slice::from_raw_parts(self.list.as_ptr().cast(), self.len) }
    }
}

impl Drop for IbvDeviceList {
    fn drop(&mut self) {
        // SAFETY: FFI.
        unsafe { ibv_free_device_list(self.list.as_ptr()) };
    }
}

/// Wrapper for `*mut ibv_context`.
#[derive(Debug)]
#[repr(transparent)]
pub struct IbvContext(NonNull<ibv_context>);

impl_ibv_wrapper_traits!(ibv_context, IbvContext);

/// Wrapper for `*mut ibv_pd`.
#[derive(Debug)]
#[repr(transparent)]
pub struct IbvPd(NonNull<ibv_pd>);

impl_ibv_wrapper_traits!(ibv_pd, IbvPd);

/// Wrapper for `*mut ibv_cq`.
#[derive(Debug)]
#[repr(transparent)]
pub struct IbvCq(NonNull<ibv_cq>);

impl_ibv_wrapper_traits!(ibv_cq, IbvCq);

/// Wrapper for `*mut ibv_mr`.
#[derive(Debug)]
#[repr(transparent)]
pub struct IbvMr(NonNull<ibv_mr>);

impl_ibv_wrapper_traits!(ibv_mr, IbvMr);

/// Wrapper for `*mut ibv_qp`.
#[derive(Debug)]
#[repr(transparent)]
pub struct IbvQp(NonNull<ibv_qp>);

impl_ibv_wrapper_traits!(ibv_qp, IbvQp);

/// The `libibverbs` provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ibverbs;

impl Ibverbs {
    /// Explain [`ibv_post_recv`] errors.
    fn recv_err_explanation(ret: i32) -> Option<&'static str> {
        match ret {
            libc::EINVAL => Some("invalid work request"),
            libc::ENOMEM => {
                Some("recv queue is full, or not enough resources to complete this operation")
            }
            libc::EFAULT => Some("invalid QP"),
            _ => None,
        }
    }

    /// Explain [`ibv_post_send`] errors.
    fn send_err_explanation(ret: i32) -> Option<&'static str> {
        match ret {
            libc::EINVAL => Some("invalid work request"),
            libc::ENOMEM => {
                Some("send queue is full, or not enough resources to complete this operation")
            }
            libc::EFAULT => Some("invalid QP"),
            _ => None,
        }
    }
}

fn to_ibv_sge(sge: &Sge) -> ibv_sge {
    ibv_sge {
        addr: sge.addr,
        length: sge.length,
        lkey: sge.lkey,
    }
}

impl Verbs for Ibverbs {
    type Device = IbvDevice;
    type DeviceList = IbvDeviceList;
    type Context = IbvContext;
    type Pd = IbvPd;
    type Cq = IbvCq;
    type Mr = IbvMr;
    type Qp = IbvQp;

    fn device_list(&self) -> io::Result<IbvDeviceList> {
        IbvDeviceList::new()
    }

    fn device_name(&self, dev: &IbvDevice) -> io::Result<String> {
        // SAFETY: FFI.
        let name = unsafe { ibv_get_device_name(dev.as_ptr()) };
        if name.is_null() {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: `ibv_get_device_name` returns a pointer to a valid C string.
        let name = unsafe { CStr::from_ptr(name) };
        name.to_str()
            .map(ToOwned::to_owned)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn open_device(&self, dev: &IbvDevice) -> io::Result<IbvContext> {
        // SAFETY: FFI.
        let ctx = unsafe { ibv_open_device(dev.as_ptr()) };
        NonNull::new(ctx)
            .map(IbvContext)
            .ok_or_else(io::Error::last_os_error)
    }

    fn close_device(&self, ctx: IbvContext) -> io::Result<()> {
        // SAFETY: FFI, and `ctx` is consumed.
        from_c_ret(unsafe { ibv_close_device(ctx.as_ptr()) })
    }

    fn query_port(&self, ctx: &IbvContext, port: PortNum) -> io::Result<PortAttr> {
        // SAFETY: POD type.
        let mut attr = unsafe { mem::zeroed::<ibv_port_attr>() };

        // SAFETY: FFI.
        let ret = unsafe { ___ibv_query_port(ctx.as_ptr(), port, &mut attr) };
        from_c_ret(ret)?;

        Ok(PortAttr {
            state: PortState::from(attr.state),
            max_mtu: PortMtu::try_from(attr.max_mtu).unwrap_or_default(),
            active_mtu: PortMtu::try_from(attr.active_mtu).unwrap_or_default(),
            lid: attr.lid,
            link_layer: match attr.link_layer as i32 {
                IBV_LINK_LAYER_ETHERNET => PortLinkLayer::Ethernet,
                _ => PortLinkLayer::Infiniband,
            },
            gid_tbl_len: attr.gid_tbl_len,
        })
    }

    fn query_gid(&self, ctx: &IbvContext, port: PortNum, index: GidIndex) -> io::Result<Gid> {
        let mut gid = MaybeUninit::<ibv_gid>::uninit();

        // SAFETY: FFI.
        let ret = unsafe { ibv_query_gid(ctx.as_ptr(), port, index as i32, gid.as_mut_ptr()) };
        from_c_ret(ret)?;

        // SAFETY: `ibv_query_gid` returning 0 means `gid` is initialized.
        Ok(Gid::from(unsafe { gid.assume_init() }))
    }

    fn alloc_pd(&self, ctx: &IbvContext) -> io::Result<IbvPd> {
        // SAFETY: FFI.
        let pd = unsafe { ibv_alloc_pd(ctx.as_ptr()) };
        NonNull::new(pd).map(IbvPd).ok_or_else(io::Error::last_os_error)
    }

    fn dealloc_pd(&self, pd: IbvPd) -> io::Result<()> {
        // SAFETY: FFI, and `pd` is consumed.
        from_c_ret(unsafe { ibv_dealloc_pd(pd.as_ptr()) })
    }

    fn create_cq(&self, ctx: &IbvContext, cqe: u32) -> io::Result<IbvCq> {
        // SAFETY: FFI.
        let cq = unsafe {
            ibv_create_cq(
                ctx.as_ptr(),
                cqe as i32,
                ptr::null_mut(),
                ptr::null_mut(),
                0,
            )
        };
        NonNull::new(cq).map(IbvCq).ok_or_else(io::Error::last_os_error)
    }

    fn destroy_cq(&self, cq: IbvCq) -> io::Result<()> {
        // SAFETY: FFI, and `cq` is consumed.
        from_c_ret(unsafe { ibv_destroy_cq(cq.as_ptr()) })
    }

    unsafe fn reg_mr(
        &self,
        pd: &IbvPd,
        addr: *mut u8,
        len: usize,
        perm: Permission,
    ) -> io::Result<IbvMr> {
        let mr = ibv_reg_mr(pd.as_ptr(), addr.cast(), len, perm.bits() as i32);
        NonNull::new(mr).map(IbvMr).ok_or_else(io::Error::last_os_error)
    }

    fn dereg_mr(&self, mr: IbvMr) -> io::Result<()> {
        // SAFETY: FFI, and `mr` is consumed.
        from_c_ret(unsafe { ibv_dereg_mr(mr.as_ptr()) })
    }

    fn mr_keys(&self, mr: &IbvMr) -> (LKey, RKey) {
        // SAFETY: the `ibv_mr` instance is valid.
        unsafe { ((*mr.as_ptr()).lkey, (*mr.as_ptr()).rkey) }
    }

    fn create_qp(
        &self,
        pd: &IbvPd,
        send_cq: &IbvCq,
        recv_cq: &IbvCq,
        attr: &QpInitAttr,
    ) -> io::Result<IbvQp> {
        let mut init_attr = ibv_qp_init_attr {
            send_cq: send_cq.as_ptr(),
            recv_cq: recv_cq.as_ptr(),
            cap: ibv_qp_cap {
                max_send_wr: attr.caps.max_send_wr,
                max_recv_wr: attr.caps.max_recv_wr,
                max_send_sge: attr.caps.max_send_sge,
                max_recv_sge: attr.caps.max_recv_sge,
                max_inline_data: attr.caps.max_inline_data,
            },
            qp_type: u32::from(attr.qp_type),
            sq_sig_all: attr.sq_sig_all as i32,
            // SAFETY: POD type.
            ..unsafe { mem::zeroed() }
        };

        // SAFETY: FFI.
        let qp = unsafe { ibv_create_qp(pd.as_ptr(), &mut init_attr) };
        NonNull::new(qp).map(IbvQp).ok_or_else(io::Error::last_os_error)
    }

    fn destroy_qp(&self, qp: IbvQp) -> io::Result<()> {
        // SAFETY: FFI, and `qp` is consumed.
        from_c_ret(unsafe { ibv_destroy_qp(qp.as_ptr()) })
    }

    fn qp_num(&self, qp: &IbvQp) -> Qpn {
        // SAFETY: `qp` points to a valid `ibv_qp` instance.
        unsafe { (*qp.as_ptr()).qp_num }
    }

    fn modify_qp(&self, qp: &IbvQp, attr: &QpAttr) -> io::Result<()> {
        // SAFETY: POD type.
        let mut raw = unsafe { mem::zeroed::<ibv_qp_attr>() };
        raw.qp_state = attr.qp_state as u32;
        raw.pkey_index = attr.pkey_index;
        raw.port_num = attr.port_num;
        raw.qp_access_flags = attr.qp_access_flags.bits();

        raw.path_mtu = attr.path_mtu as u32;
        raw.dest_qp_num = attr.dest_qp_num;
        raw.rq_psn = attr.rq_psn;
        raw.max_dest_rd_atomic = attr.max_dest_rd_atomic;
        raw.min_rnr_timer = attr.min_rnr_timer;

        let ah = &attr.ah_attr;
        raw.ah_attr.dlid = ah.dlid;
        raw.ah_attr.sl = ah.sl;
        raw.ah_attr.src_path_bits = ah.src_path_bits;
        raw.ah_attr.port_num = ah.port_num;
        if let Some(grh) = &ah.grh {
            raw.ah_attr.is_global = 1;
            raw.ah_attr.grh.dgid = grh.dgid.into();
            raw.ah_attr.grh.flow_label = grh.flow_label;
            raw.ah_attr.grh.sgid_index = grh.sgid_index;
            raw.ah_attr.grh.hop_limit = grh.hop_limit;
            raw.ah_attr.grh.traffic_class = grh.traffic_class;
        }

        raw.timeout = attr.timeout;
        raw.retry_cnt = attr.retry_cnt;
        raw.rnr_retry = attr.rnr_retry;
        raw.sq_psn = attr.sq_psn;
        raw.max_rd_atomic = attr.max_rd_atomic;

        // SAFETY: FFI.
        let ret = unsafe { ibv_modify_qp(qp.as_ptr(), &mut raw, attr.mask.bits() as i32) };
        from_c_ret(ret)
    }

    fn post_send(&self, qp: &IbvQp, wr: &SendWr) -> io::Result<()> {
        let mut sge = to_ibv_sge(&wr.sge);

        // SAFETY: POD type.
        let mut raw = unsafe { mem::zeroed::<ibv_send_wr>() };
        raw.wr_id = wr.wr_id;
        raw.sg_list = &mut sge;
        raw.num_sge = 1;
        raw.opcode = wr.opcode as u32;
        if wr.signaled {
            raw.send_flags = ibv_send_flags::IBV_SEND_SIGNALED.0;
        }
        if let Some(remote) = &wr.remote {
            raw.wr.rdma = rdma_t {
                remote_addr: remote.addr,
                rkey: remote.rkey,
            };
        }

        let mut bad_wr = ptr::null_mut();
        // SAFETY: FFI, and `sge` outlives the call.
        let ret = unsafe { ibv_post_send(qp.as_ptr(), &mut raw, &mut bad_wr) };
        from_c_ret_explained(ret, Self::send_err_explanation)
    }

    fn post_recv(&self, qp: &IbvQp, wr: &RecvWr) -> io::Result<()> {
        let mut sge = to_ibv_sge(&wr.sge);
        let mut raw = ibv_recv_wr {
            wr_id: wr.wr_id,
            next: ptr::null_mut(),
            sg_list: &mut sge,
            num_sge: 1,
        };

        let mut bad_wr = ptr::null_mut();
        // SAFETY: FFI, and `sge` outlives the call.
        let ret = unsafe { ibv_post_recv(qp.as_ptr(), &mut raw, &mut bad_wr) };
        from_c_ret_explained(ret, Self::recv_err_explanation)
    }

    fn poll_cq(&self, cq: &IbvCq) -> io::Result<Option<Wc>> {
        let mut wc = MaybeUninit::<ibv_wc>::uninit();

        // SAFETY: FFI.
        let num = unsafe { ibv_poll_cq(cq.as_ptr(), 1, wc.as_mut_ptr()) };
        if num < 0 {
            return from_c_err(num);
        }
        if num == 0 {
            return Ok(None);
        }

        // SAFETY: `ibv_poll_cq` returning 1 means `wc` is initialized.
        let wc = unsafe { wc.assume_init() };
        Ok(Some(Wc {
            wr_id: wc.wr_id,
            status: WcStatus::from(wc.status),
            // Opcode is undefined on failed completions.
            opcode: WcOpcode::try_from(wc.opcode).unwrap_or(WcOpcode::Send),
            vendor_err: wc.vendor_err,
            byte_len: wc.byte_len,
            qp_num: wc.qp_num,
        }))
    }
}
