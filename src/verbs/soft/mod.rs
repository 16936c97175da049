//! In-process RDMA fabric.
//!
//! A [`SoftFabric`] connects any number of hosts, each seeing its own set of
//! [`SoftDevice`]s through a [`SoftVerbs`] provider. Queue pairs follow the
//! verbs state machine, data moves between registered buffers when work
//! requests are posted, and completions are delivered to the CQs involved.
//! Every host keeps an ordered log of acquired and released handles and can
//! be told to fail its next call of a given operation.

mod accounting;
mod fabric;

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use self::accounting::{Event, Live, SoftOp};
use self::fabric::Fabric;
pub use self::fabric::SoftDevice;
use super::Verbs;
use crate::rdma::cq::Wc;
use crate::rdma::gid::Gid;
use crate::rdma::mr::Permission;
use crate::rdma::nic::PortAttr;
use crate::rdma::qp::{QpAttr, QpInitAttr, QpState};
use crate::rdma::type_alias::*;
use crate::rdma::wr::{RecvWr, SendWr};

/// An in-process RDMA fabric shared by several hosts.
#[derive(Clone, Default)]
pub struct SoftFabric {
    inner: Arc<Mutex<Fabric>>,
}

impl SoftFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a host with the given devices and return its provider.
    pub fn add_host(&self, devices: impl IntoIterator<Item = SoftDevice>) -> SoftVerbs {
        let host = lock(&self.inner).add_host(devices.into_iter().collect());
        SoftVerbs {
            fabric: self.inner.clone(),
            host,
        }
    }
}

fn lock(fabric: &Mutex<Fabric>) -> MutexGuard<'_, Fabric> {
    fabric.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The view of one host on a [`SoftFabric`].
#[derive(Clone)]
pub struct SoftVerbs {
    fabric: Arc<Mutex<Fabric>>,
    host: usize,
}

impl SoftVerbs {
    fn fabric(&self) -> MutexGuard<'_, Fabric> {
        lock(&self.fabric)
    }

    /// Lock the fabric and fire the fault armed for `op`, if any.
    fn enter(&self, op: SoftOp) -> io::Result<MutexGuard<'_, Fabric>> {
        let mut fabric = self.fabric();
        fabric.ledger(self.host).check(op)?;
        Ok(fabric)
    }

    /// Make the next call of `op` on this host fail with `errno`.
    pub fn fail_next(&self, op: SoftOp, errno: i32) {
        self.fabric().ledger(self.host).arm(op, errno);
    }

    /// Count the live handles of this host.
    pub fn live(&self) -> Live {
        self.fabric().live(self.host)
    }

    /// Get the ordered acquire and release log of this host.
    pub fn events(&self) -> Vec<Event> {
        self.fabric().ledger(self.host).events().to_vec()
    }

    /// Get the current state of a QP, as the fabric sees it.
    pub fn qp_state(&self, qp: &SoftQp) -> Option<QpState> {
        self.fabric().qp_state(qp.0)
    }
}

/// Device handle of the software fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftDeviceId(usize);

/// Device context handle.
#[derive(Debug)]
pub struct SoftContext(u32);

/// Protection domain handle.
#[derive(Debug)]
pub struct SoftPd(u32);

/// Completion queue handle.
#[derive(Debug)]
pub struct SoftCq(u32);

/// Memory region handle.
#[derive(Debug)]
pub struct SoftMr {
    id: u32,
    lkey: LKey,
    rkey: RKey,
}

/// Queue pair handle.
#[derive(Debug)]
pub struct SoftQp(Qpn);

impl Verbs for SoftVerbs {
    type Device = SoftDeviceId;
    type DeviceList = Vec<SoftDeviceId>;
    type Context = SoftContext;
    type Pd = SoftPd;
    type Cq = SoftCq;
    type Mr = SoftMr;
    type Qp = SoftQp;

    fn device_list(&self) -> io::Result<Self::DeviceList> {
        let fabric = self.enter(SoftOp::DeviceList)?;
        Ok(fabric
            .device_list(self.host)
            .into_iter()
            .map(SoftDeviceId)
            .collect())
    }

    fn device_name(&self, dev: &SoftDeviceId) -> io::Result<String> {
        self.fabric().device_name(dev.0)
    }

    fn open_device(&self, dev: &SoftDeviceId) -> io::Result<SoftContext> {
        self.enter(SoftOp::OpenDevice)?
            .open_device(self.host, dev.0)
            .map(SoftContext)
    }

    fn close_device(&self, ctx: SoftContext) -> io::Result<()> {
        self.enter(SoftOp::CloseDevice)?.close_device(ctx.0)
    }

    fn query_port(&self, ctx: &SoftContext, port: PortNum) -> io::Result<PortAttr> {
        self.enter(SoftOp::QueryPort)?.query_port(ctx.0, port)
    }

    fn query_gid(&self, ctx: &SoftContext, port: PortNum, index: GidIndex) -> io::Result<Gid> {
        self.enter(SoftOp::QueryGid)?.query_gid(ctx.0, port, index)
    }

    fn alloc_pd(&self, ctx: &SoftContext) -> io::Result<SoftPd> {
        self.enter(SoftOp::AllocPd)?.alloc_pd(ctx.0).map(SoftPd)
    }

    fn dealloc_pd(&self, pd: SoftPd) -> io::Result<()> {
        self.enter(SoftOp::DeallocPd)?.dealloc_pd(pd.0)
    }

    fn create_cq(&self, ctx: &SoftContext, cqe: u32) -> io::Result<SoftCq> {
        self.enter(SoftOp::CreateCq)?.create_cq(ctx.0, cqe).map(SoftCq)
    }

    fn destroy_cq(&self, cq: SoftCq) -> io::Result<()> {
        self.enter(SoftOp::DestroyCq)?.destroy_cq(cq.0)
    }

    unsafe fn reg_mr(
        &self,
        pd: &SoftPd,
        addr: *mut u8,
        len: usize,
        perm: Permission,
    ) -> io::Result<SoftMr> {
        let (id, lkey, rkey) = self.enter(SoftOp::RegMr)?.reg_mr(pd.0, addr, len, perm)?;
        Ok(SoftMr { id, lkey, rkey })
    }

    fn dereg_mr(&self, mr: SoftMr) -> io::Result<()> {
        self.enter(SoftOp::DeregMr)?.dereg_mr(mr.id)
    }

    fn mr_keys(&self, mr: &SoftMr) -> (LKey, RKey) {
        (mr.lkey, mr.rkey)
    }

    fn create_qp(
        &self,
        pd: &SoftPd,
        send_cq: &SoftCq,
        recv_cq: &SoftCq,
        attr: &QpInitAttr,
    ) -> io::Result<SoftQp> {
        self.enter(SoftOp::CreateQp)?
            .create_qp(pd.0, send_cq.0, recv_cq.0, attr)
            .map(SoftQp)
    }

    fn destroy_qp(&self, qp: SoftQp) -> io::Result<()> {
        self.enter(SoftOp::DestroyQp)?.destroy_qp(qp.0)
    }

    fn qp_num(&self, qp: &SoftQp) -> Qpn {
        qp.0
    }

    fn modify_qp(&self, qp: &SoftQp, attr: &QpAttr) -> io::Result<()> {
        self.enter(SoftOp::ModifyQp)?.modify_qp(qp.0, attr)
    }

    fn post_send(&self, qp: &SoftQp, wr: &SendWr) -> io::Result<()> {
        self.enter(SoftOp::PostSend)?.post_send(qp.0, wr)
    }

    fn post_recv(&self, qp: &SoftQp, wr: &RecvWr) -> io::Result<()> {
        self.enter(SoftOp::PostRecv)?.post_recv(qp.0, wr)
    }

    fn poll_cq(&self, cq: &SoftCq) -> io::Result<Option<Wc>> {
        self.enter(SoftOp::PollCq)?.poll_cq(cq.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctrl::ConnectionParams;
    use crate::error::Resource;
    use crate::rdma::cq::{WcOpcode, WcStatus};
    use crate::rdma::mr::Buffer;
    use crate::rdma::qp::QpCaps;
    use crate::rdma::wr::{RemoteAddr, Sge, WrOpcode};

    /// Raw handles of one side, built without the resource set.
    struct Side {
        verbs: SoftVerbs,
        ctx: SoftContext,
        pd: SoftPd,
        cq: SoftCq,
        buf: Buffer,
        mr: SoftMr,
        qp: SoftQp,
    }

    impl Side {
        fn new(verbs: SoftVerbs, perm: Permission) -> Self {
            let devs = verbs.device_list().unwrap();
            let ctx = verbs.open_device(&devs[0]).unwrap();
            let pd = verbs.alloc_pd(&ctx).unwrap();
            let cq = verbs.create_cq(&ctx, 4).unwrap();
            let mut buf = Buffer::zeroed(4096).unwrap();
            let mr = unsafe { verbs.reg_mr(&pd, buf.as_mut_slice().as_mut_ptr(), 4096, perm) }
                .unwrap();
            let qp = verbs
                .create_qp(&pd, &cq, &cq, &QpInitAttr::rc_signal_all(QpCaps::default()))
                .unwrap();
            Side { verbs, ctx, pd, cq, buf, mr, qp }
        }

        fn params(&self, gid_index: Option<GidIndex>) -> ConnectionParams {
            let port = self.verbs.query_port(&self.ctx, 1).unwrap();
            ConnectionParams {
                addr: self.buf.addr() as u64,
                rkey: self.mr.rkey,
                qp_num: self.qp.0,
                lid: port.lid,
                gid: gid_index
                    .map(|i| self.verbs.query_gid(&self.ctx, 1, i).unwrap())
                    .unwrap_or_default(),
            }
        }

        fn sge(&self, len: u32) -> Sge {
            Sge {
                addr: self.buf.addr() as u64,
                length: len,
                lkey: self.mr.lkey,
            }
        }

        fn bring_up(&self, remote: &ConnectionParams, gid_index: Option<GidIndex>) {
            let v = &self.verbs;
            v.modify_qp(&self.qp, &QpAttr::reset_to_init(1)).unwrap();
            v.modify_qp(&self.qp, &QpAttr::init_to_rtr(1, gid_index, remote))
                .unwrap();
            v.modify_qp(&self.qp, &QpAttr::rtr_to_rts()).unwrap();
        }

        fn teardown(self) {
            let v = self.verbs;
            v.destroy_qp(self.qp).unwrap();
            v.dereg_mr(self.mr).unwrap();
            drop(self.buf);
            v.destroy_cq(self.cq).unwrap();
            v.dealloc_pd(self.pd).unwrap();
            v.close_device(self.ctx).unwrap();
        }
    }

    fn pair(devices: fn(&'static str) -> SoftDevice, gid_index: Option<GidIndex>) -> (Side, Side) {
        let fabric = SoftFabric::new();
        let a = Side::new(fabric.add_host([devices("soft_0")]), Permission::default());
        let b = Side::new(fabric.add_host([devices("soft_0")]), Permission::default());
        let (pa, pb) = (a.params(gid_index), b.params(gid_index));
        a.bring_up(&pb, gid_index);
        b.bring_up(&pa, gid_index);
        (a, b)
    }

    #[test]
    fn send_consumes_posted_receive() {
        let (mut a, b) = pair(SoftDevice::roce, Some(1));
        b.verbs
            .post_recv(&b.qp, &RecvWr { wr_id: 7, sge: b.sge(4096) })
            .unwrap();

        a.buf.as_mut_slice()[..6].copy_from_slice(b"HELLO\0");
        let wr = SendWr {
            wr_id: 1,
            opcode: WrOpcode::Send,
            sge: a.sge(4096),
            signaled: false,
            remote: None,
        };
        a.verbs.post_send(&a.qp, &wr).unwrap();

        let wc = a.verbs.poll_cq(&a.cq).unwrap().unwrap();
        assert_eq!((wc.status(), wc.opcode()), (WcStatus::Success, WcOpcode::Send));
        let wc = b.verbs.poll_cq(&b.cq).unwrap().unwrap();
        assert_eq!((wc.wr_id(), wc.opcode(), wc.bytes()), (7, WcOpcode::Recv, 4096));
        assert_eq!(&b.buf.as_slice()[..6], b"HELLO\0");

        a.teardown();
        b.teardown();
    }

    #[test]
    fn send_without_receive_exhausts_rnr_retries() {
        let (a, b) = pair(SoftDevice::infiniband, None);
        let wr = SendWr {
            wr_id: 0,
            opcode: WrOpcode::Send,
            sge: a.sge(16),
            signaled: true,
            remote: None,
        };
        a.verbs.post_send(&a.qp, &wr).unwrap();

        let wc = a.verbs.poll_cq(&a.cq).unwrap().unwrap();
        assert_eq!(wc.status(), WcStatus::RnrRetryExcErr);
        assert_ne!(wc.vendor_err(), 0);
        assert_eq!(a.verbs.qp_state(&a.qp), Some(QpState::Error));
        assert!(b.verbs.poll_cq(&b.cq).unwrap().is_none());
    }

    #[test]
    fn rdma_requires_matching_rkey() {
        let (a, b) = pair(SoftDevice::roce, Some(0));
        let mut wr = SendWr {
            wr_id: 0,
            opcode: WrOpcode::RdmaWrite,
            sge: a.sge(64),
            signaled: true,
            remote: Some(RemoteAddr {
                addr: b.buf.addr() as u64,
                rkey: b.mr.rkey ^ 1,
            }),
        };
        a.verbs.post_send(&a.qp, &wr).unwrap();
        let wc = a.verbs.poll_cq(&a.cq).unwrap().unwrap();
        assert_eq!(wc.status(), WcStatus::RemAccessErr);

        // The QP is in error state now: later requests are flushed.
        wr.remote = Some(RemoteAddr {
            addr: b.buf.addr() as u64,
            rkey: b.mr.rkey,
        });
        a.verbs.post_send(&a.qp, &wr).unwrap();
        let wc = a.verbs.poll_cq(&a.cq).unwrap().unwrap();
        assert_eq!(wc.status(), WcStatus::WrFlushErr);
    }

    #[test]
    fn rdma_read_checks_remote_permission() {
        let fabric = SoftFabric::new();
        let a = Side::new(fabric.add_host([SoftDevice::roce("r0")]), Permission::default());
        let b = Side::new(
            fabric.add_host([SoftDevice::roce("r0")]),
            Permission::LOCAL_WRITE | Permission::REMOTE_WRITE,
        );
        let (pa, pb) = (a.params(Some(0)), b.params(Some(0)));
        a.bring_up(&pb, Some(0));
        b.bring_up(&pa, Some(0));

        let wr = SendWr {
            wr_id: 0,
            opcode: WrOpcode::RdmaRead,
            sge: a.sge(64),
            signaled: true,
            remote: Some(RemoteAddr {
                addr: pb.addr,
                rkey: pb.rkey,
            }),
        };
        a.verbs.post_send(&a.qp, &wr).unwrap();
        let wc = a.verbs.poll_cq(&a.cq).unwrap().unwrap();
        assert_eq!(wc.status(), WcStatus::RemAccessErr);
    }

    #[test]
    fn wrong_address_vector_never_completes_successfully() {
        let (a, b) = pair(SoftDevice::infiniband, None);
        let mut bogus = b.params(None);
        bogus.lid += 100;
        a.verbs
            .modify_qp(&a.qp, &QpAttr {
                mask: crate::rdma::qp::QpAttrMask::STATE,
                qp_state: QpState::Reset,
                ..Default::default()
            })
            .unwrap();
        a.bring_up(&bogus, None);

        let wr = SendWr {
            wr_id: 0,
            opcode: WrOpcode::RdmaWrite,
            sge: a.sge(8),
            signaled: true,
            remote: Some(RemoteAddr {
                addr: bogus.addr,
                rkey: bogus.rkey,
            }),
        };
        a.verbs.post_send(&a.qp, &wr).unwrap();
        let wc = a.verbs.poll_cq(&a.cq).unwrap().unwrap();
        assert_eq!(wc.status(), WcStatus::RetryExcErr);
    }

    #[test]
    fn state_machine_is_enforced() {
        let fabric = SoftFabric::new();
        let a = Side::new(fabric.add_host([SoftDevice::roce("r0")]), Permission::default());
        let remote = a.params(Some(0));
        let v = &a.verbs;

        // Skipping INIT is rejected, as is a send before RTS.
        assert!(v.modify_qp(&a.qp, &QpAttr::rtr_to_rts()).is_err());
        let wr = SendWr {
            wr_id: 0,
            opcode: WrOpcode::Send,
            sge: a.sge(8),
            signaled: true,
            remote: None,
        };
        assert!(v.post_send(&a.qp, &wr).is_err());
        assert!(v
            .post_recv(&a.qp, &RecvWr { wr_id: 0, sge: a.sge(8) })
            .is_err());

        // RoCE needs a global address vector.
        v.modify_qp(&a.qp, &QpAttr::reset_to_init(1)).unwrap();
        v.post_recv(&a.qp, &RecvWr { wr_id: 0, sge: a.sge(8) })
            .unwrap();
        assert!(v
            .modify_qp(&a.qp, &QpAttr::init_to_rtr(1, None, &remote))
            .is_err());
        assert!(v
            .modify_qp(&a.qp, &QpAttr::init_to_rtr(1, Some(9), &remote))
            .is_err());
        v.modify_qp(&a.qp, &QpAttr::init_to_rtr(1, Some(0), &remote))
            .unwrap();
        assert!(v.post_send(&a.qp, &wr).is_err());
        v.modify_qp(&a.qp, &QpAttr::rtr_to_rts()).unwrap();
        assert_eq!(v.qp_state(&a.qp), Some(QpState::Rts));
    }

    #[test]
    fn missing_mask_bits_are_rejected() {
        let fabric = SoftFabric::new();
        let a = Side::new(fabric.add_host([SoftDevice::roce("r0")]), Permission::default());
        let mut attr = QpAttr::reset_to_init(1);
        attr.mask = crate::rdma::qp::QpAttrMask::STATE | crate::rdma::qp::QpAttrMask::PORT;
        assert_eq!(
            a.verbs.modify_qp(&a.qp, &attr).unwrap_err().raw_os_error(),
            Some(libc::EINVAL)
        );
        assert!(a.verbs.query_port(&a.ctx, 2).is_err());
        assert_eq!(a.verbs.qp_state(&a.qp), Some(QpState::Reset));
    }

    #[test]
    fn cq_overrun_is_reported() {
        let fabric = SoftFabric::new();
        let v = fabric.add_host([SoftDevice::infiniband("ib0")]);
        let devs = v.device_list().unwrap();
        let ctx = v.open_device(&devs[0]).unwrap();
        let pd = v.alloc_pd(&ctx).unwrap();
        let cq = v.create_cq(&ctx, 1).unwrap();
        let qp = v
            .create_qp(&pd, &cq, &cq, &QpInitAttr::rc_signal_all(QpCaps::default()))
            .unwrap();

        let mut buf = Buffer::zeroed(64).unwrap();
        let mr = unsafe { v.reg_mr(&pd, buf.as_mut_slice().as_mut_ptr(), 64, Permission::default()) }
            .unwrap();
        let sge = Sge {
            addr: buf.addr() as u64,
            length: 64,
            lkey: v.mr_keys(&mr).0,
        };
        v.modify_qp(&qp, &QpAttr::reset_to_init(1)).unwrap();
        v.post_recv(&qp, &RecvWr { wr_id: 1, sge }).unwrap();
        v.post_recv(&qp, &RecvWr { wr_id: 2, sge }).unwrap();

        // Entering the error state flushes both receives into a 1-entry CQ.
        let attr = QpAttr {
            mask: crate::rdma::qp::QpAttrMask::STATE,
            qp_state: QpState::Error,
            ..Default::default()
        };
        v.modify_qp(&qp, &attr).unwrap();
        assert_eq!(
            v.poll_cq(&cq).unwrap_err().raw_os_error(),
            Some(libc::EOVERFLOW)
        );
    }

    #[test]
    fn accounting_tracks_release_order() {
        let fabric = SoftFabric::new();
        let v = fabric.add_host([SoftDevice::roce("r0")]);
        let side = Side::new(v.clone(), Permission::default());

        // A failed call leaves nothing behind.
        v.fail_next(SoftOp::AllocPd, libc::ENOMEM);
        assert!(v.alloc_pd(&side.ctx).is_err());
        assert_eq!(v.live().pds, 1);

        side.teardown();
        assert!(v.live().is_empty());

        use Event::*;
        use Resource::*;
        assert_eq!(
            v.events(),
            [
                Acquired(Device),
                Acquired(Pd),
                Acquired(Cq),
                Acquired(Mr),
                Acquired(Qp),
                Released(Qp),
                Released(Mr),
                Released(Cq),
                Released(Pd),
                Released(Device),
            ]
        );
    }

    #[test]
    fn busy_parents_refuse_release() {
        let fabric = SoftFabric::new();
        let side = Side::new(fabric.add_host([SoftDevice::roce("r0")]), Permission::default());
        let v = side.verbs.clone();

        // Recreate handles with the same ids to probe the fabric, without
        // giving up the originals.
        assert_eq!(
            v.dealloc_pd(SoftPd(side.pd.0)).unwrap_err().raw_os_error(),
            Some(libc::EBUSY)
        );
        assert_eq!(
            v.destroy_cq(SoftCq(side.cq.0)).unwrap_err().raw_os_error(),
            Some(libc::EBUSY)
        );
        side.teardown();
    }
}
