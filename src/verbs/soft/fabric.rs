use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::Ipv6Addr;
use std::ptr;

use super::accounting::{Ledger, Live};
use crate::error::Resource;
use crate::rdma::cq::{Wc, WcOpcode, WcStatus};
use crate::rdma::gid::Gid;
use crate::rdma::mr::Permission;
use crate::rdma::nic::{PortAttr, PortLinkLayer, PortMtu, PortState};
use crate::rdma::qp::{AhAttr, QpAttr, QpAttrMask, QpCaps, QpInitAttr, QpState, QpType};
use crate::rdma::type_alias::*;
use crate::rdma::wr::{RecvWr, RemoteAddr, SendWr, Sge, WrOpcode};
use crate::utils::interop::from_c_err;

/// Description of one software RDMA device with a single physical port.
#[derive(Debug, Clone)]
pub struct SoftDevice {
    name: String,
    link_layer: PortLinkLayer,
    active_mtu: PortMtu,
}

impl SoftDevice {
    /// A RoCE device: LID 0, and global routing required.
    pub fn roce(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link_layer: PortLinkLayer::Ethernet,
            active_mtu: PortMtu::Mtu1024,
        }
    }

    /// An InfiniBand device with a subnet-assigned LID.
    pub fn infiniband(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link_layer: PortLinkLayer::Infiniband,
            active_mtu: PortMtu::Mtu4096,
        }
    }

    /// Override the active MTU of the port.
    pub fn with_active_mtu(mut self, mtu: PortMtu) -> Self {
        self.active_mtu = mtu;
        self
    }
}

/// The only physical port of a software device.
const PORT: PortNum = 1;

const MAX_QP_WR: u32 = 1024;
const MAX_SGE: u32 = 30;

struct DeviceEntry {
    host: usize,
    desc: SoftDevice,
    lid: Lid,
    gids: Vec<Gid>,
}

struct CtxEntry {
    host: usize,
    device: usize,
}

struct PdEntry {
    host: usize,
    ctx: u32,
}

struct CqEntry {
    host: usize,
    ctx: u32,
    cap: usize,
    entries: VecDeque<Wc>,
    overrun: bool,
}

struct MrEntry {
    host: usize,
    pd: u32,
    addr: u64,
    len: u64,
    perm: Permission,
    lkey: LKey,
    rkey: RKey,
}

impl MrEntry {
    fn covers(&self, addr: u64, len: u64) -> bool {
        addr >= self.addr
            && addr
                .checked_add(len)
                .is_some_and(|end| end <= self.addr + self.len)
    }
}

struct QpEntry {
    host: usize,
    pd: u32,
    send_cq: u32,
    recv_cq: u32,
    sq_sig_all: bool,
    caps: QpCaps,
    state: QpState,
    access: Permission,
    ah: AhAttr,
    dest_qpn: Qpn,
    recv_queue: VecDeque<RecvWr>,
}

/// Shared state of the whole fabric: every host, device and handle.
#[derive(Default)]
pub(super) struct Fabric {
    ledgers: Vec<Ledger>,
    devices: Vec<DeviceEntry>,
    next_id: u32,
    next_lid: Lid,

    contexts: HashMap<u32, CtxEntry>,
    pds: HashMap<u32, PdEntry>,
    cqs: HashMap<u32, CqEntry>,
    mrs: HashMap<u32, MrEntry>,
    qps: HashMap<Qpn, QpEntry>,
}

fn einval<T>() -> io::Result<T> {
    from_c_err(libc::EINVAL)
}

fn ebusy<T>() -> io::Result<T> {
    from_c_err(libc::EBUSY)
}

impl Fabric {
    pub fn add_host(&mut self, devices: Vec<SoftDevice>) -> usize {
        let host = self.ledgers.len();
        self.ledgers.push(Ledger::default());

        for desc in devices {
            self.next_lid += 1;
            let n = self.next_lid;
            let link_local = Gid::from(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, n));
            let (lid, gids) = match desc.link_layer {
                PortLinkLayer::Infiniband => (n, vec![link_local]),
                PortLinkLayer::Ethernet => {
                    let v4 = Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0x0a00, n);
                    (0, vec![link_local, Gid::from(v4)])
                }
            };
            self.devices.push(DeviceEntry {
                host,
                desc,
                lid,
                gids,
            });
        }
        host
    }

    pub fn ledger(&mut self, host: usize) -> &mut Ledger {
        &mut self.ledgers[host]
    }

    fn alloc_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn live(&self, host: usize) -> Live {
        Live {
            contexts: self.contexts.values().filter(|e| e.host == host).count(),
            pds: self.pds.values().filter(|e| e.host == host).count(),
            cqs: self.cqs.values().filter(|e| e.host == host).count(),
            mrs: self.mrs.values().filter(|e| e.host == host).count(),
            qps: self.qps.values().filter(|e| e.host == host).count(),
        }
    }

    pub fn device_list(&self, host: usize) -> Vec<usize> {
        (0..self.devices.len())
            .filter(|&i| self.devices[i].host == host)
            .collect()
    }

    pub fn device_name(&self, device: usize) -> io::Result<String> {
        match self.devices.get(device) {
            Some(dev) => Ok(dev.desc.name.clone()),
            None => einval(),
        }
    }

    pub fn open_device(&mut self, host: usize, device: usize) -> io::Result<u32> {
        if self.devices.get(device).map(|d| d.host) != Some(host) {
            return from_c_err(libc::ENODEV);
        }
        let id = self.alloc_id();
        self.contexts.insert(id, CtxEntry { host, device });
        self.ledgers[host].acquired(Resource::Device);
        Ok(id)
    }

    pub fn close_device(&mut self, ctx: u32) -> io::Result<()> {
        if self.pds.values().any(|e| e.ctx == ctx) || self.cqs.values().any(|e| e.ctx == ctx) {
            return ebusy();
        }
        let entry = self.contexts.remove(&ctx).ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        self.ledgers[entry.host].released(Resource::Device);
        Ok(())
    }

    fn device_of_ctx(&self, ctx: u32) -> io::Result<&DeviceEntry> {
        match self.contexts.get(&ctx) {
            Some(c) => Ok(&self.devices[c.device]),
            None => einval(),
        }
    }

    fn device_of_qp(&self, qp: &QpEntry) -> Option<&DeviceEntry> {
        let ctx = self.pds.get(&qp.pd)?.ctx;
        self.device_of_ctx(ctx).ok()
    }

    pub fn query_port(&self, ctx: u32, port: PortNum) -> io::Result<PortAttr> {
        let dev = self.device_of_ctx(ctx)?;
        if port != PORT {
            return einval();
        }
        Ok(PortAttr {
            state: PortState::Active,
            max_mtu: PortMtu::Mtu4096,
            active_mtu: dev.desc.active_mtu,
            lid: dev.lid,
            link_layer: dev.desc.link_layer,
            gid_tbl_len: dev.gids.len() as i32,
        })
    }

    pub fn query_gid(&self, ctx: u32, port: PortNum, index: GidIndex) -> io::Result<Gid> {
        let dev = self.device_of_ctx(ctx)?;
        if port != PORT {
            return einval();
        }
        match dev.gids.get(index as usize) {
            Some(gid) => Ok(*gid),
            None => einval(),
        }
    }

    pub fn alloc_pd(&mut self, ctx: u32) -> io::Result<u32> {
        let host = match self.contexts.get(&ctx) {
            Some(c) => c.host,
            None => return einval(),
        };
        let id = self.alloc_id();
        self.pds.insert(id, PdEntry { host, ctx });
        self.ledgers[host].acquired(Resource::Pd);
        Ok(id)
    }

    pub fn dealloc_pd(&mut self, pd: u32) -> io::Result<()> {
        if self.mrs.values().any(|e| e.pd == pd) || self.qps.values().any(|e| e.pd == pd) {
            return ebusy();
        }
        let entry = self.pds.remove(&pd).ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        self.ledgers[entry.host].released(Resource::Pd);
        Ok(())
    }

    pub fn create_cq(&mut self, ctx: u32, cqe: u32) -> io::Result<u32> {
        let host = match self.contexts.get(&ctx) {
            Some(c) => c.host,
            None => return einval(),
        };
        if cqe == 0 {
            return einval();
        }
        let id = self.alloc_id();
        self.cqs.insert(
            id,
            CqEntry {
                host,
                ctx,
                cap: cqe as usize,
                entries: VecDeque::new(),
                overrun: false,
            },
        );
        self.ledgers[host].acquired(Resource::Cq);
        Ok(id)
    }

    pub fn destroy_cq(&mut self, cq: u32) -> io::Result<()> {
        if self.qps.values().any(|e| e.send_cq == cq || e.recv_cq == cq) {
            return ebusy();
        }
        let entry = self.cqs.remove(&cq).ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        self.ledgers[entry.host].released(Resource::Cq);
        Ok(())
    }

    pub fn reg_mr(
        &mut self,
        pd: u32,
        addr: *mut u8,
        len: usize,
        perm: Permission,
    ) -> io::Result<(u32, LKey, RKey)> {
        let host = match self.pds.get(&pd) {
            Some(p) => p.host,
            None => return einval(),
        };
        if addr.is_null() || len == 0 {
            return einval();
        }
        // Remote write needs local write, as in verbs.
        if perm.contains(Permission::REMOTE_WRITE) && !perm.contains(Permission::LOCAL_WRITE) {
            return einval();
        }

        let id = self.alloc_id();
        let (lkey, rkey) = (id, id | 0x0100_0000);
        self.mrs.insert(
            id,
            MrEntry {
                host,
                pd,
                addr: addr as u64,
                len: len as u64,
                perm,
                lkey,
                rkey,
            },
        );
        self.ledgers[host].acquired(Resource::Mr);
        Ok((id, lkey, rkey))
    }

    pub fn dereg_mr(&mut self, mr: u32) -> io::Result<()> {
        let entry = self.mrs.remove(&mr).ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        self.ledgers[entry.host].released(Resource::Mr);
        Ok(())
    }

    pub fn create_qp(
        &mut self,
        pd: u32,
        send_cq: u32,
        recv_cq: u32,
        attr: &QpInitAttr,
    ) -> io::Result<Qpn> {
        let (host, ctx) = match self.pds.get(&pd) {
            Some(p) => (p.host, p.ctx),
            None => return einval(),
        };
        let same_ctx = |cq: u32| self.cqs.get(&cq).is_some_and(|c| c.ctx == ctx);
        if !same_ctx(send_cq) || !same_ctx(recv_cq) {
            return einval();
        }
        if attr.qp_type != QpType::Rc {
            return from_c_err(libc::EOPNOTSUPP);
        }
        let caps = attr.caps;
        if caps.max_send_wr > MAX_QP_WR
            || caps.max_recv_wr > MAX_QP_WR
            || caps.max_send_sge > MAX_SGE
            || caps.max_recv_sge > MAX_SGE
        {
            return einval();
        }

        let qpn = self.alloc_id();
        self.qps.insert(
            qpn,
            QpEntry {
                host,
                pd,
                send_cq,
                recv_cq,
                sq_sig_all: attr.sq_sig_all,
                caps,
                state: QpState::Reset,
                access: Permission::EMPTY,
                ah: AhAttr::default(),
                dest_qpn: 0,
                recv_queue: VecDeque::new(),
            },
        );
        self.ledgers[host].acquired(Resource::Qp);
        Ok(qpn)
    }

    pub fn destroy_qp(&mut self, qpn: Qpn) -> io::Result<()> {
        let entry = self.qps.remove(&qpn).ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))?;
        self.ledgers[entry.host].released(Resource::Qp);
        Ok(())
    }

    pub fn qp_state(&self, qpn: Qpn) -> Option<QpState> {
        self.qps.get(&qpn).map(|qp| qp.state)
    }

    pub fn modify_qp(&mut self, qpn: Qpn, attr: &QpAttr) -> io::Result<()> {
        let Some(qp) = self.qps.get(&qpn) else {
            return einval();
        };
        if !attr.mask.contains(QpAttrMask::STATE) {
            return einval();
        }

        use QpState::*;
        let required = match (qp.state, attr.qp_state) {
            (_, Reset) | (_, Error) | (Rts, Rts) => QpAttrMask::STATE,
            (Reset, Init) | (Init, Init) => {
                QpAttrMask::STATE
                    | QpAttrMask::PKEY_INDEX
                    | QpAttrMask::PORT
                    | QpAttrMask::ACCESS_FLAGS
            }
            (Init, Rtr) => {
                QpAttrMask::STATE
                    | QpAttrMask::AV
                    | QpAttrMask::PATH_MTU
                    | QpAttrMask::DEST_QPN
                    | QpAttrMask::RQ_PSN
                    | QpAttrMask::MAX_DEST_RD_ATOMIC
                    | QpAttrMask::MIN_RNR_TIMER
            }
            (Rtr, Rts) => {
                QpAttrMask::STATE
                    | QpAttrMask::SQ_PSN
                    | QpAttrMask::TIMEOUT
                    | QpAttrMask::RETRY_CNT
                    | QpAttrMask::RNR_RETRY
                    | QpAttrMask::MAX_QP_RD_ATOMIC
            }
            _ => return einval(),
        };
        if !attr.mask.contains(required) {
            return einval();
        }

        let Some(dev) = self.device_of_qp(qp) else {
            return einval();
        };
        match attr.qp_state {
            Init if attr.port_num != PORT || attr.pkey_index != 0 => return einval(),
            Rtr => {
                let ah = &attr.ah_attr;
                if ah.port_num != PORT || attr.path_mtu > dev.desc.active_mtu {
                    return einval();
                }
                match ah.grh {
                    Some(grh) if grh.sgid_index as usize >= dev.gids.len() => return einval(),
                    None if dev.desc.link_layer == PortLinkLayer::Ethernet => return einval(),
                    _ => {}
                }
            }
            _ => {}
        }

        let mut flushed = Vec::new();
        let recv_cq = qp.recv_cq;
        let Some(qp) = self.qps.get_mut(&qpn) else {
            return einval();
        };
        match attr.qp_state {
            Reset => {
                qp.recv_queue.clear();
                qp.dest_qpn = 0;
                qp.ah = AhAttr::default();
            }
            Init => qp.access = attr.qp_access_flags,
            Rtr => {
                qp.ah = attr.ah_attr;
                qp.dest_qpn = attr.dest_qp_num;
            }
            Error => flushed.extend(qp.recv_queue.drain(..)),
            _ => {}
        }
        qp.state = attr.qp_state;

        for wr in flushed {
            self.push_wc(recv_cq, wc(wr.wr_id, WcStatus::WrFlushErr, WcOpcode::Recv, 0, qpn));
        }
        Ok(())
    }

    pub fn post_recv(&mut self, qpn: Qpn, wr: &RecvWr) -> io::Result<()> {
        let Some(qp) = self.qps.get_mut(&qpn) else {
            return einval();
        };
        match qp.state {
            QpState::Init | QpState::Rtr | QpState::Rts => {
                if qp.recv_queue.len() >= qp.caps.max_recv_wr as usize {
                    return from_c_err(libc::ENOMEM);
                }
                qp.recv_queue.push_back(*wr);
                Ok(())
            }
            QpState::Error => {
                let cq = qp.recv_cq;
                self.push_wc(cq, wc(wr.wr_id, WcStatus::WrFlushErr, WcOpcode::Recv, 0, qpn));
                Ok(())
            }
            _ => einval(),
        }
    }

    pub fn post_send(&mut self, qpn: Qpn, wr: &SendWr) -> io::Result<()> {
        let Some(qp) = self.qps.get(&qpn) else {
            return einval();
        };
        let (state, send_cq) = (qp.state, qp.send_cq);
        let signaled = wr.signaled || qp.sq_sig_all;
        let opcode = match wr.opcode {
            WrOpcode::Send => WcOpcode::Send,
            WrOpcode::RdmaWrite => WcOpcode::RdmaWrite,
            WrOpcode::RdmaRead => WcOpcode::RdmaRead,
        };

        match state {
            QpState::Rts => {}
            QpState::Error => {
                self.push_wc(send_cq, wc(wr.wr_id, WcStatus::WrFlushErr, opcode, 0, qpn));
                return Ok(());
            }
            _ => return einval(),
        }
        if wr.opcode.is_one_sided() && wr.remote.is_none() {
            return einval();
        }

        match self.execute(qpn, wr) {
            Ok(len) => {
                if signaled {
                    self.push_wc(send_cq, wc(wr.wr_id, WcStatus::Success, opcode, len, qpn));
                }
            }
            Err(status) => {
                log::debug!("QP {:#x}: {:?} failed with {}", qpn, wr.opcode, status);
                self.set_error(qpn);
                self.push_wc(send_cq, wc(wr.wr_id, status, opcode, 0, qpn));
            }
        }
        Ok(())
    }

    /// Carry out a send work request. Return the number of bytes moved.
    fn execute(&mut self, qpn: Qpn, wr: &SendWr) -> Result<u32, WcStatus> {
        let pd = self.qps.get(&qpn).map(|qp| qp.pd).ok_or(WcStatus::LocQpOpErr)?;
        let need_write = wr.opcode == WrOpcode::RdmaRead;
        let local = self.local_addr(pd, &wr.sge, need_write).ok_or(WcStatus::LocProtErr)?;
        let peer = self.route(qpn).ok_or(WcStatus::RetryExcErr)?;
        let len = wr.sge.length;

        match wr.opcode {
            WrOpcode::Send => {
                let recv = self
                    .qps
                    .get_mut(&peer)
                    .and_then(|p| p.recv_queue.pop_front())
                    .ok_or(WcStatus::RnrRetryExcErr)?;
                let (peer_pd, peer_cq) = self
                    .qps
                    .get(&peer)
                    .map(|p| (p.pd, p.recv_cq))
                    .ok_or(WcStatus::RetryExcErr)?;

                let Some(dst) = self.local_addr(peer_pd, &recv.sge, true) else {
                    self.set_error(peer);
                    self.push_wc(peer_cq, wc(recv.wr_id, WcStatus::LocProtErr, WcOpcode::Recv, 0, peer));
                    return Err(WcStatus::RemOpErr);
                };
                if recv.sge.length < len {
                    self.set_error(peer);
                    self.push_wc(peer_cq, wc(recv.wr_id, WcStatus::LocLenErr, WcOpcode::Recv, 0, peer));
                    return Err(WcStatus::RemInvReqErr);
                }

                // SAFETY: both ranges lie within live registered regions.
                unsafe { ptr::copy(local as *const u8, dst as *mut u8, len as usize) };
                self.push_wc(peer_cq, wc(recv.wr_id, WcStatus::Success, WcOpcode::Recv, len, peer));
            }
            WrOpcode::RdmaWrite => {
                let remote = self
                    .remote_addr(peer, wr.remote, len, Permission::REMOTE_WRITE)
                    .ok_or(WcStatus::RemAccessErr)?;
                // SAFETY: both ranges lie within live registered regions.
                unsafe { ptr::copy(local as *const u8, remote as *mut u8, len as usize) };
            }
            WrOpcode::RdmaRead => {
                let remote = self
                    .remote_addr(peer, wr.remote, len, Permission::REMOTE_READ)
                    .ok_or(WcStatus::RemAccessErr)?;
                // SAFETY: both ranges lie within live registered regions.
                unsafe { ptr::copy(remote as *const u8, local as *mut u8, len as usize) };
            }
        }
        Ok(len)
    }

    /// Validate a local SGE against the MRs of `pd`.
    fn local_addr(&self, pd: u32, sge: &Sge, need_write: bool) -> Option<u64> {
        self.mrs
            .values()
            .find(|mr| mr.lkey == sge.lkey && mr.pd == pd)
            .filter(|mr| mr.covers(sge.addr, sge.length as u64))
            .filter(|mr| !need_write || mr.perm.contains(Permission::LOCAL_WRITE))
            .map(|_| sge.addr)
    }

    /// Validate a remote access against the MRs and access flags of `peer`.
    fn remote_addr(
        &self,
        peer: Qpn,
        remote: Option<RemoteAddr>,
        len: u32,
        perm: Permission,
    ) -> Option<u64> {
        let remote = remote?;
        let qp = self.qps.get(&peer)?;
        if !qp.access.contains(perm) {
            return None;
        }
        self.mrs
            .values()
            .find(|mr| mr.rkey == remote.rkey && mr.pd == qp.pd)
            .filter(|mr| mr.covers(remote.addr, len as u64) && mr.perm.contains(perm))
            .map(|_| remote.addr)
    }

    /// Resolve the peer QP of a connected QP, checking the address vector.
    fn route(&self, qpn: Qpn) -> Option<Qpn> {
        let qp = self.qps.get(&qpn)?;
        let peer = self.qps.get(&qp.dest_qpn)?;
        if !matches!(peer.state, QpState::Rtr | QpState::Rts) || peer.dest_qpn != qpn {
            return None;
        }

        let dev = self.device_of_qp(peer)?;
        let reachable = match &qp.ah.grh {
            Some(grh) => dev.gids.contains(&grh.dgid),
            None => dev.lid != 0 && dev.lid == qp.ah.dlid,
        };
        reachable.then_some(qp.dest_qpn)
    }

    fn set_error(&mut self, qpn: Qpn) {
        let attr = QpAttr {
            mask: QpAttrMask::STATE,
            qp_state: QpState::Error,
            ..Default::default()
        };
        if let Err(e) = self.modify_qp(qpn, &attr) {
            log::warn!("QP {:#x}: cannot enter error state: {}", qpn, e);
        }
    }

    fn push_wc(&mut self, cq: u32, wc: Wc) {
        let Some(cq) = self.cqs.get_mut(&cq) else {
            return;
        };
        if cq.entries.len() >= cq.cap {
            log::warn!("CQ overrun, completion dropped: {:?}", wc);
            cq.overrun = true;
        } else {
            cq.entries.push_back(wc);
        }
    }

    pub fn poll_cq(&mut self, cq: u32) -> io::Result<Option<Wc>> {
        let Some(cq) = self.cqs.get_mut(&cq) else {
            return einval();
        };
        if cq.overrun {
            return from_c_err(libc::EOVERFLOW);
        }
        Ok(cq.entries.pop_front())
    }
}

fn wc(wr_id: WrId, status: WcStatus, opcode: WcOpcode, byte_len: u32, qp_num: Qpn) -> Wc {
    Wc {
        wr_id,
        status,
        opcode,
        vendor_err: if status == WcStatus::Success { 0 } else { 0x80 | status.code() },
        byte_len,
        qp_num,
    }
}
