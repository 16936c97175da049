use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::QpState;
use crate::ctrl::ConnectionParams;
use crate::rdma::gid::Gid;
use crate::rdma::mr::Permission;
use crate::rdma::nic::PortMtu;
use crate::rdma::type_alias::*;
use crate::utils::select::*;

/// Attribute mask of a QP modification, telling the provider which fields of
/// [`QpAttr`] are meaningful.
///
/// Bit values match `enum ibv_qp_attr_mask`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct QpAttrMask(u32);

impl QpAttrMask {
    pub const STATE: Self = Self(1 << 0);
    pub const CUR_STATE: Self = Self(1 << 1);
    pub const EN_SQD_ASYNC_NOTIFY: Self = Self(1 << 2);
    pub const ACCESS_FLAGS: Self = Self(1 << 3);
    pub const PKEY_INDEX: Self = Self(1 << 4);
    pub const PORT: Self = Self(1 << 5);
    pub const QKEY: Self = Self(1 << 6);
    pub const AV: Self = Self(1 << 7);
    pub const PATH_MTU: Self = Self(1 << 8);
    pub const TIMEOUT: Self = Self(1 << 9);
    pub const RETRY_CNT: Self = Self(1 << 10);
    pub const RNR_RETRY: Self = Self(1 << 11);
    pub const RQ_PSN: Self = Self(1 << 12);
    pub const MAX_QP_RD_ATOMIC: Self = Self(1 << 13);
    pub const ALT_PATH: Self = Self(1 << 14);
    pub const MIN_RNR_TIMER: Self = Self(1 << 15);
    pub const SQ_PSN: Self = Self(1 << 16);
    pub const MAX_DEST_RD_ATOMIC: Self = Self(1 << 17);
    pub const PATH_MIG_STATE: Self = Self(1 << 18);
    pub const CAP: Self = Self(1 << 19);
    pub const DEST_QPN: Self = Self(1 << 20);

    /// Get the raw mask bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Return `true` if every bit in `other` is also set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for QpAttrMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for QpAttrMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for QpAttrMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QpAttrMask({:#x})", self.0)
    }
}

/// Global routing header of an address vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GlobalRoute {
    /// Destination GID, copied verbatim from the peer.
    pub dgid: Gid,
    pub flow_label: u32,
    pub sgid_index: GidIndex,
    pub hop_limit: u8,
    pub traffic_class: u8,
}

/// Address vector describing the path to the remote QP.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AhAttr {
    pub dlid: Lid,
    pub sl: u8,
    pub src_path_bits: u8,
    pub port_num: PortNum,

    /// Global routing header. `Some` makes the address vector global.
    pub grh: Option<GlobalRoute>,
}

impl AhAttr {
    /// Return `true` if the address vector carries a global routing header.
    #[inline]
    pub fn is_global(&self) -> bool {
        self.grh.is_some()
    }
}

/// Queue pair attributes for one state transition, together with the mask
/// of fields that the transition sets.
///
/// This type corresponds to `struct ibv_qp_attr` plus its attribute mask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QpAttr {
    pub mask: QpAttrMask,

    pub qp_state: QpState,
    pub pkey_index: u16,
    pub port_num: PortNum,
    pub qp_access_flags: Permission,

    pub path_mtu: PortMtu,
    pub dest_qp_num: Qpn,
    pub rq_psn: Psn,
    pub max_dest_rd_atomic: u8,
    pub min_rnr_timer: u8,
    pub ah_attr: AhAttr,

    pub timeout: u8,
    pub retry_cnt: u8,
    pub rnr_retry: u8,
    pub sq_psn: Psn,
    pub max_rd_atomic: u8,
}

impl QpAttr {
    /// Initial packet sequence number of both directions.
    pub const INIT_PSN: Psn = 0;

    /// Minimum RNR NAK timer and local ACK timeout.
    pub const TIMER: u8 = 0x12;

    /// Attributes of the RESET to INIT transition.
    pub fn reset_to_init(port_num: PortNum) -> Self {
        Self {
            mask: QpAttrMask::STATE
                | QpAttrMask::PKEY_INDEX
                | QpAttrMask::PORT
                | QpAttrMask::ACCESS_FLAGS,
            qp_state: QpState::Init,
            pkey_index: 0,
            port_num,
            qp_access_flags: Permission::LOCAL_WRITE
                | Permission::REMOTE_READ
                | Permission::REMOTE_WRITE,
            ..Default::default()
        }
    }

    /// Attributes of the INIT to RTR transition towards `remote`.
    ///
    /// With a GID index the address vector becomes global and is always
    /// bound to physical port 1.
    pub fn init_to_rtr(
        port_num: PortNum,
        gid_index: Option<GidIndex>,
        remote: &ConnectionParams,
    ) -> Self {
        let grh = gid_index.map(|sgid_index| GlobalRoute {
            dgid: remote.gid,
            flow_label: 0,
            sgid_index,
            hop_limit: 1,
            traffic_class: 0,
        });

        Self {
            mask: QpAttrMask::STATE
                | QpAttrMask::AV
                | QpAttrMask::PATH_MTU
                | QpAttrMask::DEST_QPN
                | QpAttrMask::RQ_PSN
                | QpAttrMask::MAX_DEST_RD_ATOMIC
                | QpAttrMask::MIN_RNR_TIMER,
            qp_state: QpState::Rtr,
            path_mtu: PortMtu::Mtu256,
            dest_qp_num: remote.qp_num,
            rq_psn: Self::INIT_PSN,
            max_dest_rd_atomic: 1,
            min_rnr_timer: Self::TIMER,
            ah_attr: AhAttr {
                dlid: remote.lid,
                sl: 0,
                src_path_bits: 0,
                port_num: grh.select_val(1, port_num),
                grh,
            },
            ..Default::default()
        }
    }

    /// Attributes of the RTR to RTS transition.
    pub fn rtr_to_rts() -> Self {
        Self {
            mask: QpAttrMask::STATE
                | QpAttrMask::TIMEOUT
                | QpAttrMask::RETRY_CNT
                | QpAttrMask::RNR_RETRY
                | QpAttrMask::SQ_PSN
                | QpAttrMask::MAX_QP_RD_ATOMIC,
            qp_state: QpState::Rts,
            timeout: Self::TIMER,
            retry_cnt: 6,
            rnr_retry: 0,
            sq_psn: Self::INIT_PSN,
            max_rd_atomic: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> ConnectionParams {
        ConnectionParams {
            addr: 0x7f00_dead_0000,
            rkey: 0x1234,
            qp_num: 0x42,
            lid: 0x11,
            gid: Gid::from([0xfe; 16]),
        }
    }

    #[test]
    fn reset_to_init_masks() {
        let attr = QpAttr::reset_to_init(2);
        assert_eq!(attr.qp_state, QpState::Init);
        assert_eq!(attr.port_num, 2);
        assert_eq!(attr.pkey_index, 0);
        assert_eq!(attr.qp_access_flags.bits(), 0b111);
        assert_eq!(attr.mask.bits(), 1 | (1 << 3) | (1 << 4) | (1 << 5));
    }

    #[test]
    fn init_to_rtr_without_gid_is_local() {
        let attr = QpAttr::init_to_rtr(2, None, &remote());
        assert_eq!(attr.qp_state, QpState::Rtr);
        assert_eq!(attr.path_mtu, PortMtu::Mtu256);
        assert_eq!(attr.dest_qp_num, 0x42);
        assert_eq!(attr.rq_psn, 0);
        assert_eq!(attr.max_dest_rd_atomic, 1);
        assert_eq!(attr.min_rnr_timer, 0x12);
        assert_eq!(attr.ah_attr.dlid, 0x11);
        assert_eq!(attr.ah_attr.port_num, 2);
        assert!(!attr.ah_attr.is_global());
        assert!(attr.mask.contains(
            QpAttrMask::STATE
                | QpAttrMask::AV
                | QpAttrMask::PATH_MTU
                | QpAttrMask::DEST_QPN
                | QpAttrMask::RQ_PSN
                | QpAttrMask::MAX_DEST_RD_ATOMIC
                | QpAttrMask::MIN_RNR_TIMER
        ));
        assert!(!attr.mask.contains(QpAttrMask::PORT));
    }

    #[test]
    fn init_to_rtr_with_gid_forces_port_one() {
        let attr = QpAttr::init_to_rtr(2, Some(3), &remote());
        let grh = attr.ah_attr.grh.unwrap();
        assert_eq!(attr.ah_attr.port_num, 1);
        assert_eq!(grh.dgid, Gid::from([0xfe; 16]));
        assert_eq!(grh.sgid_index, 3);
        assert_eq!(grh.hop_limit, 1);
        assert_eq!(grh.flow_label, 0);
        assert_eq!(grh.traffic_class, 0);
    }

    #[test]
    fn rtr_to_rts_values() {
        let attr = QpAttr::rtr_to_rts();
        assert_eq!(attr.qp_state, QpState::Rts);
        assert_eq!((attr.timeout, attr.retry_cnt, attr.rnr_retry), (0x12, 6, 0));
        assert_eq!((attr.sq_psn, attr.max_rd_atomic), (0, 1));
        assert_eq!(
            attr.mask,
            QpAttrMask::STATE
                | QpAttrMask::TIMEOUT
                | QpAttrMask::RETRY_CNT
                | QpAttrMask::RNR_RETRY
                | QpAttrMask::SQ_PSN
                | QpAttrMask::MAX_QP_RD_ATOMIC
        );
    }
}
