/// Queue pair type.
///
/// Discriminants follow `enum ibv_qp_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QpType {
    /// Reliable connection.
    Rc = 2,

    /// Unreliable connection.
    Uc = 3,

    /// Unreliable datagram.
    Ud = 4,
}

impl From<QpType> for u32 {
    fn from(qp_type: QpType) -> Self {
        qp_type as _
    }
}

/// Queue pair capability attributes.
///
/// This type corresponds to `struct ibv_qp_cap` in the `ibverbs` C driver.
///
/// Documentation heavily borrowed from [RDMAmojo](https://www.rdmamojo.com/2012/12/21/ibv_create_qp/).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QpCaps {
    /// The maximum number of outstanding work Requests that can be posted to
    /// the Send Queue in that Queue Pair.
    pub max_send_wr: u32,

    /// The maximum number of outstanding Work Requests that can be posted to
    /// the Receive Queue in that Queue Pair.
    pub max_recv_wr: u32,

    /// The maximum number of scatter/gather elements in any Work Request that
    /// can be posted to the Send Queue in that Queue Pair.
    pub max_send_sge: u32,

    /// The maximum number of scatter/gather elements in any Work Request that
    /// can be posted to the Receive Queue in that Queue Pair.
    pub max_recv_sge: u32,

    /// The maximum message size (in bytes) that can be posted inline to the
    /// Send Queue. If no inline message is requested, the value can be 0.
    pub max_inline_data: u32,
}

impl Default for QpCaps {
    /// 10 outstanding work requests per queue with up to 10 SGEs each, and
    /// no inline data.
    ///
    /// Only one SGE is ever used, but the counts are kept at what peers
    /// built from the same settings expect.
    fn default() -> Self {
        QpCaps {
            max_send_wr: 10,
            max_recv_wr: 10,
            max_send_sge: 10,
            max_recv_sge: 10,
            max_inline_data: 0,
        }
    }
}

/// Initialization attributes of a queue pair.
///
/// The send and receive completion queues are passed to the provider
/// separately, as they are handles owned elsewhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QpInitAttr {
    /// Queue pair type.
    pub qp_type: QpType,

    /// Whether to signal for all send work requests.
    pub sq_sig_all: bool,

    /// Capabilities of this QP.
    pub caps: QpCaps,
}

impl QpInitAttr {
    /// Attributes of a reliable-connected QP that signals every send.
    pub fn rc_signal_all(caps: QpCaps) -> Self {
        Self {
            qp_type: QpType::Rc,
            sq_sig_all: true,
            caps,
        }
    }
}
