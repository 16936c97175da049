//! Work requests.

use crate::rdma::type_alias::*;

/// Scatter-gather element: one contiguous range of registered local memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sge {
    pub addr: u64,
    pub length: u32,
    pub lkey: LKey,
}

/// Opcode of a send work request.
///
/// Discriminants follow `enum ibv_wr_opcode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum WrOpcode {
    /// One-sided store into remote memory.
    RdmaWrite = 0,

    /// Two-sided transfer consuming a receive posted by the peer.
    Send = 2,

    /// One-sided fetch of remote memory.
    RdmaRead = 4,
}

impl WrOpcode {
    /// Return `true` if the opcode targets remote memory directly.
    #[inline]
    pub fn is_one_sided(self) -> bool {
        matches!(self, Self::RdmaWrite | Self::RdmaRead)
    }
}

/// Remote memory targeted by a one-sided operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteAddr {
    pub addr: u64,
    pub rkey: RKey,
}

/// Send work request with a single scatter-gather element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendWr {
    pub wr_id: WrId,
    pub opcode: WrOpcode,
    pub sge: Sge,

    /// Whether to generate a completion regardless of `sq_sig_all`.
    pub signaled: bool,

    /// Remote memory, required for RDMA read and write.
    pub remote: Option<RemoteAddr>,
}

/// Receive work request with a single scatter-gather element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecvWr {
    pub wr_id: WrId,
    pub sge: Sge,
}
