use std::fmt;

use thiserror::Error;

use crate::rdma::type_alias::*;

/// Opcode of a completion queue entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum WcOpcode {
    /// Send request.
    Send = 0,
    /// RDMA write request.
    RdmaWrite = 1,
    /// RDMA read request.
    RdmaRead = 2,
    /// RDMA compare-and-swap request.
    CompSwap = 3,
    /// RDMA fetch-and-add request.
    FetchAdd = 4,
    /// Memory window bind request.
    BindMw = 5,
    /// Receive request.
    Recv = 128,
    /// Receive request with immediate data.
    RecvRdmaImm = 129,
}

impl TryFrom<u32> for WcOpcode {
    type Error = u32;

    fn try_from(wc_opcode: u32) -> Result<Self, u32> {
        Ok(match wc_opcode {
            0 => WcOpcode::Send,
            1 => WcOpcode::RdmaWrite,
            2 => WcOpcode::RdmaRead,
            3 => WcOpcode::CompSwap,
            4 => WcOpcode::FetchAdd,
            5 => WcOpcode::BindMw,
            128 => WcOpcode::Recv,
            129 => WcOpcode::RecvRdmaImm,
            x => return Err(x),
        })
    }
}

/// Status of a completion queue entry.
///
/// Discriminants follow the `ibv_wc_status` numbering. The documentation
/// and error messages are heavily borrowed from [RDMAmojo](https://www.rdmamojo.com/2013/02/15/ibv_poll_cq/).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(u32)]
pub enum WcStatus {
    /// **Operation completed successfully:** the corresponding Work Request
    /// ended and the memory buffers it refers to are ready to be (re)used.
    #[error("success")]
    Success = 0,

    /// **Local Length Error:** a posted message is greater than the maximum
    /// message size supported by the port, or a posted receive buffer is too
    /// small for the incoming message.
    #[error("local length error")]
    LocLenErr = 1,

    /// **Local QP Operation Error:** an internal QP consistency error was
    /// detected while processing this Work Request.
    #[error("local QP operation error")]
    LocQpOpErr = 2,

    /// **Local EE Context Operation Error:** relevant only to RD QPs.
    #[error("local EE context operation error")]
    LocEecOpErr = 3,

    /// **Local Protection Error:** the locally posted Work Request's buffers
    /// in the scatter/gather list does not reference a Memory Region that is
    /// valid for the requested operation.
    #[error("local protection error")]
    LocProtErr = 4,

    /// **Work Request Flushed Error:** a Work Request was in process or
    /// outstanding when the QP transitioned into the Error State.
    #[error("WR flush error")]
    WrFlushErr = 5,

    /// **Memory Window Binding Error.**
    #[error("memory window bind error")]
    MwBindErr = 6,

    /// **Bad Response Error:** an unexpected transport layer opcode was returned
    /// by the responder. *Relevant for RC QPs.*
    #[error("bad response error")]
    BadRespErr = 7,

    /// **Local Access Error:** a protection error occurred on a local data buffer
    /// during the processing of a RDMA Write with Immediate operation sent from
    /// the remote node. *Relevant for RC QPs.*
    #[error("local access error")]
    LocAccessErr = 8,

    /// **Remote Invalid Request Error:** the responder detected an invalid message
    /// on the channel, e.g. the operation is not allowed by the remote QP's
    /// access flags. *Relevant for RC QPs.*
    #[error("remote invalid request error")]
    RemInvReqErr = 9,

    /// **Remote Access Error:** a protection error occurred on a remote data
    /// buffer to be read by an RDMA Read, written by an RDMA Write or accessed
    /// by an atomic operation. *Relevant for RC QPs.*
    #[error("remote access error")]
    RemAccessErr = 10,

    /// **Remote Operation Error:** the operation could not be completed
    /// successfully by the responder. *Relevant for RC QPs.*
    #[error("remote operation error")]
    RemOpErr = 11,

    /// **Transport Retry Counter Exceeded:** the remote side didn't send any
    /// Ack or Nack. On the first message this usually means that the connection
    /// attributes are wrong.
    #[error("transport retry counter exceeded")]
    RetryExcErr = 12,

    /// **RNR Retry Counter Exceeded:** the RNR NAK retry count was exceeded.
    /// This usually means that the remote side didn't post any WR to its Receive
    /// Queue. *Relevant for RC QPs.*
    #[error("RNR retry counter exceeded")]
    RnrRetryExcErr = 13,

    /// **Local RDD Violation Error:** relevant only to RD QPs.
    #[error("local RDD violation error")]
    LocRddViolErr = 14,

    /// **Remote Invalid RD Request Error:** relevant only to RD QPs.
    #[error("remote invalid RD request")]
    RemInvRdReqErr = 15,

    /// **Remote Aborted Error.**
    #[error("remote aborted error")]
    RemAbortErr = 16,

    /// **Invalid EE Context Number:** relevant only to RD QPs.
    #[error("invalid EE context number")]
    InvEecnErr = 17,

    /// **Invalid EE Context State Error:** relevant only to RD QPs.
    #[error("invalid EE context state error")]
    InvEecStateErr = 18,

    /// **Fatal error:** a fatal error that may not be recoverable.
    #[error("fatal error")]
    FatalErr = 19,

    /// **Response Timeout Error:** a response timed out.
    #[error("response timeout error")]
    RespTimeoutErr = 20,

    /// **General Error:** other error which isn't one of the above errors.
    #[error("general error")]
    GeneralErr = 21,
}

impl WcStatus {
    /// Get the numeric status code.
    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl From<u32> for WcStatus {
    /// Unknown codes map to [`WcStatus::GeneralErr`].
    fn from(wc_status: u32) -> Self {
        use WcStatus::*;
        const ALL: [WcStatus; 22] = [
            Success,
            LocLenErr,
            LocQpOpErr,
            LocEecOpErr,
            LocProtErr,
            WrFlushErr,
            MwBindErr,
            BadRespErr,
            LocAccessErr,
            RemInvReqErr,
            RemAccessErr,
            RemOpErr,
            RetryExcErr,
            RnrRetryExcErr,
            LocRddViolErr,
            RemInvRdReqErr,
            RemAbortErr,
            InvEecnErr,
            InvEecStateErr,
            FatalErr,
            RespTimeoutErr,
            GeneralErr,
        ];
        ALL.get(wc_status as usize).copied().unwrap_or(GeneralErr)
    }
}

/// Work completion entry.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Wc {
    pub(crate) wr_id: WrId,
    pub(crate) status: WcStatus,
    pub(crate) opcode: WcOpcode,
    pub(crate) vendor_err: u32,
    pub(crate) byte_len: u32,
    pub(crate) qp_num: Qpn,
}

impl Wc {
    /// Get the work request ID.
    #[inline]
    pub fn wr_id(&self) -> WrId {
        self.wr_id
    }

    /// Get the completion status.
    #[inline]
    pub fn status(&self) -> WcStatus {
        self.status
    }

    /// Get the completion status as a `Result`.
    ///
    /// - If the status is success, return the number of bytes processed or transferred.
    /// - Otherwise, return an error.
    #[inline]
    pub fn ok(&self) -> Result<usize, WcStatus> {
        match self.status {
            WcStatus::Success => Ok(self.bytes()),
            status => Err(status),
        }
    }

    /// Get the opcode of the work request.
    #[inline]
    pub fn opcode(&self) -> WcOpcode {
        self.opcode
    }

    /// Get the vendor syndrome of a failed completion.
    #[inline]
    pub fn vendor_err(&self) -> u32 {
        self.vendor_err
    }

    /// Get the number of bytes processed or transferred.
    #[inline]
    pub fn bytes(&self) -> usize {
        self.byte_len as usize
    }

    /// Get the number of the local QP that this completion belongs to.
    #[inline]
    pub fn qp_num(&self) -> Qpn {
        self.qp_num
    }
}

impl fmt::Debug for Wc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wc")
            .field("wr_id", &self.wr_id)
            .field("status", &self.status)
            .field("opcode", &self.opcode)
            .field("vendor_err", &format_args!("{:#x}", self.vendor_err))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_verbs_numbering() {
        assert_eq!(WcStatus::from(0), WcStatus::Success);
        assert_eq!(WcStatus::from(10), WcStatus::RemAccessErr);
        assert_eq!(WcStatus::from(13), WcStatus::RnrRetryExcErr);
        assert_eq!(WcStatus::from(21), WcStatus::GeneralErr);
        assert_eq!(WcStatus::from(999), WcStatus::GeneralErr);
        assert_eq!(WcStatus::RemAccessErr as u32, 10);
    }

    #[test]
    fn failed_completion_is_err() {
        let wc = Wc {
            wr_id: 0,
            status: WcStatus::RnrRetryExcErr,
            opcode: WcOpcode::Send,
            vendor_err: 0x81,
            byte_len: 0,
            qp_num: 7,
        };
        assert_eq!(wc.ok(), Err(WcStatus::RnrRetryExcErr));
        assert_eq!(WcOpcode::try_from(128), Ok(WcOpcode::Recv));
        assert_eq!(WcOpcode::try_from(77), Err(77));
    }
}
