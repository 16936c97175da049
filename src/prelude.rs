//! The rdmapair prelude.
//!
//! The purpose of this module is to alleviate imports of the types needed to
//! bring up a peer and post work on it.

pub use crate::config::{Config, Role};
pub use crate::ctrl::{connect_qp, Bootstrap, BootstrapListener, ConnectionParams};
pub use crate::error::Error;
pub use crate::rdma::cq::{Wc, WcStatus, MAX_POLL_CQ_TIMEOUT};
pub use crate::rdma::mr::MSG_SIZE;
pub use crate::rdma::qp::{CanReceive, CanSend, Init, Qp, QpState, Reset, Rtr, Rts};
pub use crate::rdma::wr::WrOpcode;
pub use crate::resources::ResourceSet;
pub use crate::verbs::Verbs;
