//! RDMA functionalities.

pub mod cq;
pub mod gid;
pub mod mr;
pub mod nic;
pub mod qp;
pub mod type_alias;
pub mod wr;
