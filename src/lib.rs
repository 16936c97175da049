//! Bring up one reliable-connected RDMA queue pair between two peers, then
//! drive send, RDMA read and RDMA write over it.
//!
//! A peer owns one [`ResourceSet`]: a device context, a protection domain, a
//! completion queue, a registered 10 MiB buffer and an RC queue pair, plus a
//! TCP bootstrap channel to the other peer. The handshake
//! ([`ctrl::connect_qp`]) swaps [`ctrl::ConnectionParams`] over that channel
//! and walks the QP through RESET, INIT, RTR and RTS. Work requests are then
//! posted through a typed [`Qp`] view that only exists in states where the
//! request is legal.
//!
//! RDMA itself is reached through the [`Verbs`](verbs::Verbs) provider trait.
//! [`verbs::Ibverbs`] (feature `ibverbs`) talks to libibverbs, and
//! [`verbs::SoftVerbs`] emulates a fabric in-process.
//!
//! # Example
//!
//! ```rust,no_run
//! use rdmapair::{ctrl, verbs::SoftFabric, Config, ResourceSet, Rts, WrOpcode};
//!
//! fn main() -> Result<(), rdmapair::Error> {
//!     let verbs = SoftFabric::new().add_host([rdmapair::verbs::SoftDevice::roce("soft_0")]);
//!     let config = Config {
//!         server_name: Some("10.0.0.1".to_owned()),
//!         ..Default::default()
//!     };
//!
//!     let mut res = ResourceSet::create(verbs, &config)?;
//!     ctrl::connect_qp(&mut res)?;
//!     res.qp::<Rts>()?.send_and_wait(WrOpcode::RdmaRead)?;
//!     res.close()?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "ibverbs")]
mod bindings;
#[macro_use]
mod utils;

mod config;
mod error;
mod rdma;
mod resources;

/// Bootstrap channel and connection handshake.
pub mod ctrl;
pub mod harness;
pub mod prelude;
pub mod verbs;

pub use config::{Config, Role};
pub use error::{Error, ErrorCategory, Resource, TeardownError};
pub use rdma::gid::Gid;
pub use rdma::{cq::*, mr::*, nic::*, qp::*, type_alias::*, wr::*};
pub use resources::ResourceSet;
