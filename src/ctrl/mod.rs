mod bootstrap;
mod handshake;
mod params;

pub use bootstrap::{Bootstrap, BootstrapListener};
pub use handshake::{connect_qp, connect_qp_with};
pub use params::ConnectionParams;
