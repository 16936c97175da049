//! The two-peer demonstration run.
//!
//! After the handshake the server sends [`MSG`] to the client. The client
//! then reads the server's buffer, which now holds [`RDMA_READ_MSG`], and
//! overwrites it with [`RDMA_WRITE_MSG`]. Phase barriers on the bootstrap
//! channel keep the two sides in step.

use crate::config::{Config, Role};
use crate::ctrl::connect_qp;
use crate::error::Error;
use crate::rdma::qp::Rts;
use crate::rdma::wr::WrOpcode;
use crate::resources::ResourceSet;
use crate::verbs::Verbs;

/// Greeting the server sends.
pub const MSG: &str = "1234567890";

/// Server buffer contents for the RDMA read phase.
pub const RDMA_READ_MSG: &str = "RDMA read operation";

/// What the client RDMA-writes into the server buffer.
pub const RDMA_WRITE_MSG: &str = "RDMA write operation";

/// What one side observed during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub role: Role,
    pub device_name: String,
    /// Buffer contents after the send phase.
    pub message: String,
    /// Server buffer contents fetched by RDMA read. Client only.
    pub read: Option<String>,
    /// Buffer contents after the client's RDMA write. Server only.
    pub written: Option<String>,
}

/// Create the resources for `config` and run both phases.
pub fn run<V: Verbs>(verbs: V, config: &Config) -> Result<Report, Error> {
    let res = ResourceSet::create(verbs, config)?;
    run_on(res)
}

/// Run both phases on an existing resource set, then tear it down.
///
/// A run failure takes precedence over a teardown failure, which is still
/// logged.
pub fn run_on<V: Verbs>(mut res: ResourceSet<V>) -> Result<Report, Error> {
    let report = session(&mut res);
    let closed = res.close();
    match (report, closed) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e.into()),
        (Ok(report), Ok(())) => Ok(report),
    }
}

fn session<V: Verbs>(res: &mut ResourceSet<V>) -> Result<Report, Error> {
    let role = res.role();
    if role == Role::Server {
        res.write_message(MSG);
    }

    connect_qp(res)?;

    {
        let mut qp = res.qp::<Rts>()?;
        match role {
            Role::Server => {
                qp.send_and_wait(WrOpcode::Send)?;
            }
            // The receive was posted during the handshake.
            Role::Client => {
                qp.poll_completion()?;
            }
        }
    }
    let message = res.message();
    log::info!("Message is: '{}'", message);

    if role == Role::Server {
        res.write_message(RDMA_READ_MSG);
    }
    res.channel().barrier()?;

    let mut read = None;
    if role == Role::Client {
        res.qp::<Rts>()?.send_and_wait(WrOpcode::RdmaRead)?;
        let contents = res.message();
        log::info!("Contents of server's buffer: '{}'", contents);
        read = Some(contents);

        res.write_message(RDMA_WRITE_MSG);
        log::info!("Now replacing it with: '{}'", RDMA_WRITE_MSG);
        res.qp::<Rts>()?.send_and_wait(WrOpcode::RdmaWrite)?;
    }
    res.channel().barrier()?;

    let mut written = None;
    if role == Role::Server {
        let contents = res.message();
        log::info!("Contents of server buffer: '{}'", contents);
        written = Some(contents);
    }

    Ok(Report {
        role,
        device_name: res.device_name().to_owned(),
        message,
        read,
        written,
    })
}
