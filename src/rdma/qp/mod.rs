//! Queue pair and its state machine.
//!
//! The QP of a [`ResourceSet`] is reached through a [`Qp`] view whose type
//! parameter is the state the QP is in. Transitions consume the view and
//! return one in the new state, so posting on a QP that is not ready is a
//! type error rather than a fabric error.

mod attr;
mod builder;
mod state;

use std::marker::PhantomData;
use std::time::Duration;

pub use self::attr::*;
pub use self::builder::*;
pub use self::state::*;
use crate::ctrl::ConnectionParams;
use crate::error::Error;
use crate::rdma::cq::{Wc, MAX_POLL_CQ_TIMEOUT};
use crate::rdma::wr::*;
use crate::resources::ResourceSet;
use crate::verbs::Verbs;

/// View of the QP of a [`ResourceSet`] in state `S`.
pub struct Qp<'r, V: Verbs, S: State> {
    res: &'r mut ResourceSet<V>,
    _state: PhantomData<S>,
}

impl<'r, V: Verbs, S: State> Qp<'r, V, S> {
    pub(crate) fn new(res: &'r mut ResourceSet<V>) -> Self {
        Self {
            res,
            _state: PhantomData,
        }
    }

    /// Get the resource set the QP belongs to.
    pub fn resources(&mut self) -> &mut ResourceSet<V> {
        self.res
    }

    fn transition<T: State>(self, attr: &QpAttr) -> Result<Qp<'r, V, T>, Error> {
        let res = self.res;
        match res.verbs.modify_qp(&res.qp, attr) {
            Ok(()) => {
                res.qp_state = T::STATE;
                log::debug!("QP state was changed from {} to {}", S::STATE, T::STATE);
                Ok(Qp::new(res))
            }
            Err(source) => {
                log::error!("failed to modify QP state to {}", T::STATE);
                res.qp_state = QpState::Error;
                Err(Error::QpTransition {
                    from: S::STATE,
                    to: T::STATE,
                    source,
                })
            }
        }
    }
}

impl<'r, V: Verbs> Qp<'r, V, Reset> {
    /// Bind the QP to the configured port.
    pub fn modify_to_init(self) -> Result<Qp<'r, V, Init>, Error> {
        let attr = QpAttr::reset_to_init(self.res.ib_port);
        self.transition(&attr)
    }
}

impl<'r, V: Verbs> Qp<'r, V, Init> {
    /// Point the QP at `remote`.
    pub fn modify_to_rtr(self, remote: &ConnectionParams) -> Result<Qp<'r, V, Rtr>, Error> {
        let attr = QpAttr::init_to_rtr(self.res.ib_port, self.res.gid_index, remote);
        self.transition(&attr)
    }
}

impl<'r, V: Verbs> Qp<'r, V, Rtr> {
    pub fn modify_to_rts(self) -> Result<Qp<'r, V, Rts>, Error> {
        self.transition(&QpAttr::rtr_to_rts())
    }
}

impl<'r, V: Verbs, S: CanReceive> Qp<'r, V, S> {
    /// Post a receive request covering the whole buffer.
    pub fn post_receive(&mut self) -> Result<(), Error> {
        let wr = RecvWr {
            wr_id: 0,
            sge: self.res.sge(),
        };
        self.res.verbs.post_recv(&self.res.qp, &wr).map_err(|e| {
            log::error!("failed to post RR");
            Error::PostRecv(e)
        })?;
        log::debug!("Receive Request was posted");
        Ok(())
    }

    /// Receive one message and return the NUL-terminated text at the start
    /// of the buffer.
    pub fn receive_message(&mut self) -> Result<String, Error> {
        self.post_receive()?;
        self.poll_completion()?;
        Ok(self.res.message())
    }

    /// Wait for one completion for up to [`MAX_POLL_CQ_TIMEOUT`].
    pub fn poll_completion(&mut self) -> Result<Wc, Error> {
        self.res.poll_completion(MAX_POLL_CQ_TIMEOUT)
    }

    /// Wait for one completion for up to `timeout`.
    pub fn poll_completion_timeout(&mut self, timeout: Duration) -> Result<Wc, Error> {
        self.res.poll_completion(timeout)
    }
}

impl<'r, V: Verbs> Qp<'r, V, Rts> {
    /// Post a signaled send request covering the whole buffer.
    ///
    /// RDMA read and write target the peer's buffer as advertised in the
    /// handshake.
    pub fn post_send(&mut self, opcode: WrOpcode) -> Result<(), Error> {
        let remote = match self.res.remote {
            Some(remote) if opcode.is_one_sided() => Some(RemoteAddr {
                addr: remote.addr,
                rkey: remote.rkey,
            }),
            _ => None,
        };
        let wr = SendWr {
            wr_id: 0,
            opcode,
            sge: self.res.sge(),
            signaled: true,
            remote,
        };

        self.res.verbs.post_send(&self.res.qp, &wr).map_err(|e| {
            log::error!("failed to post SR");
            Error::PostSend(e)
        })?;
        match opcode {
            WrOpcode::Send => log::debug!("Send Request was posted"),
            WrOpcode::RdmaRead => log::debug!("RDMA Read Request was posted"),
            WrOpcode::RdmaWrite => log::debug!("RDMA Write Request was posted"),
        }
        Ok(())
    }

    /// Post a send request and wait for its completion.
    pub fn send_and_wait(&mut self, opcode: WrOpcode) -> Result<Wc, Error> {
        self.post_send(opcode)?;
        self.poll_completion()
    }
}
