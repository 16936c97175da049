//! The set of RDMA resources owned by one peer.

use std::io;
use std::time::Duration;

use crate::config::{Config, Role};
use crate::ctrl::{Bootstrap, ConnectionParams};
use crate::error::{Error, Resource, TeardownError};
use crate::rdma::cq::{self, Wc};
use crate::rdma::mr::{Buffer, Permission, MSG_SIZE};
use crate::rdma::nic::{select_device, PortAttr};
use crate::rdma::qp::{Qp, QpCaps, QpInitAttr, QpState, State};
use crate::rdma::type_alias::*;
use crate::rdma::wr::Sge;
use crate::verbs::{Owned, Verbs};

/// Device context, PD, CQ, buffer, MR and QP of one peer, together with the
/// bootstrap channel to the other peer.
///
/// Resources are released in reverse creation order, either explicitly with
/// [`ResourceSet::close`], which reports every failure, or on drop, which
/// only logs them.
pub struct ResourceSet<V: Verbs> {
    // Fields are dropped in declaration order.
    pub(crate) qp: Owned<V, V::Qp>,
    mr: Owned<V, V::Mr>,
    buf: Buffer,
    cq: Owned<V, V::Cq>,
    pd: Owned<V, V::Pd>,
    ctx: Owned<V, V::Context>,
    channel: Bootstrap,

    pub(crate) verbs: V,
    pub(crate) qp_state: QpState,
    pub(crate) remote: Option<ConnectionParams>,
    pub(crate) ib_port: PortNum,
    pub(crate) gid_index: Option<GidIndex>,
    role: Role,
    device_name: String,
    port_attr: PortAttr,
    lkey: LKey,
    rkey: RKey,
}

impl<V: Verbs> ResourceSet<V> {
    /// Open the bootstrap channel in the configured role, then create every
    /// RDMA resource.
    pub fn create(verbs: V, config: &Config) -> Result<Self, Error> {
        config.validate()?;
        let channel = Bootstrap::open(
            config.server_name.as_deref(),
            config.tcp_port,
            config.connect_retry(),
        )?;
        Self::create_with_channel(verbs, config, channel)
    }

    /// Create every RDMA resource over an already open bootstrap channel.
    ///
    /// On failure, whatever was created is released in reverse order and the
    /// channel is closed.
    pub fn create_with_channel(
        verbs: V,
        config: &Config,
        channel: Bootstrap,
    ) -> Result<Self, Error> {
        config.validate()?;

        let (ctx, device_name) = Self::open_device(&verbs, config.dev_name.as_deref())?;
        log::info!("IB device {} was opened", device_name);

        let port_attr = verbs.query_port(&ctx, config.ib_port).map_err(|source| {
            log::error!("failed to query port {}", config.ib_port);
            Error::PortQuery {
                port: config.ib_port,
                source,
            }
        })?;
        log::info!("port {}: {}", config.ib_port, port_attr);

        let pd = verbs.alloc_pd(&ctx).map_err(Error::resource(Resource::Pd))?;
        let pd = Owned::new(verbs.clone(), pd, Resource::Pd, V::dealloc_pd);

        // One entry is enough: at most one request is outstanding.
        let cq = verbs.create_cq(&ctx, 1).map_err(Error::resource(Resource::Cq))?;
        let cq = Owned::new(verbs.clone(), cq, Resource::Cq, V::destroy_cq);

        let buf = Buffer::zeroed(MSG_SIZE).map_err(Error::resource(Resource::Buffer))?;

        let perm = Permission::LOCAL_WRITE | Permission::REMOTE_READ | Permission::REMOTE_WRITE;
        // SAFETY: `buf` is dropped after the MR, as field order ensures.
        let mr = unsafe { verbs.reg_mr(&pd, buf.addr(), buf.len(), perm) }
            .map_err(Error::resource(Resource::Mr))?;
        let mr = Owned::new(verbs.clone(), mr, Resource::Mr, V::dereg_mr);
        let (lkey, rkey) = verbs.mr_keys(&mr);
        log::info!(
            "MR was registered with addr={:p}, lkey={:#x}, rkey={:#x}, flags={:?}",
            buf.addr(),
            lkey,
            rkey,
            perm
        );

        let init_attr = QpInitAttr::rc_signal_all(QpCaps::default());
        let qp = verbs
            .create_qp(&pd, &cq, &cq, &init_attr)
            .map_err(Error::resource(Resource::Qp))?;
        let qp = Owned::new(verbs.clone(), qp, Resource::Qp, V::destroy_qp);
        log::info!("QP was created, QP number={:#x}", verbs.qp_num(&qp));

        Ok(Self {
            qp,
            mr,
            buf,
            cq,
            pd,
            ctx,
            channel,
            verbs,
            qp_state: QpState::Reset,
            remote: None,
            ib_port: config.ib_port,
            gid_index: config.gid_index(),
            role: config.role(),
            device_name,
            port_attr,
            lkey,
            rkey,
        })
    }

    fn open_device(
        verbs: &V,
        wanted: Option<&str>,
    ) -> Result<(Owned<V, V::Context>, String), Error> {
        let devs = verbs
            .device_list()
            .map_err(Error::resource(Resource::DeviceList))?;
        log::info!("found {} device(s)", devs.len());

        let mut names = devs
            .iter()
            .map(|dev| verbs.device_name(dev))
            .collect::<io::Result<Vec<_>>>()
            .map_err(Error::resource(Resource::DeviceList))?;
        let index = select_device(names.as_slice(), wanted).inspect_err(|e| log::error!("{}", e))?;

        let ctx = verbs.open_device(&devs[index]).map_err(|e| {
            log::error!("couldn't get a handle for {}", names[index]);
            Error::resource(Resource::Device)(e)
        })?;
        let ctx = Owned::new(verbs.clone(), ctx, Resource::Device, V::close_device);

        // The device list is freed here; the context stays valid.
        drop(devs);
        Ok((ctx, names.swap_remove(index)))
    }

    /// Release everything in reverse creation order.
    ///
    /// Every step runs even if an earlier one failed. The buffer is freed
    /// even if its MR could not be deregistered.
    pub fn close(self) -> Result<(), TeardownError> {
        let Self {
            qp,
            mr,
            buf,
            cq,
            pd,
            ctx,
            channel,
            ..
        } = self;

        let mut err = TeardownError::default();
        err.record(Resource::Qp, qp.release());
        err.record(Resource::Mr, mr.release());
        drop(buf);
        err.record(Resource::Cq, cq.release());
        err.record(Resource::Pd, pd.release());
        err.record(Resource::Device, ctx.release());
        err.record(Resource::Channel, channel.close());
        err.into_result()
    }

    /// Get a view of the QP, checking that it is in state `S`.
    pub fn qp<S: State>(&mut self) -> Result<Qp<'_, V, S>, Error> {
        if self.qp_state != S::STATE {
            return Err(Error::QpState {
                expected: S::STATE,
                actual: self.qp_state,
            });
        }
        Ok(Qp::new(self))
    }

    /// Get the state the QP was last moved to.
    pub fn qp_state(&self) -> QpState {
        self.qp_state
    }

    /// Get the provider.
    pub fn verbs(&self) -> &V {
        &self.verbs
    }

    /// Get the provider handle of the QP.
    pub fn qp_handle(&self) -> &V::Qp {
        &self.qp
    }

    pub fn qp_num(&self) -> Qpn {
        self.verbs.qp_num(&self.qp)
    }

    /// Get the name of the selected device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn port_attr(&self) -> &PortAttr {
        &self.port_attr
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn lkey(&self) -> LKey {
        self.lkey
    }

    pub fn rkey(&self) -> RKey {
        self.rkey
    }

    /// Get the bootstrap channel.
    pub fn channel(&mut self) -> &mut Bootstrap {
        &mut self.channel
    }

    /// Get the peer's parameters, known once the handshake has run.
    pub fn remote(&self) -> Option<&ConnectionParams> {
        self.remote.as_ref()
    }

    /// Build the parameters the peer needs to reach this side.
    ///
    /// The GID is queried only if global routing is in use and is zero
    /// otherwise.
    pub fn local_params(&self) -> Result<ConnectionParams, Error> {
        let gid = match self.gid_index {
            Some(index) => self
                .verbs
                .query_gid(&self.ctx, self.ib_port, index)
                .map_err(|source| {
                    log::error!("could not get gid for port {}, index {}", self.ib_port, index);
                    Error::GidQuery {
                        port: self.ib_port,
                        index,
                        source,
                    }
                })?,
            None => Default::default(),
        };

        Ok(ConnectionParams {
            addr: self.buf.addr() as u64,
            rkey: self.rkey,
            qp_num: self.qp_num(),
            lid: self.port_attr.lid,
            gid,
        })
    }

    /// View the buffer.
    pub fn buf(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Mutably view the buffer.
    pub fn buf_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut_slice()
    }

    /// Store `msg` NUL-terminated at the start of the buffer.
    pub fn write_message(&mut self, msg: &str) {
        let buf = self.buf.as_mut_slice();
        let len = msg.len().min(buf.len() - 1);
        buf[..len].copy_from_slice(&msg.as_bytes()[..len]);
        buf[len] = 0;
    }

    /// Read the NUL-terminated text at the start of the buffer.
    pub fn message(&self) -> String {
        let buf = self.buf.as_slice();
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).into_owned()
    }

    /// Single scatter-gather element covering the whole buffer.
    pub(crate) fn sge(&self) -> Sge {
        Sge {
            addr: self.buf.addr() as u64,
            length: self.buf.len() as u32,
            lkey: self.lkey,
        }
    }

    /// Wait for one completion for up to `timeout`.
    ///
    /// Any failure, including a timeout, leaves the QP in the error state.
    pub fn poll_completion(&mut self, timeout: Duration) -> Result<Wc, Error> {
        cq::poll_completion(&self.verbs, &self.cq, timeout)
            .inspect_err(|_| self.qp_state = QpState::Error)
    }
}
