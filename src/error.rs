//! Error types.

use std::time::Duration;
use std::{fmt, io};

use thiserror::Error;

use crate::rdma::cq::WcStatus;
use crate::rdma::qp::QpState;
use crate::rdma::type_alias::*;

/// Kinds of resources owned by a [`ResourceSet`](crate::ResourceSet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Channel,
    DeviceList,
    Device,
    Pd,
    Cq,
    Buffer,
    Mr,
    Qp,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Channel => "bootstrap channel",
            Resource::DeviceList => "device list",
            Resource::Device => "device context",
            Resource::Pd => "protection domain",
            Resource::Cq => "completion queue",
            Resource::Buffer => "buffer",
            Resource::Mr => "memory region",
            Resource::Qp => "queue pair",
        })
    }
}

/// Every release step that failed during a best-effort teardown.
#[derive(Debug, Default)]
pub struct TeardownError {
    failures: Vec<(Resource, io::Error)>,
}

impl TeardownError {
    /// Record the outcome of one release step.
    pub(crate) fn record(&mut self, resource: Resource, result: io::Result<()>) {
        if let Err(e) = result {
            log::error!("failed to release {}: {}", resource, e);
            self.failures.push((resource, e));
        }
    }

    /// `Ok` if no release step failed.
    pub(crate) fn into_result(self) -> Result<(), Self> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Get the failed steps in the order they ran.
    pub fn failures(&self) -> &[(Resource, io::Error)] {
        &self.failures
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to release")?;
        for (i, (resource, e)) in self.failures.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{} ({})", sep, resource, e)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

/// Broad classes of failures, by the stage that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Resource,
    QpState,
    Handshake,
    Completion,
    Teardown,
}

/// Error type of every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no RDMA device found")]
    NoDevice,

    #[error("IB device {0} wasn't found")]
    DeviceNotFound(String),

    #[error("failed to query port {port}")]
    PortQuery {
        port: PortNum,
        #[source]
        source: io::Error,
    },

    #[error("failed to query GID {index} of port {port}")]
    GidQuery {
        port: PortNum,
        index: GidIndex,
        #[source]
        source: io::Error,
    },

    #[error("failed to create {resource}")]
    Resource {
        resource: Resource,
        #[source]
        source: io::Error,
    },

    #[error("failed to modify QP state from {from} to {to}")]
    QpTransition {
        from: QpState,
        to: QpState,
        #[source]
        source: io::Error,
    },

    #[error("QP is in state {actual}, expected {expected}")]
    QpState { expected: QpState, actual: QpState },

    #[error("bootstrap channel: {context}")]
    Bootstrap {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to post send work request")]
    PostSend(#[source] io::Error),

    #[error("failed to post receive work request")]
    PostRecv(#[source] io::Error),

    #[error("got bad completion with status {:#x} ({status}), vendor syndrome {vendor_err:#x}", .status.code())]
    BadCompletion { status: WcStatus, vendor_err: u32 },

    #[error("poll CQ failed")]
    PollCq(#[source] io::Error),

    #[error("completion wasn't found in the CQ after {0:?}")]
    PollTimeout(Duration),

    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

impl Error {
    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidConfig(_)
            | Error::NoDevice
            | Error::DeviceNotFound(_)
            | Error::PortQuery { .. }
            | Error::GidQuery { .. } => ErrorCategory::Configuration,
            Error::Resource { .. } => ErrorCategory::Resource,
            Error::QpTransition { .. } | Error::QpState { .. } => ErrorCategory::QpState,
            Error::Bootstrap { .. } => ErrorCategory::Handshake,
            Error::PostSend(_)
            | Error::PostRecv(_)
            | Error::BadCompletion { .. }
            | Error::PollCq(_)
            | Error::PollTimeout(_) => ErrorCategory::Completion,
            Error::Teardown(_) => ErrorCategory::Teardown,
        }
    }

    pub(crate) fn bootstrap(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| Error::Bootstrap { context, source }
    }

    pub(crate) fn resource(resource: Resource) -> impl FnOnce(io::Error) -> Self {
        move |source| Error::Resource { resource, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_collects_every_failure() {
        let mut err = TeardownError::default();
        err.record(Resource::Qp, Ok(()));
        err.record(Resource::Mr, Err(io::Error::from_raw_os_error(libc::EBUSY)));
        err.record(Resource::Pd, Err(io::Error::from_raw_os_error(libc::EINVAL)));

        let err = err.into_result().unwrap_err();
        let kinds: Vec<_> = err.failures().iter().map(|(r, _)| *r).collect();
        assert_eq!(kinds, [Resource::Mr, Resource::Pd]);
        assert!(err.to_string().starts_with("failed to release memory region ("));
        assert!(TeardownError::default().into_result().is_ok());
    }

    #[test]
    fn bad_completion_reports_syndrome() {
        let err = Error::BadCompletion {
            status: WcStatus::RemAccessErr,
            vendor_err: 0x88,
        };
        assert_eq!(err.category(), ErrorCategory::Completion);
        assert_eq!(
            err.to_string(),
            "got bad completion with status 0xa (remote access error), vendor syndrome 0x88"
        );
    }
}
