use std::fmt;

/// Queue pair state.
///
/// Discriminants follow `enum ibv_qp_state`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum QpState {
    /// Reset.
    #[default]
    Reset = 0,

    /// Initialized.
    Init = 1,

    /// Ready To Receive.
    Rtr = 2,

    /// Ready To Send.
    Rts = 3,

    /// Send Queue Drain.
    Sqd = 4,

    /// Send Queue Error.
    Sqe = 5,

    /// Error.
    Error = 6,

    /// Unknown.
    Unknown = 7,
}

impl From<u32> for QpState {
    fn from(qp_state: u32) -> Self {
        match qp_state {
            0 => QpState::Reset,
            1 => QpState::Init,
            2 => QpState::Rtr,
            3 => QpState::Rts,
            4 => QpState::Sqd,
            5 => QpState::Sqe,
            6 => QpState::Error,
            _ => QpState::Unknown,
        }
    }
}

impl fmt::Display for QpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QpState::Reset => "RESET",
            QpState::Init => "INIT",
            QpState::Rtr => "RTR",
            QpState::Rts => "RTS",
            QpState::Sqd => "SQD",
            QpState::Sqe => "SQE",
            QpState::Error => "ERROR",
            QpState::Unknown => "UNKNOWN",
        })
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Compile-time queue pair state carried by [`Qp`](super::Qp).
pub trait State: sealed::Sealed {
    /// The runtime state this marker stands for.
    const STATE: QpState;
}

/// States in which receive work requests may be posted.
pub trait CanReceive: State {}

/// States in which send work requests may be posted.
pub trait CanSend: CanReceive {}

macro_rules! state_marker {
    ($(#[$meta:meta])* $name:ident => $state:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub enum $name {}

        impl sealed::Sealed for $name {}

        impl State for $name {
            const STATE: QpState = $state;
        }
    };
}

state_marker!(
    /// The QP is freshly created.
    Reset => QpState::Reset
);
state_marker!(
    /// The QP is bound to a port and accepts receive requests.
    Init => QpState::Init
);
state_marker!(
    /// The QP knows its peer and may receive.
    Rtr => QpState::Rtr
);
state_marker!(
    /// The QP is fully operational.
    Rts => QpState::Rts
);

impl CanReceive for Init {}
impl CanReceive for Rtr {}
impl CanReceive for Rts {}
impl CanSend for Rts {}
