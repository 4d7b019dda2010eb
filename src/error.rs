use ethercrab::SubDeviceState;
use thiserror::Error;

/// A configuration value rejected before any bus access happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration field `{field}`: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised while opening the adapter and bringing the bus into OP.
///
/// These are reported synchronously to the caller of
/// [`bring_up`](crate::bus::EthercatMaster::bring_up); once the cycle engine
/// is running, failures travel through the error telemetry queue instead.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not open EtherCAT adapter: {0}")]
    AdapterOpen(#[from] std::io::Error),

    #[error("expected {expected} subdevices on the bus, found {found}")]
    SlaveCountMismatch { expected: usize, found: usize },

    /// A mailbox transfer failed while writing the PDO map. This happens
    /// sporadically right after powering the drives; retrying the bring-up
    /// usually succeeds.
    #[error(
        "SDO transfer {index:#06x}:{sub_index} failed: {source} \
         (often transient at startup, retrying the bring-up usually succeeds)"
    )]
    Sdo {
        index: u16,
        sub_index: u8,
        #[source]
        source: ethercrab::error::Error,
    },

    #[error("bus did not reach state {target:?} (reached {reached:?}): {source}")]
    StateTransition {
        target: SubDeviceState,
        reached: Option<SubDeviceState>,
        #[source]
        source: ethercrab::error::Error,
    },
}

impl SetupError {
    pub(crate) fn sdo(index: u16, sub_index: u8, source: ethercrab::error::Error) -> Self {
        Self::Sdo {
            index,
            sub_index,
            source,
        }
    }

    pub(crate) fn state_transition(
        target: SubDeviceState,
        source: ethercrab::error::Error,
    ) -> Self {
        let reached = match source {
            ethercrab::error::Error::InvalidState { actual, .. } => Some(actual),
            _ => None,
        };
        Self::StateTransition {
            target,
            reached,
            source,
        }
    }
}

/// Fatal conditions detected by the running cycle engine.
///
/// The engine never returns these across the thread boundary directly; it
/// publishes them to the error queue, sets the stop signal and exits. The
/// value is also the engine thread's return value, observable via
/// [`CycleHandle::stop`](crate::cycle::CycleHandle::stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A subdevice failed the operational-state probe more times in a row
    /// than `max_subdevice_comm_attempts` allows. Zero-based bus position.
    #[error("subdevice {0} is no longer in operational state")]
    SubDeviceOffline(usize),

    #[error("cycle deadline repeatedly overrun, stopping communication")]
    CycleOverrun,

    #[error("interrupted by stop request")]
    Interrupted,
}

/// Frame encode/decode failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Violations of the motion-command protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Motion parameters would spill past `mc_para_word09`.
    #[error("motion parameters exceed the 10 command parameter words")]
    ParameterOverflow,
}
