//! Host-side EtherCAT master core for LinMot servo drives.
//!
//! The crate drives one or more drives through a cyclic process-data
//! exchange on top of [`ethercrab`]: [`bus`] brings the adapter up and
//! writes the PDO map, [`cycle`] runs the bounded-jitter exchange loop on
//! its own thread, [`codec`] packs and unpacks the frames bit-exactly,
//! [`drive`] models one drive with its scaling and command protocol, and
//! [`command`] provides the client-side recipes (switch on, home, motion,
//! command table) that test sequences compose. Oscilloscope and latency
//! recordings land in bounded queues and can be dumped to CSV via
//! [`scope`].

pub mod bus;
pub mod codec;
pub mod command;
pub mod config;
pub mod cycle;
pub mod drive;
pub mod error;
pub mod scope;
pub mod shared;

pub use bus::{EthercatBus, EthercatMaster, ProcessBus};
pub use codec::{OutputFrame, RawInput};
pub use config::BusConfig;
pub use cycle::{CycleConfig, CycleHandle};
pub use drive::{DriveModel, DriveScaling, DriveStatus, MotionHeader, MotionParams};
pub use error::{CodecError, ConfigError, EngineError, ProtocolError, SetupError};
pub use shared::{LatencySample, ScopeSample};
