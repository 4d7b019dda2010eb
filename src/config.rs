use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::codec::{MAX_MON_CHANNELS, MAX_PAR_CHANNELS};
use crate::error::ConfigError;

/// Messages at or above this level reach the info telemetry queue.
pub const LOG_LEVEL_INFO: u8 = 20;
/// Queue-drop warnings are gated at this level.
pub const LOG_LEVEL_WARNING: u8 = 30;
/// Messages at or above this level reach the error telemetry queue.
pub const LOG_LEVEL_ERROR: u8 = 40;

/// Static configuration for one bus session.
///
/// The monitoring/parameter channel counts are baked into the PDO map at
/// bring-up and must not change for the life of the session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BusConfig {
    /// Network interface the EtherCAT frames are sent on, e.g. `enp2s0` or
    /// `\Device\NPF_{...}`. Consumed opaquely.
    pub interface: String,
    /// Number of drives expected on the bus. Enumeration must agree exactly.
    pub expected_subdevices: usize,
    /// Cycle time in seconds. Valid range 100 µs ..= 1 s.
    pub cycle_time: f64,
    /// Monitoring channels mapped into the input PDO, 0..=4.
    pub monitoring_channels: usize,
    /// Parameter channels mapped into the output PDO, 0..=4.
    pub parameter_channels: usize,
    /// Telemetry gate: 20 passes info, 40 passes errors as well.
    pub log_level: u8,
    /// Capacity of the bounded oscilloscope queue, in cycles.
    pub scope_capacity: usize,
    /// Capacity of the bounded latency queue, in cycles.
    pub latency_capacity: usize,
    /// Capture every cycle's inputs into the scope queue while the scope
    /// flag is raised.
    pub record_scope: bool,
    /// Record per-cycle loop latency when the latency flag is raised.
    pub record_latency: bool,
    /// Consecutive missed deadlines tolerated before the engine gives up.
    pub max_cycle_overrun: u32,
    /// Consecutive failed operational-state probes tolerated per subdevice.
    pub max_subdevice_comm_attempts: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            expected_subdevices: 1,
            cycle_time: 0.003,
            monitoring_channels: 4,
            parameter_channels: 0,
            log_level: LOG_LEVEL_INFO,
            scope_capacity: 65_536,
            latency_capacity: 65_536,
            record_scope: true,
            record_latency: false,
            max_cycle_overrun: 20,
            max_subdevice_comm_attempts: 10,
        }
    }
}

impl BusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expected_subdevices == 0 {
            return Err(ConfigError::new(
                "expected_subdevices",
                "must be greater than 0",
            ));
        }
        if !(1e-4..=1.0).contains(&self.cycle_time) {
            return Err(ConfigError::new(
                "cycle_time",
                format!(
                    "{} s is out of range, must be between 0.0001 s and 1 s",
                    self.cycle_time
                ),
            ));
        }
        if self.monitoring_channels > MAX_MON_CHANNELS {
            return Err(ConfigError::new(
                "monitoring_channels",
                format!("must be between 0 and {MAX_MON_CHANNELS}"),
            ));
        }
        if self.parameter_channels > MAX_PAR_CHANNELS {
            return Err(ConfigError::new(
                "parameter_channels",
                format!("must be between 0 and {MAX_PAR_CHANNELS}"),
            ));
        }
        Ok(())
    }

    pub fn cycle_duration(&self) -> Duration {
        Duration::from_secs_f64(self.cycle_time)
    }

    /// Bounded wait for the input snapshot lock, leaving headroom inside the
    /// cycle: `max(cycle_time − 10 ms, 4 ms)`.
    pub fn lock_timeout(&self) -> Duration {
        self.cycle_duration()
            .saturating_sub(Duration::from_millis(10))
            .max(Duration::from_millis(4))
    }

    /// Minimum spacing between the two edges of switch-on and error-ack
    /// sequences: `max(2 · cycle_time, 1 ms)`.
    pub fn edge_delay(&self) -> Duration {
        (2 * self.cycle_duration()).max(Duration::from_millis(1))
    }
}
