//! Per-drive value object: decoded inputs, derived status, pending outputs
//! and the motion-command protocol.
//!
//! One `DriveModel` exists per device from identity readout until teardown.
//! Models are owned by the control thread; the cycle engine only ever sees
//! the packed output images handed over through the update mailbox. Do not
//! share a model across threads, copy it.

use arrayvec::ArrayVec;
use bitflags::bitflags;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::codec::{
    self, decode_input, input_frame_len, OutputFrame, RawInput, MC_PARA_WORDS,
};
use crate::error::{CodecError, ProtocolError};

bitflags! {
    /// LinMot drive control word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlWord: u16 {
        const SWITCH_ON = 1 << 0;
        const VOLTAGE_ENABLE = 1 << 1;
        /// Active low.
        const QUICK_STOP = 1 << 2;
        const ENABLE_OPERATION = 1 << 3;
        /// Active low.
        const ABORT = 1 << 4;
        /// Active low.
        const FREEZE = 1 << 5;
        const GO_TO_POSITION = 1 << 6;
        const ERROR_ACKNOWLEDGE = 1 << 7;
        const JOG_MOVE_PLUS = 1 << 8;
        const JOG_MOVE_MINUS = 1 << 9;
        const SPECIAL_MODE = 1 << 10;
        const HOME = 1 << 11;
        const CLEARANCE_CHECK = 1 << 12;
        const GO_TO_INITIAL_POSITION = 1 << 13;
        const PHASE_SEARCH = 1 << 15;
    }
}

bitflags! {
    /// LinMot drive status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusWord: u16 {
        const OPERATION_ENABLED = 1 << 0;
        const SWITCH_ON_ACTIVE = 1 << 1;
        const ENABLE_OPERATION = 1 << 2;
        const ERROR = 1 << 3;
        const VOLTAGE_ENABLE = 1 << 4;
        const QUICK_STOP = 1 << 5;
        const SWITCH_ON_LOCKED = 1 << 6;
        const WARNING = 1 << 7;
        const EVENT_HANDLER_ACTIVE = 1 << 8;
        const SPECIAL_MOTION_ACTIVE = 1 << 9;
        const IN_TARGET_POSITION = 1 << 10;
        const HOMED = 1 << 11;
        const FATAL_ERROR = 1 << 12;
        const MOTION_ACTIVE = 1 << 13;
        const RANGE_INDICATOR_1 = 1 << 14;
        const RANGE_INDICATOR_2 = 1 << 15;
    }
}

/// The state-var page that marks the drive's error state; the low byte then
/// carries the error code.
const STATE_VAR_ERROR_PAGE: u16 = 0x0400;

/// Header of a command-table trigger.
const COMMAND_TABLE_HEADER: u16 = 0x2000;

/// Scaling block mapping raw drive counts to physical units.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DriveScaling {
    pub is_rotary: bool,
    pub pos_scale_num: f64,
    pub pos_scale_den: f64,
    /// Counts per mechanical revolution, used instead of `unit_scale` for
    /// rotary motors when scaling motion commands.
    pub modulo_factor: i64,
    /// Newton per count on monitoring channel 1.
    pub force_scale: f64,
    /// Volt per count on monitoring channel 2 (2⁻⁸ · 1.25 V).
    pub analog_diff_voltage_scale: f64,
    /// Volt per count on monitoring channel 3.
    pub analog_voltage_scale: f64,
    /// Newton per volt applied to the channel-4 filtered voltage.
    pub load_cell_scale: f64,
}

impl Default for DriveScaling {
    fn default() -> Self {
        Self {
            is_rotary: false,
            pos_scale_num: 10_000.0,
            pos_scale_den: 1.0,
            modulo_factor: 360_000,
            force_scale: 0.1,
            analog_diff_voltage_scale: 0.004_882_812_5,
            analog_voltage_scale: 0.002_441_406_25,
            load_cell_scale: 19.6133,
        }
    }
}

impl DriveScaling {
    /// Position counts per unit (mm for linear motors).
    pub fn unit_scale(&self) -> f64 {
        self.pos_scale_num / self.pos_scale_den
    }

    /// Scale applied to motion-command parameters.
    pub fn motion_scale(&self) -> f64 {
        if self.is_rotary {
            self.modulo_factor as f64
        } else {
            self.unit_scale()
        }
    }
}

/// Physical status derived from one decoded input frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriveStatus {
    pub operation_enabled: bool,
    pub switch_on_locked: bool,
    pub homed: bool,
    pub motion_active: bool,
    pub warning: bool,
    pub error: bool,
    pub error_code: u8,
    pub demand_position: f64,
    pub actual_position: f64,
    pub difference_position: f64,
    pub actual_current: f64,
    pub measured_force: f64,
    pub analog_diff_voltage: f64,
    pub analog_voltage: f64,
    pub analog_diff_voltage_filtered: f64,
    pub estimated_analog_force: f64,
}

impl DriveStatus {
    /// Field names in frame-derivation order; also the scope CSV header.
    pub const FIELD_NAMES: [&'static str; 16] = [
        "operation_enabled",
        "switch_on_locked",
        "homed",
        "motion_active",
        "warning",
        "error",
        "error_code",
        "demand_position",
        "actual_position",
        "difference_position",
        "actual_current",
        "measured_force",
        "analog_diff_voltage",
        "analog_voltage",
        "analog_diff_voltage_filtered",
        "estimated_analog_force",
    ];

    /// Values in [`FIELD_NAMES`](Self::FIELD_NAMES) order.
    pub fn csv_record(&self) -> [String; 16] {
        [
            self.operation_enabled.to_string(),
            self.switch_on_locked.to_string(),
            self.homed.to_string(),
            self.motion_active.to_string(),
            self.warning.to_string(),
            self.error.to_string(),
            self.error_code.to_string(),
            self.demand_position.to_string(),
            self.actual_position.to_string(),
            self.difference_position.to_string(),
            self.actual_current.to_string(),
            self.measured_force.to_string(),
            self.analog_diff_voltage.to_string(),
            self.analog_voltage.to_string(),
            self.analog_diff_voltage_filtered.to_string(),
            self.estimated_analog_force.to_string(),
        ]
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn status_fields(raw: &RawInput) -> DriveStatus {
    let status_word = StatusWord::from_bits_retain(raw.status_word);
    let error_code = if raw.state_var & 0xFF00 == STATE_VAR_ERROR_PAGE {
        (raw.state_var & 0x00FF) as u8
    } else {
        0
    };

    DriveStatus {
        operation_enabled: status_word.contains(StatusWord::OPERATION_ENABLED),
        switch_on_locked: status_word.contains(StatusWord::SWITCH_ON_LOCKED),
        homed: status_word.contains(StatusWord::HOMED),
        motion_active: status_word.contains(StatusWord::MOTION_ACTIVE),
        warning: status_word.contains(StatusWord::WARNING),
        error: status_word.contains(StatusWord::ERROR),
        error_code,
        ..Default::default()
    }
}

fn scaled_fields(status: &mut DriveStatus, raw: &RawInput, scaling: &DriveScaling) {
    let unit_scale = scaling.unit_scale();
    status.demand_position = f64::from(raw.demand_pos) / unit_scale;
    status.actual_position = f64::from(raw.actual_pos) / unit_scale;
    status.difference_position = round4(status.demand_position - status.actual_position);
    status.actual_current = f64::from(raw.demand_curr as i16) / 1000.0;
    status.analog_diff_voltage_filtered =
        f64::from(raw.filtered_channel()) * scaling.analog_diff_voltage_scale;
    status.estimated_analog_force =
        status.analog_diff_voltage_filtered * scaling.load_cell_scale;
}

/// Derives the physical status from a raw frame. Pure; the same inputs and
/// scaling always yield the same status. Monitoring channels keep their full
/// 32-bit signed view here.
pub fn derive_status(raw: &RawInput, scaling: &DriveScaling) -> DriveStatus {
    let mut status = status_fields(raw);
    scaled_fields(&mut status, raw, scaling);
    status.measured_force = f64::from(raw.mon_channel(1)) * scaling.force_scale;
    status.analog_diff_voltage =
        f64::from(raw.mon_channel(2)) * scaling.analog_diff_voltage_scale;
    status.analog_voltage = f64::from(raw.mon_channel(3)) * scaling.analog_voltage_scale;
    status
}

/// Status derivation for the oscilloscope CSV path, which records the
/// historical 16-bit signed view of every monitoring channel except the
/// last (the filtered float channel).
pub fn derive_scope_status(raw: &RawInput, scaling: &DriveScaling) -> DriveStatus {
    let last = raw.mon.len();
    let scope_channel = |channel: usize| -> i32 {
        if channel < last {
            codec::reinterpret_s16(raw.mon_channel(channel))
        } else {
            0
        }
    };

    let mut status = status_fields(raw);
    scaled_fields(&mut status, raw, scaling);
    status.measured_force = f64::from(scope_channel(1)) * scaling.force_scale;
    status.analog_diff_voltage =
        f64::from(scope_channel(2)) * scaling.analog_diff_voltage_scale;
    status.analog_voltage = f64::from(scope_channel(3)) * scaling.analog_voltage_scale;
    status
}

/// Stamps the 4-bit command counter into a header or config control word.
///
/// The drive only accepts a command whose counter differs from the one it
/// last reported, so the counter is always computed from the most recent
/// decoded input, never remembered from what was sent.
pub fn stamp_command_counter(header: u16, counter_source: u16) -> u16 {
    let next = ((counter_source & 0x000F) + 1) % 16;
    (header & 0xFFF0) | next
}

/// Motion command interpolator selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionHeader {
    /// Velocity/acceleration interpolator, absolute target (0x0100).
    AbsoluteVai,
    /// Velocity/acceleration interpolator, relative target (0x0110).
    RelativeVai,
    /// Jerk-limited interpolator, absolute target (0x3A00).
    AbsoluteVaji,
    /// Jerk-limited interpolator, relative target (0x3A10).
    RelativeVaji,
    /// Increment of the actual position with progress reset (0x0D90).
    IncrActPosReset,
    /// Sine profile, absolute target (0x0E00).
    AbsoluteSin,
    /// Sine profile, relative target (0x0E10).
    RelativeSin,
}

impl MotionHeader {
    pub fn base(self) -> u16 {
        match self {
            Self::AbsoluteVai => 0x0100,
            Self::RelativeVai => 0x0110,
            Self::AbsoluteVaji => 0x3A00,
            Self::RelativeVaji => 0x3A10,
            Self::IncrActPosReset => 0x0D90,
            Self::AbsoluteSin => 0x0E00,
            Self::RelativeSin => 0x0E10,
        }
    }

    /// Sine profiles take a single combined acceleration parameter.
    fn combined_acceleration(self) -> bool {
        matches!(self, Self::AbsoluteSin | Self::RelativeSin)
    }

    fn requires_jerk(self) -> bool {
        matches!(self, Self::AbsoluteVaji | Self::RelativeVaji)
    }
}

/// Motion parameters in physical units (mm, mm/s, mm/s², mm/s³ for linear
/// motors; degrees and derivatives for rotary ones).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionParams {
    pub target: f64,
    pub max_velocity: f64,
    pub acceleration: f64,
    pub deceleration: f64,
    pub jerk: f64,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            target: 0.0,
            max_velocity: 0.0,
            acceleration: 0.0,
            deceleration: 0.0,
            jerk: 100_000.0,
        }
    }
}

/// Splits a scaled 32-bit payload into low and high parameter words.
/// Truncates toward zero, as the drive tooling does.
fn push_scaled(
    slots: &mut ArrayVec<u16, MC_PARA_WORDS>,
    value: f64,
) -> Result<(), ProtocolError> {
    let raw = value as i64 as u32;
    slots
        .try_push((raw & 0xFFFF) as u16)
        .map_err(|_| ProtocolError::ParameterOverflow)?;
    slots
        .try_push((raw >> 16) as u16)
        .map_err(|_| ProtocolError::ParameterOverflow)?;
    Ok(())
}

/// One LinMot drive as seen by the control thread.
#[derive(Debug, Clone)]
pub struct DriveModel {
    /// 1-based device position on the bus.
    pub index: usize,
    /// Drive type string from the identity object, empty when unreadable.
    pub drive_type: String,
    pub scaling: DriveScaling,
    pub inputs: RawInput,
    pub status: DriveStatus,
    pub outputs: OutputFrame,
    mon_channels: usize,
}

impl DriveModel {
    pub fn new(index: usize, mon_channels: usize, par_channels: usize) -> Self {
        Self {
            index,
            drive_type: String::new(),
            scaling: DriveScaling::default(),
            inputs: RawInput::default(),
            status: DriveStatus::default(),
            outputs: OutputFrame::new(par_channels),
            mon_channels,
        }
    }

    pub fn with_drive_type(mut self, drive_type: impl Into<String>) -> Self {
        self.drive_type = drive_type.into();
        self
    }

    pub fn mon_channels(&self) -> usize {
        self.mon_channels
    }

    /// Decodes this drive's slice of a full-bus input snapshot and refreshes
    /// the derived status.
    pub fn refresh(&mut self, snapshot: &[u8]) -> Result<(), CodecError> {
        let frame_len = input_frame_len(self.mon_channels);
        let start = (self.index - 1) * frame_len;
        let frame = snapshot
            .get(start..start + frame_len)
            .ok_or(CodecError::LengthMismatch {
                expected: self.index * frame_len,
                actual: snapshot.len(),
            })?;
        self.inputs = decode_input(frame, self.mon_channels)?;
        self.status = derive_status(&self.inputs, &self.scaling);
        Ok(())
    }

    fn set_control(&mut self, flags: ControlWord, on: bool) {
        let mut word = ControlWord::from_bits_retain(self.outputs.control_word);
        word.set(flags, on);
        self.outputs.control_word = word.bits();
    }

    /// Sets or clears the switch-on bit. The drive needs a rising edge, so
    /// switching on goes through clear-then-set with at least two cycles
    /// between the sends.
    pub fn set_switch_on(&mut self, on: bool) {
        self.set_control(ControlWord::SWITCH_ON, on);
    }

    /// Sets or clears the home bit; homing runs while the bit is held.
    pub fn set_home(&mut self, on: bool) {
        self.set_control(ControlWord::HOME, on);
    }

    /// First error-acknowledge edge: raise bit 7 with the switch-on bit
    /// cleared. Hold for at least two cycles before [`end_error_ack`].
    ///
    /// [`end_error_ack`]: Self::end_error_ack
    pub fn begin_error_ack(&mut self) {
        self.set_control(ControlWord::ERROR_ACKNOWLEDGE, true);
        self.set_control(ControlWord::SWITCH_ON, false);
    }

    /// Second error-acknowledge edge: drop bit 7 again.
    pub fn end_error_ack(&mut self) {
        self.set_control(ControlWord::ERROR_ACKNOWLEDGE, false);
    }

    /// Writes a motion command header with freshly stamped command counter
    /// and scaled parameters. On error the output image is left untouched.
    pub fn apply_motion(
        &mut self,
        kind: MotionHeader,
        params: &MotionParams,
    ) -> Result<(), ProtocolError> {
        let scale = self.scaling.motion_scale();
        let mut slots: ArrayVec<u16, MC_PARA_WORDS> = ArrayVec::new();
        push_scaled(&mut slots, params.target * scale)?;
        push_scaled(&mut slots, params.max_velocity * scale * 100.0)?;
        push_scaled(&mut slots, params.acceleration * scale * 10.0)?;
        if !kind.combined_acceleration() {
            push_scaled(&mut slots, params.deceleration * scale * 10.0)?;
        }
        if kind.requires_jerk() {
            push_scaled(&mut slots, params.jerk * scale)?;
        }

        self.outputs.mc_header = stamp_command_counter(kind.base(), self.inputs.state_var);
        self.outputs.mc_para[..slots.len()].copy_from_slice(&slots);
        Ok(())
    }

    /// Triggers a command-table entry.
    pub fn trigger_command_table(&mut self, entry: u16) {
        self.outputs.mc_header =
            stamp_command_counter(COMMAND_TABLE_HEADER, self.inputs.state_var);
        self.outputs.mc_para[0] = entry;
        self.outputs.mc_para[1] = 0;
    }

    /// Writes a configuration-module command. The lower nibble of
    /// `cfg_control` is stamped from the last reported `cfg_status`.
    pub fn apply_config(&mut self, cfg_control: u16, cfg_index: u16, cfg_value: Option<i32>) {
        self.outputs.cfg_control = stamp_command_counter(cfg_control, self.inputs.cfg_status);
        self.outputs.cfg_index_out = cfg_index;
        if let Some(value) = cfg_value {
            self.outputs.cfg_value_out = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_state_var(state_var: u16) -> DriveModel {
        let mut model = DriveModel::new(1, 4, 0);
        model.inputs.state_var = state_var;
        model
    }

    #[test]
    fn default_output_image_uses_boot_control_word() {
        let model = DriveModel::new(1, 4, 0);
        assert_eq!(model.outputs.control_word, 0x003E);
    }

    #[test]
    fn switch_on_and_home_bits() {
        let mut model = DriveModel::new(1, 4, 0);
        model.set_switch_on(true);
        assert_eq!(model.outputs.control_word, 0x003F);
        model.set_home(true);
        assert_eq!(model.outputs.control_word, 0x083F);
        model.set_home(false);
        model.set_switch_on(false);
        assert_eq!(model.outputs.control_word, 0x003E);
    }

    #[test]
    fn error_ack_edges() {
        let mut model = DriveModel::new(1, 4, 0);
        model.set_switch_on(true);
        model.begin_error_ack();
        assert_eq!(model.outputs.control_word & 0x0080, 0x0080);
        assert_eq!(model.outputs.control_word & 0x0001, 0);
        model.end_error_ack();
        assert_eq!(model.outputs.control_word & 0x0080, 0);
    }

    #[test]
    fn counter_stamp_increments_and_wraps() {
        for last in 0u16..16 {
            let stamped = stamp_command_counter(0x0100, 0x2400 | last);
            assert_eq!(stamped & 0xFFF0, 0x0100);
            assert_eq!(stamped & 0x000F, (last + 1) % 16);
        }
    }

    #[test]
    fn motion_command_counter_wrap_from_fifteen() {
        // state_var lower nibble 15 wraps the stamped counter to 0.
        let mut model = model_with_state_var(0x240F);
        model
            .apply_motion(
                MotionHeader::AbsoluteVai,
                &MotionParams {
                    target: 50.0,
                    max_velocity: 0.01,
                    acceleration: 0.1,
                    deceleration: 0.1,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(model.outputs.mc_header, 0x0100);
        // 50 mm · 10000 = 500000 = 0x0007_A120, split low then high.
        assert_eq!(model.outputs.mc_para[0], 0xA120);
        assert_eq!(model.outputs.mc_para[1], 0x0007);
        // 0.01 · 10000 · 100 = 10000.
        assert_eq!(model.outputs.mc_para[2], 10_000);
        assert_eq!(model.outputs.mc_para[3], 0);
        // 0.1 · 10000 · 10 = 10000 for both ramps.
        assert_eq!(model.outputs.mc_para[4], 10_000);
        assert_eq!(model.outputs.mc_para[5], 0);
        assert_eq!(model.outputs.mc_para[6], 10_000);
        assert_eq!(model.outputs.mc_para[7], 0);
    }

    #[test]
    fn vaji_fills_all_ten_parameter_words() {
        let mut model = model_with_state_var(0x0802);
        model
            .apply_motion(
                MotionHeader::RelativeVaji,
                &MotionParams {
                    target: 1.0,
                    max_velocity: 0.5,
                    acceleration: 1.0,
                    deceleration: 1.0,
                    jerk: 2.0,
                },
            )
            .unwrap();

        assert_eq!(model.outputs.mc_header, 0x3A13);
        // jerk occupies the last pair: 2 · 10000 = 20000.
        assert_eq!(model.outputs.mc_para[8], 20_000);
        assert_eq!(model.outputs.mc_para[9], 0);
    }

    #[test]
    fn sine_profile_combines_the_ramps() {
        let mut model = model_with_state_var(0x0800);
        model
            .apply_motion(
                MotionHeader::AbsoluteSin,
                &MotionParams {
                    target: 10.0,
                    max_velocity: 0.1,
                    acceleration: 0.5,
                    deceleration: 99.0, // ignored for sine profiles
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(model.outputs.mc_header & 0xFFF0, 0x0E00);
        // target, vmax and the combined ramp: three pairs, rest untouched.
        assert_eq!(model.outputs.mc_para[4], 50_000);
        assert_eq!(model.outputs.mc_para[6], 0);
    }

    #[test]
    fn negative_target_packs_twos_complement() {
        let mut model = model_with_state_var(0x0800);
        model
            .apply_motion(
                MotionHeader::AbsoluteVai,
                &MotionParams {
                    target: -0.5, // −5000 counts
                    max_velocity: 0.01,
                    acceleration: 0.1,
                    deceleration: 0.1,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(model.outputs.mc_para[0], 0xEC78);
        assert_eq!(model.outputs.mc_para[1], 0xFFFF);
    }

    #[test]
    fn command_table_trigger() {
        let mut model = model_with_state_var(0x2200);
        model.outputs.mc_para[1] = 0x5555;
        model.outputs.mc_para[2] = 0x7777;
        model.trigger_command_table(1);

        assert_eq!(model.outputs.mc_header, 0x2001);
        assert_eq!(model.outputs.mc_para[0], 0x0001);
        assert_eq!(model.outputs.mc_para[1], 0x0000);
        assert_eq!(model.outputs.mc_para[2], 0x7777);
    }

    #[test]
    fn config_counter_comes_from_cfg_status() {
        let mut model = DriveModel::new(1, 4, 0);
        model.inputs.cfg_status = 0x000F;
        model.apply_config(0x1100, 0x17B0, Some(-5));
        assert_eq!(model.outputs.cfg_control, 0x1100);
        assert_eq!(model.outputs.cfg_index_out, 0x17B0);
        assert_eq!(model.outputs.cfg_value_out, -5);

        model.inputs.cfg_status = 0x0003;
        model.apply_config(0x1100, 0x17B1, None);
        assert_eq!(model.outputs.cfg_control, 0x1104);
        assert_eq!(model.outputs.cfg_value_out, -5);
    }

    #[test]
    fn error_code_follows_state_var_page() {
        let mut raw = RawInput::default();
        raw.state_var = 0x0442;
        assert_eq!(derive_status(&raw, &DriveScaling::default()).error_code, 0x42);

        raw.state_var = 0x0842;
        assert_eq!(derive_status(&raw, &DriveScaling::default()).error_code, 0);

        raw.state_var = 0x04FF;
        assert_eq!(derive_status(&raw, &DriveScaling::default()).error_code, 0xFF);
    }

    #[test]
    fn derived_positions_and_current() {
        let mut raw = RawInput::default();
        raw.demand_pos = 250_000;
        raw.actual_pos = 249_000;
        raw.demand_curr = 0x0001_0000 + 1500; // upper bytes ignored by the i16 view
        let status = derive_status(&raw, &DriveScaling::default());
        assert_eq!(status.demand_position, 25.0);
        assert_eq!(status.actual_position, 24.9);
        assert_eq!(status.difference_position, 0.1);
        assert_eq!(status.actual_current, 1.5);
    }

    #[test]
    fn derived_monitoring_channels() {
        let mut raw = RawInput::default();
        raw.mon.push(-120); // force counts
        raw.mon.push(2048); // diff voltage counts
        raw.mon.push(-1024); // voltage counts
        raw.mon.push(2.0f32.to_bits() as i32); // filtered volts as float bits

        let scaling = DriveScaling::default();
        let status = derive_status(&raw, &scaling);
        assert_eq!(status.measured_force, -120.0 * 0.1);
        assert_eq!(status.analog_diff_voltage, 10.0);
        assert_eq!(status.analog_voltage, -2.5);
        assert_eq!(status.analog_diff_voltage_filtered, 2.0 * 0.004_882_812_5);
        assert_eq!(
            status.estimated_analog_force,
            status.analog_diff_voltage_filtered * 19.6133
        );
    }

    #[test]
    fn derive_status_is_pure() {
        let mut raw = RawInput::default();
        raw.state_var = 0x0801;
        raw.status_word = 0x2801;
        raw.demand_pos = -10_000;
        for _ in 0..3 {
            raw.mon.push(77);
        }
        raw.mon.push(1.5f32.to_bits() as i32);

        let scaling = DriveScaling::default();
        assert_eq!(derive_status(&raw, &scaling), derive_status(&raw, &scaling));
    }

    #[test]
    fn scope_view_uses_sixteen_bit_reinterpretation() {
        let mut raw = RawInput::default();
        raw.mon.push(0xFFFF); // −1 in the scope view, 65535 in the wide view
        raw.mon.push(0x8000); // −32768 in the scope view
        raw.mon.push(100);
        raw.mon.push(1.0f32.to_bits() as i32);

        let scaling = DriveScaling::default();
        let wide = derive_status(&raw, &scaling);
        let scope = derive_scope_status(&raw, &scaling);

        assert_eq!(wide.measured_force, 65_535.0 * 0.1);
        assert_eq!(scope.measured_force, -0.1);
        assert_eq!(scope.analog_diff_voltage, -160.0);
        assert_eq!(scope.analog_voltage, wide.analog_voltage);
        assert_eq!(
            scope.analog_diff_voltage_filtered,
            wide.analog_diff_voltage_filtered
        );
    }

    #[test]
    fn rotary_motion_uses_modulo_factor() {
        let mut model = model_with_state_var(0x0800);
        model.scaling.is_rotary = true;
        model
            .apply_motion(
                MotionHeader::AbsoluteVai,
                &MotionParams {
                    target: 0.5, // half a revolution: 180000 counts
                    max_velocity: 0.0,
                    acceleration: 0.0,
                    deceleration: 0.0,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            u32::from(model.outputs.mc_para[0])
                | (u32::from(model.outputs.mc_para[1]) << 16),
            180_000
        );
    }

    #[test]
    fn refresh_decodes_the_right_slice() {
        let frame_len = input_frame_len(2);
        let mut snapshot = vec![0u8; frame_len * 2];
        // second drive's state_var
        snapshot[frame_len..frame_len + 2].copy_from_slice(&0x0855u16.to_le_bytes());

        let mut model = DriveModel::new(2, 2, 0);
        model.refresh(&snapshot).unwrap();
        assert_eq!(model.inputs.state_var, 0x0855);

        let short = vec![0u8; frame_len];
        assert!(model.refresh(&short).is_err());
    }
}
