//! Bit-exact serialization of the LinMot cyclic process data.
//!
//! The drive exchanges two little-endian packed frames per cycle. Both carry
//! a fixed block followed by an optional channel tail whose length is decided
//! once at bring-up, when the PDO map is written:
//!
//! * inputs: 26 bytes of state/status/position data plus `M` monitoring
//!   channels of 4 bytes each (`0x1B00`, `0x1B08`, `0x1B28..`),
//! * outputs: 32 bytes of control/motion-command data plus `P` parameter
//!   channels of 2 bytes each (`0x1700`, `0x1708`, `0x1728..`).
//!
//! Everything here is pure; the only allocation is the output buffer.

use arrayvec::ArrayVec;

use crate::error::CodecError;

/// Upper bound on monitoring channels the drive's PDO map supports.
pub const MAX_MON_CHANNELS: usize = 4;
/// Upper bound on parameter channels the drive's PDO map supports.
pub const MAX_PAR_CHANNELS: usize = 4;

/// Byte length of the fixed input block (`0x1B00` + `0x1B08`).
pub const INPUT_FIXED_LEN: usize = 26;
/// Byte length of the fixed output block (`0x1700` + `0x1708`).
pub const OUTPUT_FIXED_LEN: usize = 32;

/// Number of motion-command parameter words in the output frame.
pub const MC_PARA_WORDS: usize = 10;

/// Control word the drive boots with: voltage on, not switched on.
pub const DEFAULT_CONTROL_WORD: u16 = 0x003E;

/// Byte length of one input frame for a given monitoring channel count.
pub const fn input_frame_len(mon_channels: usize) -> usize {
    INPUT_FIXED_LEN + 4 * mon_channels
}

/// Byte length of one output frame for a given parameter channel count.
pub const fn output_frame_len(par_channels: usize) -> usize {
    OUTPUT_FIXED_LEN + 2 * par_channels
}

/// One decoded input frame, exactly as received from the drive.
///
/// Monitoring channels are carried as signed 32-bit values on the wire. The
/// last configured channel is the drive's internal filtered signal sent as an
/// IEEE-754 single packed into the same slot; [`RawInput::filtered_channel`]
/// performs the bitcast.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawInput {
    pub state_var: u16,
    pub status_word: u16,
    pub warn_word: u16,
    pub demand_pos: i32,
    pub actual_pos: i32,
    pub demand_curr: i32,
    pub cfg_status: u16,
    pub cfg_index_in: u16,
    pub cfg_value_in: i32,
    pub mon: ArrayVec<i32, MAX_MON_CHANNELS>,
}

impl RawInput {
    /// Monitoring channel by 1-based number; unmapped channels read as 0.
    pub fn mon_channel(&self, channel: usize) -> i32 {
        channel
            .checked_sub(1)
            .and_then(|i| self.mon.get(i))
            .copied()
            .unwrap_or(0)
    }

    /// The last monitoring channel reinterpreted bit-for-bit as an IEEE-754
    /// single. This must stay a bitcast, never a numeric conversion.
    pub fn filtered_channel(&self) -> f32 {
        f32::from_bits(self.mon.last().copied().unwrap_or(0) as u32)
    }
}

/// One output frame as sent to the drive every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFrame {
    pub control_word: u16,
    pub mc_header: u16,
    pub mc_para: [u16; MC_PARA_WORDS],
    pub cfg_control: u16,
    pub cfg_index_out: u16,
    pub cfg_value_out: i32,
    pub par: ArrayVec<u16, MAX_PAR_CHANNELS>,
}

impl OutputFrame {
    /// A frame with the boot control word and `par_channels` zeroed
    /// parameter channels.
    pub fn new(par_channels: usize) -> Self {
        let mut par = ArrayVec::new();
        for _ in 0..par_channels.min(MAX_PAR_CHANNELS) {
            par.push(0);
        }
        Self {
            control_word: DEFAULT_CONTROL_WORD,
            mc_header: 0,
            mc_para: [0; MC_PARA_WORDS],
            cfg_control: 0,
            cfg_index_out: 0,
            cfg_value_out: 0,
            par,
        }
    }

    /// Packs the frame; the channel count is taken from the frame itself.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; output_frame_len(self.par.len())];
        encode_output_into(self, &mut buf).expect("buffer sized from frame");
        buf
    }
}

impl Default for OutputFrame {
    fn default() -> Self {
        Self::new(0)
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn check_len(expected: usize, actual: usize) -> Result<(), CodecError> {
    if expected != actual {
        return Err(CodecError::LengthMismatch { expected, actual });
    }
    Ok(())
}

/// Decodes one input frame. `mon_channels` must be the session's configured
/// monitoring channel count.
pub fn decode_input(buf: &[u8], mon_channels: usize) -> Result<RawInput, CodecError> {
    check_len(input_frame_len(mon_channels), buf.len())?;

    let mut mon = ArrayVec::new();
    for i in 0..mon_channels.min(MAX_MON_CHANNELS) {
        mon.push(read_i32(buf, INPUT_FIXED_LEN + 4 * i));
    }

    Ok(RawInput {
        state_var: read_u16(buf, 0),
        status_word: read_u16(buf, 2),
        warn_word: read_u16(buf, 4),
        demand_pos: read_i32(buf, 6),
        actual_pos: read_i32(buf, 10),
        demand_curr: read_i32(buf, 14),
        cfg_status: read_u16(buf, 18),
        cfg_index_in: read_u16(buf, 20),
        cfg_value_in: read_i32(buf, 22),
        mon,
    })
}

/// Re-encodes an input frame; the inverse of [`decode_input`].
pub fn encode_input(input: &RawInput, mon_channels: usize) -> Result<Vec<u8>, CodecError> {
    if input.mon.len() != mon_channels {
        return Err(CodecError::LengthMismatch {
            expected: input_frame_len(mon_channels),
            actual: input_frame_len(input.mon.len()),
        });
    }

    let mut buf = vec![0u8; input_frame_len(mon_channels)];
    buf[0..2].copy_from_slice(&input.state_var.to_le_bytes());
    buf[2..4].copy_from_slice(&input.status_word.to_le_bytes());
    buf[4..6].copy_from_slice(&input.warn_word.to_le_bytes());
    buf[6..10].copy_from_slice(&input.demand_pos.to_le_bytes());
    buf[10..14].copy_from_slice(&input.actual_pos.to_le_bytes());
    buf[14..18].copy_from_slice(&input.demand_curr.to_le_bytes());
    buf[18..20].copy_from_slice(&input.cfg_status.to_le_bytes());
    buf[20..22].copy_from_slice(&input.cfg_index_in.to_le_bytes());
    buf[22..26].copy_from_slice(&input.cfg_value_in.to_le_bytes());
    for (i, value) in input.mon.iter().enumerate() {
        let at = INPUT_FIXED_LEN + 4 * i;
        buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }
    Ok(buf)
}

/// Packs one output frame into `buf`, which must be exactly
/// `output_frame_len(frame.par.len())` bytes.
pub fn encode_output_into(frame: &OutputFrame, buf: &mut [u8]) -> Result<(), CodecError> {
    check_len(output_frame_len(frame.par.len()), buf.len())?;

    buf[0..2].copy_from_slice(&frame.control_word.to_le_bytes());
    buf[2..4].copy_from_slice(&frame.mc_header.to_le_bytes());
    for (i, word) in frame.mc_para.iter().enumerate() {
        let at = 4 + 2 * i;
        buf[at..at + 2].copy_from_slice(&word.to_le_bytes());
    }
    buf[24..26].copy_from_slice(&frame.cfg_control.to_le_bytes());
    buf[26..28].copy_from_slice(&frame.cfg_index_out.to_le_bytes());
    buf[28..32].copy_from_slice(&frame.cfg_value_out.to_le_bytes());
    for (i, channel) in frame.par.iter().enumerate() {
        let at = OUTPUT_FIXED_LEN + 2 * i;
        buf[at..at + 2].copy_from_slice(&channel.to_le_bytes());
    }
    Ok(())
}

/// Packs one output frame. `par_channels` must match the frame's channel
/// count (the session's configured value).
pub fn encode_output(frame: &OutputFrame, par_channels: usize) -> Result<Vec<u8>, CodecError> {
    check_len(output_frame_len(par_channels), output_frame_len(frame.par.len()))?;
    Ok(frame.encode())
}

/// Decodes one output frame; the inverse of [`encode_output`].
pub fn decode_output(buf: &[u8], par_channels: usize) -> Result<OutputFrame, CodecError> {
    check_len(output_frame_len(par_channels), buf.len())?;

    let mut mc_para = [0u16; MC_PARA_WORDS];
    for (i, word) in mc_para.iter_mut().enumerate() {
        *word = read_u16(buf, 4 + 2 * i);
    }
    let mut par = ArrayVec::new();
    for i in 0..par_channels.min(MAX_PAR_CHANNELS) {
        par.push(read_u16(buf, OUTPUT_FIXED_LEN + 2 * i));
    }

    Ok(OutputFrame {
        control_word: read_u16(buf, 0),
        mc_header: read_u16(buf, 2),
        mc_para,
        cfg_control: read_u16(buf, 24),
        cfg_index_out: read_u16(buf, 26),
        cfg_value_out: read_i32(buf, 28),
        par,
    })
}

/// The 16-bit signed view of a monitoring channel, as the scope CSV path
/// records it: wire values at or above `0x8000` wrap to negative.
pub fn reinterpret_s16(value: i32) -> i32 {
    if value >= 0x8000 {
        value - 0x10000
    } else {
        value
    }
}
