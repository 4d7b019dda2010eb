//! Client-side command recipes.
//!
//! Each helper mutates the drive models it is given, packs every drive's
//! output image and queues the full list through the update mailbox, so the
//! engine always applies a consistent bus-wide output set. Drive numbers are
//! 1-based, matching the device indices assigned at bring-up.
//!
//! The drive needs to see edges: switching on means clearing the switch-on
//! bit, sending, waiting at least two cycles and sending again with the bit
//! set. The spacing comes in as `edge_delay`, normally
//! [`CycleConfig::edge_delay`](crate::cycle::CycleConfig).

use std::error::Error;
use std::time::Duration;

use crate::cycle::CycleHandle;
use crate::drive::{DriveModel, MotionHeader, MotionParams};
use crate::error::EngineError;

/// Refreshes every model from the latest input snapshot.
///
/// Run this before anything that stamps a command counter; the counter must
/// come from the freshest decoded input.
pub fn refresh(handle: &CycleHandle, drives: &mut [DriveModel]) -> Result<(), Box<dyn Error>> {
    let snapshot = handle.snapshot();
    for drive in drives.iter_mut() {
        drive.refresh(&snapshot)?;
    }
    Ok(())
}

fn send_all(handle: &CycleHandle, drives: &[DriveModel]) {
    let frames = drives.iter().map(|d| d.outputs.encode()).collect();
    handle.send_outputs(frames);
}

/// Switches the motor on: clear bit 0, send, wait, set bit 0, send.
pub async fn switch_on(
    handle: &CycleHandle,
    drives: &mut [DriveModel],
    drive: usize,
    edge_delay: Duration,
) -> Result<(), Box<dyn Error>> {
    drives[drive - 1].set_switch_on(false);
    send_all(handle, drives);
    tokio::time::sleep(edge_delay).await;
    drives[drive - 1].set_switch_on(true);
    send_all(handle, drives);
    Ok(())
}

/// Switches the motor off by clearing the switch-on bit.
pub fn switch_off(
    handle: &CycleHandle,
    drives: &mut [DriveModel],
    drive: usize,
) -> Result<(), Box<dyn Error>> {
    drives[drive - 1].set_switch_on(false);
    send_all(handle, drives);
    Ok(())
}

/// Starts homing; the home bit stays set until [`end_home`].
pub fn home(
    handle: &CycleHandle,
    drives: &mut [DriveModel],
    drive: usize,
) -> Result<(), Box<dyn Error>> {
    drives[drive - 1].set_home(true);
    send_all(handle, drives);
    Ok(())
}

/// Ends homing by dropping the home bit again.
pub fn end_home(
    handle: &CycleHandle,
    drives: &mut [DriveModel],
    drive: usize,
) -> Result<(), Box<dyn Error>> {
    drives[drive - 1].set_home(false);
    send_all(handle, drives);
    Ok(())
}

/// Acknowledges a drive error: raise the acknowledge bit with switch-on
/// cleared, send, wait, drop the acknowledge bit, send.
pub async fn error_ack(
    handle: &CycleHandle,
    drives: &mut [DriveModel],
    drive: usize,
    edge_delay: Duration,
) -> Result<(), Box<dyn Error>> {
    drives[drive - 1].begin_error_ack();
    send_all(handle, drives);
    tokio::time::sleep(edge_delay).await;
    drives[drive - 1].end_error_ack();
    send_all(handle, drives);
    Ok(())
}

/// Sends a motion command with a freshly stamped command counter.
pub fn motion(
    handle: &CycleHandle,
    drives: &mut [DriveModel],
    drive: usize,
    kind: MotionHeader,
    params: &MotionParams,
) -> Result<(), Box<dyn Error>> {
    refresh(handle, drives)?;
    drives[drive - 1].apply_motion(kind, params)?;
    send_all(handle, drives);
    Ok(())
}

/// Triggers the drive's command table at `entry`.
pub fn command_table(
    handle: &CycleHandle,
    drives: &mut [DriveModel],
    drive: usize,
    entry: u16,
) -> Result<(), Box<dyn Error>> {
    refresh(handle, drives)?;
    drives[drive - 1].trigger_command_table(entry);
    send_all(handle, drives);
    Ok(())
}

/// Writes a configuration-module command through the cyclic frame.
pub fn write_config(
    handle: &CycleHandle,
    drives: &mut [DriveModel],
    drive: usize,
    cfg_control: u16,
    cfg_index: u16,
    cfg_value: Option<i32>,
) -> Result<(), Box<dyn Error>> {
    refresh(handle, drives)?;
    drives[drive - 1].apply_config(cfg_control, cfg_index, cfg_value);
    send_all(handle, drives);
    Ok(())
}

/// Waits until the drive reports that its motion finished, polling the
/// snapshot at a multiple of the cycle time.
pub async fn wait_motion_finished(
    handle: &CycleHandle,
    drives: &mut [DriveModel],
    drive: usize,
    cycle_time: Duration,
) -> Result<(), Box<dyn Error>> {
    tokio::time::sleep(cycle_time * 4).await;
    loop {
        if handle.is_stopped() {
            return Err(EngineError::Interrupted.into());
        }
        refresh(handle, drives)?;
        if !drives[drive - 1].status.motion_active {
            return Ok(());
        }
        tokio::time::sleep(cycle_time * 2).await;
    }
}
