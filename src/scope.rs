//! CSV writers for the oscilloscope and latency recordings.
//!
//! One capture becomes one directory `<basename>_<seq>/` holding
//! `<basename>.csv`: a header of derived-status field names and one row per
//! recorded cycle, derived from the first drive's slice of each raw sample.
//! Existing files are replaced so a capture can be re-dumped.

use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use crate::codec::{decode_input, input_frame_len};
use crate::drive::{derive_scope_status, DriveScaling, DriveStatus};
use crate::shared::{unix_seconds, LatencySample, ScopeSample};

/// Writes one oscilloscope capture and returns the path of the CSV file.
pub fn write_scope_capture(
    output_dir: &Path,
    basename: &str,
    sequence: u32,
    samples: &[ScopeSample],
    scaling: &DriveScaling,
    mon_channels: usize,
) -> Result<PathBuf, Box<dyn Error>> {
    let capture_dir = output_dir.join(format!("{basename}_{sequence}"));
    fs::create_dir_all(&capture_dir)?;
    let path = capture_dir.join(format!("{basename}.csv"));
    if path.exists() {
        log::info!(target: "linmot-scope", "replacing existing capture file {}", path.display());
        fs::remove_file(&path)?;
    }

    let frame_len = input_frame_len(mon_channels);
    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(DriveStatus::FIELD_NAMES)?;
    for sample in samples {
        let frame = sample
            .raw
            .get(..frame_len)
            .ok_or_else(|| format!("scope sample shorter than one frame ({frame_len} bytes)"))?;
        let raw = decode_input(frame, mon_channels)?;
        let status = derive_scope_status(&raw, scaling);
        writer.write_record(status.csv_record())?;
    }
    writer.flush()?;

    log::info!(
        target: "linmot-scope",
        "saved {} scope entries to {}",
        samples.len(),
        path.display()
    );
    Ok(path)
}

/// Writes the latency recording as `timestamp,latency` rows with fractional
/// seconds, replacing any existing file.
pub fn write_latency_csv(path: &Path, samples: &[LatencySample]) -> Result<(), Box<dyn Error>> {
    if path.exists() {
        log::info!(target: "linmot-scope", "replacing existing latency file {}", path.display());
        fs::remove_file(path)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["timestamp", "latency"])?;
    for sample in samples {
        writer.write_record([
            format!("{:.6}", unix_seconds(sample.timestamp)),
            format!("{:.9}", sample.seconds),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_input, RawInput};
    use std::time::SystemTime;

    fn sample_with(state_var: u16, mon: [i32; 4]) -> ScopeSample {
        let mut raw = RawInput {
            state_var,
            demand_pos: 100_000,
            actual_pos: 99_000,
            ..Default::default()
        };
        for value in mon {
            raw.mon.push(value);
        }
        ScopeSample {
            timestamp: SystemTime::now(),
            raw: encode_input(&raw, 4).unwrap().into_boxed_slice(),
        }
    }

    #[test]
    fn capture_layout_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![
            sample_with(0x0801, [10, 20, 30, 1.5f32.to_bits() as i32]),
            sample_with(0x0802, [11, 21, 31, 0]),
        ];

        let path = write_scope_capture(
            dir.path(),
            "scope_recording",
            3,
            &samples,
            &DriveScaling::default(),
            4,
        )
        .unwrap();

        assert_eq!(
            path,
            dir.path().join("scope_recording_3").join("scope_recording.csv")
        );

        let contents = fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next().unwrap(),
            DriveStatus::FIELD_NAMES.join(",")
        );
        assert_eq!(lines.count(), 2);
        // demand 10.0, actual 9.9 from the packed positions.
        assert!(contents.contains("10,9.9,0.1"));
    }

    #[test]
    fn capture_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![sample_with(0, [0, 0, 0, 0])];
        let scaling = DriveScaling::default();

        let first =
            write_scope_capture(dir.path(), "capture", 0, &samples, &scaling, 4).unwrap();
        let bigger = vec![
            sample_with(0, [0, 0, 0, 0]),
            sample_with(0, [1, 1, 1, 1]),
            sample_with(0, [2, 2, 2, 2]),
        ];
        let second =
            write_scope_capture(dir.path(), "capture", 0, &bigger, &scaling, 4).unwrap();
        assert_eq!(first, second);

        let contents = fs::read_to_string(&second).unwrap();
        assert_eq!(contents.lines().count(), 4);
    }

    #[test]
    fn latency_csv_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latency_log.csv");
        let samples = vec![
            LatencySample {
                timestamp: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000),
                seconds: 0.00125,
            },
            LatencySample {
                timestamp: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_001),
                seconds: 0.0005,
            },
        ];

        write_latency_csv(&path, &samples).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines[0], "timestamp,latency");
        assert_eq!(lines[1], "1000.000000,0.001250000");
        assert_eq!(lines[2], "1001.000000,0.000500000");
    }

    #[test]
    fn short_sample_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad = ScopeSample {
            timestamp: SystemTime::now(),
            raw: vec![0u8; 4].into_boxed_slice(),
        };
        assert!(write_scope_capture(
            dir.path(),
            "capture",
            0,
            &[bad],
            &DriveScaling::default(),
            4
        )
        .is_err());
    }
}
