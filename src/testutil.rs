// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    error::Error,
    fs::File,
    path::Path,
    thread,
    time::{Duration, SystemTime},
};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::audio::sample_source::SampleSource;

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(mut predicate: F, error_msg: &str)
where
    F: FnMut() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(5);
    let timeout = Duration::from_secs(5);

    loop {
        let elapsed = start.elapsed();
        if elapsed.is_err() {
            panic!("System time error");
        }
        let elapsed = elapsed.unwrap();

        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}

/// Writes planar f32 channels to an interleaved 32-bit float WAV file.
pub fn write_wav(
    path: &Path,
    channels: &[Vec<f32>],
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let num_channels = channels.len();
    assert!(num_channels > 0, "No channels!");
    assert!(num_channels <= u16::MAX.into(), "Too many channels!");

    let mut writer = WavWriter::new(
        File::create(path)?,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;

    let frames = channels.iter().map(|c| c.len()).max().unwrap_or(0);
    for frame in 0..frames {
        for channel in channels {
            writer.write_sample(channel.get(frame).copied().unwrap_or(0.0))?;
        }
    }
    writer.finalize()?;

    Ok(())
}

/// Drains a source and returns its samples interleaved.
pub fn read_all_interleaved<S: SampleSource + ?Sized>(source: &mut S) -> Vec<f32> {
    let channels = source.channel_count() as usize;
    let mut planar = vec![Vec::new(); channels];
    let mut interleaved = Vec::new();

    loop {
        let frames = source.next_chunk(&mut planar, 1024).unwrap();
        if frames == 0 {
            return interleaved;
        }
        for frame in 0..frames {
            for channel in &planar {
                interleaved.push(channel[frame]);
            }
        }
    }
}
