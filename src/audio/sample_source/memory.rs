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
use std::sync::Arc;
use std::time::Duration;

use super::error::SampleSourceError;
use super::traits::SampleSource;

/// A sample source that plays back PCM already held in memory.
///
/// Input samples are provided interleaved for convenience but stored planar.
/// The planar data is shared, so cloning a source is cheap.
#[derive(Clone)]
pub struct MemorySampleSource {
    planar_samples: Arc<Vec<Vec<f32>>>,
    current_frame: usize,
    channel_count: u16,
    sample_rate: u32,
}

impl MemorySampleSource {
    /// Creates a new memory sample source from interleaved samples.
    pub fn new(interleaved_samples: Vec<f32>, channel_count: u16, sample_rate: u32) -> Self {
        let num_channels = channel_count.max(1) as usize;
        let mut planar_samples =
            vec![Vec::with_capacity(interleaved_samples.len() / num_channels); num_channels];
        for frame in interleaved_samples.chunks_exact(num_channels) {
            for (channel, sample) in planar_samples.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        Self {
            planar_samples: Arc::new(planar_samples),
            current_frame: 0,
            channel_count: num_channels as u16,
            sample_rate,
        }
    }

    fn total_frames(&self) -> usize {
        self.planar_samples.first().map(|c| c.len()).unwrap_or(0)
    }
}

impl SampleSource for MemorySampleSource {
    fn next_chunk(
        &mut self,
        output: &mut [Vec<f32>],
        max_frames: usize,
    ) -> Result<usize, SampleSourceError> {
        if output.len() != self.channel_count as usize {
            return Err(SampleSourceError::SampleConversionFailed(format!(
                "Output has {} channels, expected {}",
                output.len(),
                self.channel_count
            )));
        }

        let start = self.current_frame;
        let to_copy = self.total_frames().saturating_sub(start).min(max_frames);
        for (out, channel) in output.iter_mut().zip(self.planar_samples.iter()) {
            out.clear();
            out.extend_from_slice(&channel[start..start + to_copy]);
        }
        self.current_frame += to_copy;

        Ok(to_copy)
    }

    fn rewind(&mut self) -> Result<(), SampleSourceError> {
        self.current_frame = 0;
        Ok(())
    }

    fn channel_count(&self) -> u16 {
        self.channel_count
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(
            self.total_frames() as f64 / self.sample_rate.max(1) as f64,
        ))
    }
}
