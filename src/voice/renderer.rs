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
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ringbuf::traits::Consumer;
use ringbuf::HeapCons;
use rubato::{FastFixedOut, PolynomialDegree, Resampler};

use super::VoiceShared;
use crate::error::EngineError;

/// Output frames produced per resampler call.
const RENDER_CHUNK: usize = 256;

/// Furthest the resampling ratio may move from 1 in either direction.
const MAX_RATIO: f64 = 32.0;

/// Ratios are kept slightly inside the resampler's limits.
const RATIO_LIMIT: f64 = 24.0;

/// The real-time half of a voice. Pulls frames from the look-ahead ring and
/// resamples them to the device rate times the voice's playback rate.
///
/// Everything is preallocated in [`VoiceRenderer::new`]; rendering never
/// allocates, locks or blocks.
pub struct VoiceRenderer {
    shared: Arc<VoiceShared>,
    consumer: HeapCons<[f32; 2]>,
    resampler: FastFixedOut<f32>,
    ratio: f64,
    staging: Vec<[f32; 2]>,
    staged: usize,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    output_pos: usize,
    output_len: usize,
    epoch: u64,
    position: u64,
}

impl VoiceRenderer {
    pub(super) fn new(
        shared: Arc<VoiceShared>,
        consumer: HeapCons<[f32; 2]>,
    ) -> Result<VoiceRenderer, EngineError> {
        let resampler =
            FastFixedOut::<f32>::new(1.0, MAX_RATIO, PolynomialDegree::Cubic, RENDER_CHUNK, 2)?;
        let max_input = resampler.input_frames_max();
        let max_output = resampler.output_frames_max();

        Ok(VoiceRenderer {
            shared,
            consumer,
            resampler,
            ratio: 1.0,
            staging: vec![[0.0; 2]; max_input],
            staged: 0,
            input: vec![vec![0.0; max_input]; 2],
            output: vec![vec![0.0; max_output]; 2],
            output_pos: 0,
            output_len: 0,
            epoch: 0,
            position: 0,
        })
    }

    /// Overwrites `output` with the voice's next frames at the given device
    /// rate. Produces silence when stopped, unloaded, or starved.
    pub fn render(&mut self, device_rate: u32, output: &mut [[f32; 2]]) {
        if !self.sync() {
            output.fill([0.0; 2]);
            return;
        }

        let gain = self.shared.gain();
        let mut written = 0;
        while written < output.len() {
            if self.output_pos < self.output_len {
                let count = (self.output_len - self.output_pos).min(output.len() - written);
                let left = &self.output[0][self.output_pos..self.output_pos + count];
                let right = &self.output[1][self.output_pos..self.output_pos + count];
                let frames = output[written..written + count].iter_mut();
                for ((frame, l), r) in frames.zip(left).zip(right) {
                    *frame = [l * gain, r * gain];
                }
                written += count;
                self.output_pos += count;
                continue;
            }

            if !self.refill(device_rate) {
                break;
            }
        }

        output[written..].fill([0.0; 2]);
        self.shared.position.store(self.position, Ordering::Relaxed);
    }

    /// Follows the epoch handshake. Returns true if frames for the requested
    /// epoch may be played.
    fn sync(&mut self) -> bool {
        let playing = self.shared.playing.load(Ordering::Acquire);

        let flush = self.shared.flush_epoch.load(Ordering::Acquire);
        if flush != self.shared.acked_epoch.load(Ordering::Relaxed) {
            self.consumer.clear();
            self.shared.acked_epoch.store(flush, Ordering::Release);
            self.shared.wake();
        }

        let requested = self.shared.requested_epoch.load(Ordering::Acquire);
        if requested != self.epoch {
            self.epoch = requested;
            // Resetting also puts the resampler back at its initial ratio.
            self.resampler.reset();
            self.ratio = 1.0;
            self.staged = 0;
            self.output_pos = 0;
            self.output_len = 0;
            self.position = 0;
            self.shared.position.store(0, Ordering::Relaxed);
        }

        playing
            && self.shared.ended_epoch.load(Ordering::Relaxed) != requested
            && self.shared.ring_epoch.load(Ordering::Acquire) == requested
    }

    fn update_ratio(&mut self, device_rate: u32) {
        let source_rate = self.shared.source_rate.load(Ordering::Relaxed).max(1) as f64;
        let ratio = (device_rate as f64 / (source_rate * self.shared.rate()))
            .clamp(1.0 / RATIO_LIMIT, RATIO_LIMIT);
        if ratio != self.ratio && self.resampler.set_resample_ratio(ratio, false).is_ok() {
            self.ratio = ratio;
        }
    }

    /// Resamples one more chunk into the output buffer. Returns false when
    /// nothing could be produced.
    fn refill(&mut self, device_rate: u32) -> bool {
        self.update_ratio(device_rate);
        let needed = self.resampler.input_frames_next();

        if self.staged < needed {
            // Checked before reading: once set, everything is already in the
            // ring.
            let finished = self.shared.finished.load(Ordering::Acquire);
            self.staged += self.consumer.pop_slice(&mut self.staging[self.staged..needed]);

            if self.staged < needed {
                if !finished {
                    return false;
                }
                if self.staged == 0 {
                    self.shared.ended_epoch.store(self.epoch, Ordering::Release);
                    return false;
                }
                self.staging[self.staged..needed].fill([0.0; 2]);
            }
        }

        self.position += self.staged.min(needed) as u64;
        for (i, frame) in self.staging[..needed].iter().enumerate() {
            self.input[0][i] = frame[0];
            self.input[1][i] = frame[1];
        }
        // A ratio change can leave more staged than this call needs.
        let leftover = self.staged.saturating_sub(needed);
        self.staging.copy_within(needed..needed + leftover, 0);
        self.staged = leftover;

        let input = [&self.input[0][..needed], &self.input[1][..needed]];
        match self.resampler.process_into_buffer(&input, &mut self.output, None) {
            Ok((_, produced)) => {
                self.output_pos = 0;
                self.output_len = produced;
                produced > 0
            }
            Err(_) => false,
        }
    }
}
