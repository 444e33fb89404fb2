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
// The stereo bus shared by the cpal and mock backends.
use std::ops::Range;

use crate::voice::VoiceRenderer;

/// Frames rendered per input per pass.
const MIX_CHUNK: usize = 512;

/// Anything that renders stereo frames into the bus.
pub trait BusInput: Send {
    /// Overwrites `output` with the next frames at the given device rate.
    fn render(&mut self, device_rate: u32, output: &mut [[f32; 2]]);
}

impl BusInput for VoiceRenderer {
    fn render(&mut self, device_rate: u32, output: &mut [[f32; 2]]) {
        VoiceRenderer::render(self, device_rate, output)
    }
}

/// Sums its inputs into interleaved output. Purely additive: no
/// normalization or limiting, so many loud inputs can clip.
pub struct Mixer<I: BusInput = VoiceRenderer> {
    inputs: Vec<I>,
    scratch: Vec<[f32; 2]>,
}

impl<I: BusInput> Mixer<I> {
    pub fn new(inputs: Vec<I>) -> Self {
        Self {
            inputs,
            scratch: vec![[0.0; 2]; MIX_CHUNK],
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    /// Mixes `frames` of an interleaved buffer with `channels` channels.
    ///
    /// Channels 0 and 1 receive the bus. Any further channels are silenced,
    /// and a mono output gets the average of both sides.
    pub fn process_into_output(
        &mut self,
        device_rate: u32,
        output: &mut [f32],
        channels: usize,
        frames: Range<usize>,
    ) {
        if channels == 0 {
            return;
        }
        let block = &mut output[frames.start * channels..frames.end * channels];
        block.fill(0.0);

        let mut offset = 0;
        let total = frames.len();
        while offset < total {
            let count = (total - offset).min(MIX_CHUNK);
            let out = &mut block[offset * channels..(offset + count) * channels];

            for input in self.inputs.iter_mut() {
                let scratch = &mut self.scratch[..count];
                input.render(device_rate, scratch);
                for (frame, [left, right]) in out.chunks_exact_mut(channels).zip(scratch.iter()) {
                    if channels == 1 {
                        frame[0] += (left + right) * 0.5;
                    } else {
                        frame[0] += left;
                        frame[1] += right;
                    }
                }
            }
            offset += count;
        }
    }
}
