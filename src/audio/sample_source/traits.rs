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
use std::time::Duration;

use super::error::SampleSourceError;

/// A rewindable stream of PCM frames in planar format.
///
/// Sources are opened on a control thread and then handed to a voice's
/// streaming thread, which is the only caller of `next_chunk` and `rewind`.
/// Nothing here is called from the audio callback.
pub trait SampleSource: Send {
    /// Get the next chunk of samples from the source in planar format.
    /// Each channel Vec is cleared and filled with up to `max_frames` samples.
    /// Returns the number of frames written; 0 means end of stream.
    ///
    /// The output slice must have exactly `channel_count()` elements.
    fn next_chunk(
        &mut self,
        output: &mut [Vec<f32>],
        max_frames: usize,
    ) -> Result<usize, SampleSourceError>;

    /// Moves the read position back to the first frame.
    fn rewind(&mut self) -> Result<(), SampleSourceError>;

    /// Get the number of channels in this source
    fn channel_count(&self) -> u16;

    /// Get the sample rate of this source
    fn sample_rate(&self) -> u32;

    /// Get the duration of this source, if known.
    fn duration(&self) -> Option<Duration>;
}

impl SampleSource for Box<dyn SampleSource> {
    fn next_chunk(
        &mut self,
        output: &mut [Vec<f32>],
        max_frames: usize,
    ) -> Result<usize, SampleSourceError> {
        (**self).next_chunk(output, max_frames)
    }

    fn rewind(&mut self) -> Result<(), SampleSourceError> {
        (**self).rewind()
    }

    fn channel_count(&self) -> u16 {
        (**self).channel_count()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn duration(&self) -> Option<Duration> {
        (**self).duration()
    }
}
