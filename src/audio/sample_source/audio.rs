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
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, warn};

use super::error::SampleSourceError;
use super::traits::SampleSource;

/// A sample source that decodes audio files (WAV, FLAC, MP3, OGG, ...) with
/// symphonia. Decoded packets are converted to f32 and handed out in planar
/// chunks.
pub struct AudioSampleSource {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: u16,
    sample_rate: u32,
    duration: Option<Duration>,
    /// Conversion buffer, reallocated only when a packet outgrows it.
    converted: Option<SampleBuffer<f32>>,
    converted_capacity: usize,
    /// Interleaved samples of the most recent packet not yet handed out.
    pending: Vec<f32>,
    pending_pos: usize,
    finished: bool,
    name: String,
}

impl AudioSampleSource {
    /// Opens and probes the given file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SampleSourceError> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let file = File::open(path).map_err(|e| {
            SampleSourceError::IoError(std::io::Error::new(e.kind(), format!("{}: {}", name, e)))
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(extension);
        }

        let probed = get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| SampleSourceError::SampleConversionFailed(format!("'{}': {}", name, e)))?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| SampleSourceError::NoAudioTrack(name.clone()))?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let sample_rate = params.sample_rate.ok_or_else(|| {
            SampleSourceError::SampleConversionFailed(format!("'{}': sample rate unknown", name))
        })?;
        let duration = params
            .n_frames
            .map(|frames| Duration::from_secs_f64(frames as f64 / sample_rate as f64));
        let decoder = get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| SampleSourceError::SampleConversionFailed(format!("'{}': {}", name, e)))?;

        let mut source = Self {
            format_reader,
            decoder,
            track_id,
            channels: params.channels.map(|c| c.count() as u16).unwrap_or(0),
            sample_rate,
            duration,
            converted: None,
            converted_capacity: 0,
            pending: Vec::new(),
            pending_pos: 0,
            finished: false,
            name,
        };

        // Some containers don't report a channel layout. Decode the first
        // packet to find out; its samples stay pending for the first read.
        if source.channels == 0 {
            if !source.decode_next_packet()? || source.channels == 0 {
                return Err(SampleSourceError::SampleConversionFailed(format!(
                    "'{}': channel count unknown",
                    source.name
                )));
            }
        }

        debug!(
            file = source.name,
            channels = source.channels,
            sample_rate = source.sample_rate,
            "Opened audio source"
        );
        Ok(source)
    }

    /// Decodes the next packet of our track into `pending`. Returns false at
    /// the end of the stream.
    fn decode_next_packet(&mut self) -> Result<bool, SampleSourceError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false)
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(file = self.name, error = e, "Skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let packet_channels = spec.channels.count() as u16;
            if self.channels == 0 {
                self.channels = packet_channels;
            } else if packet_channels != self.channels {
                return Err(SampleSourceError::SampleConversionFailed(format!(
                    "'{}': packet has {} channels, expected {}",
                    self.name, packet_channels, self.channels
                )));
            }

            if self.converted.is_none() || self.converted_capacity < decoded.capacity() {
                self.converted_capacity = decoded.capacity();
                self.converted = Some(SampleBuffer::new(self.converted_capacity as u64, spec));
            }
            if let Some(converted) = self.converted.as_mut() {
                converted.copy_interleaved_ref(decoded);
                self.pending.clear();
                self.pending.extend_from_slice(converted.samples());
                self.pending_pos = 0;
            }
            return Ok(true);
        }
    }
}

impl SampleSource for AudioSampleSource {
    fn next_chunk(
        &mut self,
        output: &mut [Vec<f32>],
        max_frames: usize,
    ) -> Result<usize, SampleSourceError> {
        let channels = self.channels as usize;
        if output.len() != channels {
            return Err(SampleSourceError::SampleConversionFailed(format!(
                "Output has {} channels, expected {}",
                output.len(),
                channels
            )));
        }
        for ch in output.iter_mut() {
            ch.clear();
        }

        let mut frames = 0;
        while frames < max_frames {
            let available = (self.pending.len() - self.pending_pos) / channels;
            if available == 0 {
                if self.finished || !self.decode_next_packet()? {
                    self.finished = true;
                    break;
                }
                continue;
            }

            let take = available.min(max_frames - frames);
            for frame in self.pending[self.pending_pos..]
                .chunks_exact(channels)
                .take(take)
            {
                for (out, sample) in output.iter_mut().zip(frame) {
                    out.push(*sample);
                }
            }
            self.pending_pos += take * channels;
            frames += take;
        }

        Ok(frames)
    }

    fn rewind(&mut self) -> Result<(), SampleSourceError> {
        self.format_reader.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: 0,
                track_id: self.track_id,
            },
        )?;
        self.decoder.reset();
        self.pending.clear();
        self.pending_pos = 0;
        self.finished = false;
        Ok(())
    }

    fn channel_count(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{read_all_interleaved, write_wav};

    #[test]
    fn test_decodes_stereo_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, &[vec![0.5, 0.25, -0.5], vec![-0.5, -0.25, 0.5]], 44100).unwrap();

        let mut source = AudioSampleSource::from_file(&path).unwrap();
        assert_eq!(source.channel_count(), 2);
        assert_eq!(source.sample_rate(), 44100);

        let samples = read_all_interleaved(&mut source);
        assert_eq!(samples, vec![0.5, -0.5, 0.25, -0.25, -0.5, 0.5]);
    }

    #[test]
    fn test_rewind_restarts_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let ramp: Vec<f32> = (0..2000).map(|i| i as f32 / 2000.0).collect();
        write_wav(&path, &[ramp.clone()], 22050).unwrap();

        let mut source = AudioSampleSource::from_file(&path).unwrap();
        let first = read_all_interleaved(&mut source);
        assert_eq!(first, ramp);

        let mut planar = vec![Vec::new()];
        assert_eq!(source.next_chunk(&mut planar, 16).unwrap(), 0);

        source.rewind().unwrap();
        let second = read_all_interleaved(&mut source);
        assert_eq!(second, ramp);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = AudioSampleSource::from_file(dir.path().join("nope.wav"));
        assert!(matches!(result, Err(SampleSourceError::IoError(_))));
    }

    #[test]
    fn test_garbage_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"this is not audio").unwrap();
        assert!(AudioSampleSource::from_file(&path).is_err());
    }

    #[test]
    fn test_wrong_output_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, &[vec![0.1, 0.2]], 44100).unwrap();

        let mut source = AudioSampleSource::from_file(&path).unwrap();
        let mut planar = vec![Vec::new(), Vec::new()];
        assert!(source.next_chunk(&mut planar, 2).is_err());
    }
}
