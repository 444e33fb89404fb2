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
    fmt,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::TryRecvError;
use tracing::{info, span, Level};

use crate::audio::thread_priority::{
    callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled,
};
use crate::audio::{AudioCallback, CallbackGuard, OutputStream};
use crate::config;
use crate::error::EngineError;

const MOCK_CHANNELS: u16 = 2;

/// A mock device. Drives the callback in real time from a timer thread and
/// throws the audio away, keeping a few meters for inspection.
#[derive(Clone)]
pub struct Device {
    name: String,
    sample_rate: u32,
    block_size: usize,
    frames: Arc<AtomicU64>,
    peak: Arc<AtomicU32>,
}

impl Device {
    /// Gets the mock device described by the configuration.
    pub fn get(config: &config::Audio) -> Device {
        Device {
            name: config.device().to_string(),
            sample_rate: config.sample_rate().unwrap_or(config::DEFAULT_SAMPLE_RATE),
            block_size: config.block_size(),
            frames: Arc::new(AtomicU64::new(0)),
            peak: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Frames processed since the device was created.
    pub fn frames_processed(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Largest absolute sample seen since the device was created.
    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak.load(Ordering::Relaxed))
    }
}

impl crate::audio::Device for Device {
    fn start(&self, callback: Box<dyn AudioCallback>) -> Result<OutputStream, EngineError> {
        let span = span!(Level::INFO, "start stream (mock)");
        let _enter = span.enter();

        info!(
            device = self.name,
            sample_rate = self.sample_rate,
            block_size = self.block_size,
            "Starting mock output."
        );

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let sample_rate = self.sample_rate;
        let block_size = self.block_size.max(1);
        let frames = self.frames.clone();
        let peak = self.peak.clone();
        let priority = callback_thread_priority();
        let rt_audio = rt_audio_enabled();

        let thread = thread::Builder::new()
            .name("mock-output".to_string())
            .spawn(move || {
                let mut guard = CallbackGuard::new(callback);
                guard.callback().about_to_start(sample_rate, block_size);

                let mut priority_set = false;
                configure_audio_thread_priority(priority, rt_audio, &mut priority_set);

                let mut output = vec![0.0f32; block_size * MOCK_CHANNELS as usize];
                let period = Duration::from_secs_f64(block_size as f64 / sample_rate as f64);
                let mut next = Instant::now();

                loop {
                    match stop_rx.try_recv() {
                        Err(TryRecvError::Empty) => {}
                        _ => break,
                    }

                    guard.callback().process(&[], &mut output, block_size);
                    frames.fetch_add(block_size as u64, Ordering::Relaxed);
                    let block_peak = output.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
                    if block_peak > f32::from_bits(peak.load(Ordering::Relaxed)) {
                        peak.store(block_peak.to_bits(), Ordering::Relaxed);
                    }

                    next += period;
                    let now = Instant::now();
                    if next > now {
                        spin_sleep::sleep(next - now);
                    } else {
                        // Fell behind; don't try to catch up.
                        next = now;
                    }
                }
            })?;

        Ok(OutputStream::new(self.name.clone(), stop_tx, thread))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Device as _;
    use crate::testutil::eventually;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Calls {
        started: Option<(u32, usize)>,
        blocks: usize,
        stopped: bool,
    }

    struct Recorder(Arc<Mutex<Calls>>);

    impl AudioCallback for Recorder {
        fn about_to_start(&mut self, sample_rate: u32, block_size: usize) {
            self.0.lock().started = Some((sample_rate, block_size));
        }

        fn process(&mut self, _: &[f32], output: &mut [f32], num_frames: usize) {
            assert_eq!(output.len(), num_frames * 2);
            output.fill(0.5);
            self.0.lock().blocks += 1;
        }

        fn stopped(&mut self) {
            self.0.lock().stopped = true;
        }
    }

    #[test]
    fn test_drives_callback() {
        let config = config::Audio::new("mock-device");
        let device = Device::get(&config);
        assert_eq!(device.to_string(), "mock-device (Mock)");

        let calls = Arc::new(Mutex::new(Calls::default()));
        let stream = device.start(Box::new(Recorder(calls.clone()))).unwrap();
        eventually(|| calls.lock().blocks >= 3, "Mock device never processed blocks");
        stream.stop();

        let calls = calls.lock();
        assert_eq!(
            calls.started,
            Some((config::DEFAULT_SAMPLE_RATE, config.block_size()))
        );
        assert!(calls.stopped);
        assert!(device.frames_processed() >= 3 * config.block_size() as u64);
        assert_eq!(device.peak(), 0.5);
    }
}
