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
use std::fmt;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use tracing::error;

use crate::config;
use crate::error::EngineError;

pub mod cpal;
pub mod mixer;
pub mod mock;
pub mod sample_source;
pub mod thread_priority;

/// The interface an audio backend drives.
pub trait AudioCallback: Send {
    /// Called once before the first block.
    fn about_to_start(&mut self, sample_rate: u32, block_size: usize);

    /// Fills `output` (interleaved, `output.len() / num_frames` channels) with
    /// the next `num_frames` frames. Called on the real-time thread.
    fn process(&mut self, input: &[f32], output: &mut [f32], num_frames: usize);

    /// Called once after the last block.
    fn stopped(&mut self);
}

/// Owns a callback and tells it when it is no longer being driven.
pub(crate) struct CallbackGuard(Box<dyn AudioCallback>);

impl CallbackGuard {
    pub(crate) fn new(callback: Box<dyn AudioCallback>) -> CallbackGuard {
        CallbackGuard(callback)
    }

    pub(crate) fn callback(&mut self) -> &mut dyn AudioCallback {
        self.0.as_mut()
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        self.0.stopped();
    }
}

/// A running output stream. Dropping it stops the stream.
pub struct OutputStream {
    name: String,
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl OutputStream {
    pub(crate) fn new(name: String, stop: Sender<()>, thread: JoinHandle<()>) -> OutputStream {
        OutputStream {
            name,
            stop,
            thread: Some(thread),
        }
    }

    /// Stops the stream and waits for its thread. The callback has been told
    /// it stopped by the time this returns.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.stop.send(());
            if thread.join().is_err() {
                error!(device = self.name, "Output thread panicked");
            }
        }
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub trait Device: fmt::Display + Send + Sync {
    /// Starts driving the callback from the device.
    fn start(&self, callback: Box<dyn AudioCallback>) -> Result<OutputStream, EngineError>;
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Device>>, EngineError> {
    cpal::Device::list()
}

/// Gets a device from the audio configuration. Names starting with `mock`
/// give a device that paces blocks with a timer instead of hardware.
pub fn get_device(config: &config::Audio) -> Result<Box<dyn Device>, EngineError> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Box::new(mock::Device::get(config)));
    }

    Ok(Box::new(cpal::Device::get(config)?))
}
