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
use std::{fmt, thread};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, Level};

use crate::audio::thread_priority::{
    callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled,
};
use crate::audio::{AudioCallback, CallbackGuard, Device as AudioDevice, OutputStream};
use crate::config;
use crate::error::EngineError;

fn device_error<E: fmt::Display>(e: E) -> EngineError {
    EngineError::Device(e.to_string())
}

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// Requested sample rate. The device default is used when unset.
    sample_rate: Option<u32>,
    /// Frames per callback block.
    block_size: usize,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// Builds the cpal data callback. The engine callback runs in sub-blocks of
/// at most `block_size` frames, converted into the device's sample type.
fn create_output_callback<T>(
    mut guard: CallbackGuard,
    channels: usize,
    block_size: usize,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut scratch = vec![0.0f32; block_size * channels];
    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;

    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        configure_audio_thread_priority(priority, rt_audio, &mut priority_set);

        for chunk in data.chunks_mut(block_size * channels) {
            let frames = chunk.len() / channels;
            let block = &mut scratch[..frames * channels];
            guard.callback().process(&[], block, frames);
            for (dst, src) in chunk.iter_mut().zip(block.iter()) {
                *dst = T::from_sample(*src);
            }
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    guard: CallbackGuard,
    block_size: usize,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    device.build_output_stream(
        config,
        create_output_callback::<T>(guard, config.channels as usize, block_size),
        |err| error!("CPAL output stream error: {}", err),
        None,
    )
}

impl Device {
    /// Lists cpal devices and produces the Device trait.
    pub fn list() -> Result<Vec<Box<dyn AudioDevice>>, EngineError> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn AudioDevice> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices.
    fn list_cpal_devices() -> Result<Vec<Device>, EngineError> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout().map_err(device_error)?;
        let _shh_stderr = shh::stderr().map_err(device_error)?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id).map_err(device_error)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs.map(|c| c.channels()).max().unwrap_or(0);

                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name().map_err(device_error)?,
                        max_channels,
                        host_id,
                        device,
                        sample_rate: None,
                        block_size: config::DEFAULT_BLOCK_SIZE,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the given cpal device.
    pub fn get(config: &config::Audio) -> Result<Device, EngineError> {
        let name = config.device();
        match Device::list_cpal_devices()?
            .into_iter()
            .find(|device| device.name.trim() == name)
        {
            Some(mut device) => {
                device.sample_rate = config.sample_rate();
                device.block_size = config.block_size();
                Ok(device)
            }
            None => Err(EngineError::Device(format!(
                "no device found with name {}",
                name
            ))),
        }
    }
}

impl AudioDevice for Device {
    fn start(&self, callback: Box<dyn AudioCallback>) -> Result<OutputStream, EngineError> {
        let span = span!(Level::INFO, "start stream (cpal)");
        let _enter = span.enter();

        let default_config = self.device.default_output_config().map_err(device_error)?;
        let sample_format = default_config.sample_format();
        let sample_rate = self
            .sample_rate
            .unwrap_or(default_config.sample_rate().0);
        let config = cpal::StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let block_size = self.block_size.max(1);

        info!(
            device = self.name,
            sample_rate,
            channels = config.channels,
            block_size,
            format = ?sample_format,
            "Starting output stream."
        );

        let mut guard = CallbackGuard::new(callback);
        guard.callback().about_to_start(sample_rate, block_size);

        // cpal streams can't always move between threads, so the stream lives
        // on its own thread until stopped.
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let device = self.device.clone();
        let name = self.name.clone();
        let thread = thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => {
                        build_stream::<f32>(&device, &config, guard, block_size)
                    }
                    cpal::SampleFormat::I16 => {
                        build_stream::<i16>(&device, &config, guard, block_size)
                    }
                    cpal::SampleFormat::I32 => {
                        build_stream::<i32>(&device, &config, guard, block_size)
                    }
                    cpal::SampleFormat::U16 => {
                        build_stream::<u16>(&device, &config, guard, block_size)
                    }
                    other => {
                        let _ = ready_tx.send(Err(EngineError::Device(format!(
                            "unsupported sample format {:?}",
                            other
                        ))));
                        return;
                    }
                };

                let stream = match stream.map_err(device_error).and_then(|stream| {
                    stream.play().map_err(device_error)?;
                    Ok(stream)
                }) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                info!(device = name, "CPAL output stream started successfully");
                let _ = ready_tx.send(Ok(()));

                let _ = stop_rx.recv();
                drop(stream);
                info!(device = name, "CPAL output stream stopped");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(OutputStream::new(self.name.clone(), stop_tx, thread)),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(EngineError::Device("output thread exited".to_string()))
            }
        }
    }
}
