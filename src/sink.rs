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

//! The audio output, backed by cpal.
//!
//! The stream is built and owned by a dedicated output thread since cpal streams can't
//! move between threads on every platform. The stream callback pulls PCM straight from
//! the mix engine.

use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, span, Level};

use crate::config::Audio;
use crate::playsync::CancelHandle;
use crate::sampler::MixEngine;
use crate::thread_priority::{
    callback_thread_priority, configure_audio_thread_priority, rt_audio_enabled,
};

/// How often the output thread checks whether it should shut down.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Errors raised while opening the audio output.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("No output device named {0}")]
    NoSuchDevice(String),

    #[error("No default output device")]
    NoDefaultDevice,

    #[error("Audio host unavailable: {0}")]
    Host(#[from] cpal::HostUnavailable),

    #[error("Unable to list devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("Unable to read device name: {0}")]
    Name(#[from] cpal::DeviceNameError),

    #[error("Unable to query output config: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),

    #[error("Unable to build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("Unable to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    #[error("Unsupported output sample format {0:?}")]
    Format(cpal::SampleFormat),

    #[error("Unable to start output thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error("Output thread exited before the stream started")]
    Disconnected,
}

/// An output device, as listed by `devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub host: String,
    pub name: String,
    pub max_channels: u16,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name, self.max_channels, self.host
        )
    }
}

/// Lists the output devices of every available host.
pub fn list_devices() -> Result<Vec<DeviceInfo>, SinkError> {
    let mut devices = Vec::new();
    for host_id in cpal::available_hosts() {
        let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
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
            let Ok(configs) = device.supported_output_configs() else {
                continue;
            };
            let max_channels = configs.map(|config| config.channels()).max().unwrap_or(0);
            if max_channels > 0 {
                devices.push(DeviceInfo {
                    host: host_id.name().to_string(),
                    name: device.name()?,
                    max_channels,
                });
            }
        }
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(devices)
}

/// Finds the named output device on the default host, or the default device.
fn find_device(name: Option<&str>) -> Result<cpal::Device, SinkError> {
    let host = cpal::default_host();
    match name {
        None => host.default_output_device().ok_or(SinkError::NoDefaultDevice),
        Some(name) => {
            for device in host.output_devices()? {
                if device.name()?.trim() == name {
                    return Ok(device);
                }
            }
            Err(SinkError::NoSuchDevice(name.to_string()))
        }
    }
}

/// Builds and starts the output stream, with the engine rendering into it.
fn open_stream(audio: &Audio, mut engine: MixEngine) -> Result<cpal::Stream, SinkError> {
    let device = find_device(audio.device())?;
    let sample_format = device.default_output_config()?.sample_format();
    let config = cpal::StreamConfig {
        channels: engine.channels() as u16,
        sample_rate: cpal::SampleRate(audio.sample_rate()),
        buffer_size: match audio.buffer_size() {
            Some(frames) => cpal::BufferSize::Fixed(frames),
            None => cpal::BufferSize::Default,
        },
    };

    let priority = callback_thread_priority();
    let rt_audio = rt_audio_enabled();
    let mut priority_set = false;

    let stream = match sample_format {
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
                engine.render(data);
            },
            |err| error!("Output stream error: {}", err),
            None,
        )?,
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                configure_audio_thread_priority(priority, rt_audio, &mut priority_set);
                engine.render_f32(data);
            },
            |err| error!("Output stream error: {}", err),
            None,
        )?,
        other => return Err(SinkError::Format(other)),
    };
    stream.play()?;

    info!(
        device = device.name().unwrap_or_default(),
        channels = config.channels,
        sample_rate = audio.sample_rate(),
        format = ?sample_format,
        "Output stream started"
    );
    Ok(stream)
}

/// A running audio output. Dropping the sink stops the stream.
pub struct Sink {
    cancel: CancelHandle,
    handle: Option<JoinHandle<()>>,
}

impl Sink {
    /// Opens the configured output and starts pulling audio from the engine. Returns once
    /// the stream is playing.
    pub fn start(audio: Audio, engine: MixEngine) -> Result<Sink, SinkError> {
        let cancel = CancelHandle::new();
        let (started_tx, started_rx) = crossbeam_channel::bounded(1);

        let handle = {
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("audio-output".to_string())
                .spawn(move || {
                    let span = span!(Level::INFO, "audio output");
                    let _enter = span.enter();

                    let stream = match open_stream(&audio, engine) {
                        Ok(stream) => {
                            let _ = started_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = started_tx.send(Err(e));
                            return;
                        }
                    };

                    // Keep the stream alive until cancelled.
                    while !cancel.wait_timeout(SHUTDOWN_POLL) {}
                    drop(stream);
                    info!("Output stream stopped");
                })?
        };

        match started_rx.recv() {
            Ok(Ok(())) => Ok(Sink {
                cancel,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(SinkError::Disconnected),
        }
    }

    /// Stops the stream and waits for the output thread to exit.
    pub fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("running", &!self.cancel.is_cancelled())
            .finish()
    }
}
