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
use serde::Deserialize;

use crate::sampler::SAMPLE_RATE;

const DEFAULT_CHANNELS: u16 = 1;

/// The audio output configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Audio {
    /// The output device name. Uses the system default when unset.
    device: Option<String>,

    /// Number of output channels (default: 1). Every channel carries the same mix.
    channels: Option<u16>,

    /// Output sample rate in Hz (default: 44100). Trigger timing follows the output rate,
    /// but samples are not resampled, so other rates change their pitch.
    sample_rate: Option<u32>,

    /// Stream buffer size in frames. Uses the backend default when unset.
    buffer_size: Option<u32>,
}

impl Audio {
    /// Creates an audio configuration for the given device and channel count.
    pub fn new(device: Option<&str>, channels: Option<u16>) -> Audio {
        Audio {
            device: device.map(str::to_string),
            channels,
            ..Default::default()
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Returns the number of output channels (default: 1, never 0).
    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS).max(1)
    }

    /// Returns the output sample rate (default: 44100).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(SAMPLE_RATE)
    }

    /// Returns the stream buffer size in frames, if fixed.
    pub fn buffer_size(&self) -> Option<u32> {
        self.buffer_size
    }
}
