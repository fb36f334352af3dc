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
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File};
use duration_string::DurationString;
use serde::Deserialize;

use super::audio::Audio;
use super::error::ConfigError;
use super::track::Track;
use crate::sampler::{DEFAULT_INTERPOLATION_RATIO, DEFAULT_LATENCY};
use crate::sequencer::{DEFAULT_BPM, DEFAULT_STEPS};

const DEFAULT_MASTER_VOLUME: f32 = 1.0;

/// Smoothing is either switched on with the default ratio or given an explicit ratio.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(untagged)]
pub enum Interpolation {
    Enabled(bool),
    Ratio(f32),
}

impl Interpolation {
    /// The smoothing ratio, or None if smoothing is off. A ratio of zero turns it off.
    pub fn ratio(self) -> Option<f32> {
        match self {
            Interpolation::Enabled(true) => Some(DEFAULT_INTERPOLATION_RATIO),
            Interpolation::Enabled(false) => None,
            Interpolation::Ratio(ratio) if ratio > 0.0 => Some(ratio.min(1.0)),
            Interpolation::Ratio(_) => None,
        }
    }
}

/// Latency is a plain number of milliseconds or a duration string such as "300ms".
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Latency {
    Millis(f64),
    Text(String),
}

/// The top level drum machine configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct Machine {
    /// One entry per sequencer track.
    #[serde(default)]
    tracks: Vec<Track>,

    /// Delay between a step and the moment it sounds (default: 300ms).
    latency: Option<Latency>,

    /// Output smoothing.
    interpolation: Option<Interpolation>,

    /// Starting tempo (default: 120).
    bpm: Option<f64>,

    /// Starting master volume (default: 1.0).
    master_volume: Option<f32>,

    /// Steps per track (default: 16).
    steps: Option<usize>,

    /// Audio output settings.
    audio: Option<Audio>,

    /// Directory sample paths are resolved against.
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Machine {
    /// Parse a machine configuration from a YAML or JSON file. The format is taken from
    /// the file extension.
    pub fn deserialize(path: &Path) -> Result<Machine, ConfigError> {
        let mut machine = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Machine>()?;
        machine.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        machine.validate()?;
        Ok(machine)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tracks.is_empty() {
            return Err(ConfigError::NoTracks);
        }
        for (index, track) in self.tracks.iter().enumerate() {
            if !track.volume().is_finite() || track.volume() < 0.0 {
                return Err(ConfigError::Invalid {
                    field: format!("tracks[{}].volume", index),
                    reason: format!("{} is not a non-negative number", track.volume()),
                });
            }
        }
        if !self.master_volume().is_finite() || self.master_volume() < 0.0 {
            return Err(ConfigError::Invalid {
                field: "master_volume".to_string(),
                reason: format!("{} is not a non-negative number", self.master_volume()),
            });
        }
        if self.audio().sample_rate() == 0 {
            return Err(ConfigError::Invalid {
                field: "audio.sample_rate".to_string(),
                reason: "must be at least 1Hz".to_string(),
            });
        }
        if self.steps == Some(0) {
            return Err(ConfigError::Invalid {
                field: "steps".to_string(),
                reason: "a track needs at least one step".to_string(),
            });
        }
        self.latency()?;
        Ok(())
    }

    /// The configured tracks.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Returns the latency (default: 300ms).
    pub fn latency(&self) -> Result<Duration, ConfigError> {
        match &self.latency {
            None => Ok(DEFAULT_LATENCY),
            Some(Latency::Millis(ms)) if ms.is_finite() && *ms >= 0.0 => {
                Ok(Duration::from_secs_f64(ms / 1000.0))
            }
            Some(Latency::Millis(ms)) => Err(ConfigError::Duration {
                field: "latency",
                value: ms.to_string(),
                reason: "must be a non-negative number of milliseconds".to_string(),
            }),
            Some(Latency::Text(text)) => DurationString::from_string(text.clone())
                .map(Into::into)
                .map_err(|e| ConfigError::Duration {
                    field: "latency",
                    value: text.clone(),
                    reason: e.to_string(),
                }),
        }
    }

    /// Returns the output smoothing ratio, if enabled.
    pub fn interpolation(&self) -> Option<f32> {
        self.interpolation.and_then(Interpolation::ratio)
    }

    /// Returns the starting tempo (default: 120).
    pub fn bpm(&self) -> f64 {
        self.bpm.unwrap_or(DEFAULT_BPM)
    }

    /// Returns the starting master volume (default: 1.0).
    pub fn master_volume(&self) -> f32 {
        self.master_volume.unwrap_or(DEFAULT_MASTER_VOLUME)
    }

    /// Returns the number of steps per track (default: 16).
    pub fn steps(&self) -> usize {
        self.steps.unwrap_or(DEFAULT_STEPS)
    }

    /// Returns the audio configuration, defaulted if absent.
    pub fn audio(&self) -> Audio {
        self.audio.clone().unwrap_or_default()
    }

    /// The directory sample paths are resolved against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolved sample file paths, in track order.
    pub fn sample_paths(&self) -> Vec<PathBuf> {
        self.tracks
            .iter()
            .map(|track| track.sample_path(&self.base_dir))
            .collect()
    }
}
