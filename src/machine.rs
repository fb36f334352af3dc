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

//! Wires a sequencer to a sampler according to the configuration.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{self, ConfigError};
use crate::sampler::{
    LoadError, MixEngine, MixSettings, Sampler, SamplerBridge, VoiceSettings,
};
use crate::sequencer::Sequencer;

/// Steps unmuted on the first track when no track configures a pattern.
pub const DEFAULT_PATTERN: [i64; 4] = [0, 4, 8, 12];

/// The outcome of loading one track's sample.
#[derive(Debug)]
pub struct SampleLoad {
    pub track: usize,
    pub path: PathBuf,
    /// The number of samples loaded.
    pub result: Result<usize, LoadError>,
}

/// A sequencer driving a sampler.
pub struct DrumMachine {
    sequencer: Sequencer,
    sampler: Sampler,
    /// Handed to the audio sink once it starts.
    engine: Option<MixEngine>,
    samples: Vec<PathBuf>,
}

impl DrumMachine {
    /// Builds the machine described by the configuration. Samples aren't loaded and the
    /// clock isn't started yet.
    pub fn new(config: &config::Machine) -> Result<DrumMachine, ConfigError> {
        let audio = config.audio();
        let voices: Vec<VoiceSettings> = config
            .tracks()
            .iter()
            .map(|track| VoiceSettings {
                volume: track.volume(),
                interpolation: track.interpolation(),
            })
            .collect();
        let (sampler, engine) = Sampler::new(
            &voices,
            MixSettings {
                channels: audio.channels(),
                latency: config.latency()?,
                interpolation: config.interpolation(),
                volume: config.master_volume(),
                sample_rate: audio.sample_rate(),
            },
        );

        let sequencer = Sequencer::new(voices.len(), config.steps());
        sequencer.set_bpm(config.bpm());
        let mut patterned = false;
        for (index, track) in config.tracks().iter().enumerate() {
            if let Some(steps) = track.steps() {
                patterned = true;
                for step in steps {
                    sequencer.unmute(index as i64, *step);
                }
            }
        }
        if !patterned {
            for step in DEFAULT_PATTERN {
                sequencer.unmute(0, step);
            }
        }
        sequencer.subscribe(Arc::new(SamplerBridge::new(sampler.clone())));

        info!(
            tracks = voices.len(),
            steps = config.steps(),
            bpm = config.bpm(),
            sample_rate = audio.sample_rate(),
            "Drum machine ready"
        );
        Ok(DrumMachine {
            sequencer,
            sampler,
            engine: Some(engine),
            samples: config.sample_paths(),
        })
    }

    /// Loads every track's sample in parallel and waits for all of them. Tracks whose
    /// sample fails to load stay silent.
    pub fn load_samples(&self) -> Vec<SampleLoad> {
        let pending: Vec<_> = self
            .samples
            .iter()
            .enumerate()
            .map(|(track, path)| (track, path.clone(), self.sampler.load_asset(track, path.clone())))
            .collect();

        pending
            .into_iter()
            .map(|(track, path, handle)| {
                let result = handle.join().unwrap_or_else(|_| {
                    Err(LoadError::Io {
                        path: path.clone(),
                        source: io::Error::other("sample loader panicked"),
                    })
                });
                if result.is_err() {
                    warn!(track, path = ?path, "Track will be silent");
                }
                SampleLoad {
                    track,
                    path,
                    result,
                }
            })
            .collect()
    }

    /// Starts the sequencer clock.
    pub fn start(&self) -> io::Result<()> {
        self.sequencer.start()
    }

    /// Stops the sequencer clock and playback.
    pub fn shutdown(&self) {
        self.sequencer.stop();
        self.sequencer.shutdown();
    }

    /// Takes the mix engine to hand it to an audio sink. Only returns it once.
    pub fn take_engine(&mut self) -> Option<MixEngine> {
        self.engine.take()
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Resolved sample paths, in track order.
    pub fn samples(&self) -> &[PathBuf] {
        &self.samples
    }
}

impl std::fmt::Debug for DrumMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrumMachine")
            .field("sequencer", &self.sequencer)
            .field("sampler", &self.sampler)
            .field("samples", &self.samples)
            .finish()
    }
}
