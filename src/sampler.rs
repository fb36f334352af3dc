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

//! Multi-voice sample playback.
//!
//! This module provides:
//! - Sample loading (the whole file is held in memory)
//! - A latency-compensated trigger queue fed by the sequencer
//! - Per-track voices and the mixing render loop pulled by the audio sink
//!
//! The [`Sampler`] handle is used from control threads. The [`MixEngine`] is owned by
//! the render callback and is the only thing that touches voice state.

mod asset;
mod bridge;
mod mixer;
mod queue;
mod voice;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

pub use asset::{LoadError, SampleAsset, HEADER_SIZE};
pub use bridge::SamplerBridge;
pub use mixer::MixEngine;
pub use queue::{TriggerEvent, TriggerQueue};
pub use voice::{SampleVoice, VoiceState};

/// Default output sample rate. Sample files are expected to be recorded at this rate.
pub const SAMPLE_RATE: u32 = 44100;

/// Mixed output is clamped to this magnitude.
pub const MAX_AMPLITUDE: f32 = 32760.0;

/// The most triggers that can be pending at once.
pub const QUEUE_CAPACITY: usize = 64;

/// Default delay between a trigger and the moment it sounds.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(300);

/// Smoothing ratio used when interpolation is enabled without an explicit ratio.
pub const DEFAULT_INTERPOLATION_RATIO: f32 = 0.5;

/// Playback settings for a single voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSettings {
    /// Fixed gain for the voice.
    pub volume: f32,
    /// Smoothing ratio, or None to disable smoothing.
    pub interpolation: Option<f32>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        VoiceSettings {
            volume: 1.0,
            interpolation: None,
        }
    }
}

/// Settings for the mix engine as a whole.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixSettings {
    /// Number of interleaved output channels. Every channel carries the same signal.
    pub channels: u16,
    /// Trigger latency compensation.
    pub latency: Duration,
    /// Output smoothing ratio, or None to disable smoothing.
    pub interpolation: Option<f32>,
    /// Initial master volume.
    pub volume: f32,
    /// Frames per second the engine is pulled at. Trigger times are converted to
    /// frames at this rate.
    pub sample_rate: u32,
}

impl Default for MixSettings {
    fn default() -> Self {
        MixSettings {
            channels: 1,
            latency: DEFAULT_LATENCY,
            interpolation: None,
            volume: 1.0,
            sample_rate: SAMPLE_RATE,
        }
    }
}

/// State shared between the control handle and the render loop.
pub(crate) struct SamplerShared {
    pub(crate) queue: Mutex<TriggerQueue>,
    /// Master volume, stored as f32 bits.
    volume: AtomicU32,
    muted: AtomicBool,
}

impl SamplerShared {
    pub(crate) fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub(crate) fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

/// A control handle for the sampler. Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct Sampler {
    shared: Arc<SamplerShared>,
    voices: usize,
    /// Hands loaded assets to the render loop.
    assets: Sender<(usize, Arc<SampleAsset>)>,
    /// Assets the render loop swapped out. They are freed here rather than in the
    /// audio callback.
    retired: Receiver<Arc<SampleAsset>>,
}

impl Sampler {
    /// Creates a sampler with one voice per entry in `voices`. The returned mix engine
    /// should be handed to the audio sink.
    pub fn new(voices: &[VoiceSettings], settings: MixSettings) -> (Sampler, MixEngine) {
        let shared = Arc::new(SamplerShared {
            queue: Mutex::new(TriggerQueue::new(
                QUEUE_CAPACITY,
                voices.len(),
                settings.latency,
                settings.sample_rate,
            )),
            volume: AtomicU32::new(settings.volume.to_bits()),
            muted: AtomicBool::new(false),
        });
        // Each voice normally gets one asset, a reload makes it two.
        let slots = voices.len().max(1) * 2;
        let (assets, asset_rx) = crossbeam_channel::bounded(slots);
        let (retired_tx, retired) = crossbeam_channel::bounded(slots);

        let engine = MixEngine::new(shared.clone(), voices, asset_rx, retired_tx, settings);
        let sampler = Sampler {
            shared,
            voices: voices.len(),
            assets,
            retired,
        };
        (sampler, engine)
    }

    /// Schedules a voice to sound after the configured latency. Ignored if the sampler
    /// hasn't been synced, the voice doesn't exist, or too many triggers are pending.
    pub fn trigger(&self, voice: usize, velocity: f32) {
        self.trigger_at(voice, velocity, Instant::now());
    }

    pub(crate) fn trigger_at(&self, voice: usize, velocity: f32, now: Instant) -> bool {
        self.shared.queue.lock().push(voice, velocity, now)
    }

    /// Drops pending triggers and restarts sample time from zero.
    pub fn sync(&self) {
        self.sync_at(Instant::now());
    }

    pub(crate) fn sync_at(&self, now: Instant) {
        self.shared.queue.lock().sync(now);
        debug!("Sampler synced");
    }

    /// Drops pending triggers. Voices that are already sounding keep playing.
    pub fn clear_queue(&self) {
        self.shared.queue.lock().clear();
    }

    /// The number of pending triggers.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Sets the master volume. Values are not clamped; the mix is limited instead.
    pub fn set_volume(&self, volume: f32) {
        self.shared.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    /// The master volume.
    pub fn volume(&self) -> f32 {
        self.shared.volume()
    }

    /// Silences the output. Voices keep advancing while muted.
    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
    }

    pub fn muted(&self) -> bool {
        self.shared.muted()
    }

    /// Changes the latency applied to triggers from now on.
    pub fn set_latency(&self, latency: Duration) {
        self.shared.queue.lock().set_latency(latency);
        info!(latency_ms = latency.as_millis(), "Sampler latency changed");
    }

    pub fn latency(&self) -> Duration {
        self.shared.queue.lock().latency()
    }

    /// The number of voices.
    pub fn voices(&self) -> usize {
        self.voices
    }

    /// Hands an asset to the render loop for the given voice. Out of range voices are
    /// ignored, as are installs while the render loop is too far behind to take them.
    pub fn install_asset(&self, voice: usize, asset: Arc<SampleAsset>) {
        if voice >= self.voices {
            debug!(voice, "Ignoring asset for unknown voice");
            return;
        }
        self.collect_retired();
        match self.assets.try_send((voice, asset)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(voice, "Mix engine has too many pending assets, dropping asset");
            }
            // The engine only goes away once the sink is torn down.
            Err(TrySendError::Disconnected(_)) => {
                debug!(voice, "Mix engine is gone, dropping asset");
            }
        }
    }

    /// Frees assets the render loop has replaced. Returns how many were collected.
    pub fn collect_retired(&self) -> usize {
        self.retired.try_iter().count()
    }

    /// Loads a sample file on a background thread and installs it into the voice once
    /// loaded. The voice stays silent if loading fails. The error is logged and returned
    /// through the join handle.
    pub fn load_asset(&self, voice: usize, path: PathBuf) -> JoinHandle<Result<usize, LoadError>> {
        let sampler = self.clone();
        thread::spawn(move || match SampleAsset::load(&path) {
            Ok(asset) => {
                let len = asset.len();
                sampler.install_asset(voice, Arc::new(asset));
                Ok(len)
            }
            Err(e) => {
                error!(voice, err = %e, "Unable to load sample, voice will stay silent");
                Err(e)
            }
        })
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("voices", &self.voices)
            .field("volume", &self.volume())
            .field("muted", &self.muted())
            .finish()
    }
}
