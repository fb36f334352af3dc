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

//! The render loop pulled by the audio sink.
//!
//! Nothing in here may block, allocate or free. Replaced assets are handed back to the
//! control side to be dropped there.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::trace;

use super::asset::SampleAsset;
use super::queue::TriggerEvent;
use super::voice::SampleVoice;
use super::{MixSettings, SamplerShared, VoiceSettings, MAX_AMPLITUDE, QUEUE_CAPACITY};

/// Mixes all voices into interleaved PCM frames.
pub struct MixEngine {
    shared: Arc<SamplerShared>,
    voices: Vec<SampleVoice>,
    assets: Receiver<(usize, Arc<SampleAsset>)>,
    retired: Sender<Arc<SampleAsset>>,
    /// Triggers taken from the queue that haven't reached their frame yet.
    due: Vec<TriggerEvent>,
    /// The queue generation this engine last saw.
    generation: u64,
    /// Frames rendered since the last sync.
    time: u64,
    channels: usize,
    interpolation: Option<f32>,
    smoothed: f32,
}

impl MixEngine {
    pub(crate) fn new(
        shared: Arc<SamplerShared>,
        voices: &[VoiceSettings],
        assets: Receiver<(usize, Arc<SampleAsset>)>,
        retired: Sender<Arc<SampleAsset>>,
        settings: MixSettings,
    ) -> MixEngine {
        let generation = shared.queue.lock().generation();
        MixEngine {
            shared,
            voices: voices
                .iter()
                .map(|voice| SampleVoice::new(voice.volume, voice.interpolation))
                .collect(),
            assets,
            retired,
            due: Vec::with_capacity(QUEUE_CAPACITY),
            generation,
            time: 0,
            channels: usize::from(settings.channels.max(1)),
            interpolation: settings.interpolation,
            smoothed: 0.0,
        }
    }

    /// Number of interleaved output channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Frames rendered since the last sync.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Returns the voice at the given index.
    pub fn voice(&self, index: usize) -> Option<&SampleVoice> {
        self.voices.get(index)
    }

    /// Picks up newly loaded assets and due triggers ahead of a block of `frames`.
    fn prepare(&mut self, frames: usize) {
        while let Ok((index, asset)) = self.assets.try_recv() {
            let Some(voice) = self.voices.get_mut(index) else {
                continue;
            };
            if let Some(previous) = voice.install(asset) {
                if self.retired.try_send(previous).is_err() {
                    trace!("Retired asset backlog full, freeing in the render loop");
                }
            }
        }

        // A control thread holds the lock only briefly; skip a block rather than wait.
        let Some(mut queue) = self.shared.queue.try_lock() else {
            trace!("Trigger queue busy, deferring");
            return;
        };
        if queue.generation() != self.generation {
            self.generation = queue.generation();
            self.time = 0;
            self.due.clear();
        }
        if frames == 0 {
            return;
        }
        let last = self.time + frames as u64 - 1;
        while self.due.len() < self.due.capacity() {
            match queue.pop_due(last) {
                Some(event) => self.due.push(event),
                None => break,
            }
        }
    }

    /// Computes the next mixed frame value and advances sample time.
    #[inline]
    fn next_frame(&mut self, volume: f32, muted: bool) -> f32 {
        // Events are in scheduled order, so applied ones are always a prefix.
        let mut applied = 0;
        for event in self.due.iter() {
            if event.scheduled > self.time {
                break;
            }
            if let Some(voice) = self.voices.get_mut(event.voice) {
                voice.activate(event.velocity);
            }
            applied += 1;
        }
        if applied > 0 {
            self.due.drain(..applied);
        }

        let mut sum = 0.0;
        for voice in self.voices.iter_mut() {
            sum += voice.render_sample();
        }
        let mix = if muted {
            0.0
        } else {
            (sum * volume).clamp(-MAX_AMPLITUDE, MAX_AMPLITUDE)
        };

        self.smoothed = match self.interpolation {
            Some(ratio) => self.smoothed * (1.0 - ratio) + mix * ratio,
            None => mix,
        };
        self.time += 1;
        self.smoothed
    }

    /// Renders interleaved 16-bit frames. Any trailing partial frame is zeroed.
    pub fn render(&mut self, output: &mut [i16]) {
        let frames = output.len() / self.channels;
        self.prepare(frames);
        let volume = self.shared.volume();
        let muted = self.shared.muted();

        let (body, rest) = output.split_at_mut(frames * self.channels);
        for frame in body.chunks_exact_mut(self.channels) {
            let value = self.next_frame(volume, muted) as i16;
            frame.fill(value);
        }
        rest.fill(0);
    }

    /// Renders interleaved float frames in [-1, 1].
    pub fn render_f32(&mut self, output: &mut [f32]) {
        let frames = output.len() / self.channels;
        self.prepare(frames);
        let volume = self.shared.volume();
        let muted = self.shared.muted();

        let (body, rest) = output.split_at_mut(frames * self.channels);
        for frame in body.chunks_exact_mut(self.channels) {
            let value = f32::from(self.next_frame(volume, muted) as i16) / f32::from(i16::MAX);
            frame.fill(value);
        }
        rest.fill(0.0);
    }

    /// Fills a byte buffer with little-endian 16-bit frames.
    pub fn fill_bytes(&mut self, output: &mut [u8]) {
        let frame_size = 2 * self.channels;
        let frames = output.len() / frame_size;
        self.prepare(frames);
        let volume = self.shared.volume();
        let muted = self.shared.muted();

        let (body, rest) = output.split_at_mut(frames * frame_size);
        for frame in body.chunks_exact_mut(frame_size) {
            let bytes = (self.next_frame(volume, muted) as i16).to_le_bytes();
            for sample in frame.chunks_exact_mut(2) {
                sample.copy_from_slice(&bytes);
            }
        }
        rest.fill(0);
    }
}

impl fmt::Debug for MixEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MixEngine")
            .field("voices", &self.voices.len())
            .field("channels", &self.channels)
            .field("time", &self.time)
            .field("due", &self.due.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::super::{Sampler, VoiceState, DEFAULT_LATENCY};
    use super::*;

    fn engine(voices: usize, settings: MixSettings) -> (Sampler, MixEngine) {
        Sampler::new(&vec![VoiceSettings::default(); voices], settings)
    }

    fn flat(value: i16, len: usize) -> Arc<SampleAsset> {
        Arc::new(SampleAsset::from_samples("flat", vec![value; len]))
    }

    fn no_latency() -> MixSettings {
        MixSettings {
            latency: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_silence_without_triggers() {
        let (sampler, mut engine) = engine(1, no_latency());
        sampler.install_asset(0, flat(1000, 10));
        let mut buffer = [1i16; 16];
        engine.render(&mut buffer);
        assert!(buffer.iter().all(|&sample| sample == 0));
        assert_eq!(16, engine.time());
    }

    #[test]
    fn test_trigger_plays_voice() {
        let (sampler, mut engine) = engine(1, no_latency());
        sampler.install_asset(0, flat(1000, 4));
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        sampler.trigger_at(0, 0.5, epoch);

        let mut buffer = [0i16; 6];
        engine.render(&mut buffer);
        assert_eq!([500, 500, 500, 500, 0, 0], buffer);
        assert_eq!(Some(VoiceState::Idle), engine.voice(0).map(|voice| voice.state()));
    }

    #[test]
    fn test_triggers_activate_in_order() {
        let (sampler, mut engine) = engine(2, no_latency());
        sampler.install_asset(0, flat(100, 1000));
        sampler.install_asset(1, flat(10, 1000));
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        // 1ms is 44.1 frames, rounded up to 45. 2ms rounds up to 89.
        sampler.trigger_at(0, 1.0, epoch + Duration::from_millis(1));
        sampler.trigger_at(1, 1.0, epoch + Duration::from_millis(2));

        let mut buffer = [0i16; 100];
        engine.render(&mut buffer);
        assert_eq!(0, buffer[44]);
        assert_eq!(100, buffer[45]);
        assert_eq!(100, buffer[88]);
        assert_eq!(110, buffer[89]);
        assert_eq!(0, sampler.pending());
    }

    #[test]
    fn test_triggers_span_blocks() {
        let (sampler, mut engine) = engine(1, no_latency());
        sampler.install_asset(0, flat(100, 1000));
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        sampler.trigger_at(0, 1.0, epoch + Duration::from_millis(1));

        let mut buffer = [0i16; 32];
        engine.render(&mut buffer);
        assert!(buffer.iter().all(|&sample| sample == 0));
        assert_eq!(1, sampler.pending());

        engine.render(&mut buffer);
        assert_eq!(0, buffer[12]);
        assert_eq!(100, buffer[13]);
        assert_eq!(0, sampler.pending());
    }

    #[test]
    fn test_mix_is_clamped() {
        let voices = 40;
        let (sampler, mut engine) = engine(voices, no_latency());
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        for voice in 0..voices {
            sampler.install_asset(voice, flat(if voice % 2 == 0 { i16::MAX } else { i16::MIN }, 8));
        }
        for voice in (0..voices).step_by(2) {
            sampler.trigger_at(voice, 1.0, epoch);
        }
        sampler.set_volume(4.0);

        let mut buffer = [0i16; 8];
        engine.render(&mut buffer);
        assert!(buffer.iter().all(|&sample| sample == MAX_AMPLITUDE as i16));

        sampler.sync_at(epoch);
        for voice in (1..voices).step_by(2) {
            sampler.trigger_at(voice, 1.0, epoch);
        }
        engine.render(&mut buffer);
        assert!(buffer.iter().all(|&sample| sample == -(MAX_AMPLITUDE as i16)));
    }

    #[test]
    fn test_muted_output_still_advances_voices() {
        let (sampler, mut engine) = engine(1, no_latency());
        sampler.install_asset(0, flat(1000, 100));
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        sampler.trigger_at(0, 1.0, epoch);
        sampler.set_muted(true);

        let mut buffer = [0i16; 10];
        engine.render(&mut buffer);
        assert!(buffer.iter().all(|&sample| sample == 0));
        assert_eq!(Some(10), engine.voice(0).map(|voice| voice.cursor()));

        sampler.set_muted(false);
        engine.render(&mut buffer);
        assert!(buffer.iter().all(|&sample| sample == 1000));
        assert_eq!(Some(20), engine.voice(0).map(|voice| voice.cursor()));
    }

    #[test]
    fn test_sync_resets_time() {
        let (sampler, mut engine) = engine(1, no_latency());
        sampler.sync();
        let mut buffer = [0i16; 64];
        engine.render(&mut buffer);
        assert_eq!(64, engine.time());

        sampler.sync();
        engine.render(&mut buffer);
        assert_eq!(64, engine.time());
    }

    #[test]
    fn test_clear_queue_keeps_voice_playing() {
        let (sampler, mut engine) = engine(1, no_latency());
        sampler.install_asset(0, flat(500, 1000));
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        sampler.trigger_at(0, 1.0, epoch);
        sampler.trigger_at(0, 1.0, epoch + Duration::from_secs(5));

        let mut buffer = [0i16; 16];
        engine.render(&mut buffer);
        sampler.clear_queue();
        assert_eq!(0, sampler.pending());
        engine.render(&mut buffer);
        assert!(buffer.iter().all(|&sample| sample == 500));
        assert_eq!(Some(32), engine.voice(0).map(|voice| voice.cursor()));
    }

    #[test]
    fn test_latency_offsets_activation() {
        let (sampler, mut engine) = engine(1, MixSettings::default());
        sampler.install_asset(0, flat(700, 100));
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        sampler.trigger_at(0, 1.0, epoch);

        let expected = (DEFAULT_LATENCY.as_millis() as usize) * 441 / 10;
        assert_eq!(13230, expected);

        let mut buffer = vec![0i16; 512];
        let mut rendered = 0;
        let mut first = None;
        while rendered < expected + 1024 && first.is_none() {
            engine.render(&mut buffer);
            first = buffer
                .iter()
                .position(|&sample| sample != 0)
                .map(|offset| rendered + offset);
            rendered += buffer.len();
        }
        assert_eq!(Some(expected), first);
    }

    #[test]
    fn test_multichannel_output() {
        let settings = MixSettings {
            channels: 2,
            ..no_latency()
        };
        let (sampler, mut engine) = engine(1, settings);
        sampler.install_asset(0, flat(-300, 100));
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        sampler.trigger_at(0, 1.0, epoch);

        let mut buffer = [0i16; 7];
        engine.render(&mut buffer);
        assert_eq!([-300, -300, -300, -300, -300, -300, 0], buffer);
        assert_eq!(3, engine.time());
    }

    #[test]
    fn test_fill_bytes() {
        let settings = MixSettings {
            channels: 2,
            ..no_latency()
        };
        let (sampler, mut engine) = engine(1, settings);
        sampler.install_asset(0, flat(0x0102, 100));
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        sampler.trigger_at(0, 1.0, epoch);

        let mut bytes = [0xFFu8; 10];
        engine.fill_bytes(&mut bytes);
        assert_eq!([2, 1, 2, 1, 2, 1, 2, 1, 0, 0], bytes);
        assert_eq!(2, engine.time());
    }

    #[test]
    fn test_render_f32_scale() {
        let (sampler, mut engine) = engine(1, no_latency());
        sampler.install_asset(0, flat(i16::MAX, 4));
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        sampler.trigger_at(0, 1.0, epoch);

        let mut buffer = [0f32; 4];
        engine.render_f32(&mut buffer);
        let expected = MAX_AMPLITUDE / f32::from(i16::MAX);
        assert!(buffer.iter().all(|&sample| (sample - expected).abs() < 1e-6));
    }

    #[test]
    fn test_replaced_asset_is_freed_by_sampler() {
        let (sampler, mut engine) = engine(1, no_latency());
        let first = flat(100, 10);
        let first_weak = Arc::downgrade(&first);
        sampler.install_asset(0, first);

        let mut buffer = [0i16; 4];
        engine.render(&mut buffer);
        assert!(first_weak.upgrade().is_some());

        sampler.install_asset(0, flat(200, 10));
        engine.render(&mut buffer);
        // Swapped out, but still held until the control side collects it.
        assert!(first_weak.upgrade().is_some());
        assert_eq!(1, sampler.collect_retired());
        assert!(first_weak.upgrade().is_none());
        assert_eq!(0, sampler.collect_retired());
    }

    #[test]
    fn test_device_rate_schedules_triggers() {
        let settings = MixSettings {
            sample_rate: 48000,
            ..Default::default()
        };
        let (sampler, mut engine) = engine(1, settings);
        sampler.install_asset(0, flat(700, 100));
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        // Sounds 700ms plus the default 300ms latency after the epoch.
        sampler.trigger_at(0, 1.0, epoch + Duration::from_millis(700));

        let mut buffer = vec![0i16; 1000];
        let mut rendered = 0;
        let mut first = None;
        while rendered < 50_000 && first.is_none() {
            engine.render(&mut buffer);
            first = buffer
                .iter()
                .position(|&sample| sample != 0)
                .map(|offset| rendered + offset);
            rendered += buffer.len();
        }
        assert_eq!(Some(48000), first);
    }

    #[test]
    fn test_engine_interpolation() {
        let settings = MixSettings {
            interpolation: Some(0.5),
            ..no_latency()
        };
        let (sampler, mut engine) = engine(1, settings);
        sampler.install_asset(0, flat(1000, 100));
        let epoch = Instant::now();
        sampler.sync_at(epoch);
        sampler.trigger_at(0, 1.0, epoch);

        let mut buffer = [0i16; 3];
        engine.render(&mut buffer);
        assert_eq!([500, 750, 875], buffer);
    }
}
