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

//! A multi-track step sequencer with its own clock.
//!
//! The sequencer makes no sound. It keeps the pattern and play state, advances on every
//! clock tick and tells its observers when a track should sound. There are four ticks per
//! step and sixteen per beat. The clock keeps ticking while paused; only step evaluation
//! stops.

mod clock;
mod events;
mod track;

use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info};

pub use clock::{tick_interval, ClockTask, TICKS_PER_BEAT, TICKS_PER_STEP};
pub use events::{ChannelObserver, SequencerEvent, SequencerObserver, SubscriptionId};
pub use track::{Step, Track, DEFAULT_STEPS, DEFAULT_STEP_VOLUME};

use crate::util::wrap;
use events::Observers;

/// Tempo used until one is set.
pub const DEFAULT_BPM: f64 = 120.0;

/// Mutable sequencer state, guarded by a single lock.
struct SequencerState {
    tracks: Vec<Track>,
    steps: usize,
    /// Current tick, in [0, steps * TICKS_PER_STEP).
    tick: usize,
    /// The step evaluated at the next step boundary.
    step: usize,
    paused: bool,
    bpm: f64,
    selected_track: usize,
    selected_step: usize,
}

impl SequencerState {
    fn track(&self, index: i64) -> Option<&Track> {
        if self.tracks.is_empty() {
            return None;
        }
        Some(&self.tracks[wrap(index, self.tracks.len())])
    }

    fn track_mut(&mut self, index: i64) -> Option<&mut Track> {
        if self.tracks.is_empty() {
            return None;
        }
        let index = wrap(index, self.tracks.len());
        Some(&mut self.tracks[index])
    }

    /// Advances one tick and returns the events it produced.
    fn advance(&mut self) -> Vec<SequencerEvent> {
        let mut events = vec![SequencerEvent::Tick { tick: self.tick }];
        if !self.paused && self.tick % TICKS_PER_STEP == 0 {
            events.push(SequencerEvent::Step { step: self.step });
            for (index, track) in self.tracks.iter().enumerate() {
                let step = track.step(self.step as i64);
                if step.is_audible() {
                    events.push(SequencerEvent::Trigger {
                        track: index,
                        volume: step.volume(),
                    });
                }
            }
            self.step = wrap(self.step as i64 + 1, self.steps);
        }
        self.tick = wrap(self.tick as i64 + 1, self.steps * TICKS_PER_STEP);
        events
    }
}

/// The clock thread slot. `started` survives invalid tempos so a later valid tempo can
/// bring the clock back.
#[derive(Default)]
struct ClockSlot {
    started: bool,
    task: Option<ClockTask>,
}

struct Inner {
    state: Mutex<SequencerState>,
    observers: Observers,
    clock: Mutex<ClockSlot>,
}

impl Inner {
    fn process_tick(&self) {
        let events = self.state.lock().advance();
        self.observers.publish(&events);
    }
}

/// A step sequencer handle. Clones share the same sequencer.
#[derive(Clone)]
pub struct Sequencer {
    inner: Arc<Inner>,
}

impl Sequencer {
    /// Creates a paused sequencer with the given number of tracks, each of `steps` steps.
    /// The clock doesn't run until [`Sequencer::start`] is called.
    pub fn new(tracks: usize, steps: usize) -> Sequencer {
        let steps = steps.max(1);
        Sequencer {
            inner: Arc::new(Inner {
                state: Mutex::new(SequencerState {
                    tracks: (0..tracks).map(|_| Track::new(steps)).collect(),
                    steps,
                    tick: 0,
                    step: 0,
                    paused: true,
                    bpm: DEFAULT_BPM,
                    selected_track: 0,
                    selected_step: 0,
                }),
                observers: Observers::default(),
                clock: Mutex::new(ClockSlot::default()),
            }),
        }
    }

    /// Starts the clock thread at the current tempo.
    pub fn start(&self) -> io::Result<()> {
        let mut clock = self.inner.clock.lock();
        clock.started = true;
        self.restart_clock(&mut clock, self.bpm())
    }

    /// Replaces the running clock task with one at the given tempo. Invalid tempos leave
    /// the clock halted.
    fn restart_clock(&self, clock: &mut ClockSlot, bpm: f64) -> io::Result<()> {
        // The old clock stops at its next wakeup; it can't tick again once cancelled.
        clock.task = None;
        let Some(interval) = tick_interval(bpm) else {
            error!(bpm, "Invalid tempo, clock halted");
            return Ok(());
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        clock.task = Some(ClockTask::start(interval, move || match weak.upgrade() {
            Some(inner) => {
                inner.process_tick();
                true
            }
            None => false,
        })?);
        info!(bpm, interval_ms = interval.as_millis(), "Clock running");
        Ok(())
    }

    /// Returns true if the clock thread has been started.
    pub fn is_running(&self) -> bool {
        self.inner.clock.lock().task.is_some()
    }

    /// Stops the clock thread and waits for it to exit.
    pub fn shutdown(&self) {
        let task = {
            let mut clock = self.inner.clock.lock();
            clock.started = false;
            clock.task.take()
        };
        if let Some(task) = task {
            task.stop();
        }
    }

    /// Sets the tempo. The new tick interval takes effect from the next clock cycle.
    pub fn set_bpm(&self, bpm: f64) {
        self.inner.state.lock().bpm = bpm;
        let mut clock = self.inner.clock.lock();
        if clock.started {
            if let Err(e) = self.restart_clock(&mut clock, bpm) {
                error!(err = %e, bpm, "Unable to restart clock");
            }
        }
        debug!(bpm, "Tempo set");
    }

    pub fn bpm(&self) -> f64 {
        self.inner.state.lock().bpm
    }

    /// The time between ticks at the current tempo, if the tempo is valid.
    pub fn tick_interval(&self) -> Option<Duration> {
        tick_interval(self.bpm())
    }

    /// Advances the sequencer by one tick. Called by the clock thread; exposed so the
    /// sequencer can be driven by an external clock.
    pub fn process_tick(&self) {
        self.inner.process_tick();
    }

    /// Starts playback from the current position.
    pub fn play(&self) {
        self.inner.observers.publish(&[SequencerEvent::PrePlay]);
        self.inner.state.lock().paused = false;
        self.inner.observers.publish(&[SequencerEvent::Played]);
        info!("Playing");
    }

    /// Stops playback, keeping the current position.
    pub fn pause(&self) {
        self.inner.state.lock().paused = true;
        self.inner.observers.publish(&[SequencerEvent::Paused]);
        info!("Paused");
    }

    /// Stops playback and rewinds to the first step.
    pub fn stop(&self) {
        self.pause();
        self.rewind();
    }

    /// Moves back to the first tick and step.
    pub fn rewind(&self) {
        let mut state = self.inner.state.lock();
        state.tick = 0;
        state.step = 0;
    }

    /// Plays if stopped, otherwise stops and rewinds.
    pub fn toggle_play(&self) {
        if self.is_playing() {
            self.stop();
        } else {
            self.play();
        }
    }

    /// Plays if stopped, otherwise pauses.
    pub fn toggle_pause(&self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn is_playing(&self) -> bool {
        !self.inner.state.lock().paused
    }

    pub fn mute(&self, track: i64, step: i64) {
        self.with_step(track, step, |s| s.set_muted(true));
    }

    pub fn unmute(&self, track: i64, step: i64) {
        self.with_step(track, step, |s| s.set_muted(false));
    }

    pub fn toggle_mute(&self, track: i64, step: i64) {
        self.with_step(track, step, Step::toggle_mute);
    }

    /// Sets a step's volume, clamped to [0, 1].
    pub fn set_volume(&self, track: i64, step: i64, volume: f32) {
        self.with_step(track, step, |s| s.set_volume(volume));
    }

    /// The volume of a step. Zero if there are no tracks.
    pub fn volume(&self, track: i64, step: i64) -> f32 {
        let state = self.inner.state.lock();
        state.track(track).map_or(0.0, |t| t.step(step).volume())
    }

    /// Whether a step is muted. True if there are no tracks.
    pub fn muted(&self, track: i64, step: i64) -> bool {
        let state = self.inner.state.lock();
        state.track(track).map_or(true, |t| t.step(step).muted())
    }

    fn with_step<F>(&self, track: i64, step: i64, f: F)
    where
        F: FnOnce(&mut Step),
    {
        let mut state = self.inner.state.lock();
        if let Some(track) = state.track_mut(track) {
            f(track.step_mut(step));
        }
    }

    /// A copy of the given track, wrapped. None if there are no tracks.
    pub fn track(&self, index: i64) -> Option<Track> {
        self.inner.state.lock().track(index).cloned()
    }

    pub fn track_count(&self) -> usize {
        self.inner.state.lock().tracks.len()
    }

    /// Number of steps per track.
    pub fn steps(&self) -> usize {
        self.inner.state.lock().steps
    }

    pub fn current_tick(&self) -> usize {
        self.inner.state.lock().tick
    }

    /// The step that will be evaluated at the next step boundary.
    pub fn current_step(&self) -> usize {
        self.inner.state.lock().step
    }

    /// The track selected by a controller. Not used by the sequencer itself.
    pub fn selected_track(&self) -> usize {
        self.inner.state.lock().selected_track
    }

    pub fn select_track(&self, track: i64) {
        let mut state = self.inner.state.lock();
        if !state.tracks.is_empty() {
            state.selected_track = wrap(track, state.tracks.len());
        }
    }

    /// The step selected by a controller. Not used by the sequencer itself.
    pub fn selected_step(&self) -> usize {
        self.inner.state.lock().selected_step
    }

    pub fn select_step(&self, step: i64) {
        let mut state = self.inner.state.lock();
        state.selected_step = wrap(step, state.steps);
    }

    /// Registers an observer for sequencer events.
    pub fn subscribe(&self, observer: Arc<dyn SequencerObserver>) -> SubscriptionId {
        self.inner.observers.subscribe(observer)
    }

    /// Removes an observer. Returns false if it wasn't subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Sequencer")
            .field("tracks", &state.tracks.len())
            .field("steps", &state.steps)
            .field("tick", &state.tick)
            .field("step", &state.step)
            .field("paused", &state.paused)
            .field("bpm", &state.bpm)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testutil::eventually;

    /// Records every event it sees.
    fn recorder(sequencer: &Sequencer) -> Arc<Mutex<Vec<SequencerEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        sequencer.subscribe(Arc::new(move |event: &SequencerEvent| {
            sink.lock().push(*event)
        }));
        events
    }

    fn triggers(events: &[SequencerEvent]) -> Vec<(usize, f32)> {
        events
            .iter()
            .filter_map(|event| match event {
                SequencerEvent::Trigger { track, volume } => Some((*track, *volume)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_defaults() {
        let sequencer = Sequencer::new(2, 16);
        assert_eq!(DEFAULT_BPM, sequencer.bpm());
        assert_eq!(Some(Duration::from_millis(31)), sequencer.tick_interval());
        assert!(!sequencer.is_playing());
        assert!(!sequencer.is_running());
        assert_eq!(2, sequencer.track_count());
        assert_eq!(16, sequencer.steps());
        assert!(sequencer.muted(0, 0));
        assert_eq!(DEFAULT_STEP_VOLUME, sequencer.volume(1, 15));
    }

    #[test]
    fn test_set_bpm() {
        let sequencer = Sequencer::new(1, 16);
        sequencer.set_bpm(120.0);
        assert_eq!(120.0, sequencer.bpm());
        assert_eq!(Some(Duration::from_millis(31)), sequencer.tick_interval());

        sequencer.set_bpm(-1.0);
        assert_eq!(-1.0, sequencer.bpm());
        assert_eq!(None, sequencer.tick_interval());
    }

    #[test]
    fn test_play_pause_events() {
        let sequencer = Sequencer::new(1, 16);
        let events = recorder(&sequencer);

        sequencer.play();
        assert!(sequencer.is_playing());
        sequencer.pause();
        assert!(!sequencer.is_playing());

        assert_eq!(
            vec![
                SequencerEvent::PrePlay,
                SequencerEvent::Played,
                SequencerEvent::Paused
            ],
            *events.lock()
        );
    }

    #[test]
    fn test_pre_play_sees_paused_state() {
        let sequencer = Sequencer::new(1, 16);
        let seen = Arc::new(Mutex::new(None));
        {
            let handle = sequencer.clone();
            let seen = seen.clone();
            sequencer.subscribe(Arc::new(move |event: &SequencerEvent| {
                if *event == SequencerEvent::PrePlay {
                    *seen.lock() = Some(handle.is_playing());
                }
            }));
        }
        sequencer.play();
        assert_eq!(Some(false), *seen.lock());
    }

    #[test]
    fn test_ticks_while_paused() {
        let sequencer = Sequencer::new(1, 16);
        sequencer.unmute(0, 0);
        let events = recorder(&sequencer);

        for _ in 0..8 {
            sequencer.process_tick();
        }
        let events = events.lock();
        assert_eq!(8, events.len());
        assert!(events
            .iter()
            .all(|event| matches!(event, SequencerEvent::Tick { .. })));
        assert_eq!(8, sequencer.current_tick());
        assert_eq!(0, sequencer.current_step());
    }

    #[test]
    fn test_steps_every_four_ticks() {
        let sequencer = Sequencer::new(1, 16);
        sequencer.unmute(0, 0);
        sequencer.unmute(0, 2);
        sequencer.set_volume(0, 2, 1.0);
        sequencer.play();
        let events = recorder(&sequencer);

        for _ in 0..12 {
            sequencer.process_tick();
        }
        let events = events.lock();
        let steps: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                SequencerEvent::Step { step } => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(vec![0, 1, 2], steps);
        assert_eq!(vec![(0, 0.5), (0, 1.0)], triggers(&events));
        assert_eq!(
            &[
                SequencerEvent::Tick { tick: 0 },
                SequencerEvent::Step { step: 0 },
                SequencerEvent::Trigger {
                    track: 0,
                    volume: 0.5
                },
                SequencerEvent::Tick { tick: 1 },
            ],
            &events[..4]
        );
        assert_eq!(3, sequencer.current_step());
    }

    #[test]
    fn test_muted_and_silent_steps_never_trigger() {
        let sequencer = Sequencer::new(2, 4);
        sequencer.unmute(0, 1);
        sequencer.set_volume(0, 1, 0.0);
        sequencer.set_volume(1, 2, 1.0);
        sequencer.play();
        let events = recorder(&sequencer);

        for _ in 0..64 {
            sequencer.process_tick();
        }
        assert!(triggers(&events.lock()).is_empty());
    }

    #[test]
    fn test_counters_wrap() {
        let sequencer = Sequencer::new(1, 4);
        sequencer.unmute(0, 3);
        sequencer.play();
        let events = recorder(&sequencer);

        for _ in 0..16 {
            sequencer.process_tick();
        }
        assert_eq!(0, sequencer.current_tick());
        assert_eq!(0, sequencer.current_step());
        assert_eq!(vec![(0, 0.5)], triggers(&events.lock()));

        sequencer.process_tick();
        assert_eq!(1, sequencer.current_tick());
        assert_eq!(1, sequencer.current_step());
    }

    #[test]
    fn test_stop_rewinds() {
        let sequencer = Sequencer::new(1, 16);
        sequencer.play();
        for _ in 0..9 {
            sequencer.process_tick();
        }
        assert_eq!(3, sequencer.current_step());

        sequencer.pause();
        assert_eq!(3, sequencer.current_step());
        assert_eq!(9, sequencer.current_tick());

        sequencer.stop();
        assert_eq!(0, sequencer.current_step());
        assert_eq!(0, sequencer.current_tick());
    }

    #[test]
    fn test_toggles() {
        let sequencer = Sequencer::new(1, 16);
        sequencer.toggle_play();
        assert!(sequencer.is_playing());
        for _ in 0..5 {
            sequencer.process_tick();
        }
        sequencer.toggle_pause();
        assert!(!sequencer.is_playing());
        assert_eq!(2, sequencer.current_step());

        sequencer.toggle_pause();
        assert!(sequencer.is_playing());
        sequencer.toggle_play();
        assert!(!sequencer.is_playing());
        assert_eq!(0, sequencer.current_step());
    }

    #[test]
    fn test_step_editing_wraps() {
        let sequencer = Sequencer::new(3, 16);
        sequencer.unmute(-1, -1);
        assert!(!sequencer.muted(2, 15));
        sequencer.toggle_mute(5, 31);
        assert!(sequencer.muted(2, 15));

        sequencer.set_volume(3, 16, 2.0);
        assert_eq!(1.0, sequencer.volume(0, 0));
        sequencer.set_volume(0, 0, -3.0);
        assert_eq!(0.0, sequencer.volume(0, 0));

        let track = sequencer.track(-3).unwrap();
        assert_eq!(16, track.len());
    }

    #[test]
    fn test_no_tracks() {
        let sequencer = Sequencer::new(0, 16);
        sequencer.unmute(0, 0);
        sequencer.set_volume(0, 0, 1.0);
        assert!(sequencer.muted(0, 0));
        assert_eq!(0.0, sequencer.volume(0, 0));
        assert!(sequencer.track(0).is_none());

        sequencer.play();
        for _ in 0..8 {
            sequencer.process_tick();
        }
        assert_eq!(2, sequencer.current_step());
    }

    #[test]
    fn test_selection_wraps() {
        let sequencer = Sequencer::new(4, 16);
        sequencer.select_track(-1);
        sequencer.select_step(17);
        assert_eq!(3, sequencer.selected_track());
        assert_eq!(1, sequencer.selected_step());
    }

    #[test]
    fn test_unsubscribe() {
        let sequencer = Sequencer::new(1, 16);
        let count = Arc::new(AtomicUsize::new(0));
        let id = {
            let count = count.clone();
            sequencer.subscribe(Arc::new(move |_: &SequencerEvent| {
                count.fetch_add(1, Ordering::SeqCst);
            }))
        };
        sequencer.process_tick();
        assert!(sequencer.unsubscribe(id));
        sequencer.process_tick();
        assert_eq!(1, count.load(Ordering::SeqCst));
    }

    #[test]
    fn test_clock_drives_ticks() {
        let sequencer = Sequencer::new(1, 16);
        sequencer.set_bpm(1000.0);
        sequencer.start().unwrap();
        assert!(sequencer.is_running());

        eventually(|| sequencer.current_tick() > 2, "Clock never ticked");

        // Invalid tempo halts the clock until a valid one is set.
        sequencer.set_bpm(0.0);
        assert!(!sequencer.is_running());
        sequencer.set_bpm(1000.0);
        assert!(sequencer.is_running());

        sequencer.shutdown();
        assert!(!sequencer.is_running());
        sequencer.set_bpm(120.0);
        assert!(!sequencer.is_running());
    }

    #[test]
    fn test_tempo_changes_replace_clock() {
        let sequencer = Sequencer::new(1, 16);
        let ticks = Arc::new(AtomicUsize::new(0));
        {
            let ticks = ticks.clone();
            sequencer.subscribe(Arc::new(move |event: &SequencerEvent| {
                if let SequencerEvent::Tick { .. } = event {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        sequencer.start().unwrap();
        // 1000 bpm ticks every 4ms.
        for _ in 0..10 {
            sequencer.set_bpm(1000.0);
        }
        eventually(|| ticks.load(Ordering::SeqCst) > 0, "Clock never ticked");

        // A single clock ticks about 50 times in 200ms. Leftover clocks would multiply it.
        ticks.store(0, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(200));
        let counted = ticks.load(Ordering::SeqCst);
        sequencer.shutdown();

        assert!(counted > 0, "no ticks counted");
        assert!(counted <= 75, "{} ticks in 200ms, more than one clock", counted);

        // Nothing ticks after shutdown.
        std::thread::sleep(Duration::from_millis(20));
        ticks.store(0, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(0, ticks.load(Ordering::SeqCst));
    }

    #[test]
    fn test_observer_can_call_back() {
        let sequencer = Sequencer::new(1, 16);
        {
            let handle = sequencer.clone();
            sequencer.subscribe(Arc::new(move |event: &SequencerEvent| {
                if let SequencerEvent::Tick { tick: 1 } = event {
                    handle.toggle_mute(0, 0);
                    handle.set_bpm(90.0);
                }
            }));
        }
        sequencer.process_tick();
        sequencer.process_tick();
        assert!(!sequencer.muted(0, 0));
        assert_eq!(90.0, sequencer.bpm());
    }
}
