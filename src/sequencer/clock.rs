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

//! The periodic tick source behind the sequencer.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::playsync::CancelHandle;
use crate::thread_priority::configure_clock_thread_priority;

/// Clock ticks per beat. Fixed, so a step is always a sixteenth note.
pub const TICKS_PER_BEAT: u32 = 16;

/// Clock ticks per sequencer step.
pub const TICKS_PER_STEP: usize = 4;

/// Time before a deadline at which the clock stops sleeping and starts spinning.
const SPIN_MARGIN: Duration = Duration::from_millis(2);

/// How far the clock may fall behind before it gives up on catching up.
const MAX_LAG_TICKS: u32 = 4;

/// Returns the time between two ticks at the given tempo, rounded to the millisecond.
/// Tempos that aren't positive and finite have no interval.
pub fn tick_interval(bpm: f64) -> Option<Duration> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return None;
    }
    let ms = (60_000.0 / bpm / f64::from(TICKS_PER_BEAT)).round().max(1.0);
    Some(Duration::from_millis(ms as u64))
}

/// A running clock thread. Dropping the task cancels it without waiting for the thread.
pub struct ClockTask {
    cancel: CancelHandle,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl ClockTask {
    /// Starts calling `tick` every `interval`, starting one interval from now. The clock
    /// stops when cancelled or when `tick` returns false.
    pub fn start<F>(interval: Duration, mut tick: F) -> io::Result<ClockTask>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let cancel = CancelHandle::new();
        let handle = {
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("sequencer-clock".to_string())
                .spawn(move || {
                    configure_clock_thread_priority();
                    debug!(interval_ms = interval.as_millis(), "Clock started");

                    let mut deadline = Instant::now() + interval;
                    loop {
                        let now = Instant::now();
                        if deadline > now + SPIN_MARGIN
                            && cancel.wait_timeout(deadline - now - SPIN_MARGIN)
                        {
                            break;
                        }
                        spin_sleep::sleep(deadline.saturating_duration_since(Instant::now()));
                        if cancel.is_cancelled() || !tick() {
                            break;
                        }

                        deadline += interval;
                        let now = Instant::now();
                        if now > deadline + interval * MAX_LAG_TICKS {
                            warn!(
                                lag_ms = (now - deadline).as_millis(),
                                "Clock fell behind, skipping missed ticks"
                            );
                            deadline = now + interval;
                        }
                    }
                    debug!("Clock stopped");
                })?
        };

        Ok(ClockTask {
            cancel,
            handle: Some(handle),
            interval,
        })
    }

    /// The time between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels the clock and waits for its thread to exit. Does not wait when called from
    /// the clock thread itself.
    pub fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("Clock thread panicked");
            }
        }
    }
}

impl Drop for ClockTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for ClockTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockTask")
            .field("interval", &self.interval)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
