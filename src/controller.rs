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
use std::fmt::Write;
use std::str::FromStr;

use tracing::info;

use crate::sampler::Sampler;
use crate::sequencer::Sequencer;

pub mod console;

/// Lowest tempo reachable by stepping.
pub const MIN_TEMPO: f64 = 52.0;

/// Tempo change per step.
pub const TEMPO_INCREMENT: f64 = 8.0;

/// Number of tempo increments above the minimum.
const TEMPO_STEPS: i64 = 16;

/// Volume knobs move in sixteenths.
const VOLUME_STEPS: i64 = 16;

/// Commands that change the drum machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Starts playback.
    Play,
    /// Stops playback, keeping the position.
    Pause,
    /// Stops playback and rewinds.
    Stop,
    /// Plays if stopped, otherwise stops.
    Toggle,
    Bpm(f64),
    /// Steps the tempo up.
    Faster,
    /// Steps the tempo down.
    Slower,
    Mute { track: i64, step: i64 },
    Unmute { track: i64, step: i64 },
    ToggleStep { track: i64, step: i64 },
    Volume { track: i64, step: i64, volume: f32 },
    Master(f32),
    MasterUp,
    MasterDown,
    /// Moves the step cursor.
    Select { track: i64, step: i64 },
    /// Raises the selected step's volume by a sixteenth.
    Louder,
    /// Lowers the selected step's volume by a sixteenth, never to silence.
    Softer,
    /// Prints the machine state.
    Show,
    Quit,
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("Empty command")]
    Empty,
    #[error("Unrecognized command {0:?}")]
    Unknown(String),
    #[error("{command} expects {expected}")]
    Arguments {
        command: &'static str,
        expected: &'static str,
    },
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let mut words = lower.split_whitespace();
        let Some(name) = words.next() else {
            return Err(ParseCommandError::Empty);
        };
        let args: Vec<&str> = words.collect();

        let command = match (name, args.as_slice()) {
            ("play", []) => Command::Play,
            ("pause", []) => Command::Pause,
            ("stop", []) => Command::Stop,
            ("toggle", []) => Command::Toggle,
            ("faster", []) => Command::Faster,
            ("slower", []) => Command::Slower,
            ("louder", []) => Command::Louder,
            ("softer", []) => Command::Softer,
            ("show", []) => Command::Show,
            ("quit" | "exit", []) => Command::Quit,
            ("bpm", [bpm]) => Command::Bpm(parse(bpm, "bpm", "a tempo")?),
            ("master", ["up"]) => Command::MasterUp,
            ("master", ["down"]) => Command::MasterDown,
            ("master", [volume]) => {
                Command::Master(parse(volume, "master", "a volume, up or down")?)
            }
            ("mute", [track, step]) => {
                let (track, step) = position(track, step, "mute")?;
                Command::Mute { track, step }
            }
            ("unmute", [track, step]) => {
                let (track, step) = position(track, step, "unmute")?;
                Command::Unmute { track, step }
            }
            ("toggle", [track, step]) => {
                let (track, step) = position(track, step, "toggle")?;
                Command::ToggleStep { track, step }
            }
            ("select", [track, step]) => {
                let (track, step) = position(track, step, "select")?;
                Command::Select { track, step }
            }
            ("vol", [track, step, volume]) => {
                let (track, step) = position(track, step, "vol")?;
                Command::Volume {
                    track,
                    step,
                    volume: parse(volume, "vol", "a track, a step and a volume")?,
                }
            }
            (name, _) => {
                return Err(match usage(name) {
                    Some((command, expected)) => ParseCommandError::Arguments { command, expected },
                    None => ParseCommandError::Unknown(name.to_string()),
                });
            }
        };
        Ok(command)
    }
}

fn parse<T: FromStr>(
    value: &str,
    command: &'static str,
    expected: &'static str,
) -> Result<T, ParseCommandError> {
    value
        .parse()
        .map_err(|_| ParseCommandError::Arguments { command, expected })
}

fn position(
    track: &str,
    step: &str,
    command: &'static str,
) -> Result<(i64, i64), ParseCommandError> {
    Ok((
        parse(track, command, "a track and a step")?,
        parse(step, command, "a track and a step")?,
    ))
}

fn usage(name: &str) -> Option<(&'static str, &'static str)> {
    Some(match name {
        "play" => ("play", "no arguments"),
        "pause" => ("pause", "no arguments"),
        "stop" => ("stop", "no arguments"),
        "faster" => ("faster", "no arguments"),
        "slower" => ("slower", "no arguments"),
        "louder" => ("louder", "no arguments"),
        "softer" => ("softer", "no arguments"),
        "show" => ("show", "no arguments"),
        "quit" | "exit" => ("quit", "no arguments"),
        "toggle" => ("toggle", "nothing, or a track and a step"),
        "bpm" => ("bpm", "a tempo"),
        "master" => ("master", "a volume, up or down"),
        "mute" => ("mute", "a track and a step"),
        "unmute" => ("unmute", "a track and a step"),
        "select" => ("select", "a track and a step"),
        "vol" => ("vol", "a track, a step and a volume"),
        _ => return None,
    })
}

/// Returns the next tempo up from `bpm` on the stepped scale.
pub fn faster(bpm: f64) -> f64 {
    let index = tempo_index(bpm).saturating_add(1).min(TEMPO_STEPS);
    MIN_TEMPO + index as f64 * TEMPO_INCREMENT
}

/// Returns the next tempo down from `bpm` on the stepped scale.
pub fn slower(bpm: f64) -> f64 {
    let index = tempo_index(bpm).saturating_sub(1).max(1);
    MIN_TEMPO + index as f64 * TEMPO_INCREMENT
}

fn tempo_index(bpm: f64) -> i64 {
    ((bpm - MIN_TEMPO) / TEMPO_INCREMENT) as i64
}

/// Raises a volume by a sixteenth, up to 1.
pub fn volume_up(volume: f32) -> f32 {
    sixteenths(volume).saturating_add(1).min(VOLUME_STEPS) as f32 / VOLUME_STEPS as f32
}

/// Lowers a volume by a sixteenth, down to `floor` sixteenths.
pub fn volume_down(volume: f32, floor: i64) -> f32 {
    sixteenths(volume).saturating_sub(1).max(floor) as f32 / VOLUME_STEPS as f32
}

fn sixteenths(volume: f32) -> i64 {
    (volume * VOLUME_STEPS as f32) as i64
}

/// Applies commands to a sequencer and sampler.
#[derive(Clone, Debug)]
pub struct Controller {
    sequencer: Sequencer,
    sampler: Sampler,
}

impl Controller {
    pub fn new(sequencer: Sequencer, sampler: Sampler) -> Controller {
        Controller { sequencer, sampler }
    }

    /// Applies the command. Returns text to show the user, if any.
    pub fn handle(&self, command: Command) -> Option<String> {
        let sequencer = &self.sequencer;
        match command {
            Command::Play => sequencer.play(),
            Command::Pause => sequencer.pause(),
            Command::Stop => sequencer.stop(),
            Command::Toggle => sequencer.toggle_play(),
            Command::Bpm(bpm) => sequencer.set_bpm(bpm),
            Command::Faster => sequencer.set_bpm(faster(sequencer.bpm())),
            Command::Slower => sequencer.set_bpm(slower(sequencer.bpm())),
            Command::Mute { track, step } => sequencer.mute(track, step),
            Command::Unmute { track, step } => sequencer.unmute(track, step),
            Command::ToggleStep { track, step } => sequencer.toggle_mute(track, step),
            Command::Volume {
                track,
                step,
                volume,
            } => sequencer.set_volume(track, step, volume),
            Command::Master(volume) => self.sampler.set_volume(volume.clamp(0.0, 1.0)),
            Command::MasterUp => self.sampler.set_volume(volume_up(self.sampler.volume())),
            Command::MasterDown => self.sampler.set_volume(volume_down(self.sampler.volume(), 0)),
            Command::Select { track, step } => {
                sequencer.select_track(track);
                sequencer.select_step(step);
            }
            Command::Louder | Command::Softer => {
                let track = sequencer.selected_track() as i64;
                let step = sequencer.selected_step() as i64;
                let current = sequencer.volume(track, step);
                let volume = if command == Command::Louder {
                    volume_up(current)
                } else {
                    volume_down(current, 1)
                };
                sequencer.set_volume(track, step, volume);
            }
            Command::Show => return Some(self.show()),
            Command::Quit => {}
        }
        info!(command = ?command, "Command applied");
        None
    }

    /// Renders the pattern and transport state as text.
    pub fn show(&self) -> String {
        let sequencer = &self.sequencer;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} bpm, {}, step {}, master {:.2}{}",
            sequencer.bpm(),
            if sequencer.is_playing() { "playing" } else { "stopped" },
            sequencer.current_step(),
            self.sampler.volume(),
            if self.sampler.muted() { " (muted)" } else { "" },
        );
        for index in 0..sequencer.track_count() {
            let Some(track) = sequencer.track(index as i64) else {
                continue;
            };
            let cursor = if index == sequencer.selected_track() { '>' } else { ' ' };
            let _ = write!(out, "{}{:>2} ", cursor, index);
            for (position, step) in track.steps().iter().enumerate() {
                let cell = if !step.is_audible() {
                    '.'
                } else if step.volume() >= 0.5 {
                    'X'
                } else {
                    'x'
                };
                if index == sequencer.selected_track() && position == sequencer.selected_step() {
                    let _ = write!(out, "[{}]", cell);
                } else {
                    out.push(cell);
                }
            }
            out.push('\n');
        }
        out
    }
}
