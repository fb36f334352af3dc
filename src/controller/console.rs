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
use std::io;

use tracing::{info, span, warn, Level};

use super::{Command, Controller};

const PROMPT: &str =
    "Command (play, pause, stop, toggle [t s], bpm, faster, slower, mute, unmute, vol, master, select, louder, softer, show, quit): ";

/// Reads commands line by line and applies them to the controller.
pub struct Console {
    controller: Controller,
}

impl Console {
    pub fn new(controller: Controller) -> Console {
        Console { controller }
    }

    /// Runs on stdin and stdout until `quit` or end of input.
    pub fn run(&self) -> Result<(), io::Error> {
        let span = span!(Level::INFO, "console");
        let _enter = span.enter();

        info!("Console started.");
        let stdin = io::stdin();
        let stdout = io::stdout();
        while self.monitor_io(stdin.lock(), stdout.lock())? {}
        info!("Console stopped.");
        Ok(())
    }

    /// Handles a single line. Returns false once the console should stop.
    fn monitor_io<R, W>(&self, mut reader: R, mut writer: W) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(writer, "{}", PROMPT)?;
        writer.flush()?;
        let mut input = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }
        if input.trim().is_empty() {
            return Ok(true);
        }

        match input.parse::<Command>() {
            Ok(Command::Quit) => return Ok(false),
            Ok(command) => {
                if let Some(output) = self.controller.handle(command) {
                    write!(writer, "{}", output)?;
                }
            }
            Err(e) => {
                warn!(input = input.trim(), err = %e, "Unrecognized input");
                writeln!(writer, "{}", e)?;
            }
        }
        writer.flush()?;
        Ok(true)
    }
}
