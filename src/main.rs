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
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use beatswitch::config::{self, Audio};
use beatswitch::controller::console::Console;
use beatswitch::controller::Controller;
use beatswitch::machine::DrumMachine;
use beatswitch::sampler::{MixSettings, SampleAsset, Sampler, VoiceSettings};
use beatswitch::sink::{self, Sink};
use beatswitch::util::filename_display;
use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A step sequencing drum machine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the drum machine, controlled from the console.
    Play {
        /// The path to the machine config.
        config_path: PathBuf,
        /// Overrides the configured tempo.
        #[arg[short, long]]
        bpm: Option<f64>,
        /// Starts playing right away.
        #[arg[short, long]]
        autoplay: bool,
    },
    /// Loads every sample in the machine config and reports the result.
    Check {
        /// The path to the machine config.
        config_path: PathBuf,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Plays a sine tone to check the audio output.
    Tone {
        /// The device name to play through. Uses the default device when unset.
        #[arg[short, long]]
        device_name: Option<String>,
        /// The number of output channels.
        #[arg[short, long]]
        channels: Option<u16>,
        /// The tone frequency in Hz.
        #[arg[short, long, default_value_t = 440.0]]
        frequency: f64,
        /// How long to play the tone for.
        #[arg[short = 't', long, default_value = "2s"]]
        duration: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            config_path,
            bpm,
            autoplay,
        } => {
            let config = config::load(&config_path)?;
            let mut machine = DrumMachine::new(&config)?;
            if let Some(bpm) = bpm {
                machine.sequencer().set_bpm(bpm);
            }
            for load in machine.load_samples() {
                if let Err(e) = load.result {
                    error!(track = load.track, err = %e, "Unable to load sample");
                }
            }

            let engine = machine
                .take_engine()
                .ok_or("mix engine already taken")?;
            let sink = Sink::start(config.audio(), engine)?;
            machine.start()?;
            if autoplay {
                machine.sequencer().play();
            }

            let controller = Controller::new(machine.sequencer().clone(), machine.sampler().clone());
            let result = Console::new(controller).run();

            machine.shutdown();
            sink.stop();
            info!("Drum machine stopped");
            result?;
        }
        Commands::Check { config_path } => {
            let config = config::load(&config_path)?;
            let machine = DrumMachine::new(&config)?;
            let loads = machine.load_samples();

            println!("Samples (count: {}):", loads.len());
            let mut failed = 0;
            for load in loads.iter() {
                match &load.result {
                    Ok(samples) => println!(
                        "- track {}: {} ({} samples)",
                        load.track,
                        filename_display(&load.path),
                        samples
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("- track {}: {}", load.track, e);
                    }
                }
            }

            if failed > 0 {
                return Err(format!("{} of {} samples failed to load", failed, loads.len()).into());
            }
        }
        Commands::Devices {} => {
            let devices = sink::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Tone {
            device_name,
            channels,
            frequency,
            duration,
        } => {
            let duration: Duration = DurationString::from_string(duration.clone())
                .map_err(|e| format!("malformed duration {}: {}", duration, e))?
                .into();
            let audio = Audio::new(device_name.as_deref(), channels);
            let (sampler, engine) = Sampler::new(
                &[VoiceSettings::default()],
                MixSettings {
                    channels: audio.channels(),
                    latency: Duration::ZERO,
                    sample_rate: audio.sample_rate(),
                    ..Default::default()
                },
            );
            sampler.install_asset(
                0,
                Arc::new(SampleAsset::sine(frequency, duration, audio.sample_rate())),
            );

            println!("Playing a {}Hz sine wave for {:?}.", frequency, duration);
            let sink = Sink::start(audio, engine)?;
            sampler.sync();
            sampler.trigger(0, 1.0);
            thread::sleep(duration);
            sink.stop();
        }
    }

    Ok(())
}
