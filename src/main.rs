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
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use tracing::{debug, info};

use steptrack::audio::sample_source::{create_sample_source_from_file, SampleSource};
use steptrack::pattern::{Event, COLUMNS, ROWS};
use steptrack::{audio, config, pitch, Engine};

/// How long `play` runs when no duration is given.
const DEFAULT_PLAY_DURATION: &str = "10s";

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A step sequencer with streaming sample voices."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Prints the format of an audio file.
    Probe {
        /// The file to inspect.
        path: String,
    },
    /// Plays a pattern through the configured audio device.
    Play {
        /// The path to the engine config.
        config_path: String,
        /// A pattern step in the form <ROW>:<COLUMN>:<NOTE>:<VOICE>[:<GAIN>].
        /// For example, 0:0:C4:0 or 8:1:G#3:2:0.5. May be repeated.
        #[arg[short, long]]
        step: Vec<String>,
        /// Overrides the configured tempo.
        #[arg[short, long]]
        bpm: Option<i32>,
        /// How long to play for (default: 10s).
        #[arg[short, long]]
        duration: Option<String>,
    },
}

/// A parsed `--step` argument.
#[derive(Debug, PartialEq)]
struct Step {
    row: usize,
    column: usize,
    event: Event,
}

fn parse_step(step: &str) -> Result<Step, Box<dyn Error>> {
    let parts: Vec<&str> = step.split(':').collect();
    if parts.len() != 4 && parts.len() != 5 {
        return Err(format!(
            "step {} should be in the form <ROW>:<COLUMN>:<NOTE>:<VOICE>[:<GAIN>]",
            step
        )
        .into());
    }

    let row: usize = parts[0].trim().parse()?;
    let column: usize = parts[1].trim().parse()?;
    if row >= ROWS || column >= COLUMNS {
        return Err(format!("step {} is outside the {}x{} pattern", step, ROWS, COLUMNS).into());
    }
    let Some(pitch_ratio) = pitch::parse_ratio(parts[2].trim()) else {
        return Err(format!("unknown note {}", parts[2]).into());
    };
    let voice: i32 = parts[3].trim().parse()?;
    let gain: f32 = match parts.get(4) {
        Some(gain) => gain.trim().parse()?,
        None => 1.0,
    };

    Ok(Step {
        row,
        column,
        event: Event::new(pitch_ratio, voice, gain),
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Probe { path } => {
            let source = create_sample_source_from_file(&path)?;
            println!("{}:", path);
            println!("  channels: {}", source.channel_count());
            println!("  sample rate: {}", source.sample_rate());
            match source.duration() {
                Some(duration) => println!("  duration: {:?}", duration),
                None => println!("  duration: unknown"),
            }
        }
        Commands::Play {
            config_path,
            step,
            bpm,
            duration,
        } => {
            let config = config::Engine::deserialize(&PathBuf::from(&config_path))?;
            let Some(audio_config) = config.audio() else {
                return Err(format!("no audio device configured in {}", config_path).into());
            };
            let duration: Duration = DurationString::from_string(
                duration.unwrap_or_else(|| DEFAULT_PLAY_DURATION.to_string()),
            )?
            .into();
            let steps = step
                .iter()
                .map(|step| parse_step(step))
                .collect::<Result<Vec<Step>, Box<dyn Error>>>()?;

            let device = audio::get_device(audio_config)?;
            let (engine, processor) = Engine::new(&config)?;
            if let Some(bpm) = bpm {
                engine.set_bpm(bpm)?;
            }
            for step in steps {
                engine.set_event(step.row, step.column, step.event)?;
            }
            engine.set_row_listener(|row| debug!(row, "Row"));

            let stream = device.start(Box::new(processor))?;
            info!(device = %device, ?duration, "Playing");
            engine.set_run_state(true);
            thread::sleep(duration);
            engine.set_run_state(false);

            stream.stop();
            let skipped = engine.invalid_event_count();
            if skipped > 0 {
                info!(skipped, "Skipped invalid pattern cells");
            }
            engine.shutdown()?;
        }
    }

    Ok(())
}
