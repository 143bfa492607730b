//! vstrender - Offline MIDI renderer for instrument and effect chains.
//!
//! Renders a MIDI file through a chain of processing units described by a
//! JSON configuration and writes the result as a WAV file.
//!
//! # Usage
//!
//! ```bash
//! vstrender render.json                          # Run a render job
//! vstrender --analyze song.mid                   # Print a MIDI file summary
//! vstrender --validate song.mid                  # Check a file before rendering
//! vstrender --extract song.mid bass.mid 2        # Keep MIDI channel 2 only
//! vstrender --transpose song.mid up.mid 12       # Shift notes up an octave
//! vstrender --make-test-midi test.mid 8 120 60   # Write a chord progression
//! vstrender --make-drums drums.mid 16 120        # Write a rock beat
//! vstrender --make-scale scale.mid major 60 10   # Write a scale
//! ```
//!
//! Logging goes to stderr; set `RUST_LOG` to change the level.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vstrender::midi::{
    create_drum_pattern, create_scale, create_test_midi, extract_channels, transpose_file,
    validate_file, MidiTimeline, ScaleKind,
};

/// What the binary was asked to do.
enum Command {
    Render(PathBuf),
    Analyze(PathBuf),
    Validate(PathBuf),
    Extract {
        input: PathBuf,
        output: PathBuf,
        /// 0-based
        channels: Vec<u8>,
    },
    Transpose {
        input: PathBuf,
        output: PathBuf,
        semitones: i32,
    },
    MakeTestMidi {
        path: PathBuf,
        duration: f64,
        bpm: f64,
        base_note: u8,
    },
    MakeDrums {
        path: PathBuf,
        duration: f64,
        bpm: f64,
    },
    MakeScale {
        path: PathBuf,
        kind: ScaleKind,
        root: u8,
        duration: f64,
        bpm: f64,
    },
    Help,
}

impl Command {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `<config.json>`: Run a render job
    /// - `--analyze <file.mid>` or `-a <file.mid>`: Print a MIDI summary
    /// - `--validate <file.mid>`: Check a file is suitable for rendering
    /// - `--extract <in.mid> <out.mid> <channel>...`: Channels are 1-16
    /// - `--transpose <in.mid> <out.mid> <semitones>`
    /// - `--make-test-midi <out.mid> [duration] [bpm] [base_note]`
    /// - `--make-drums <out.mid> [duration] [bpm]`
    /// - `--make-scale <out.mid> <type> [root] [duration] [bpm]`
    /// - `--help` or `-h`: Print help
    fn parse(args: &[String]) -> Result<Self> {
        let Some(first) = args.get(1) else {
            return Ok(Command::Help);
        };

        match first.as_str() {
            "--help" | "-h" => Ok(Command::Help),
            "--analyze" | "-a" => {
                let path = args.get(2).context("--analyze requires a MIDI file path")?;
                Ok(Command::Analyze(PathBuf::from(path)))
            }
            "--validate" => {
                let path = args.get(2).context("--validate requires a MIDI file path")?;
                Ok(Command::Validate(PathBuf::from(path)))
            }
            "--extract" => {
                let (input, output) = in_out(args, "--extract")?;
                let channels = args
                    .get(4..)
                    .unwrap_or(&[])
                    .iter()
                    .map(|arg| match arg.parse::<u8>() {
                        Ok(channel @ 1..=16) => Ok(channel - 1),
                        _ => bail!("invalid MIDI channel: {} (must be 1-16)", arg),
                    })
                    .collect::<Result<Vec<_>>>()?;
                if channels.is_empty() {
                    bail!("--extract requires at least one channel");
                }
                Ok(Command::Extract {
                    input,
                    output,
                    channels,
                })
            }
            "--transpose" => {
                let (input, output) = in_out(args, "--transpose")?;
                let amount = args.get(4).context("--transpose requires a semitone amount")?;
                let semitones = parse_arg(Some(amount), 0i32, "semitones")?;
                Ok(Command::Transpose {
                    input,
                    output,
                    semitones,
                })
            }
            "--make-test-midi" => {
                let path = args
                    .get(2)
                    .context("--make-test-midi requires an output path")?;
                let duration = parse_arg(args.get(3), 8.0, "duration")?;
                let bpm = parse_arg(args.get(4), 120.0, "bpm")?;
                let base_note = parse_arg(args.get(5), 60u8, "base_note")?;
                if base_note > 127 {
                    bail!("base_note must be 0-127, got {}", base_note);
                }
                Ok(Command::MakeTestMidi {
                    path: PathBuf::from(path),
                    duration,
                    bpm,
                    base_note,
                })
            }
            "--make-drums" => {
                let path = args.get(2).context("--make-drums requires an output path")?;
                Ok(Command::MakeDrums {
                    path: PathBuf::from(path),
                    duration: parse_arg(args.get(3), 16.0, "duration")?,
                    bpm: parse_arg(args.get(4), 120.0, "bpm")?,
                })
            }
            "--make-scale" => {
                let path = args.get(2).context("--make-scale requires an output path")?;
                let kind = args
                    .get(3)
                    .context("--make-scale requires a scale type")?
                    .parse::<ScaleKind>()?;
                let root = parse_arg(args.get(4), 60u8, "root")?;
                if root > 127 {
                    bail!("root must be 0-127, got {}", root);
                }
                Ok(Command::MakeScale {
                    path: PathBuf::from(path),
                    kind,
                    root,
                    duration: parse_arg(args.get(5), 10.0, "duration")?,
                    bpm: parse_arg(args.get(6), 120.0, "bpm")?,
                })
            }
            other if other.starts_with('-') => {
                bail!("Unknown option: {}\nUse --help for usage information", other)
            }
            config => Ok(Command::Render(PathBuf::from(config))),
        }
    }
}

/// Reads the `<in.mid> <out.mid>` pair that follows a file command.
fn in_out(args: &[String], option: &str) -> Result<(PathBuf, PathBuf)> {
    let input = args
        .get(2)
        .with_context(|| format!("{} requires an input path", option))?;
    let output = args
        .get(3)
        .with_context(|| format!("{} requires an output path", option))?;
    Ok((PathBuf::from(input), PathBuf::from(output)))
}

fn parse_arg<T: std::str::FromStr>(arg: Option<&String>, default: T, name: &str) -> Result<T> {
    match arg {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid {}: {}", name, value)),
        None => Ok(default),
    }
}

fn print_help(program: &str) {
    eprintln!("vstrender - Offline MIDI renderer for instrument and effect chains");
    eprintln!();
    eprintln!("Usage: {} <config.json>", program);
    eprintln!("       {} --analyze <file.mid>", program);
    eprintln!("       {} --validate <file.mid>", program);
    eprintln!("       {} --extract <in.mid> <out.mid> <channel>...", program);
    eprintln!("       {} --transpose <in.mid> <out.mid> <semitones>", program);
    eprintln!(
        "       {} --make-test-midi <out.mid> [duration] [bpm] [base_note]",
        program
    );
    eprintln!("       {} --make-drums <out.mid> [duration] [bpm]", program);
    eprintln!(
        "       {} --make-scale <out.mid> <type> [root] [duration] [bpm]",
        program
    );
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -a, --analyze FILE      Print a summary of a MIDI file");
    eprintln!("      --validate FILE     Check a MIDI file is suitable for rendering");
    eprintln!("      --extract           Copy channels (1-16) and meta events to a new file");
    eprintln!("      --transpose         Shift notes by -48 to +48 semitones (channel 10 untouched)");
    eprintln!("      --make-test-midi    Write a I-IV-V-I test progression (default 8s, 120 BPM, C4)");
    eprintln!("      --make-drums        Write a 4/4 rock beat on channel 10 (default 16s, 120 BPM)");
    eprintln!("      --make-scale        Write a major, minor, chromatic, pentatonic or blues scale");
    eprintln!("  -h, --help              Print this help message");
    eprintln!();
    eprintln!("Set RUST_LOG (e.g. RUST_LOG=debug) to change log verbosity.");
}

/// Logs a fault raised inside the render and exits without writing output.
///
/// Only Rust panics reach this hook. Native signals such as SIGSEGV or SIGBUS
/// are not caught and terminate the process without a fault record. The hook
/// runs before unwinding, so the record carries whichever unit span was
/// entered when the panic occurred.
fn install_fault_handler() {
    std::panic::set_hook(Box::new(|info| {
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown fault".to_string());
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        error!(%message, %location, "fault during render, no output written");
        std::process::exit(1);
    }));
}

fn run(command: Command, program: &str) -> Result<()> {
    match command {
        Command::Help => print_help(program),
        Command::Analyze(path) => {
            let timeline = MidiTimeline::load(&path)
                .with_context(|| format!("Failed to analyze {}", path.display()))?;
            println!("{}", timeline.summary());
        }
        Command::Validate(path) => {
            let report = validate_file(&path)
                .with_context(|| format!("{} is not suitable for rendering", path.display()))?;
            println!("MIDI file is valid for rendering");
            println!(
                "  {} events, {} notes, {:.3} seconds ({:.1} events/sec)",
                report.events, report.note_ons, report.duration, report.events_per_second
            );
            if report.dense {
                println!("  Warning: very dense MIDI file, may impact performance");
            }
        }
        Command::Extract {
            input,
            output,
            channels,
        } => {
            extract_channels(&input, &output, &channels)
                .with_context(|| format!("Failed to extract channels from {}", input.display()))?;
        }
        Command::Transpose {
            input,
            output,
            semitones,
        } => {
            transpose_file(&input, &output, semitones)
                .with_context(|| format!("Failed to transpose {}", input.display()))?;
        }
        Command::MakeTestMidi {
            path,
            duration,
            bpm,
            base_note,
        } => {
            create_test_midi(&path, duration, base_note, bpm)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), duration, bpm, base_note, "test MIDI written");
        }
        Command::MakeDrums {
            path,
            duration,
            bpm,
        } => {
            create_drum_pattern(&path, duration, bpm)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), duration, bpm, "drum pattern written");
        }
        Command::MakeScale {
            path,
            kind,
            root,
            duration,
            bpm,
        } => {
            create_scale(&path, kind, root, duration, bpm)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), scale = %kind, root, duration, "scale written");
        }
        Command::Render(config) => {
            let report = vstrender::host::run(&config)?;
            info!(
                output = %report.output.display(),
                seconds = %format!("{:.2}", report.samples as f64 / report.sample_rate),
                blocks = report.stats.blocks,
                "render complete"
            );
        }
    }
    Ok(())
}

/// Main entry point.
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    install_fault_handler();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("vstrender");

    let result = Command::parse(&args).and_then(|command| run(command, program));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "vstrender failed");
            ExitCode::FAILURE
        }
    }
}
