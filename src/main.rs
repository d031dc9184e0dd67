mod term;

use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use jidi::audio::list_output_ports;
use jidi::engine::LoadUpdate;
use jidi::timing::{micros_to_bpm, normalize_ticks};
use jidi::{AudioError, MidiOutSink, NullSink, PlayerConfig, Session, Song, spawn_loader};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: jidi <file.mid> [--config path] [--port name] [--dry-run] [--info]";

#[derive(Debug, Default)]
struct Args {
    file: PathBuf,
    config: Option<PathBuf>,
    port: Option<String>,
    dry_run: bool,
    info: bool,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut parsed = Args::default();
        let mut file = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => {
                    let path = args.next().ok_or("--config needs a path")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "--port" => {
                    parsed.port = Some(args.next().ok_or("--port needs a name")?);
                }
                "--dry-run" => parsed.dry_run = true,
                "--info" => parsed.info = true,
                "-h" | "--help" => return Err(String::new()),
                other if other.starts_with("--") => return Err(format!("unknown option {other}")),
                other => {
                    if file.replace(PathBuf::from(other)).is_some() {
                        return Err("only one file can be played".to_string());
                    }
                }
            }
        }

        parsed.file = file.ok_or("missing MIDI file")?;
        Ok(parsed)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::parse(env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("{msg}");
            }
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => PlayerConfig::load(path)?,
        None => PlayerConfig::default(),
    };

    let timeout = config.playback.load_timeout_secs.map(Duration::from_secs);
    let song = spawn_loader(args.file.clone(), config.clone()).wait(timeout, |update| {
        if let LoadUpdate::Progress(p) = update {
            debug!(
                tracks = p.tracks_processed,
                notes = p.notes_decoded,
                "Loaded {}/{} bytes",
                p.bytes_consumed,
                p.total_bytes
            );
        }
    })?;

    if args.info {
        print_info(&song);
        return Ok(());
    }

    if args.dry_run {
        let mut session = Session::open(song, &config, NullSink)?;
        term::run_player(&mut session)
    } else {
        let sink = MidiOutSink::new(args.port.clone());
        let mut session = Session::open(song, &config, sink).inspect_err(|e| {
            if let AudioError::NoOutputPort = e {
                match list_output_ports() {
                    Ok(ports) if !ports.is_empty() => error!("Available outputs: {}", ports.join(", ")),
                    _ => error!("No MIDI outputs found; use --dry-run to play silently"),
                }
            }
        })?;
        term::run_player(&mut session)
    }
}

fn print_info(song: &Song) {
    let summary = &song.summary;
    println!("format {}  division {}", song.header.format, song.division);
    println!(
        "tracks {} ({} with notes)  notes {}",
        summary.tracks_read, summary.tracks_with_notes, summary.total_notes
    );
    println!(
        "length {:.1}s  last tick {}  ({} ticks at 480 PPQ)",
        song.duration_micros() / 1_000_000.0,
        summary.last_tick,
        normalize_ticks(summary.last_tick, song.division, 480)
    );
    if let Some(tick) = summary.first_note_tick {
        println!("first note at tick {tick}");
    }

    let tempos = song.tempo_map.breakpoints();
    println!(
        "tempo changes {}  starting at {:.1} BPM",
        tempos.len(),
        micros_to_bpm(song.tempo_map.tempo_at(0))
    );

    for (channel, count) in summary.notes_per_channel.iter().enumerate() {
        if *count > 0 {
            println!("  channel {:>2}: {} notes", channel + 1, count);
        }
    }
    for track in &song.tracks {
        println!(
            "  track {:>3}: {:>8} notes  {}",
            track.id,
            track.notes.len(),
            track.name.as_deref().unwrap_or("")
        );
    }
    for diagnostic in &song.diagnostics {
        println!("warning: {diagnostic}");
    }
}
