//! CFS CLI - Inspect and record into a Cellular Frame Store container.
//!
//! Usage:
//!   cfs <container> [--layout layout.json] <command>
//!
//! Examples:
//!   cfs frames.cfs mount                       # Create or open the container
//!   cfs frames.cfs mkdir /FV0/anim
//!   cfs frames.cfs rec /FV0/anim/glider 10 < frames.txt
//!   cfs frames.cfs --cwd /FV0/anim ls
//!   cfs frames.cfs frame /FV0/anim/glider 2
//!   cfs frames.cfs play /FV0/anim/glider --interval-ms 200

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossterm::style::Stylize;
use log::LevelFilter;

use cfs_core::{
    ArchiveBackend, Cfs, CfsConfig, ControlCommand, Entry, Layout, MountKind, PlaybackStep,
    Player, RecordOutcome, Recorder, SessionState,
};

/// Cellular Frame Store CLI
#[derive(Parser, Debug)]
#[command(name = "cfs")]
#[command(about = "Store and replay cellular automaton frames")]
struct Args {
    /// Container file (created on first use)
    container: PathBuf,

    /// Layout JSON used when formatting a new container
    #[arg(short, long)]
    layout: Option<PathBuf>,

    /// Working directory for relative paths
    #[arg(long, default_value = "/")]
    cwd: String,

    /// Enable debug logging, overriding RUST_LOG
    #[arg(short, long)]
    trace: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the container, or check an existing one against the layout
    Mount,
    /// List the root, a volume, or a directory
    Ls { path: Option<String> },
    /// Create a directory under a volume
    Mkdir { path: String },
    /// Create an empty file
    Touch { path: String },
    /// Print the number of frames in a file
    Size { path: String },
    /// Print one frame of a file (numbered from 1)
    Frame {
        path: String,
        number: usize,
        /// Print the wire format instead of a table
        #[arg(long)]
        wire: bool,
    },
    /// Print sector usage
    Free,
    /// Record wire-format frames from stdin into a new file
    Rec {
        path: String,
        /// Stop after this many seconds
        seconds: Option<u64>,
        /// Incoming grid is WIDTHxHEIGHT, smaller than a sector
        #[arg(long, value_parser = parse_size)]
        source: Option<(usize, usize)>,
    },
    /// Print every frame of a file in order
    Play {
        path: String,
        /// Delay between frames
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
        /// Print the wire format instead of tables
        #[arg(long)]
        wire: bool,
    },
}

fn parse_size(s: &str) -> Result<(usize, usize), String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;
    let w = w.parse().map_err(|_| format!("invalid width '{}'", w))?;
    let h = h.parse().map_err(|_| format!("invalid height '{}'", h))?;
    Ok((w, h))
}

/// Print a listing as an aligned table.
fn print_entries(entries: &[Entry]) {
    if entries.is_empty() {
        println!("directory is empty");
        return;
    }

    let rows: Vec<[String; 6]> = entries
        .iter()
        .map(|e| {
            [
                e.name.clone(),
                e.kind.as_str().to_string(),
                e.sectors.or(e.file_count).unwrap_or(0).to_string(),
                e.timestamp.clone(),
                e.mode.clone(),
                e.owner.clone(),
            ]
        })
        .collect();

    let header = ["Name", "Type", "Sectors", "Timestamp", "Mode", "Owner"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: [&str; 6]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join(" ")
    };

    println!("{}", line(header).bold());
    for row in &rows {
        println!("{}", line(row.each_ref().map(String::as_str)));
    }
}

fn open(args: &Args) -> Result<Cfs, Box<dyn std::error::Error>> {
    let layout = match &args.layout {
        Some(path) => Layout::from_json_path(path)?,
        None => Layout::default(),
    };
    let backend = ArchiveBackend::new(&args.container);
    let mut cfs = Cfs::mount(Box::new(backend), CfsConfig::with_layout(layout))?;
    if args.cwd != "/" {
        cfs.cd(&args.cwd)?;
    }
    Ok(cfs)
}

/// Input for the recorder thread.
#[derive(Debug, PartialEq)]
enum Feed {
    Line(String),
    /// EOF or Ctrl-C.
    End,
}

/// Send non-blank lines from `reader`, then `Feed::End`. Returns early once
/// the receiver is gone.
fn forward_lines<R: BufRead>(reader: R, tx: mpsc::Sender<Feed>) {
    for line in reader.lines() {
        match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => {
                if tx.send(Feed::Line(line)).is_err() {
                    return; // Recorder finished
                }
            }
            Err(_) => break,
        }
    }
    let _ = tx.send(Feed::End);
}

/// Feed stdin lines to a recorder until EOF, Ctrl-C, or the recording ends.
async fn record(
    cfs: Cfs,
    container: String,
    path: String,
    seconds: Option<u64>,
    source: Option<(usize, usize)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (feed_tx, feed_rx) = mpsc::channel::<Feed>();

    let recorder_handle = tokio::task::spawn_blocking(move || {
        let mut recorder = Recorder::new(cfs);
        if let Some((w, h)) = source {
            recorder = recorder.with_source_size(w, h);
        }
        recorder.handle(ControlCommand::Init(container))?;
        recorder.handle(ControlCommand::Start { path, param: seconds })?;

        for feed in feed_rx {
            let Feed::Line(line) = feed else { break };
            match recorder.push_wire(&line)? {
                RecordOutcome::Saved { frame, elapsed_ms } => {
                    eprintln!("{}ms: saving frame {}", elapsed_ms, frame);
                }
                RecordOutcome::Ignored => {}
                RecordOutcome::Finished(summary) => return Ok(summary),
            }
        }
        match recorder.handle(ControlCommand::Stop)? {
            Some(summary) => Ok(summary),
            None => Err(cfs_core::CfsError::InvalidCommand(format!(
                "recorder stopped while {:?}",
                recorder.state()
            ))),
        }
    });

    // Not a runtime task: a blocked stdin read must not hold up shutdown.
    let stdin_tx = feed_tx.clone();
    std::thread::spawn(move || forward_lines(std::io::stdin().lock(), stdin_tx));
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = feed_tx.send(Feed::End);
        }
    });

    let result = recorder_handle.await;
    interrupt.abort();

    let summary = result??;
    println!("{}", summary);
    Ok(())
}

fn play(
    cfs: Cfs,
    container: String,
    path: String,
    interval: Duration,
    wire: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut player = Player::new(cfs);
    player.handle(ControlCommand::Init(container))?;
    player.handle(ControlCommand::Start { path, param: None })?;

    let stdout = std::io::stdout();
    while player.state() == SessionState::Started {
        match player.step()? {
            PlaybackStep::Frame { number, frame } => {
                let mut handle = stdout.lock();
                if wire {
                    handle.write_all(frame.to_wire().as_bytes())?;
                } else {
                    writeln!(handle, "{}", format!("Playing frame {}", number).cyan())?;
                    writeln!(handle, "{}", frame)?;
                }
                handle.flush()?;
                if !interval.is_zero() {
                    std::thread::sleep(interval);
                }
            }
            PlaybackStep::Finished(summary) => eprintln!("{}", summary),
            PlaybackStep::Idle => break,
        }
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let cfs = open(&args)?;
    let container = args.container.display().to_string();

    match args.command {
        Command::Mount => {
            let verb = match cfs.mount_kind() {
                MountKind::Created => "Created",
                MountKind::Opened => "Mounted",
            };
            let layout = cfs.layout();
            println!(
                "{} {} ({} volumes x {} sectors, {}x{} frames)",
                verb,
                container,
                layout.volume_count,
                layout.sectors_per_volume,
                layout.sector_width,
                layout.sector_height
            );
        }
        Command::Ls { path } => {
            let entries: Vec<Entry> = cfs.ls(path.as_deref())?.collect();
            print_entries(&entries);
        }
        Command::Mkdir { path } => cfs.mkdir(&path)?,
        Command::Touch { path } => cfs.touch(&path)?,
        Command::Size { path } => {
            let size = cfs.size(&path)?;
            println!("{}: {} frames", cfs.resolve(&path)?, size);
        }
        Command::Frame { path, number, wire } => {
            let frame = cfs.frame(&path, number)?;
            if wire {
                print!("{}", frame.to_wire());
            } else {
                println!("{}", frame);
            }
        }
        Command::Free => println!("{}", cfs.free()?),
        Command::Rec {
            path,
            seconds,
            source,
        } => record(cfs, container, path, seconds, source).await?,
        Command::Play {
            path,
            interval_ms,
            wire,
        } => {
            let interval = Duration::from_millis(interval_ms);
            tokio::task::spawn_blocking(move || {
                play(cfs, container, path, interval, wire).map_err(|e| e.to_string())
            })
            .await??;
        }
    }
    Ok(())
}

/// `--trace` wins over `RUST_LOG` for the global level.
fn apply_trace(builder: &mut env_logger::Builder, trace: bool) {
    if trace {
        builder.filter_level(LevelFilter::Debug);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    apply_trace(&mut logger, args.trace);
    logger.init();

    if let Err(e) = run(args).await {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_forward_lines_skips_blanks_and_ends() {
        let (tx, rx) = mpsc::channel();
        forward_lines(Cursor::new("0 1\n\n  \n1 0\n"), tx);
        let fed: Vec<Feed> = rx.iter().collect();
        assert_eq!(
            fed,
            vec![
                Feed::Line("0 1".to_string()),
                Feed::Line("1 0".to_string()),
                Feed::End
            ]
        );
    }

    #[test]
    fn test_forward_lines_stops_when_recorder_is_gone() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        // Returns instead of reading the rest of the input.
        forward_lines(Cursor::new("a\nb\nc\n"), tx);
    }

    #[test]
    fn test_trace_overrides_env_filter() {
        let mut builder = env_logger::Builder::new();
        builder.parse_filters("warn");
        apply_trace(&mut builder, true);
        assert_eq!(builder.build().filter(), LevelFilter::Debug);

        let mut builder = env_logger::Builder::new();
        builder.parse_filters("error");
        apply_trace(&mut builder, false);
        assert_eq!(builder.build().filter(), LevelFilter::Error);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("10x12"), Ok((10, 12)));
        assert!(parse_size("10").is_err());
        assert!(parse_size("ax2").is_err());
    }
}
