use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use dialoguer::Input;
use std::io::IsTerminal;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use memochess_sync::config::Config;
use memochess_sync::record::{compose_pgn, pair_moves};
use memochess_sync::session::{Outcome, Snapshot};
use memochess_sync::synchronizer::{SyncEvent, SyncHandle, Synchronizer};

const HELP: &str = "\
Commands:
  capture            toggle live capture
  start | stop       enable / disable capture
  webcam <url>       set the IP-camera address
  undo               take back the last move
  override <uci>     force a move, e.g. override e2e4
  resign white|black record a resignation
  draw               record a draw
  moves              print the move list
  status             print mode, result, position and pending error
  ack                dismiss the pending error
  pgn [path]         write the game record
  reset              clear the game (server and client)
  help               show this text
  quit               exit";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let matches = Command::new("memochess")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Mirrors a physical chessboard into a game record via the MemoChess vision service")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Config file (default: memochess.json or $MEMOCHESS_CONFIG)"),
        )
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .value_name("URL")
                .help("Vision service base URL"),
        )
        .arg(
            Arg::new("interval-ms")
                .long("interval-ms")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64).range(1..))
                .help("Polling interval in milliseconds"),
        )
        .arg(
            Arg::new("webcam")
                .long("webcam")
                .value_name("URL")
                .help("IP-camera address forwarded to the vision service"),
        )
        .arg(Arg::new("white").long("white").value_name("NAME").help("White player's name"))
        .arg(Arg::new("black").long("black").value_name("NAME").help("Black player's name"))
        .arg(
            Arg::new("frames-dir")
                .long("frames-dir")
                .value_name("DIR")
                .help("Save every camera frame to DIR as PNG"),
        )
        .arg(
            Arg::new("no-prompt")
                .long("no-prompt")
                .action(ArgAction::SetTrue)
                .help("Do not ask for missing player names"),
        )
        .get_matches();

    init_tracing();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let mut config = Config::load_from_path(&config_path)?;

    if let Some(endpoint) = matches.get_one::<String>("endpoint") {
        config.endpoint_base = endpoint.clone();
    }
    if let Some(ms) = matches.get_one::<u64>("interval-ms") {
        config.poll_interval_ms = *ms;
    }
    if let Some(webcam) = matches.get_one::<String>("webcam") {
        config.webcam_url = webcam.clone();
    }
    if let Some(name) = matches.get_one::<String>("white") {
        config.white_player = name.clone();
    }
    if let Some(name) = matches.get_one::<String>("black") {
        config.black_player = name.clone();
    }
    if let Some(dir) = matches.get_one::<String>("frames-dir") {
        config.frame_dump_dir = Some(PathBuf::from(dir));
    }
    config.validate()?;

    if !matches.get_flag("no-prompt") && std::io::stdin().is_terminal() {
        prompt_missing_names(&mut config)?;
    }

    println!("MemoChess sync client");
    println!("Vision service: {}", config.endpoint_base);
    println!("Type `help` for commands.");

    let (handle, events) = Synchronizer::connect(config.sync_config())
        .context("Failed to start synchronizer")?;

    let result = console(&handle, events, &mut config).await;
    handle.shutdown().await?;
    result
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("memochess_sync=info"));
    // Logs go to stderr; stdout is the console.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn prompt_missing_names(config: &mut Config) -> Result<()> {
    if config.white_player.is_empty() {
        config.white_player = Input::<String>::new()
            .with_prompt("White player")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read white player's name")?;
    }
    if config.black_player.is_empty() {
        config.black_player = Input::<String>::new()
            .with_prompt("Black player")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read black player's name")?;
    }
    Ok(())
}

/// Reads commands from stdin and prints synchronizer events until `quit` or EOF.
async fn console(
    handle: &SyncHandle,
    mut events: tokio::sync::mpsc::UnboundedReceiver<SyncEvent>,
    config: &mut Config,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    return Ok(());
                };
                if !run_command(line.trim(), handle, config)? {
                    return Ok(());
                }
            }
            Some(event) = events.recv() => {
                print_event(&event);
                apply_event(&event, config);
            }
        }
    }
}

/// Executes one console command. Returns false on `quit`.
fn run_command(line: &str, handle: &SyncHandle, config: &mut Config) -> Result<bool> {
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "capture" => handle.toggle_capture()?,
        "start" => handle.enable_capture()?,
        "stop" => handle.disable_capture()?,
        "webcam" => {
            config.webcam_url = arg.to_string();
            handle.set_webcam(arg)?;
        }
        "undo" => handle.undo()?,
        // An empty move still goes through so capture stops and the rejection is shown.
        "override" => handle.override_move(arg)?,
        // Resigning side loses.
        "resign" => match arg {
            "white" => handle.declare(Outcome::BlackWin)?,
            "black" => handle.declare(Outcome::WhiteWin)?,
            _ => println!("Usage: resign white|black"),
        },
        "draw" => handle.declare(Outcome::Draw)?,
        "moves" => print_moves(&handle.snapshot()),
        "status" => print_status(&handle.snapshot()),
        "ack" => handle.acknowledge()?,
        "pgn" => {
            let path = if arg.is_empty() {
                config.pgn_path.clone()
            } else {
                PathBuf::from(arg)
            };
            let snapshot = handle.snapshot();
            let pgn = compose_pgn(&config.pgn_headers(), &snapshot.moves, snapshot.outcome);
            std::fs::write(&path, pgn)
                .with_context(|| format!("Failed to write PGN to {}", path.display()))?;
            println!("Game record written to {}", path.display());
        }
        // Local fields are cleared once the service confirms (see `apply_event`).
        "reset" => handle.reset()?,
        "help" => println!("{HELP}"),
        "quit" | "exit" => return Ok(false),
        other => println!("Unknown command `{other}`. Type `help` for commands."),
    }
    Ok(true)
}

/// Keeps console-side settings in step with the synchronizer.
fn apply_event(event: &SyncEvent, config: &mut Config) {
    if *event == SyncEvent::Reset {
        config.white_player.clear();
        config.black_player.clear();
        config.webcam_url.clear();
    }
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::ModeChanged(mode) => println!("[capture: {mode}]"),
        SyncEvent::MoveRecorded { ply, san } => {
            let number = (ply + 1) / 2;
            if ply % 2 == 1 {
                println!("{number}. {san}");
            } else {
                println!("{number}... {san}");
            }
        }
        SyncEvent::MoveUndone(Some(san)) => println!("Undid {san}"),
        SyncEvent::MoveUndone(None) => println!("Nothing to undo"),
        SyncEvent::Concluded(outcome) => println!("{}", SyncEvent::conclusion_message(*outcome)),
        SyncEvent::Alert(message) => println!("! {}", message.replace('\n', "\n  ")),
        SyncEvent::Notice(message) => println!("{message}"),
        SyncEvent::CommandFailed(message) => println!("! {message}"),
        SyncEvent::Reset => println!("Game reset."),
    }
}

fn print_moves(snapshot: &Snapshot) {
    let rows = pair_moves(&snapshot.moves);
    if rows.is_empty() {
        println!("No moves yet.");
    }
    for row in rows {
        println!("{row}");
    }
    if snapshot.outcome.is_terminal() {
        println!("Result: {}", snapshot.outcome);
    }
}

fn print_status(snapshot: &Snapshot) {
    println!("Capture:  {}", snapshot.mode);
    println!("Result:   {}", snapshot.outcome);
    println!("Position: {}", snapshot.fen);
    println!("Plies:    {}", snapshot.moves.len());
    if let Some(len) = snapshot.frame_len {
        println!("Frame:    {len} bytes");
    }
    if let Some(error) = &snapshot.pending_error {
        println!("Error:    {}", error.replace('\n', " "));
    }
}
