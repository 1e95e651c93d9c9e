// Board Sync
// Command line front end for syncing a project with a MicroPython board

// MODULES ------------------>>

mod render;

//--------------------------------------------------------<<
// IMPORTS ------------------>>

use clap::{ArgAction, Parser, Subcommand};
use crossterm::event::{self, Event};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use board_sync::core::{App, ConsoleInput, EventHandler};
use board_sync::operations::SyncReport;
use board_sync::{logging, SyncError};
use render::{render_diff, render_entries, render_plan, render_ports, render_report, render_status};

//--------------------------------------------------------<<
// CLI DEFINITION ------------------>>

#[derive(Debug, Parser)]
#[command(name = "board-sync", version, about = "Keep a local project in sync with a MicroPython board")]
struct Cli {
    /// Workspace root (defaults to the nearest directory with board-sync.yaml)
    #[arg(long, global = true, env = "BOARD_SYNC_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Serial port, overriding `connect` in board-sync.yaml
    #[arg(long, global = true, env = "BOARD_SYNC_PORT")]
    port: Option<String>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the metadata directory, ignore rules and board-sync.yaml
    Init,
    /// Local changes since the last sync (no device access)
    Status,
    /// Compare the workspace with the device
    Diff {
        /// Also list the directories containing differences
        #[arg(long)]
        decorations: bool,
    },
    /// Upload changed and new files
    Push {
        /// Delete files that only exist on the device
        #[arg(long)]
        prune: bool,
        /// Print the plan without touching the device
        #[arg(long)]
        dry_run: bool,
    },
    /// Download changed files and files that only exist on the device
    Pull {
        #[arg(long)]
        dry_run: bool,
    },
    /// Upload every tracked file
    PushAll,
    /// Download everything under the device root
    PullAll,
    /// Upload a single file
    Upload { file: PathBuf },
    /// Download a single device file into the workspace
    Download { path: String },
    /// Create a device directory and its parents
    Mkdir { path: String },
    /// Run a local script on the board
    Run { file: PathBuf },
    /// Delete a file or directory tree on the device
    Delete {
        path: String,
        /// Also delete the workspace copy
        #[arg(long)]
        local: bool,
    },
    /// Delete everything under the device root
    Wipe {
        #[arg(long)]
        yes: bool,
    },
    /// List a device directory
    Ls { path: Option<String> },
    /// List serial ports or choose the one to use
    Port {
        #[command(subcommand)]
        action: PortAction,
    },
    /// Reset the board
    Reset {
        /// Restart the interpreter only
        #[arg(long)]
        soft: bool,
    },
    /// Interrupt the program running on the board
    Stop,
    /// Interactive console (Ctrl-T pushes, Ctrl-] exits)
    Repl,
}

#[derive(Debug, Subcommand)]
enum PortAction {
    /// List serial ports
    List,
    /// Save the port in board-sync.yaml, then compare with the board
    Set { port: String },
}

//--------------------------------------------------------<<

// ┌──────────────────────────────────────────────────────────────────────────────────────────────────────────────────┐
// │                                                 MAIN ENTRY POINT                                                 │
// └──────────────────────────────────────────────────────────────────────────────────────────────────────────────────┘

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("failed to initialise logging: {}", e);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => report_error(&e),
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let app = App::open(cli.workspace, cli.port)?;
    debug!(command = ?cli.command, "dispatching");

    match cli.command {
        Command::Init => {
            let outcome = app.init()?;
            println!("Initialised {}", app.workspace_root.display());
            if outcome.created_rules {
                println!("  created default ignore rules");
            }
            if outcome.created_config {
                println!("  created board-sync.yaml");
            }
        }
        Command::Status => {
            let delta = app.local_status().await?;
            print!("{}", render_status(&delta));
        }
        Command::Diff { decorations } => {
            let diff = app.check_diffs().await?;
            print!("{}", render_diff(&diff, decorations));
        }
        Command::Push { prune, dry_run } => {
            let prune = prune.then_some(true);
            if dry_run {
                print!("{}", render_plan(&app.preview_push(prune).await?));
            } else {
                return Ok(finish(app.sync_diffs_to_device(prune).await?));
            }
        }
        Command::Pull { dry_run } => {
            if dry_run {
                print!("{}", render_plan(&app.preview_pull().await?));
            } else {
                return Ok(finish(app.sync_diffs_from_device().await?));
            }
        }
        Command::PushAll => return Ok(finish(app.sync_all_to_device().await?)),
        Command::PullAll => return Ok(finish(app.sync_all_from_device().await?)),
        Command::Upload { file } => {
            let file = absolute(&file)?;
            return Ok(finish(app.upload_file(&file).await?));
        }
        Command::Run { file } => {
            let output = app.run_file(&absolute(&file)?).await?;
            print!("{}", output);
        }
        Command::Download { path } => return Ok(finish(app.download_file(&path).await?)),
        Command::Mkdir { path } => return Ok(finish(app.mkdir(&path).await?)),
        Command::Delete { path, local } => {
            let report = if local {
                app.delete_both(&path).await?
            } else {
                app.delete(&path).await?
            };
            return Ok(finish(report));
        }
        Command::Wipe { yes } => {
            if !yes {
                anyhow::bail!("refusing to wipe {} without --yes", app.device_root());
            }
            return Ok(finish(app.wipe().await?));
        }
        Command::Ls { path } => {
            let entries = app.list(path.as_deref()).await?;
            print!("{}", render_entries(&entries));
        }
        Command::Port {
            action: PortAction::List,
        } => {
            let ports = app.list_ports().await?;
            print!("{}", render_ports(&ports));
        }
        Command::Port {
            action: PortAction::Set { port },
        } => {
            let mut app = app;
            app.set_port(&port)?;
            println!("Port set to {}", port);

            // The transport was built for the old port
            let app = App::open(Some(app.workspace_root.clone()), None)?;
            let diff = app.check_diffs().await?;
            print!("{}", render_diff(&diff, false));
        }
        Command::Reset { soft } => {
            app.reset(soft).await?;
            println!("{}", if soft { "Soft reset done" } else { "Reset done" });
        }
        Command::Stop => {
            app.interrupt().await?;
            println!("Interrupted");
        }
        Command::Repl => repl(&app).await?,
    }

    Ok(ExitCode::SUCCESS)
}

fn finish(report: SyncReport) -> ExitCode {
    print!("{}", render_report(&report));
    if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn report_error(error: &anyhow::Error) -> ExitCode {
    eprintln!("error: {:#}", error);

    match error.downcast_ref::<SyncError>() {
        Some(e) if e.is_precondition() => {
            eprintln!("hint: pass --port or set `connect` in board-sync.yaml");
            ExitCode::from(2)
        }
        Some(SyncError::Handshake { .. }) => {
            eprintln!("hint: check the cable, then try `board-sync stop` if a program is running");
            ExitCode::from(3)
        }
        _ => ExitCode::FAILURE,
    }
}

// INTERACTIVE CONSOLE ------------------>>

/// Restores cooked mode on drop
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Print while the terminal is in raw mode
fn raw_print(text: &str) {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(text.replace('\n', "\r\n").as_bytes());
    let _ = stdout.flush();
}

async fn repl(app: &App) -> anyhow::Result<()> {
    app.open_console().await?;
    println!("Console on {}. Ctrl-T pushes changes, Ctrl-] exits.", app.config.connect);

    // crossterm reads block, so they run on their own thread
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let stop = Arc::new(AtomicBool::new(false));
    let reader_stop = stop.clone();
    let reader = thread::spawn(move || {
        while !reader_stop.load(Ordering::Relaxed) {
            match event::poll(Duration::from_millis(100)) {
                Ok(true) => match event::read() {
                    Ok(ev) => {
                        if tx.send(ev).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                Ok(false) => {}
                Err(_) => break,
            }
        }
    });

    let raw = RawMode::enable()?;
    let mut outcome = Ok(());

    while let Some(ev) = rx.recv().await {
        match EventHandler::handle(ev) {
            ConsoleInput::Bytes(bytes) => {
                if let Err(e) = app.arbiter().send_to_console(&bytes, false).await {
                    outcome = Err(e.into());
                    break;
                }
            }
            ConsoleInput::SyncPush => {
                raw_print("\n[board-sync] pushing changes...\n");
                // The console was just talking to the board
                app.arbiter().skip_idle_once();
                match app.sync_diffs_to_device(None).await {
                    Ok(report) => raw_print(&render_report(&report)),
                    Err(e) => raw_print(&format!("[board-sync] push failed: {}\n", e)),
                }
            }
            ConsoleInput::Quit => break,
            ConsoleInput::None => {}
        }
    }

    drop(raw);
    stop.store(true, Ordering::Relaxed);
    rx.close();
    let _ = reader.join();

    app.arbiter().close_console().await?;
    println!();
    outcome
}

//--------------------------------------------------------<<
