//! CLI Entry Point for stimctl
//!
//! Provides command-line interface for:
//! - The interactive command prompt (default)
//! - Running one command series non-interactively
//! - Checking a series without touching the board
//! - Listing shortcuts and printing the effective configuration
//!
//! # Usage
//!
//! ```bash
//! stimctl                                  # interactive prompt
//! stimctl exec "pump:on > air:on > isi2 > air:off > pump:off"
//! stimctl check "(p > isi4) * 10"
//! stimctl --no-serial --log-name fly3
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use stim_controller::command::grammar::Grammar;
use stim_controller::config::{ControllerConfig, DEFAULT_CONFIG_PATH};
use stim_controller::controller::{Controller, ControllerParts, LoopControl};
use stim_controller::device::{DeviceSession, DynSerial};
use stim_controller::interrupt::Interrupt;
use stim_controller::logging;
use stim_controller::operator::ConsoleOperator;
use stim_controller::protocol_log::{EventLog, ProtocolLog};
use stim_controller::scheduler::Scheduler;
use stim_controller::shortcuts::ShortcutStore;
use stim_controller::stimulus::{StimulusLibrary, TimedStimulusSink};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "stimctl")]
#[command(about = "Command-line controller for the stimulation rig", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial port, overriding configuration and auto-detection
    #[arg(long)]
    port: Option<String>,

    /// Run without opening the serial port
    #[arg(long)]
    no_serial: bool,

    /// Name added to the event log file
    #[arg(long)]
    log_name: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive prompt (default)
    Interactive,

    /// Run one command or series, then exit
    Exec {
        /// Command text, e.g. "r5 > isi2 > p"
        series: String,
    },

    /// Expand and validate a series and print its timing estimate
    Check {
        /// Command text
        series: String,
    },

    /// List stored shortcuts
    Shortcuts,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ControllerConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(port) = &cli.port {
        config.serial.port = Some(port.clone());
    }
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command.unwrap_or(Commands::Interactive) {
        Commands::Interactive => run_session(config, cli.no_serial, cli.log_name, None).await,
        Commands::Exec { series } => {
            run_session(config, cli.no_serial, cli.log_name, Some(series)).await
        }
        Commands::Check { series } => check(&config, &series),
        Commands::Shortcuts => list_shortcuts(&config),
        Commands::Config => {
            let text = toml::to_string_pretty(&config).context("serialising configuration")?;
            println!("{text}");
            Ok(())
        }
    }
}

fn load_library(config: &ControllerConfig) -> Result<StimulusLibrary> {
    StimulusLibrary::scan(&config.paths.video_dir, &config.paths.video_extension)
        .with_context(|| format!("scanning {}", config.paths.video_dir.display()))
}

fn load_shortcuts(config: &ControllerConfig, stimuli: &StimulusLibrary) -> Result<ShortcutStore> {
    let mut store = ShortcutStore::with_file(
        &config.paths.shortcuts_file,
        config.session.expansion_limits(),
    );
    let grammar = Grammar::new(
        &config.session.attributes,
        stimuli.names(),
        &config.session.stim_name,
    );
    store
        .reload(&grammar)
        .with_context(|| format!("loading {}", config.paths.shortcuts_file.display()))?;
    Ok(store)
}

fn check(config: &ControllerConfig, series: &str) -> Result<()> {
    let stimuli = load_library(config)?;
    let shortcuts = load_shortcuts(config, &stimuli)?;
    let grammar = Grammar::new(
        &config.session.attributes,
        stimuli.names(),
        &config.session.stim_name,
    );
    let commands = shortcuts.compile(series, &grammar)?;
    let scheduler = Scheduler::new(config.session.scheduler());
    for (index, (command, expected)) in commands
        .iter()
        .zip(scheduler.expected_durations(&commands))
        .enumerate()
    {
        println!("{:>4}  {:<30} {expected:>8.3} s", index + 1, command.to_string());
    }
    println!(
        "{} commands, estimated {:.3} s",
        commands.len(),
        scheduler.estimate(&commands)
    );
    Ok(())
}

fn list_shortcuts(config: &ControllerConfig) -> Result<()> {
    let stimuli = load_library(config)?;
    let shortcuts = load_shortcuts(config, &stimuli)?;
    for shortcut in shortcuts.list() {
        println!("{:<20} <- {}", shortcut.name, shortcut.series);
    }
    Ok(())
}

#[cfg(feature = "instrument_serial")]
async fn open_port(config: &ControllerConfig) -> Result<Option<DynSerial>> {
    stim_controller::device::port::open(&config.serial)
        .await
        .context("opening serial port")
}

#[cfg(not(feature = "instrument_serial"))]
async fn open_port(_config: &ControllerConfig) -> Result<Option<DynSerial>> {
    warn!("Built without serial support; running disconnected");
    Ok(None)
}

async fn run_session(
    config: ControllerConfig,
    no_serial: bool,
    log_name: Option<String>,
    series: Option<String>,
) -> Result<()> {
    let interrupt = Interrupt::new();
    let listener = interrupt.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            listener.trigger();
        }
    });

    let stimuli = load_library(&config)?;
    let shortcuts = load_shortcuts(&config, &stimuli)?;

    let port = if no_serial {
        None
    } else {
        open_port(&config).await?
    };
    let session = DeviceSession::new(port, config.serial.timeouts(), interrupt.clone());

    let events = EventLog::create(&config.paths.log_dir, log_name.as_deref())
        .context("creating event log")?;
    let protocol = ProtocolLog::create(&config.paths.protocol_dir)
        .context("creating protocol log")?;
    info!(
        events = %events.path().display(),
        protocol = %protocol.path().display(),
        "Logging session"
    );

    let mut controller = Controller::new(ControllerParts {
        config,
        stimuli,
        shortcuts,
        session,
        sink: TimedStimulusSink::new(Duration::ZERO),
        operator: ConsoleOperator::spawn(),
        protocol: Some(protocol),
        events: Some(events),
        interrupt,
    });

    match series {
        None => controller.run_interactive().await,
        Some(series) => {
            let result = controller.execute_line(&series).await;
            controller.terminate().await;
            match result {
                Ok(LoopControl::Continue | LoopControl::Quit) => {}
                Err(err) => {
                    warn!(error = %err, "Series failed");
                    return Err(err).context("running series");
                }
            }
        }
    }
    Ok(())
}
