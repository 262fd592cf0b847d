mod config;
mod console;
mod picker;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use scopedeck_backend::{Backend, ProcessBackend, SimulatedBackend};
use scopedeck_core::{
    band_power, save_buffer, with_timeout, AcquisitionSession, FrequencyBand, Mode, SaveTarget,
    SessionOutcome,
};
use scopedeck_logging::{init_tracing, LogEvent, LogFormat, Logger};
use scopedeck_picker::SelectedDirectory;

use crate::config::{clamp_bin_size, Config};
use crate::console::ConsoleSurface;

#[derive(Parser, Debug)]
#[command(
    name = "scopedeck",
    about = "Operator console for streaming oscilloscope acquisition",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: ./scopedeck.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: LogFormatChoice,

    /// Diagnostic log level (RUST_LOG overrides)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Also write logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Use the built-in simulated instrument
    #[arg(long, global = true)]
    simulate: bool,

    /// Output final result as JSON
    #[arg(long, global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream continuously until Ctrl+C
    Live {
        /// Visible window in seconds
        #[arg(short, long)]
        window: Option<f64>,

        /// Sample rate in Hz
        #[arg(short, long)]
        rate: Option<f64>,
    },

    /// Capture one window and stop
    Single {
        /// Capture length in seconds
        #[arg(short, long)]
        window: Option<f64>,

        /// Sample rate in Hz
        #[arg(short, long)]
        rate: Option<f64>,

        /// Save the buffer when the capture ends
        #[arg(long, overrides_with = "no_autosave")]
        autosave: bool,

        /// Do not save, whatever the config says
        #[arg(long, overrides_with = "autosave")]
        no_autosave: bool,

        /// Output directory for the autosave
        #[arg(short, long)]
        dir: Option<String>,
    },

    /// Choose an output directory from the backend's listing
    Pick,

    /// Save the backend's current buffer
    Save {
        /// Output directory (default: [output].directory)
        #[arg(short, long)]
        dir: Option<String>,

        /// File name suffix, strftime pattern
        #[arg(short, long)]
        suffix: Option<String>,

        /// Samples averaged per saved point
        #[arg(short, long)]
        bin_size: Option<i64>,
    },

    /// Integrate the buffered PSD over a frequency band
    BandPower {
        /// Lower band edge in Hz (exclusive)
        #[arg(long)]
        lo: f64,

        /// Upper band edge in Hz (exclusive)
        #[arg(long)]
        hi: f64,
    },

    /// Ask the backend to reconnect to the instrument
    Reconnect,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_format: LogFormat = cli.log_format.into();
    // Dropped on return, which flushes the file writer
    let _guard = init_tracing(&cli.log_level, log_format, cli.log_dir.as_deref());

    let code = run(cli, log_format).await?;
    Ok(exit_status(code))
}

fn exit_status(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(cli: Cli, log_format: LogFormat) -> Result<i32> {
    let working_dir = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(cli.config.as_deref(), &working_dir)?;

    let logger = match &cli.log_dir {
        Some(dir) => Logger::with_file(log_format, &dir.join("sessions.jsonl"))
            .context("Failed to open session log")?,
        None => Logger::new(log_format),
    };
    let logger = Arc::new(logger);
    let backend = build_backend(&config, cli.simulate)?;

    let exit_code = match cli.command {
        Command::Live { window, rate } => {
            let outcome = run_session(
                &cli,
                &config,
                backend,
                logger,
                Mode::Live,
                window,
                rate,
                None,
                None,
            )
            .await?;
            outcome.exit_code()
        }
        Command::Single {
            window,
            rate,
            autosave,
            no_autosave,
            ref dir,
        } => {
            let autosave = match (autosave, no_autosave) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let outcome = run_session(
                &cli,
                &config,
                backend,
                logger,
                Mode::Single,
                window,
                rate,
                autosave,
                dir.clone(),
            )
            .await?;
            outcome.exit_code()
        }
        Command::Pick => {
            let path = picker::pick_directory(
                backend,
                &config.backend.separator,
                config.call_timeout(),
                config.output_directory(),
            )
            .await?;
            logger.log(&LogEvent::DirectorySelected { path: path.clone() });
            if cli.json_output {
                println!("{}", serde_json::json!({ "directory": path }));
            } else {
                println!("{path}");
            }
            0
        }
        Command::Save {
            ref dir,
            ref suffix,
            bin_size,
        } => {
            let target = SaveTarget {
                directory: dir.clone().unwrap_or_else(|| config.output_directory()),
                suffix: suffix.clone().unwrap_or_else(|| config.output.suffix.clone()),
            };
            let bin_size = bin_size.map_or_else(|| config.bin_size(), clamp_bin_size);
            let note = save_buffer(backend.as_ref(), &target, bin_size, config.call_timeout()).await;
            logger.log(&LogEvent::BufferSaved {
                success: note.success,
                title: note.title.clone(),
                body: note.body.clone(),
            });
            if cli.json_output {
                println!("{}", serde_json::to_string_pretty(&note)?);
            } else {
                console::print_notification(&note);
            }
            if note.success {
                0
            } else {
                1
            }
        }
        Command::BandPower { lo, hi } => {
            let band = FrequencyBand::new(lo, hi)?;
            let power = band_power(backend.as_ref(), band, config.call_timeout())
                .await
                .with_context(|| format!("Failed to read band power from {}", backend.name()))?;
            if cli.json_output {
                println!("{}", serde_json::to_string_pretty(&power)?);
            } else {
                console::print_band_power(&power);
            }
            0
        }
        Command::Reconnect => {
            let result = with_timeout(config.call_timeout(), "reconnect", backend.reconnect()).await;
            logger.log(&LogEvent::ReconnectAttempted {
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            });
            result.with_context(|| format!("Failed to reconnect {}", backend.name()))?;
            if !cli.json_output {
                eprintln!("{} Reconnected to {}", "✓".bright_green(), backend.name());
            }
            0
        }
    };

    Ok(exit_code)
}

fn build_backend(config: &Config, simulate: bool) -> Result<Arc<dyn Backend>> {
    if simulate {
        return Ok(Arc::new(SimulatedBackend::default()));
    }
    let command = config.backend.command.as_deref().context(
        "No backend command configured. Set [backend].command in scopedeck.toml or pass --simulate",
    )?;
    let mut backend = ProcessBackend::new(command).with_args(config.backend.args.clone());
    if let Some(dir) = &config.backend.working_dir {
        backend = backend.with_working_dir(dir.clone());
    }
    Ok(Arc::new(backend))
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    cli: &Cli,
    config: &Config,
    backend: Arc<dyn Backend>,
    logger: Arc<Logger>,
    mode: Mode,
    window: Option<f64>,
    rate: Option<f64>,
    autosave: Option<bool>,
    directory: Option<String>,
) -> Result<SessionOutcome> {
    let params = config.session_params(mode, window, rate)?;
    let quiet = cli.json_output;

    let refresher = console::chart_refresher(
        Arc::clone(&backend),
        config.bin_size(),
        config.display.refresh_interval,
        config.call_timeout(),
        Arc::clone(&logger),
        quiet,
    );
    let selected = SelectedDirectory::new(directory.unwrap_or_else(|| config.output_directory()));
    let surface = ConsoleSurface::new(selected, config.output.suffix.clone())
        .with_refresher(refresher)
        .quiet(quiet);
    let overflows = surface.subscribe_overflows();

    let mut session = AcquisitionSession::new(
        backend,
        Arc::new(surface),
        logger,
        config.session_options(autosave),
    );
    for (id, channel) in config.channel_set()?.iter() {
        session.apply_channel(id, *channel)?;
    }

    // Handle Ctrl+C gracefully
    let stop = session.stop_handle();
    ctrlc::set_handler(move || {
        if stop.stop() {
            eprintln!("\nStopping after the current iteration...");
        }
    })
    .context("Failed to set Ctrl+C handler")?;

    let progress_bar = (mode == Mode::Single && !quiet)
        .then(|| console::spawn_progress_bar(session.progress().subscribe(), overflows));

    let outcome = session.start(params).await;

    if let Some(bar) = progress_bar {
        bar.abort();
    }

    if cli.json_output {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(outcome)
}

fn print_outcome(outcome: &SessionOutcome) {
    eprintln!();
    match outcome {
        SessionOutcome::Rejected { reason } => {
            eprintln!("=== NOT STARTED ===");
            eprintln!("Reason: {:?}", reason);
            eprintln!("Enable at least one channel under [channels.A] or [channels.B].");
        }
        SessionOutcome::Completed { stats } => {
            eprintln!("=== COMPLETED ===");
            eprintln!("Pulls: {}", stats.iterations);
            eprintln!("Overflows: {}", stats.warnings);
            eprintln!("Rate: {}", Logger::format_rate(stats.sample_rate));
            eprintln!("Duration: {:.1}s", stats.total_duration_secs);
        }
        SessionOutcome::Stopped { stats } => {
            eprintln!("=== STOPPED ===");
            eprintln!("Pulls: {}", stats.iterations);
            eprintln!("Overflows: {}", stats.warnings);
            eprintln!("Duration: {:.1}s", stats.total_duration_secs);
        }
        SessionOutcome::Failed {
            stats,
            error,
            reconnected,
        } => {
            eprintln!("=== FAILED ===");
            eprintln!("Error after {} pull(s): {}", stats.iterations, error);
            eprintln!(
                "Reconnect: {}",
                if *reconnected { "ok" } else { "failed" }
            );
        }
    }
}
