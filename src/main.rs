use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::Path;
use tracing_subscriber::EnvFilter;
use wakeguard::cli::{Cli, Commands, ConfigAction};
use wakeguard::config::Config;
use wakeguard::daemon::{EventOutput, run_monitor};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        None | Some(Commands::Run) => {
            let config = cli.apply_overrides(load_config(cli.config.as_deref())?);
            let output = if cli.json {
                EventOutput::JsonLines
            } else if cli.quiet {
                EventOutput::LogOnly
            } else {
                EventOutput::Console
            };
            run_monitor(config, output).await?;
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { ref action }) => {
            handle_config_command(action, &cli)?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "wakeguard",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level follows `-v`/`-q`.
fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "warn,wakeguard=debug",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/wakeguard/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match (custom_path, Config::default_path()) {
        (Some(path), _) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        (None, Some(path)) => Config::load_or_default(&path)?,
        (None, None) => Config::default(),
    };

    Ok(config.with_env_overrides())
}

#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = wakeguard::audio::capture::list_devices()?;

    if devices.is_empty() {
        eprintln!("{}", "No audio input devices found".yellow());
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    eprintln!(
        "{}",
        "Device listing needs the 'cpal-audio' feature (cargo build --features full)".yellow()
    );
    std::process::exit(1);
}

fn handle_config_command(action: &ConfigAction, cli: &Cli) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = cli.apply_overrides(load_config(cli.config.as_deref())?);
            if let Err(e) = config.validate() {
                eprintln!("{}", format!("Warning: {}", e).yellow());
            }
            print!("{}", config.to_toml_string()?);
        }
        ConfigAction::Path => match cli.config.clone().or_else(Config::default_path) {
            Some(path) => {
                let marker = if path.exists() {
                    "".to_string()
                } else {
                    format!(" {}", "(not created yet)".dimmed())
                };
                println!("{}{}", path.display(), marker);
            }
            None => anyhow::bail!("Could not determine the configuration directory"),
        },
    }
    Ok(())
}
