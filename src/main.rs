use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};
use std::env;
use std::io;
use std::path::PathBuf;

use addheader::config::Settings;
use addheader::Filter;

/// smtpd filter for adding static email header lines.
///
/// Header arguments are formatted as NAME=VALUE. At least one header must be
/// provided, on the command line or in the config file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Headers to add, as NAME=VALUE
    #[arg(value_name = "HEADER")]
    header: Vec<String>,

    /// Only add headers when a recipient matches this pattern (repeatable)
    #[arg(short, long, value_name = "PATTERN")]
    recipient: Vec<String>,

    /// JSON config file with `header`, `recipient` and `verbose` keys
    #[arg(short, long, env = "SMTPD_FILTER_ADDHEADER_CONFIG")]
    config: Option<PathBuf>,

    /// Log every event
    #[arg(short, long, env = "SMTPD_FILTER_ADDHEADER_VERBOSE")]
    verbose: bool,
}

fn filter_name() -> String {
    env::current_exe()
        .ok()
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis()
        .init();
}

fn load_settings(args: &Args) -> Result<Settings> {
    let settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load config file: {:?}", path))?,
        None => Settings::default(),
    };
    Ok(settings.merge(args.header.clone(), args.recipient.clone(), args.verbose))
}

fn run(settings: Settings) -> Result<()> {
    let name = filter_name();
    debug!("[{}] pid={}", name, std::process::id());

    let injector = settings.injector().context("Failed to configure headers")?;

    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    let mut filter = Filter::new(&name, injector, stdin, stdout);
    filter.run().context("Filter failed")?;
    info!("[{}] exiting, anomalies={}", name, filter.anomalies());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let settings = match load_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            setup_logging(args.verbose);
            error!("[main] {:#}", e);
            return Err(e);
        }
    };
    setup_logging(settings.verbose);

    if let Err(e) = run(settings) {
        error!("[main] {:#}", e);
        return Err(e);
    }
    Ok(())
}
