use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver};
use std::sync::atomic::Ordering;
use tracing::{debug, error};
use tracing_subscriber::{fmt, EnvFilter};

use chunkmill::cli::Cli;
use chunkmill::config::ProcessorConfig;
use chunkmill::config_file::ConfigFile;
use chunkmill::pipeline::{Pipeline, RunOutput};
use chunkmill::platform::{
    signal_exit_code, Ctrl, ExitCode, SafeStdout, SignalHandler, TERMINATED_BY_SIGNAL,
};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Control channel fed by the signal handler thread
    let (ctrl_tx, ctrl_rx) = unbounded::<Ctrl>();
    let _signal_handler = match SignalHandler::new(ctrl_tx) {
        Ok(handler) => handler,
        Err(e) => {
            eprintln!("chunkmill: Failed to initialize signal handling: {}", e);
            ExitCode::GeneralError.exit();
        }
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("chunkmill: Error: {:#}", e);
            ExitCode::InvalidUsage.exit();
        }
    };

    if cli.show_config {
        ConfigFile::show_config();
        println!("\nEffective settings:");
        println!("{}", config);
        ExitCode::Success.exit();
    }

    let output = match run(&config, &ctrl_rx) {
        Ok(output) => output,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("chunkmill: Error: {:#}", e);
            exit_after_failure();
        }
    };

    if let Err(e) = report(&config, &output) {
        eprintln!("chunkmill: Error: {:#}", e);
        ExitCode::GeneralError.exit();
    }

    if TERMINATED_BY_SIGNAL.load(Ordering::Relaxed) {
        signal_exit_code().exit();
    }
    ExitCode::Success.exit();
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<ProcessorConfig> {
    let file = if cli.ignore_config {
        None
    } else {
        Some(ConfigFile::load_with_custom_path(cli.config_file.as_deref())?)
    };
    ProcessorConfig::from_cli(cli, file.as_ref())
}

fn run(config: &ProcessorConfig, ctrl_rx: &Receiver<Ctrl>) -> Result<RunOutput> {
    std::fs::create_dir_all(&config.input.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            config.input.output_dir
        )
    })?;

    let pipeline = Pipeline::new(config.clone())?;
    debug!(?pipeline, "pipeline ready");
    pipeline.execute(ctrl_rx)
}

/// Records go to stdout with `--emit`, which pushes the summary to stderr
fn report(config: &ProcessorConfig, output: &RunOutput) -> Result<()> {
    if config.output.emit {
        let mut stdout = SafeStdout::new();
        for record in &output.records {
            stdout.writeln(&serde_json::to_string(record)?)?;
        }
        stdout.flush()?;
        eprintln!("{}", output.summary);
    } else {
        let mut stdout = SafeStdout::new();
        stdout.writeln(&output.summary.to_string())?;
        stdout.flush()?;
    }
    Ok(())
}

fn exit_after_failure() -> ! {
    if TERMINATED_BY_SIGNAL.load(Ordering::Relaxed) {
        signal_exit_code().exit();
    }
    ExitCode::GeneralError.exit();
}
