#![forbid(unsafe_code)]

mod commands;
mod shell;

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use pseud_driver::{Driver, DriverConfig};
use tracing_subscriber::EnvFilter;

use crate::shell::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "pseudctl",
    version,
    about = "Host console for memory-backed pseudo devices"
)]
struct Args {
    /// Base name of the device nodes (`{name}_{id}`).
    #[arg(long, env = "PSEUD_DRIVER_NAME")]
    driver_name: Option<String>,

    /// Capacity of every device, in bytes.
    #[arg(long, env = "PSEUD_DEVMEM_LEN")]
    devmem_len: Option<usize>,

    /// Width of the device id space (at most 64).
    #[arg(long, env = "PSEUD_MAX_DEVICES")]
    max_devices: Option<usize>,

    /// Comma separated ids created at startup.
    ///
    /// Defaults to `0,1,2`. Pass an empty string to start with no devices.
    #[arg(long, env = "PSEUD_DEVICES", value_delimiter = ',')]
    devices: Option<Vec<String>>,

    /// Command script to run. Reads stdin when omitted.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Log filter (tracing-subscriber EnvFilter syntax). `RUST_LOG` takes precedence.
    #[arg(long, env = "PSEUD_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn driver_config(&self) -> Result<DriverConfig> {
        let mut config = DriverConfig::default();
        if let Some(name) = &self.driver_name {
            config.driver_name = name.clone();
        }
        if let Some(len) = self.devmem_len {
            config.devmem_len = len;
        }
        if let Some(max) = self.max_devices {
            config.max_devices = max;
        }
        if let Some(ids) = &self.devices {
            config.devices = ids
                .iter()
                .map(|id| id.trim())
                .filter(|id| !id.is_empty())
                .map(|id| {
                    id.parse()
                        .with_context(|| format!("invalid device id {id:?}"))
                })
                .collect::<Result<_>>()?;
        }
        config.validate().context("invalid driver configuration")?;
        Ok(config)
    }
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(args: Args) -> Result<usize> {
    let config = args.driver_config()?;
    let driver = Driver::init(config).context("failed to initialise driver")?;
    let mut shell = Shell::new(driver);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let failures = match &args.script {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open script {}", path.display()))?;
            shell.run(BufReader::new(file), &mut out)?
        }
        None => shell.run(io::stdin().lock(), &mut out)?,
    };

    tracing::debug!(devices = shell.driver().devices().len(), "script finished");
    Ok(failures)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match run(args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            tracing::warn!(failures, "some commands failed");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}
