//! faultline: configurable fault-injection proxy
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! faultline proxy --config ./config.yml
//!
//! # Check version
//! faultline --version
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use faultline::config::{load_config, AppConfig};
use faultline::orchestrator::Faultline;
use faultline::plugin::PluginRegistry;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: Option<PathBuf>,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut config_path = None;
        let mut command = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "proxy" if command.is_none() => {
                    command = Some("proxy");
                }
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = Some(PathBuf::from(path));
                    } else {
                        bail!("--config requires a path argument");
                    }
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("faultline v{}", faultline::VERSION);
                    std::process::exit(0);
                }
                other => {
                    bail!("unknown argument: {other}");
                }
            }
        }

        if command.is_none() {
            print_help();
            bail!("no command given");
        }

        Ok(Self { config_path })
    }
}

fn print_help() {
    println!(
        r"faultline v{}

Configurable fault-injection proxy for HTTP, TCP and UDP.

USAGE:
    faultline proxy [OPTIONS]

OPTIONS:
    -c, --config <PATH>    YAML configuration file path
    -h, --help             Print help information
    -v, --version          Print version information

The proxy runs until interrupted. Exit code is 0 on clean shutdown and
non-zero on any fatal startup error (missing config file, unknown plugin
name, failed field validation).
",
        faultline::VERSION
    );
}

/// Initialize logging from the configured integer level (0 = trace .. 4 =
/// error; anything else falls back to info).
fn init_logging(config: &AppConfig) {
    let level = match config.loglevel {
        0 => Level::TRACE,
        1 => Level::DEBUG,
        3 => Level::WARN,
        4 => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().expect("static directive"))
        .add_directive("tokio=warn".parse().expect("static directive"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run() -> Result<()> {
    let args = Args::parse()?;

    let Some(config_path) = args.config_path else {
        bail!("no config file provided (use --config <path>)");
    };

    let config = load_config(&config_path)
        .with_context(|| format!("unable to read configuration file {config_path:?}"))?;

    init_logging(&config);

    let registry = PluginRegistry::builtin();
    Faultline::new(config)
        .run(&registry, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("faultline: {e:#}");
            ExitCode::FAILURE
        }
    }
}
