use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use coapcheck_core::config::{Config, Profile};
use tracing::info;

mod app;
mod trace;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProfileArg {
    Client,
    ReverseProxy,
}

impl From<ProfileArg> for Profile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Client => Profile::Client,
            ProfileArg::ReverseProxy => Profile::ReverseProxy,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "coapcheck - CoAP interoperability test analyser", long_about = None)]
struct Args {
    /// Decoded frame dump (TOML)
    dump: Utf8PathBuf,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Check request URIs against the testcase resources
    #[arg(short, long)]
    urifilter: bool,

    /// Role of the implementation under test
    #[arg(short, long, value_enum)]
    profile: Option<ProfileArg>,

    /// Only run testcases whose name contains this text
    #[arg(short, long)]
    filter: Option<String>,

    /// Omit per-test traces from the report
    #[arg(short, long)]
    quiet: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_default()
    };

    // Initialize logging
    let log_level = if args.verbose {
        "debug".to_owned()
    } else {
        config.general.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    info!("Starting coapcheck v{}", env!("CARGO_PKG_VERSION"));

    // Override with CLI arguments
    if args.urifilter {
        config.analysis.urifilter = true;
    }
    if let Some(profile) = args.profile {
        config.analysis.profile = profile.into();
    }
    if let Some(filter) = args.filter {
        config.analysis.testcase_filter = Some(filter);
    }
    if args.quiet {
        config.analysis.verbose = false;
    }
    config.validate()?;

    app::run(&args.dump, &config)
}
