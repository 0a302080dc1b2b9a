//! mediawiki-image CLI - build, smoke-test and publish MediaWiki images
//!
//! This module contains the shared CLI implementation used by all binaries.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use mediawiki_image_core::get_version;
use tracing_subscriber::EnvFilter;

/// Build, smoke-test and publish MediaWiki container images
#[derive(Parser)]
#[command(name = "mediawiki-image")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, smoke-test and publish MediaWiki container images", long_about = None)]
#[command(after_help = get_banner())]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    build: commands::BuildArgs,

    /// Increase verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve PHP and MediaWiki versions and print them
    Versions(commands::VersionsArgs),
    /// Resolve versions and write the build context only
    Generate(commands::GenerateArgs),
}

fn get_banner() -> &'static str {
    r#"
Without a subcommand the full pipeline runs:
  resolve versions -> generate Dockerfile -> build -> smoke test -> publish

Publishing needs DOCKER_USERNAME and DOCKER_TOKEN (or --username/--token).
"#
}

/// Default log filter for the verbosity flags
///
/// Only this project's crates get louder; dependencies stay at warn.
fn default_filter(verbose: u8, quiet: bool) -> String {
    let level = match (quiet, verbose) {
        (true, _) => return "error".to_string(),
        (false, 0) => return "warn".to_string(),
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    format!("warn,mediawiki_image={level},mediawiki_image_core={level}")
}

/// Install the stderr subscriber; `RUST_LOG` wins over the flags
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose, quiet)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .init();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Configure color output
    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    init_tracing(cli.verbose, cli.quiet);

    if cli.verbose > 0 {
        eprintln!(
            "{} {} {}",
            style("[info]").cyan(),
            style("mediawiki-image").bold(),
            style(get_version()).dim()
        );
    }

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Some(Commands::Versions(args)) => rt.block_on(commands::cmd_versions(&args, cli.quiet)),
        Some(Commands::Generate(args)) => rt.block_on(commands::cmd_generate(&args, cli.quiet)),
        None => rt.block_on(commands::cmd_build(&cli.build, cli.quiet, cli.verbose)),
    }
}
