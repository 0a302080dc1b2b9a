//! Generate command
//!
//! Resolves versions and writes the Dockerfile and health-check script
//! without touching Docker.

use super::{SettingsArgs, http_fetcher};
use crate::output::{CommandSpinner, source_style};
use anyhow::{Context, Result};
use clap::Args;
use console::style;
use mediawiki_image_core::{ArtifactGenerator, resolve_versions};

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Also write the resolved versions as KEY=VALUE lines
    #[arg(long)]
    pub output_versions: bool,
}

pub async fn cmd_generate(args: &GenerateArgs, quiet: bool) -> Result<()> {
    let config = args.settings.load_config(quiet)?;
    let options = args.settings.pinned_options()?;
    let fetcher = http_fetcher(&config)?;

    let spinner = CommandSpinner::new_maybe("Resolving versions...", quiet);
    let resolved = resolve_versions(fetcher, &config, &options).await;
    spinner.success(&format!("Resolved {}", resolved.versions));

    if args.output_versions {
        resolved
            .versions
            .write_env_file(&config.versions_file)
            .with_context(|| {
                format!(
                    "Failed to write versions file {}",
                    config.versions_file.display()
                )
            })?;
    }

    let generated = ArtifactGenerator::from_config(&config)?
        .generate(&resolved.versions, &config.work_dir)?;

    if !quiet {
        println!();
        println!(
            "  PHP {} ({})  MediaWiki {} ({})",
            style(resolved.versions.php_version()).cyan(),
            source_style(resolved.php_source),
            style(resolved.versions.mediawiki_version()).cyan(),
            source_style(resolved.mediawiki_source),
        );
        println!("  {} {}", style("Dockerfile:").dim(), generated.dockerfile.display());
        println!("  {} {}", style("Health check:").dim(), generated.healthcheck.display());
        if args.output_versions {
            println!("  {} {}", style("Versions:").dim(), config.versions_file.display());
        }
        println!();
        println!(
            "Build with: {}",
            style(format!("docker build {}", generated.dir.display())).green()
        );
    }
    Ok(())
}
