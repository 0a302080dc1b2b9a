//! Versions command
//!
//! Resolves PHP and MediaWiki versions and prints them. Nothing is built.

use super::{SettingsArgs, http_fetcher};
use crate::output::{CommandSpinner, source_style};
use anyhow::Result;
use clap::{Args, ValueEnum};
use comfy_table::{Cell, Table, presets::UTF8_FULL_CONDENSED};
use mediawiki_image_core::{ResolvedVersions, resolve_versions};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum VersionsFormat {
    /// Table with the source of each value
    #[default]
    Table,
    /// KEY=VALUE lines, same as the versions file
    Env,
    /// JSON object
    Json,
}

#[derive(Args, Debug)]
pub struct VersionsArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Output format
    #[arg(long, value_enum, default_value_t = VersionsFormat::Table)]
    pub format: VersionsFormat,
}

pub async fn cmd_versions(args: &VersionsArgs, quiet: bool) -> Result<()> {
    let config = args.settings.load_config(quiet)?;
    let options = args.settings.pinned_options()?;
    let fetcher = http_fetcher(&config)?;

    // Machine-readable formats keep stderr quiet too
    let show_spinner = !quiet && args.format == VersionsFormat::Table;
    let spinner = CommandSpinner::new_maybe("Resolving versions...", !show_spinner);
    let resolved = resolve_versions(fetcher, &config, &options).await;
    spinner.success("Versions resolved");

    println!("{}", render(&resolved, args.format)?);
    Ok(())
}

fn render(resolved: &ResolvedVersions, format: VersionsFormat) -> Result<String> {
    let versions = &resolved.versions;
    let text = match format {
        VersionsFormat::Env => versions.to_env_file().trim_end().to_string(),
        VersionsFormat::Json => serde_json::to_string_pretty(resolved)?,
        VersionsFormat::Table => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(vec!["Key", "Value", "Source"]);
            let sources = [
                resolved.php_source,
                resolved.mediawiki_source,
                resolved.mediawiki_source,
            ];
            for ((key, value), source) in versions.entries().into_iter().zip(sources) {
                table.add_row(vec![
                    Cell::new(key),
                    Cell::new(value),
                    Cell::new(source_style(source)),
                ]);
            }
            table.to_string()
        }
    };
    Ok(text)
}
