//! Build command (default)
//!
//! Runs the whole pipeline: resolve, generate, build, smoke test, publish.

use super::{SettingsArgs, http_fetcher};
use crate::output::{
    CommandSpinner, format_docker_error_anyhow, format_elapsed, show_docker_error,
    show_smoke_failure,
};
use anyhow::{Result, anyhow};
use clap::Args;
use console::style;
use mediawiki_image_core::config::{display_validation_error, resolve_credentials};
use mediawiki_image_core::docker::{ProgressMode, resolve_namespace};
use mediawiki_image_core::{
    CheckStatus, DockerClient, PipelineError, PipelineEvent, PipelineObserver, PipelineReport,
    ProgressReporter, PublishDecision, run_pipeline,
};
use tracing::debug;

#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Registry username (falls back to DOCKER_USERNAME)
    #[arg(long)]
    pub username: Option<String>,

    /// Registry token (falls back to DOCKER_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// Push after a passing smoke test (implied when credentials are set)
    #[arg(long)]
    pub auto_push: bool,

    /// Write the resolved versions as KEY=VALUE lines
    #[arg(long)]
    pub output_versions: bool,

    /// Build without the Docker layer cache
    #[arg(long)]
    pub no_cache: bool,
}

pub async fn cmd_build(args: &BuildArgs, quiet: bool, verbose: u8) -> Result<()> {
    let mut config = args.settings.load_config(quiet)?;
    if args.no_cache {
        config.no_cache = true;
    }

    let mut options = args.settings.pinned_options()?;
    options.credentials = resolve_credentials(
        args.username.as_deref(),
        args.token.as_deref(),
        |var| std::env::var(var).ok(),
    );
    options.auto_push = args.auto_push;
    options.output_versions = args.output_versions;
    debug!("Run options: {options:?}");

    // Reject an unusable username namespace before touching Docker
    if let Err(error) = resolve_namespace(&config, options.credentials.as_ref()) {
        display_validation_error(&error);
        return Err(anyhow!("Registry username cannot be used as the image namespace"));
    }

    let fetcher = http_fetcher(&config)?;
    let client = connect_docker().await?;

    let mut progress = ProgressReporter::with_mode(progress_mode(quiet, verbose));
    let mut observer = ConsoleObserver::new(quiet);

    let result = run_pipeline(
        &client,
        fetcher,
        &config,
        &options,
        &mut observer,
        &mut progress,
    )
    .await;
    observer.abandon();

    match result {
        Ok(report) => {
            if !quiet {
                print_summary(&report);
            }
            Ok(())
        }
        Err(PipelineError::TestsFailed(outcome)) => {
            show_smoke_failure(&outcome);
            Err(PipelineError::TestsFailed(outcome).into())
        }
        Err(e) => {
            if let Some(docker) = e.docker_error() {
                show_docker_error(docker);
            }
            Err(e.into())
        }
    }
}

/// Connect to Docker with actionable error messages
async fn connect_docker() -> Result<DockerClient> {
    let client = DockerClient::new().map_err(|e| format_docker_error_anyhow(&e))?;
    client
        .verify_connection()
        .await
        .map_err(|e| format_docker_error_anyhow(&e))?;
    Ok(client)
}

/// Spinners on a terminal; raw daemon output with -v or when piped
fn progress_mode(quiet: bool, verbose: u8) -> ProgressMode {
    if quiet {
        ProgressMode::Hidden
    } else if verbose > 0 || !console::Term::stderr().is_term() {
        ProgressMode::Plain
    } else {
        ProgressMode::Interactive
    }
}

/// Prints one line per milestone, with a spinner around each smoke check
struct ConsoleObserver {
    quiet: bool,
    check_spinner: Option<CommandSpinner>,
}

impl ConsoleObserver {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            check_spinner: None,
        }
    }

    fn step(&self, message: String) {
        if !self.quiet {
            eprintln!("{} {message}", style("•").cyan());
        }
    }

    /// Drop a spinner left running by an interrupted or failed stage
    fn abandon(&mut self) {
        if let Some(spinner) = self.check_spinner.take() {
            spinner.fail("Interrupted");
        }
    }
}

impl PipelineObserver for ConsoleObserver {
    fn on_event(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::VersionsResolved(resolved) => self.step(format!(
                "Resolved {} (php: {}, mediawiki: {})",
                resolved.versions, resolved.php_source, resolved.mediawiki_source
            )),
            PipelineEvent::VersionsFileWritten(path) => {
                self.step(format!("Wrote versions to {}", path.display()))
            }
            PipelineEvent::ArtifactsGenerated(generated) => {
                self.step(format!("Generated build context in {}", generated.dir.display()))
            }
            PipelineEvent::BuildStarted { tag } => {
                self.step(format!("Building {}", style(tag).cyan()))
            }
            PipelineEvent::ImageBuilt { image_id, tags } => self.step(format!(
                "Built {} as {}",
                short_id(image_id),
                tags.join(", ")
            )),
            PipelineEvent::ContainerStarted { name } => {
                self.step(format!("Started test container {name}"))
            }
            PipelineEvent::CheckStarted(check) => {
                self.check_spinner = Some(CommandSpinner::new_maybe(
                    &format!("Running {check} check..."),
                    self.quiet,
                ));
            }
            PipelineEvent::CheckFinished(result) => {
                let spinner = self
                    .check_spinner
                    .take()
                    .unwrap_or_else(|| CommandSpinner::new_maybe("", self.quiet));
                match &result.status {
                    CheckStatus::Passed { attempts } => spinner.success(
                        &format!("{} check passed ({})", result.check, plural(*attempts)),
                    ),
                    CheckStatus::Failed(failure) => spinner.fail(&format!(
                        "{} check failed after {}",
                        result.check,
                        plural(failure.attempts)
                    )),
                    CheckStatus::Skipped => {
                        spinner.skip(&format!("{} check skipped", result.check))
                    }
                }
            }
            PipelineEvent::ContainerRemoved { name } => {
                debug!("Removed test container {name}");
            }
            PipelineEvent::PublishSkipped { decision, .. } => {
                self.step(format!("Publishing {}", style(decision).yellow()))
            }
            PipelineEvent::Published { references } => {
                self.step(format!("Pushed {}", references.join(", ")))
            }
        }
    }
}

fn plural(attempts: u32) -> String {
    if attempts == 1 {
        "1 attempt".to_string()
    } else {
        format!("{attempts} attempts")
    }
}

fn short_id(image_id: &str) -> &str {
    let id = image_id.strip_prefix("sha256:").unwrap_or(image_id);
    id.get(..12).unwrap_or(id)
}

fn print_summary(report: &PipelineReport) {
    println!();
    println!(
        "{} {} {}",
        style("Success:").green().bold(),
        report.resolved.versions,
        style(format_elapsed(report.elapsed)).dim()
    );
    for reference in &report.references {
        let marker = if report.pushed.contains(reference) {
            style("pushed").green()
        } else {
            style("local").dim()
        };
        println!("  {reference}  {marker}");
    }
    if report.publish == PublishDecision::SkipMissingCredentials {
        println!();
        println!(
            "  {} Set {} and {} (or pass --username/--token) to publish.",
            style("Tip:").cyan(),
            style("DOCKER_USERNAME").green(),
            style("DOCKER_TOKEN").green()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_strips_digest_prefix() {
        assert_eq!(short_id("sha256:0123456789abcdef0123"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn plural_attempts() {
        assert_eq!(plural(1), "1 attempt");
        assert_eq!(plural(20), "20 attempts");
    }

    #[test]
    fn quiet_hides_progress() {
        assert_eq!(progress_mode(true, 3), ProgressMode::Hidden);
    }

    #[test]
    fn verbose_prints_plain_progress() {
        assert_eq!(progress_mode(false, 1), ProgressMode::Plain);
    }
}
