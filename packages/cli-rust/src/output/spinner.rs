//! Spinner with elapsed time for long-running steps

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Single-line spinner that resolves to a check or cross mark
///
/// Created hidden under `--quiet`, so callers never branch on it.
pub struct CommandSpinner {
    bar: ProgressBar,
}

impl CommandSpinner {
    pub fn new(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} {elapsed:.dim}")
                .expect("valid template"),
        );
        bar.set_message(message.to_string());
        bar.enable_steady_tick(TICK_INTERVAL);
        Self { bar }
    }

    /// Spinner that draws nothing when `quiet` is set
    pub fn new_maybe(message: &str, quiet: bool) -> Self {
        if quiet {
            Self {
                bar: ProgressBar::hidden(),
            }
        } else {
            Self::new(message)
        }
    }

    pub fn success(&self, message: &str) {
        self.finish(format!("{} {message}", style("✓").green()));
    }

    pub fn fail(&self, message: &str) {
        self.finish(format!("{} {message}", style("✗").red()));
    }

    pub fn skip(&self, message: &str) {
        self.finish(format!("{} {message}", style("-").dim()));
    }

    fn finish(&self, line: String) {
        let elapsed = self.bar.elapsed();
        if self.bar.is_hidden() {
            self.bar.finish_and_clear();
            return;
        }
        self.bar.set_style(
            ProgressStyle::default_spinner()
                .template("{msg}")
                .expect("valid template"),
        );
        self.bar
            .finish_with_message(format!("{line} {}", style(format_elapsed(elapsed)).dim()));
    }
}

/// Whole-second elapsed time, e.g. "1m 5s"
pub fn format_elapsed(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        return format!("({}ms)", elapsed.as_millis());
    }
    let rounded = Duration::from_secs(elapsed.as_secs());
    format!("({})", humantime::format_duration(rounded))
}
