//! Progress reporting for image builds and pushes
//!
//! Spinners from indicatif. `Plain` mode prints raw daemon
//! output instead (used with `-v` or when stderr is not a terminal);
//! `Hidden` mode draws nothing (used with `--quiet` and in tests).

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    #[default]
    Interactive,
    Plain,
    Hidden,
}

/// Progress reporter for Docker operations
///
/// Keyed by id so each pushed tag gets its own line next to the build
/// spinner.
pub struct ProgressReporter {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    mode: ProgressMode,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_mode(ProgressMode::Interactive)
    }

    pub fn with_mode(mode: ProgressMode) -> Self {
        let multi = match mode {
            ProgressMode::Interactive => MultiProgress::new(),
            ProgressMode::Plain | ProgressMode::Hidden => {
                MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
            }
        };
        Self {
            multi,
            bars: HashMap::new(),
            mode,
        }
    }

    /// Reporter that draws nothing
    pub fn hidden() -> Self {
        Self::with_mode(ProgressMode::Hidden)
    }

    pub fn mode(&self) -> ProgressMode {
        self.mode
    }

    /// Raw daemon output should be echoed to stderr
    pub fn is_plain_output(&self) -> bool {
        self.mode == ProgressMode::Plain
    }

    /// Create a spinner for indeterminate progress (build steps, checks)
    ///
    /// An id that already has a spinner gets the new message on that bar.
    pub fn add_spinner(&mut self, id: &str, message: &str) -> &ProgressBar {
        if self.mode == ProgressMode::Plain {
            eprintln!("{message}");
        }
        let multi = &self.multi;
        let mode = self.mode;
        self.bars
            .entry(id.to_string())
            .and_modify(|bar| bar.set_message(message.to_string()))
            .or_insert_with(|| {
                let spinner = multi.add(ProgressBar::new_spinner());
                spinner.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} {msg}")
                        .expect("valid template")
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
                );
                spinner.set_message(message.to_string());
                if mode == ProgressMode::Interactive {
                    spinner.enable_steady_tick(TICK_INTERVAL);
                }
                spinner
            })
    }

    pub fn update_spinner(&mut self, id: &str, message: &str) {
        if let Some(spinner) = self.bars.get(id) {
            spinner.set_message(message.to_string());
        } else {
            self.add_spinner(id, message);
        }
    }

    pub fn finish(&mut self, id: &str, message: &str) {
        if let Some(bar) = self.bars.get(id) {
            bar.finish_with_message(message.to_string());
        }
        if self.mode == ProgressMode::Plain {
            eprintln!("{message}");
        }
    }

    pub fn abandon_all(&self, message: &str) {
        for bar in self.bars.values() {
            bar.abandon_with_message(message.to_string());
        }
    }
}
