//! `TerminalReporter`: Presentation-layer implementation of `ProgressReporter`.
//!
//! Wraps `&OutputContext` and implements the `application::ports::ProgressReporter`
//! trait so application services can emit progress events without depending on
//! any presentation type directly.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize as _;

use crate::application::ports::ProgressReporter;
use crate::output::OutputContext;

/// Terminal progress reporter that wraps an `OutputContext`.
///
/// - `step()` prints `"  → {message}"`, or updates the spinner when one is active
/// - `success()` prints `"  ✓ {message}"`
/// - `warn()` prints `"  ! {message}"`
///
/// All output is suppressed when `ctx.quiet` or when built with [`Self::silent`].
pub struct TerminalReporter<'a> {
    ctx: &'a OutputContext,
    silent: bool,
    spinner: Option<ProgressBar>,
}

impl<'a> TerminalReporter<'a> {
    /// Create a new `TerminalReporter` wrapping the given output context.
    #[must_use]
    pub fn new(ctx: &'a OutputContext) -> Self {
        Self {
            ctx,
            silent: ctx.quiet,
            spinner: None,
        }
    }

    /// A reporter that prints nothing (JSON mode).
    #[must_use]
    pub fn silent(ctx: &'a OutputContext) -> Self {
        Self {
            ctx,
            silent: true,
            spinner: None,
        }
    }

    /// Show steps on a spinner instead of one line each, when the terminal
    /// supports it.
    #[must_use]
    pub fn with_spinner(mut self, msg: &str) -> Self {
        if !self.silent && self.ctx.show_progress() {
            self.spinner = spinner(msg);
        }
        self
    }

    /// Stop the spinner without leaving anything behind.
    pub fn clear(&self) {
        if let Some(pb) = &self.spinner {
            pb.finish_and_clear();
        }
    }

    fn line(&self, line: String) {
        match &self.spinner {
            Some(pb) => pb.println(line),
            None => println!("{line}"),
        }
    }
}

/// Braille spinner with elapsed time. `None` if the template is rejected.
fn spinner(msg: &str) -> Option<ProgressBar> {
    let style = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "])
        .template("  {spinner:.cyan} {msg} {elapsed:.dim}")
        .ok()?;
    let pb = ProgressBar::new_spinner().with_style(style);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Some(pb)
}

impl ProgressReporter for TerminalReporter<'_> {
    fn step(&self, message: &str) {
        if self.silent {
            return;
        }
        match &self.spinner {
            Some(pb) => pb.set_message(message.to_string()),
            None => println!("  {} {message}", "→".style(self.ctx.styles.info)),
        }
    }

    fn success(&self, message: &str) {
        if !self.silent {
            self.line(format!("  {} {message}", "✓".style(self.ctx.styles.success)));
        }
    }

    fn warn(&self, message: &str) {
        if !self.silent {
            self.line(format!("  {} {message}", "!".style(self.ctx.styles.warning)));
        }
    }
}

impl Drop for TerminalReporter<'_> {
    fn drop(&mut self) {
        if let Some(pb) = &self.spinner
            && !pb.is_finished()
        {
            pb.finish_and_clear();
        }
    }
}
