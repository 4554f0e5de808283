//! Console reporter
//!
//! Progress goes to stdout; failures and warnings go to stderr so that
//! `pybi probe` output stays pipeable.

use crossterm::style::Stylize;
use pybi_core::Reporter;

use super::theme::{Theme, format_size};

/// [`Reporter`] that prints straight to the terminal.
#[derive(Debug, Clone, Default)]
pub struct ConsoleReporter {
    theme: Theme,
    quiet: bool,
}

impl ConsoleReporter {
    /// `quiet` hides sections and informational lines.
    pub fn new(quiet: bool) -> Self {
        Self {
            theme: Theme::default(),
            quiet,
        }
    }

    /// Log a success message.
    pub fn success(&self, msg: &str) {
        println!(
            "{} {msg}",
            self.theme.icons.success.with(self.theme.colors.success)
        );
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        eprintln!(
            "{} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            msg.with(self.theme.colors.error)
        );
    }

    /// Print an indented detail line.
    pub fn detail(&self, msg: &str) {
        if !self.quiet {
            println!("    {}", msg.with(self.theme.colors.secondary));
        }
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        if !self.quiet {
            println!("{}", title.with(self.theme.colors.header).bold());
        }
    }

    fn building(&self, tree: &str) {
        if !self.quiet {
            println!(
                "{} {}",
                self.theme.icons.active.with(self.theme.colors.active),
                tree
            );
        }
    }

    fn done(&self, archive: &str, detail: &str, size: Option<u64>) {
        let size = size.map(format_size).unwrap_or_default();
        println!(
            "{} {} {} {}",
            self.theme.icons.success.with(self.theme.colors.success),
            archive.with(self.theme.colors.archive).bold(),
            size.with(self.theme.colors.secondary),
            detail.with(self.theme.colors.secondary)
        );
    }

    fn skipped(&self, archive: &str) {
        println!(
            "{} {} {}",
            self.theme.icons.skipped.with(self.theme.colors.secondary),
            archive.with(self.theme.colors.archive),
            "already built".with(self.theme.colors.secondary)
        );
    }

    fn failed(&self, tree: &str, kind: &str, reason: &str) {
        eprintln!(
            "{} {} {} {}",
            self.theme.icons.error.with(self.theme.colors.error),
            tree,
            format!("[{kind}]").with(self.theme.colors.secondary),
            reason.with(self.theme.colors.error)
        );
    }

    fn info(&self, msg: &str) {
        if !self.quiet {
            println!(
                "{} {msg}",
                self.theme.icons.info.with(self.theme.colors.secondary)
            );
        }
    }

    fn warning(&self, msg: &str) {
        eprintln!(
            "{} {}",
            self.theme.icons.warning.with(self.theme.colors.warning),
            msg.with(self.theme.colors.warning)
        );
    }

    fn summary(&self, built: usize, skipped: usize, failed: usize, elapsed_secs: f64) {
        let line = format!("{built} built, {skipped} skipped, {failed} failed in {elapsed_secs:.1}s");
        let color = if failed == 0 {
            self.theme.colors.success
        } else {
            self.theme.colors.error
        };
        println!();
        println!("{}", line.with(color));
    }
}
