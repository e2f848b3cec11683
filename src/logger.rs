//! Logging utilities with colored output.
//!
//! This module provides:
//! - `log!` macro for formatted terminal output with colored prefixes
//! - `debug!` macro, shown only when verbose mode is enabled
//! - `StatusLine` for the scenario runner's per-event status lines
//!
//! # Example
//!
//! ```ignore
//! log!("sched"; "flushed {} tasks", count);
//! debug!("commit"; "published {} for {}", task, root);
//! ```

use owo_colors::OwoColorize;
use parking_lot::{Mutex, const_mutex};
use std::{
    io::{Write, stdout},
    sync::atomic::{AtomicBool, Ordering},
};

/// Global verbose flag (set by --verbose CLI argument)
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Serializes lines written from different threads (settler threads log too).
static OUTPUT: Mutex<()> = const_mutex(());

/// Set verbose mode globally
pub fn set_verbose(v: bool) {
    VERBOSE.store(v, Ordering::SeqCst);
}

/// Check if verbose mode is enabled
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

// ============================================================================
// Log Macro
// ============================================================================

/// Log a message with a colored module prefix
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Log a debug message (only shown when --verbose is enabled)
///
/// # Usage
/// ```ignore
/// debug!("module"; "debug info: {}", value);
/// ```
#[macro_export]
macro_rules! debug {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::is_verbose() {
            $crate::logger::log($module, &format!($($arg)*))
        }
    }};
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Log a message with a colored module prefix
#[inline]
pub fn log(module: &str, message: &str) {
    let module_lower = module.to_ascii_lowercase();
    let prefix = colorize_prefix(module, &module_lower);

    let _guard = OUTPUT.lock();
    let mut stdout = stdout().lock();
    writeln!(stdout, "{prefix} {message}").ok();
    stdout.flush().ok();
}

/// Apply color to a module prefix based on module type
#[inline]
fn colorize_prefix(module: &str, module_lower: &str) -> String {
    let prefix = format!("[{module}]");
    match module_lower {
        "sched" | "queue" => prefix.bright_blue().bold().to_string(),
        "commit" => prefix.bright_green().bold().to_string(),
        "suspend" | "boundary" => prefix.bright_magenta().bold().to_string(),
        "error" => prefix.bright_red().bold().to_string(),
        _ => prefix.bright_yellow().bold().to_string(),
    }
}

// ============================================================================
// Status Line
// ============================================================================

/// Status display for the scenario runner.
///
/// Every line carries the virtual timestamp it describes instead of wall
/// time, so runs are reproducible line for line.
///
/// ```ignore
/// let mut status = StatusLine::new();
/// status.success(now, "commit t1 (normal): [A, B]");
/// status.pending(now, "t1 blocked on 1 dependency");
/// status.error(now, "t2 failed", "network down");
/// ```
#[derive(Debug, Default)]
pub struct StatusLine {
    lines: usize,
}

impl StatusLine {
    pub const fn new() -> Self {
        Self { lines: 0 }
    }

    /// Display success message (✓ prefix, green).
    pub fn success(&mut self, at: impl std::fmt::Display, message: &str) {
        self.display(at, format!("{}", "✓".green()), message);
    }

    /// Display a waiting message (… prefix, dimmed).
    pub fn pending(&mut self, at: impl std::fmt::Display, message: &str) {
        self.display(at, format!("{}", "…".dimmed()), &format!("{}", message.dimmed()));
    }

    /// Display error message (✗ prefix, red) with optional detail.
    pub fn error(&mut self, at: impl std::fmt::Display, summary: &str, detail: &str) {
        let message = if detail.is_empty() {
            summary.to_string()
        } else {
            format!("{summary}\n{detail}")
        };
        self.display(at, format!("{}", "✗".red()), &message);
    }

    /// Number of lines printed so far.
    pub fn lines(&self) -> usize {
        self.lines
    }

    fn display(&mut self, at: impl std::fmt::Display, symbol: String, message: &str) {
        let line = format_status(&at.to_string(), &symbol, message);

        let _guard = OUTPUT.lock();
        let mut stdout = stdout().lock();
        writeln!(stdout, "{line}").ok();
        stdout.flush().ok();

        self.lines += message.matches('\n').count() + 1;
    }
}

fn format_status(at: &str, symbol: &str, message: &str) -> String {
    let timestamp = format!("[{at}]").dimmed().to_string();
    if symbol.is_empty() {
        format!("{timestamp} {message}")
    } else {
        format!("{timestamp} {symbol} {message}")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_new() {
        let status = StatusLine::new();
        assert_eq!(status.lines(), 0);
    }

    #[test]
    fn test_status_line_counts_multiline() {
        let mut status = StatusLine::new();
        status.error("@10", "t1 failed", "render error\n  at node `profile`");
        assert_eq!(status.lines(), 3);
        status.success("@12", "commit t2");
        assert_eq!(status.lines(), 4);
    }

    #[test]
    fn test_format_status_contains_parts() {
        let line = format_status("@5", "", "idle");
        assert!(line.contains("@5"));
        assert!(line.ends_with("idle"));
    }

    #[test]
    fn test_verbose_toggle() {
        set_verbose(true);
        assert!(is_verbose());
        set_verbose(false);
        assert!(!is_verbose());
    }
}
