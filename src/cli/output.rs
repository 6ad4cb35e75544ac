// Output formatting and display for CLI

use colored::*;
use std::path::Path;

/// Announce the resolved log destination on stderr
///
/// stdout stays clean: in a pipeline it carries only the mirrored input.
pub fn print_started(folder: Option<&Path>) {
    match folder {
        Some(folder) => eprintln!(
            "{} {}",
            "✓ Logging to".green().bold(),
            folder.display().to_string().cyan()
        ),
        None => eprintln!("{}", "✓ Logging started".green().bold()),
    }
}

/// Print an error message to stderr
pub fn print_error(message: &str) {
    eprintln!("{}", format!("✗ {}", message).red().bold());
}
