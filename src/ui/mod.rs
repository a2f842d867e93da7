pub mod formatter;
pub mod progress;

use anyhow::Result;
use colored::*;

pub use formatter::OutputFormatter;
pub use progress::ProgressIndicator;

/// Terminal output for the CLI: status lines, progress and formatted results.
pub struct UIManager {
    pub formatter: OutputFormatter,
    pub progress: ProgressIndicator,
    colors_enabled: bool,
}

impl UIManager {
    pub fn new(colors_enabled: bool) -> Result<Self> {
        if !colors_enabled || !console::Term::stdout().features().colors_supported() {
            colored::control::set_override(false);
        }
        Ok(Self {
            formatter: OutputFormatter::new(colors_enabled),
            progress: ProgressIndicator::new(colors_enabled),
            colors_enabled,
        })
    }

    pub fn colors_enabled(&self) -> bool {
        self.colors_enabled
    }

    pub fn print_header(&self, title: &str) {
        println!();
        println!("{}", title.bold().cyan());
        println!("{}", "─".repeat(title.chars().count().max(20)).dimmed());
    }

    pub fn print_success(&self, message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    pub fn print_info(&self, message: &str) {
        println!("{} {}", "•".blue(), message);
    }

    pub fn print_warning(&self, message: &str) {
        eprintln!("{} {}", "!".yellow().bold(), message.yellow());
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message.red());
    }

    pub fn print_error_with_suggestions(&self, message: &str, suggestion: Option<&str>) {
        self.print_error(message);
        if let Some(suggestion) = suggestion {
            eprintln!("  {} {}", "hint:".bold(), suggestion);
        }
    }
}
