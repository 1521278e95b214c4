//! Output formatting for benchmark results.
//!
//! Provides multiple output formats:
//! - Clean: Human-readable table format with colors
//! - Json: NDJSON format for machine parsing
//! - Verbose: Tracing-style output
//! - Quiet: Minimal single-line output

mod clean;
pub mod format;
mod json;
mod quiet;
mod verbose;

pub use clean::CleanFormatter;
pub use json::JsonFormatter;
pub use quiet::QuietFormatter;
pub use verbose::VerboseFormatter;

use crate::config::Config;
use crate::results::Report;
use crate::worker::Phase;

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Clean table format with colors (default).
    #[default]
    Clean,
    /// NDJSON format for machine parsing.
    Json,
    /// Verbose tracing-style output.
    Verbose,
    /// Minimal single-line output.
    Quiet,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clean" => Ok(OutputFormat::Clean),
            "json" => Ok(OutputFormat::Json),
            "verbose" => Ok(OutputFormat::Verbose),
            "quiet" => Ok(OutputFormat::Quiet),
            _ => Err(format!(
                "invalid format '{}', expected: clean, json, verbose, quiet",
                s
            )),
        }
    }
}

/// Color mode selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ColorMode {
    /// Auto-detect based on TTY and NO_COLOR env var (default).
    #[default]
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

impl std::str::FromStr for ColorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ColorMode::Auto),
            "always" => Ok(ColorMode::Always),
            "never" => Ok(ColorMode::Never),
            _ => Err(format!(
                "invalid color mode '{}', expected: auto, always, never",
                s
            )),
        }
    }
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Connect => "connect",
        Phase::Subscribe => "subscribe",
        Phase::Publish => "publish",
        Phase::Drain => "drain",
        Phase::Stop => "stop",
    }
}

/// Trait for output formatters.
pub trait OutputFormatter: Send + Sync {
    /// Print the configuration summary at startup.
    fn print_config(&self, config: &Config);

    /// Print a phase transition with a short description.
    fn print_phase(&self, phase: Phase, detail: &str);

    /// Print the final report.
    fn print_results(&self, report: &Report);

    /// Print a run that failed before producing a report.
    fn print_failure(&self, error: &str) {
        eprintln!("FAILED: {}", error);
    }
}

/// Create a formatter based on the output format and color mode.
pub fn create_formatter(format: OutputFormat, color: ColorMode) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Clean => Box::new(CleanFormatter::new(color)),
        OutputFormat::Json => Box::new(JsonFormatter::new()),
        OutputFormat::Verbose => Box::new(VerboseFormatter::new()),
        OutputFormat::Quiet => Box::new(QuietFormatter::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_format_and_color() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("quiet".parse::<OutputFormat>().unwrap(), OutputFormat::Quiet);
        assert!("yaml".parse::<OutputFormat>().is_err());
        assert_eq!("never".parse::<ColorMode>().unwrap(), ColorMode::Never);
        assert!("sometimes".parse::<ColorMode>().is_err());
    }

    #[test]
    fn phase_names() {
        assert_eq!(phase_name(Phase::Publish), "publish");
        assert_eq!(phase_name(Phase::Drain), "drain");
    }
}
