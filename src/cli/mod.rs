// CLI module - a tee replacement with buffered, rotating file logging

mod output;

use crate::config::LoggerConfig;
use crate::error::{Result, RoteeError};
use crate::logs::{ErrorPolicy, ExitHooks, LogCoordinator, StreamKind, StreamRegistry};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

/// rotee - duplicate standard input to the terminal and to rotating log files
#[derive(Parser)]
#[command(name = "rotee")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Destination log folder (defaults to ./logs, or LOG_FOLDER_NAME)
    folder: Option<PathBuf>,

    /// Continue the day's newest log file instead of starting a fresh one
    #[arg(short, long)]
    append: bool,

    /// Merge stdout and stderr into a single log file
    #[arg(short, long)]
    merge: bool,

    /// Ignore Ctrl+C (SIGINT)
    #[arg(short, long)]
    ignore_interrupts: bool,

    /// Maximum log file size in MB before rotation
    #[arg(short = 's', long)]
    max_size: Option<u64>,

    /// Treat a broken downstream pipe as fatal instead of a warning
    #[arg(long)]
    exit_on_broken_pipe: bool,

    /// Load settings from a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();

        let cli = Cli::parse();
        cli.execute()
    }

    /// Execute the tee loop with logging installed
    fn execute(&self) -> Result<()> {
        let config = self.build_config()?;

        let registry = StreamRegistry::global();
        let hooks = ExitHooks::global();
        let coordinator = Arc::new(LogCoordinator::with_registry(
            config,
            Arc::clone(&registry),
            Arc::clone(&hooks),
        ));
        coordinator.start()?;
        output::print_started(coordinator.resolved_folder().as_deref());

        self.install_interrupt_handler(&hooks)?;

        // tee loop: every stdin line goes to both terminal and log
        let pump_result = pump_stdin(&registry);
        let stop_result = coordinator.stop();
        if let Err(ref e) = stop_result {
            output::print_error(&e.to_string());
        }
        pump_result.and(stop_result)
    }

    /// Assemble the logger configuration from file, environment, and flags
    ///
    /// Precedence: command-line flags over environment variables over the
    /// configuration file over built-in defaults.
    fn build_config(&self) -> Result<LoggerConfig> {
        let mut config = match &self.config {
            Some(path) => LoggerConfig::from_file(path)?,
            None => LoggerConfig::default(),
        };
        config.apply_env();

        if let Some(folder) = &self.folder {
            config.base_folder = Some(folder.clone());
        }
        config.merge_streams = self.merge;
        // Like tee, the CLI overwrites unless -a is given
        config.override_existing = !self.append;
        if let Some(mb) = self.max_size {
            config.set_max_size_mb(mb);
        }
        if self.exit_on_broken_pipe {
            config.error_policy = ErrorPolicy::WarnAndExit;
        }
        // The CLI exists to log; the enable flag only gates library use
        config.write_to_file = true;

        config.validate()?;
        Ok(config)
    }

    /// Install a Ctrl-C handler that flushes before terminating
    fn install_interrupt_handler(&self, hooks: &Arc<ExitHooks>) -> Result<()> {
        let hooks = Arc::clone(hooks);
        let ignore = self.ignore_interrupts;
        ctrlc::set_handler(move || {
            if ignore {
                return;
            }
            hooks.run();
            std::process::exit(130);
        })
        .map_err(|e| RoteeError::Other(format!("Failed to install signal handler: {}", e)))
    }
}

/// Read stdin to EOF, mirroring each line through the stream registry
fn pump_stdin(registry: &Arc<StreamRegistry>) -> Result<()> {
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut line = String::new();
    loop {
        line.clear();
        let read = input.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        registry.write(StreamKind::Stdout, &line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MB;

    #[test]
    fn test_parse_tee_flags() {
        let cli =
            Cli::try_parse_from(["rotee", "/tmp/dest", "-a", "-m", "-s", "5"]).unwrap();
        assert_eq!(cli.folder, Some(PathBuf::from("/tmp/dest")));
        assert!(cli.append);
        assert!(cli.merge);
        assert!(!cli.ignore_interrupts);
        assert_eq!(cli.max_size, Some(5));
    }

    #[test]
    fn test_build_config_applies_flags() {
        let cli =
            Cli::try_parse_from(["rotee", "/tmp/dest", "-m", "-s", "5"]).unwrap();
        let config = cli.build_config().unwrap();

        assert_eq!(config.base_folder, Some(PathBuf::from("/tmp/dest")));
        assert!(config.merge_streams);
        // No -a means overwrite mode, like tee
        assert!(config.override_existing);
        // -s takes a megabyte count
        assert_eq!(config.max_size_bytes, 5 * MB);
        assert!(config.write_to_file);
    }

    #[test]
    fn test_append_flag_disables_overwrite() {
        let cli = Cli::try_parse_from(["rotee", "-a"]).unwrap();
        let config = cli.build_config().unwrap();
        assert!(!config.override_existing);
        assert!(!config.merge_streams);
    }
}
