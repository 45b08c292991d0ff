//! Command-line interface for hostwatchd.
use std::path::PathBuf;

use clap::Parser;

/// Command-line interface for hostwatchd: entry-point flags only, not part
/// of the daemon's core. Everything else is the daemon singleton's concern.
#[derive(Parser, Debug)]
#[command(name = "hostwatchd", version, author)]
#[command(about = "Host telemetry and alerting daemon", long_about = None)]
pub struct Cli {
    /// Path to the configuration file. Defaults to `hostwatchd.yaml` in the
    /// current directory, falling back to the runtime's configuration
    /// directory (`~/.config/hostwatchd` or `/etc/hostwatchd`).
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Raise the log level to `debug` for this invocation, overriding the
    /// configured level. Has no effect if `RUST_LOG` is set.
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in the foreground instead of detaching from the controlling
    /// terminal. The daemon itself never forks; this flag only controls
    /// whether startup logging is also mirrored to stdout.
    #[arg(long)]
    pub foreground: bool,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_config_flag() {
        let cli = Cli::parse_from(["hostwatchd", "--config", "/tmp/hostwatchd.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/hostwatchd.yaml")));
        assert!(!cli.verbose);
        assert!(!cli.foreground);
    }

    #[test]
    fn defaults_to_no_config_override() {
        let cli = Cli::parse_from(["hostwatchd"]);
        assert!(cli.config.is_none());
    }

    #[test]
    fn parses_verbose_and_foreground_flags() {
        let cli = Cli::parse_from(["hostwatchd", "--verbose", "--foreground"]);
        assert!(cli.verbose);
        assert!(cli.foreground);
    }
}
