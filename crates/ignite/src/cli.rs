//! Command-line interface for ignite

use argh::FromArgs;
use std::time::Duration;

/// Run the programs of a launch file and keep them alive
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// path to the launch file
    #[argh(positional)]
    pub launch_file: String,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,

    /// disable colored output
    #[argh(switch)]
    pub no_color: bool,

    /// seconds a program gets to exit after SIGTERM before it is killed (default: 5)
    #[argh(option, from_str_fn(parse_seconds))]
    pub stop_timeout: Option<Duration>,

    /// do not wrap console programs in `stdbuf -oL`
    #[argh(switch)]
    pub no_line_buffering: bool,

    /// show launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// validate launch file and exit
    #[argh(switch)]
    pub validate: bool,
}

/// Parse a non-negative number of seconds
fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid duration '{}'. Expected seconds, e.g. 2.5", s))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("Invalid duration '{}'. Must be a non-negative number", s))
}

impl LaunchArgs {
    /// Normalized log filter
    pub fn log_filter(&self) -> &str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}
