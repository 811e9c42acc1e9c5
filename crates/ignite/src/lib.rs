//! Ignite
//!
//! Runs a group of programs described by a YAML launch file, keeps them alive
//! and tears them down again.
//!
//! # Overview
//!
//! - Programs start in dependency order and stop in reverse order
//! - Each program is supervised on its own: restarts, log file, privilege drop
//! - Output of all programs is merged on the console, one tagged line at a time
//! - Stopping sends SIGTERM first and SIGKILL once the stop window has passed
//! - Plugins observe lifecycle events and may rewrite program definitions
//! - Launch files can include other launch files as nested groups
//!
//! # Example Launch File
//!
//! ```yaml
//! title: Demo stack
//! log: /var/log/demo
//! environment:
//!   ROOT: /opt/demo
//! plugins:
//!   - wait
//!
//! programs:
//!   database:
//!     command: "postgres -D $ROOT/data"
//!     required: true
//!     wait: 2
//!
//!   api:
//!     command: "$ROOT/bin/api --port 8080"
//!     directory: "$ROOT"
//!     restart: 3
//!     depends:
//!       - database
//!
//!   sensors:
//!     include: sensors.yaml
//!     depends:
//!       - api
//! ```

#[cfg(not(unix))]
compile_error!("ignite supervises POSIX processes and only builds on unix targets");

pub mod cli;
pub mod config;
pub mod plugin;
pub mod runtime;

pub use cli::LaunchArgs;
pub use config::{expand, mergevars, Environment, LaunchFile, LaunchFileError, ProgramConfig};
pub use plugin::{HookDispatcher, Plugin, PluginError, PluginRegistry};
pub use runtime::{
    DependencyError, DependencyGraph, ExitOutcome, Group, GroupError, GroupOptions, LaunchPlan,
    Output, Program, ProgramSpec, ProgramStatus, RestartPolicy,
};
