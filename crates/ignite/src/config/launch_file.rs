//! Launch file YAML schema definitions

use crate::config::expand::Environment;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root launch file: a group of programs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchFile {
    /// Human-readable title (defaults to the file name)
    #[serde(default)]
    pub title: Option<String>,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Directory receiving `<program>.log` files
    #[serde(default)]
    pub log: Option<String>,

    /// Default user for all programs
    #[serde(default)]
    pub user: Option<String>,

    /// Default group(s) for all programs
    #[serde(default)]
    pub group: Option<GroupNames>,

    /// Environment variables (applied to all programs)
    #[serde(default)]
    pub environment: Environment,

    /// Plugin names, dispatched in this order
    #[serde(default)]
    pub plugins: Vec<String>,

    /// Program definitions (ordered map for deterministic launch order)
    #[serde(default)]
    pub programs: IndexMap<String, ProgramConfig>,
}

/// Single group name or an ordered list (first is primary, rest supplementary)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupNames {
    Single(String),
    List(Vec<String>),
}

impl GroupNames {
    /// All names in declaration order
    pub fn names(&self) -> Vec<&str> {
        match self {
            GroupNames::Single(name) => vec![name.as_str()],
            GroupNames::List(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

/// Restart setting as written in YAML: `true`, `false` or an attempt count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RestartSetting {
    Flag(bool),
    Attempts(u32),
}

impl Default for RestartSetting {
    fn default() -> Self {
        RestartSetting::Flag(false)
    }
}

/// Program configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramConfig {
    /// Command line template (expanded at spawn time, never run through a shell)
    #[serde(default)]
    pub command: Option<String>,

    /// Working directory template
    #[serde(default)]
    pub directory: Option<String>,

    /// Environment variables specific to this program
    #[serde(default)]
    pub environment: Environment,

    /// Group health depends on this program staying alive
    #[serde(default)]
    pub required: bool,

    /// Restart policy
    #[serde(default)]
    pub restart: RestartSetting,

    /// User to run as
    #[serde(default)]
    pub user: Option<String>,

    /// Group(s) to run as
    #[serde(default)]
    pub group: Option<GroupNames>,

    /// Echo output to the console
    #[serde(default = "default_console")]
    pub console: bool,

    /// Programs that must be started first
    #[serde(default)]
    pub depends: Vec<String>,

    /// Log file path
    #[serde(default)]
    pub log: Option<String>,

    /// Append to the log file instead of truncating it
    #[serde(default)]
    pub logappend: bool,

    /// Seconds to wait before the first attempt
    #[serde(default)]
    pub delay: f64,

    /// Nested launch file, relative to this file
    #[serde(default)]
    pub include: Option<String>,

    /// Skip this entry entirely
    #[serde(default)]
    pub ignore: bool,

    /// Everything else, available to plugins
    #[serde(flatten)]
    pub options: IndexMap<String, serde_yaml::Value>,
}

fn default_console() -> bool {
    true
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            command: None,
            directory: None,
            environment: Environment::new(),
            required: false,
            restart: RestartSetting::default(),
            user: None,
            group: None,
            console: default_console(),
            depends: Vec::new(),
            log: None,
            logappend: false,
            delay: 0.0,
            include: None,
            ignore: false,
            options: IndexMap::new(),
        }
    }
}

impl LaunchFile {
    /// Load launch file from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LaunchFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| LaunchFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse launch file from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, LaunchFileError> {
        let launch_file: LaunchFile =
            serde_yaml::from_str(content).map_err(LaunchFileError::Parse)?;
        launch_file.validate()?;
        Ok(launch_file)
    }

    /// Validate the launch file structure.
    ///
    /// Dependency references are checked later by the dependency graph, once
    /// ignored entries have been removed.
    pub fn validate(&self) -> Result<(), LaunchFileError> {
        for (name, program) in &self.programs {
            if program.ignore {
                continue;
            }

            match (&program.command, &program.include) {
                (Some(_), None) | (None, Some(_)) => {}
                (Some(_), Some(_)) => {
                    return Err(LaunchFileError::Validation(format!(
                        "Program '{}': cannot specify both 'command' and 'include'",
                        name
                    )));
                }
                (None, None) => {
                    return Err(LaunchFileError::Validation(format!(
                        "Program '{}': must specify either 'command' or 'include'",
                        name
                    )));
                }
            }

            if !(program.delay >= 0.0) {
                return Err(LaunchFileError::Validation(format!(
                    "Program '{}': 'delay' must be a non-negative number of seconds",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Programs that take part in the group (entries marked `ignore` removed)
    pub fn active_programs(&self) -> impl Iterator<Item = (&String, &ProgramConfig)> {
        self.programs.iter().filter(|(_, program)| !program.ignore)
    }
}

/// Errors that can occur when loading a launch file
#[derive(Debug, thiserror::Error)]
pub enum LaunchFileError {
    #[error("Failed to read launch file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse launch file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
