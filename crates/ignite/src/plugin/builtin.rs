//! Plugins shipped with ignite

use super::Plugin;
use crate::runtime::{Program, ProgramSpec};
use async_trait::async_trait;

/// Runs programs marked `debug: true` under gdb and prints a backtrace on crash
#[derive(Debug, Default)]
pub struct DebugPlugin;

impl DebugPlugin {
    pub const NAME: &'static str = "debug";
    const PREFIX: &'static str = "gdb --batch --quiet -ex run -ex bt -ex quit --args";
}

#[async_trait]
impl Plugin for DebugPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn on_program_init(&self, spec: &mut ProgramSpec) {
        if spec.option_flag("debug") {
            spec.command = format!("{} {}", Self::PREFIX, spec.command);
        }
    }

    async fn on_program_start(&self, program: &mut Program) {
        if program.spec().option_flag("debug") {
            program.announce(&format!("Entering debug mode: {}", program.spec().command));
        }
    }
}

/// Holds the group back for `wait` seconds after starting or stopping a program
#[derive(Debug, Default)]
pub struct WaitPlugin;

impl WaitPlugin {
    pub const NAME: &'static str = "wait";

    async fn wait(program: &Program) {
        if let Some(delay) = program.spec().option_duration("wait") {
            if !delay.is_zero() {
                log::debug!("[{}] Waiting {:?}", program.name(), delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl Plugin for WaitPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn on_program_started(&self, program: &mut Program) {
        Self::wait(program).await;
    }

    async fn on_program_stopped(&self, program: &mut Program) {
        Self::wait(program).await;
    }
}

/// Prints each program's working directory and environment overlay at start
#[derive(Debug, Default)]
pub struct EnvironmentPlugin;

impl EnvironmentPlugin {
    pub const NAME: &'static str = "environment";
}

#[async_trait]
impl Plugin for EnvironmentPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn on_program_start(&self, program: &mut Program) {
        if let Some(directory) = &program.spec().directory {
            program.announce(&format!("Directory: {}", directory));
        }

        let environment = program
            .spec()
            .environment
            .iter()
            .map(|(key, value)| format!("\"{}={}\"", key, value))
            .collect::<Vec<_>>()
            .join(" ");
        program.announce(&format!("Environment: {}", environment));
    }
}
