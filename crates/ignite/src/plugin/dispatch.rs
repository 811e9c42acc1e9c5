//! Ordered hook dispatch

use super::Plugin;
use crate::runtime::{Group, Program, ProgramSpec};

/// Group-level events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupHook {
    Init,
    Start,
    Started,
    Stop,
    Stopped,
}

impl GroupHook {
    pub fn name(self) -> &'static str {
        match self {
            GroupHook::Init => "on_group_init",
            GroupHook::Start => "on_group_start",
            GroupHook::Started => "on_group_started",
            GroupHook::Stop => "on_group_stop",
            GroupHook::Stopped => "on_group_stopped",
        }
    }
}

/// Program-level events fired around start and stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramHook {
    Start,
    Started,
    Stop,
    Stopped,
}

impl ProgramHook {
    pub fn name(self) -> &'static str {
        match self {
            ProgramHook::Start => "on_program_start",
            ProgramHook::Started => "on_program_started",
            ProgramHook::Stop => "on_program_stop",
            ProgramHook::Stopped => "on_program_stopped",
        }
    }
}

/// The plugins of one group, in registration order
#[derive(Default)]
pub struct HookDispatcher {
    plugins: Vec<Box<dyn Plugin>>,
}

impl HookDispatcher {
    pub fn new(plugins: Vec<Box<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    /// Append a plugin; it runs after all plugins registered before it
    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub async fn program_init(&self, spec: &mut ProgramSpec) {
        for plugin in &self.plugins {
            log::trace!("on_program_init -> {} ({})", plugin.name(), spec.name);
            plugin.on_program_init(spec).await;
        }
    }

    pub async fn group(&self, hook: GroupHook, group: &mut Group) {
        for plugin in &self.plugins {
            log::trace!("{} -> {} ({})", hook.name(), plugin.name(), group.name());
            match hook {
                GroupHook::Init => plugin.on_group_init(group).await,
                GroupHook::Start => plugin.on_group_start(group).await,
                GroupHook::Started => plugin.on_group_started(group).await,
                GroupHook::Stop => plugin.on_group_stop(group).await,
                GroupHook::Stopped => plugin.on_group_stopped(group).await,
            }
        }
    }

    pub async fn program(&self, hook: ProgramHook, program: &mut Program) {
        for plugin in &self.plugins {
            log::trace!("{} -> {} ({})", hook.name(), plugin.name(), program.name());
            match hook {
                ProgramHook::Start => plugin.on_program_start(program).await,
                ProgramHook::Started => plugin.on_program_started(program).await,
                ProgramHook::Stop => plugin.on_program_stop(program).await,
                ProgramHook::Stopped => plugin.on_program_stopped(program).await,
            }
        }
    }
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
