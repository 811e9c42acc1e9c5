//! Lifecycle hooks and the plugins that implement them

mod builtin;
mod dispatch;
mod registry;

pub use builtin::*;
pub use dispatch::*;
pub use registry::*;

use crate::runtime::{Group, Program, ProgramSpec};
use async_trait::async_trait;

/// Observer of group and program lifecycle events.
///
/// Every hook defaults to a no-op; implement only the ones you need. Hooks run
/// one at a time, in plugin registration order, and the group waits for each
/// before moving on, so a hook may block the sequence on purpose.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// A program entry was resolved; its `ProgramSpec` may still be rewritten
    async fn on_program_init(&self, _spec: &mut ProgramSpec) {}

    /// All members of the group have been built
    async fn on_group_init(&self, _group: &mut Group) {}

    async fn on_group_start(&self, _group: &mut Group) {}

    async fn on_program_start(&self, _program: &mut Program) {}

    async fn on_program_started(&self, _program: &mut Program) {}

    async fn on_group_started(&self, _group: &mut Group) {}

    async fn on_group_stop(&self, _group: &mut Group) {}

    async fn on_program_stop(&self, _program: &mut Program) {}

    async fn on_program_stopped(&self, _program: &mut Program) {}

    async fn on_group_stopped(&self, _group: &mut Group) {}
}
