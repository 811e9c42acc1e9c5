//! Runtime components for process supervision

pub mod dependency;
pub mod group;
pub mod output;
pub mod privilege;
pub mod process;

pub use dependency::*;
pub use group::*;
pub use output::*;
pub use privilege::*;
pub use process::*;
