//! Launch file configuration parsing and variable expansion

mod expand;
mod launch_file;

pub use expand::*;
pub use launch_file::*;
