//! CLI subcommand implementations.

pub mod daemon;
pub mod project;
pub mod reap;
pub mod status;
pub mod timer;
mod util;
