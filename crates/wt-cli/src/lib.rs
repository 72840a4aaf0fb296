//! Work-time tracker CLI library.
//!
//! This crate provides the CLI interface for the work-time tracker.

mod app;
mod cli;
pub mod commands;
mod config;

pub use app::App;
pub use cli::{Cli, Commands, ProjectAction, SessionArgs};
pub use config::Config;
