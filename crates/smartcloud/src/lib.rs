//! SMARTCLOUD command-line tool
//!
//! Configuration loading, logging setup and the CLI subcommands built on
//! `smartcloud_runtime`.

pub use smartcloud_protocol;
pub use smartcloud_runtime;

pub mod commands;
pub mod config;
pub mod logging;
