//! CLI subcommands.

pub mod chat;
pub mod config_cmd;
