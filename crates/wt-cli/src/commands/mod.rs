//! CLI subcommand implementations.

pub mod dump;
pub mod init;
pub mod prune;
pub mod reset;
pub mod stats;
pub mod track;
