//! Command-line front end for Data Studio sessions
//!
//! The binary is a thin wrapper: `common` resolves the studio home, user and
//! configuration, and `commands` maps each subcommand onto one `StudioApi`
//! call.

pub mod commands;
pub mod common;
