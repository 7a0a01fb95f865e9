//! CLI subcommands

pub mod replay;
pub mod route;
pub mod status;
