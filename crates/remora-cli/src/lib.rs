//! Crate implementing the CLI commands.

mod cli;
mod config;
mod elf;
mod run;

pub use self::cli::{CliAction, CliOpts};
pub use self::config::SessionConfig;
pub use self::elf::ElfImage;
pub use self::run::{evaluate_analyze, evaluate_attach, evaluate_ps, evaluate_run};
