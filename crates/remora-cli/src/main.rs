#![allow(missing_docs)]
#![allow(clippy::print_stderr)]

use remora_cli::{CliAction, CliOpts};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("REMORA_LOG")
                .from_env_lossy(),
        )
        .init();

    let res = match cli.action {
        CliAction::Run {
            config,
            analyze,
            program,
            args,
        } => remora_cli::evaluate_run(config, program, args, analyze).map(Some),
        CliAction::Attach { config, pid } => {
            remora_cli::evaluate_attach(config, pid).map(|_| None)
        }
        CliAction::Analyze { config, pid, addr } => {
            remora_cli::evaluate_analyze(config, pid, addr).map(|_| None)
        }
        CliAction::Ps => remora_cli::evaluate_ps().map(|_| None),
    };

    match res {
        Ok(Some(exit_code)) => std::process::exit(exit_code),
        Ok(None) => (),
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}
