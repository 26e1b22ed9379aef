use std::path::PathBuf;

/// The remora debugger.
#[derive(clap::Parser)]
pub struct CliOpts {
    /// The command to run.
    #[clap(subcommand)]
    pub action: CliAction,
}

impl CliOpts {
    pub fn parse_from_cmdline() -> Self {
        <Self as clap::Parser>::parse()
    }
}

/// The command to run.
#[derive(clap::Subcommand)]
pub enum CliAction {
    /// Command to spawn a program under the debugger and run it to
    /// completion.
    Run {
        /// Session configuration (KDL format).
        ///
        /// If it ends with `.kdl`, it is treated as a path to a
        /// configuration file for the session. Otherwise it is directly
        /// parsed as inline KDL-formatted configuration.
        #[clap(short, long, value_name = "CONTENT/PATH")]
        config: Option<String>,

        /// Analyze the executable region at the first stop and print
        /// the recovered function map.
        #[clap(long)]
        analyze: bool,

        /// Name of the program to run.
        program: PathBuf,

        /// Program's arguments.
        args: Vec<String>,
    },

    /// Command to attach to a running process, report its state, and
    /// detach again.
    Attach {
        /// Session configuration (KDL format), path or inline.
        #[clap(short, long, value_name = "CONTENT/PATH")]
        config: Option<String>,

        /// ID of the process to attach to.
        pid: i32,
    },

    /// Command to attach to a running process and analyze the mapped
    /// region containing the given address.
    Analyze {
        /// Session configuration (KDL format), path or inline.
        #[clap(short, long, value_name = "CONTENT/PATH")]
        config: Option<String>,

        /// ID of the process to analyze.
        #[clap(long)]
        pid: i32,

        /// Address inside the region to analyze (`0x`-prefixed hex, or
        /// decimal).
        #[clap(long, value_parser = parse_address)]
        addr: u64,
    },

    /// Command to list the processes visible on this host.
    Ps,
}

fn parse_address(literal: &str) -> Result<u64, String> {
    let parsed = match literal.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => literal.parse(),
    };

    parsed.map_err(|_| format!("invalid address: {literal}"))
}

#[cfg(test)]
mod tests {
    use super::parse_address;

    #[test]
    fn parse_address_accepts_hex_and_decimal() {
        assert_eq!(parse_address("0x1f40"), Ok(0x1f40));
        assert_eq!(parse_address("8000"), Ok(8000));
        assert!(parse_address("0xzz").is_err());
        assert!(parse_address("nope").is_err());
    }
}
