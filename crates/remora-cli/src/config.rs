/// Configuration of a debugging session.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct SessionConfig {
    /// Timeout of a single event wait, in milliseconds.
    #[knus(child, default = 100, unwrap(argument))]
    pub wait_timeout_ms: u64,

    /// Cap on function-walker passes per analysis.
    #[knus(child, default = 64, unwrap(argument))]
    pub max_walk_passes: usize,

    /// Path of the persisted set of user-specified function starts.
    #[knus(child, unwrap(argument))]
    pub specified_functions: Option<String>,

    /// Path of the tty the debuggee's stdio is redirected to.
    #[knus(child, unwrap(argument))]
    pub tty: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 100,
            max_walk_passes: 64,
            specified_functions: None,
            tty: None,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::SessionConfig;

    #[test]
    fn parse_from_kdl_defaults() {
        let config = knus::parse::<SessionConfig>("<content>", "")
            .map_err(miette::Report::new)
            .expect("parse kdl");

        assert_eq!(config, SessionConfig::default());

        let config = knus::parse::<SessionConfig>(
            "<content>",
            indoc::indoc! {r#"
                wait-timeout-ms 50
            "#},
        )
        .map_err(miette::Report::new)
        .expect("parse kdl");

        assert_eq!(
            config,
            SessionConfig {
                wait_timeout_ms: 50,
                ..SessionConfig::default()
            }
        );
    }

    #[test]
    fn parse_from_kdl_full() {
        let config = knus::parse::<SessionConfig>(
            "<content>",
            indoc::indoc! {r#"
                wait-timeout-ms 25
                max-walk-passes 8
                specified-functions "/tmp/specified.txt"
                tty "/dev/pts/3"
            "#},
        )
        .map_err(miette::Report::new)
        .expect("parse kdl");

        assert_eq!(
            config,
            SessionConfig {
                wait_timeout_ms: 25,
                max_walk_passes: 8,
                specified_functions: Some("/tmp/specified.txt".to_owned()),
                tty: Some("/dev/pts/3".to_owned()),
            }
        );
    }
}
