use serde::Deserialize;

use crate::route::TraceCommand;

/// Contents of the optional YAML configuration file.
///
/// Every field is optional; values given on the command line win.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// User agent sent with the connection probe request.
    pub user_agent: Option<String>,

    /// Path of the report file.
    pub output: Option<String>,

    /// Replaces the platform route tracing command. The endpoint host is
    /// appended after `args`.
    pub traceroute: Option<TraceCommand>,
}

#[cfg(test)]
pub mod test {
    use super::*;

    #[test]
    fn test_file_config_deserialization() {
        let yaml = r#"
                    user_agent: probe/1.0
                    output: /tmp/trace.txt
                    traceroute:
                        program: traceroute
                        args: ["-n", "-w", "2"]
                    "#;

        let config: FileConfig = serde_yaml::from_str(yaml).expect("Invalid YAML");
        assert_eq!(config.user_agent.as_deref(), Some("probe/1.0"));
        assert_eq!(config.output.as_deref(), Some("/tmp/trace.txt"));
        let traceroute = config.traceroute.expect("traceroute section not found");
        assert_eq!(traceroute.program, "traceroute");
        assert_eq!(traceroute.args, vec!["-n", "-w", "2"]);
    }

    #[test]
    fn test_traceroute_args_default_to_empty() {
        let yaml = r#"
                    traceroute:
                        program: mtr
                    "#;

        let config: FileConfig = serde_yaml::from_str(yaml).expect("Invalid YAML");
        let traceroute = config.traceroute.expect("traceroute section not found");
        assert_eq!(traceroute.program, "mtr");
        assert!(traceroute.args.is_empty());
        assert_eq!(config.user_agent, None);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result: Result<FileConfig, _> = serde_yaml::from_str("polling_interval_seconds: 10");
        assert!(result.is_err());
    }
}
