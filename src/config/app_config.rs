use std::io;
use std::path::PathBuf;

use clap::Parser;
use http::HeaderValue;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use super::model::FileConfig;
use crate::endpoint::{Endpoint, EndpointError};
use crate::http_probe::prelude::ProbeSettings;
use crate::route::TraceCommand;

pub const DEFAULT_OUTPUT: &str = "trace_output.txt";

/// Traces the route to an endpoint and explains why an HTTPS connection to
/// it fails.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Cli {
    /// Host name or URL to diagnose, e.g. `example.com` or `http://example.com:8080`.
    pub endpoint: String,

    /// User agent sent with the connection probe.
    #[arg(long, env = "ENDPOINT_TRACER_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Report file to write.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// YAML configuration file.
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Only write the report file, do not mirror it to the console.
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid user agent {0:?}: must be a non-empty HTTP header value")]
    UserAgent(String),

    #[error("traceroute program must not be empty")]
    TraceProgram,

    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub endpoint: Endpoint,
    pub user_agent: String,
    pub output: PathBuf,
    pub quiet: bool,
    pub traceroute: TraceCommand,
}

impl AppConfig {
    /// Merges the command line over the file configuration over defaults.
    pub fn resolve(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let endpoint = Endpoint::parse(&cli.endpoint)?;

        let defaults = ProbeSettings::default();
        let user_agent = cli
            .user_agent
            .or(file.user_agent)
            .unwrap_or(defaults.user_agent);
        validate_user_agent(&user_agent)?;

        let output = cli
            .output
            .or_else(|| file.output.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

        let traceroute = file.traceroute.unwrap_or_default();
        if traceroute.program.trim().is_empty() {
            return Err(ConfigError::TraceProgram);
        }

        Ok(Self {
            endpoint,
            user_agent,
            output,
            quiet: cli.quiet,
            traceroute,
        })
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            user_agent: self.user_agent.clone(),
            ..ProbeSettings::default()
        }
    }
}

/// Load the application configuration from the command line and, when one is
/// named by `--config` or `CONFIG_FILE`, a YAML file.
pub fn load_config(cli: Cli) -> Result<AppConfig, ConfigError> {
    let file = match &cli.config {
        Some(path) => read_file_config(path)?,
        None => FileConfig::default(),
    };
    AppConfig::resolve(cli, file)
}

fn read_file_config(path: &PathBuf) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;

    if contents.trim().is_empty() {
        log::debug!("{} is empty, using defaults", path.display());
        return Ok(FileConfig::default());
    }

    let config = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;
    log::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

fn validate_user_agent(user_agent: &str) -> Result<(), ConfigError> {
    if user_agent.trim().is_empty() || HeaderValue::from_str(user_agent).is_err() {
        return Err(ConfigError::UserAgent(user_agent.to_string()));
    }
    Ok(())
}

/// Installs the stderr log subscriber, filtered by `RUST_LOG` (default `warn`).
/// Records emitted through the `log` macros are forwarded to it.
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
    {
        eprintln!("Failed to install logger: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["endpoint-tracer"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("cli")
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::resolve(cli(&["example.com"]), FileConfig::default()).expect("config");

        assert_eq!(config.endpoint.probe_url().as_str(), "https://example.com/");
        assert_eq!(config.output, PathBuf::from(DEFAULT_OUTPUT));
        assert_eq!(config.user_agent, ProbeSettings::default().user_agent);
        assert_eq!(config.traceroute, TraceCommand::default());
        assert!(!config.quiet);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig {
            user_agent: Some("from-file/1.0".to_string()),
            output: Some("file.txt".to_string()),
            traceroute: Some(TraceCommand {
                program: "traceroute".to_string(),
                args: vec!["-n".to_string()],
            }),
        };

        let config = AppConfig::resolve(
            cli(&["example.com", "--user-agent", "from-cli/2.0", "--quiet"]),
            file,
        )
        .expect("config");

        assert_eq!(config.user_agent, "from-cli/2.0");
        assert_eq!(config.output, PathBuf::from("file.txt"));
        assert_eq!(config.traceroute.args, vec!["-n"]);
        assert!(config.quiet);
        assert_eq!(config.probe_settings().user_agent, "from-cli/2.0");
    }

    #[test]
    fn test_rejects_invalid_user_agent() {
        for agent in ["", "   ", "bad\nagent"] {
            let file = FileConfig {
                user_agent: Some(agent.to_string()),
                ..FileConfig::default()
            };
            let err = AppConfig::resolve(cli(&["example.com"]), file).unwrap_err();
            assert!(matches!(err, ConfigError::UserAgent(_)), "{agent:?} gave {err}");
        }
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let err = AppConfig::resolve(cli(&["ftp://example.com"]), FileConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Endpoint(EndpointError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("absent.yml");
        let path = path.to_str().expect("utf-8 path");

        let err = load_config(cli(&["example.com", "--config", path])).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    fn write_config(dir: &TempDir, contents: &str) -> String {
        let path = dir.path().join("config.yml");
        std::fs::write(&path, contents).expect("write config");
        path.to_str().expect("utf-8 path").to_string()
    }

    #[test]
    fn test_reads_config_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_config(&dir, "output: report.txt\ntraceroute:\n  program: tracepath\n");

        let config = load_config(cli(&["example.com", "--config", &path])).expect("config");

        assert_eq!(config.output, PathBuf::from("report.txt"));
        assert_eq!(config.traceroute.program, "tracepath");
    }

    #[test]
    fn test_empty_config_file_uses_defaults() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_config(&dir, "\n");

        let config = load_config(cli(&["example.com", "--config", &path])).expect("config");

        assert_eq!(config.output, PathBuf::from(DEFAULT_OUTPUT));
        assert_eq!(config.traceroute, TraceCommand::default());
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_config(&dir, "traceroute: [unclosed");

        let err = load_config(cli(&["example.com", "--config", &path]));

        assert!(matches!(err, Err(ConfigError::Parse { .. })));
    }
}
