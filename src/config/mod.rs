pub mod app_config;
pub mod model;

pub use app_config::{AppConfig, Cli, ConfigError, load_config, setup_logging};
