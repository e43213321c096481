//! Command-line arguments

use std::path::PathBuf;

use clap::Parser;

use crate::config::LinksrvConfig;

/// Command-line arguments for linksrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "linksrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Field device polling service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(short = 'c', long, default_value = "config/linksrv.yaml")]
    pub config: PathBuf,

    /// Log level or filter directive, overrides the configuration
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Log directory, overrides the configuration
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

impl Args {
    /// Apply command-line overrides to a loaded configuration
    pub fn apply(&self, config: &mut LinksrvConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.logging.log_dir = dir.clone();
        }
        config.logging.service_name = config.service.name.clone();
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["linksrv"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config/linksrv.yaml"));
        assert!(!args.validate);
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "linksrv",
            "--config",
            "/etc/linksrv.toml",
            "-l",
            "debug",
            "--log-dir",
            "/var/log/linksrv",
            "--validate",
        ])
        .unwrap();
        let mut config = LinksrvConfig::default();
        args.apply(&mut config);

        assert!(args.validate);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.log_dir, PathBuf::from("/var/log/linksrv"));
    }
}
