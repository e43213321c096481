//! Layered configuration loading
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`{PREFIX}_…`, `__` separates nested keys)
//! 2. Configuration file (format chosen by extension)
//! 3. Default values of the target type

use std::path::Path;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Build the figment for `path`, without environment overrides
fn file_figment(figment: Figment, path: &Path) -> Result<Figment> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Config("Config file must have an extension".to_string()))?;

    match extension {
        "toml" => Ok(figment.merge(Toml::file(path))),
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        "json" => Ok(figment.merge(Json::file(path))),
        _ => Err(Error::Config(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}

/// Load `T` from defaults, then `path`, then `{env_prefix}_*` variables
pub fn load_config<T, P>(path: P, env_prefix: &str) -> Result<T>
where
    T: Serialize + for<'de> Deserialize<'de> + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let figment = Figment::from(Serialized::defaults(T::default()));
    let figment = file_figment(figment, path)?
        .merge(Env::prefixed(&format!("{}_", env_prefix.to_uppercase())).split("__"));

    debug!("Loading configuration from {}", path.display());
    figment
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))
}

/// Load configuration from a specific file only
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    file_figment(Figment::new(), path.as_ref())?
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration from file: {}", e)))
}
